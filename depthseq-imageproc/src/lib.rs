//! Provides geometric image processing functions for batches of images.
//!
//! Images are NHWC tensors. The functions here operate on the height and
//! width dimensions and treat all channels identically, which makes them
//! suitable for transforming images together with pixel-aligned data such as
//! label masks that have been concatenated along the channel axis.

use std::error::Error;
use std::fmt;

mod crop;
mod resize;

pub use crop::crop_to_bounding_box;
pub use resize::resize_area;

/// Errors reported by image processing functions.
#[derive(Clone, Debug, PartialEq)]
pub enum ImageProcError {
    /// The input image has zero height or width.
    EmptyInput,
    /// The requested output has zero height or width.
    EmptyOutput,
    /// A crop window extends beyond the edges of the image.
    CropOutOfBounds {
        /// Height and width of the input image.
        image: [usize; 2],
        /// Y and X offset of the crop window.
        offset: [usize; 2],
        /// Height and width of the crop window.
        size: [usize; 2],
    },
}

impl fmt::Display for ImageProcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "input image is empty"),
            Self::EmptyOutput => write!(f, "output size is empty"),
            Self::CropOutOfBounds {
                image,
                offset,
                size,
            } => write!(
                f,
                "crop window {:?} at offset {:?} exceeds image size {:?}",
                size, offset, image
            ),
        }
    }
}

impl Error for ImageProcError {}
