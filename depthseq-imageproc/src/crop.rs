use rten_tensor::prelude::*;
use rten_tensor::{NdTensor, NdTensorView};

use crate::ImageProcError;

/// Crop a fixed window from the height and width dimensions of an NHWC image
/// batch.
///
/// The window's top-left corner is at (`offset_y`, `offset_x`). The same
/// window is cut from every image and every channel in the batch. Returns an
/// error if the window extends past the bottom or right edge of the images.
pub fn crop_to_bounding_box<T: Copy>(
    input: NdTensorView<T, 4>,
    offset_y: usize,
    offset_x: usize,
    height: usize,
    width: usize,
) -> Result<NdTensor<T, 4>, ImageProcError> {
    let [_batch, in_height, in_width, _chans] = input.shape();
    if offset_y + height > in_height || offset_x + width > in_width {
        return Err(ImageProcError::CropOutOfBounds {
            image: [in_height, in_width],
            offset: [offset_y, offset_x],
            size: [height, width],
        });
    }

    Ok(input
        .slice((.., offset_y..offset_y + height, offset_x..offset_x + width, ..))
        .to_tensor())
}
