//! Provides utilities for decoding frame strips and semantic masks into
//! tensors for use with [depthseq](../depthseq).
//!
//! All tensors use an HWC layout with `u8` pixel values. Grayscale inputs
//! such as label masks are replicated to three channels, so that image and
//! mask strips can share the same downstream processing.

use std::error::Error;
use std::io::Cursor;
use std::path::Path;

use image::ImageReader;
use rten_tensor::prelude::*;
use rten_tensor::{NdTensor, NdTensorView};

/// Errors reported when creating a tensor from an image.
#[derive(Debug)]
pub enum ReadImageError {
    /// The image file could not be opened or read.
    IoError(std::io::Error),
    /// The image data could not be decoded.
    ImageError(image::ImageError),
}

impl std::fmt::Display for ReadImageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadImageError::IoError(e) => write!(f, "failed to read image: {}", e),
            ReadImageError::ImageError(e) => write!(f, "failed to decode image: {}", e),
        }
    }
}

impl Error for ReadImageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadImageError::IoError(e) => Some(e),
            ReadImageError::ImageError(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ReadImageError {
    fn from(value: std::io::Error) -> Self {
        ReadImageError::IoError(value)
    }
}

impl From<image::ImageError> for ReadImageError {
    fn from(value: image::ImageError) -> Self {
        ReadImageError::ImageError(value)
    }
}

/// Convert an image into an HWC tensor with 3 channels and values in the
/// range [0, 255].
///
/// Images with one channel are expanded by repeating the gray value in each
/// channel. Alpha channels are dropped.
pub fn image_to_tensor(image: image::DynamicImage) -> NdTensor<u8, 3> {
    let image = image.into_rgb8();
    let (width, height) = image.dimensions();
    NdTensor::from_data([height as usize, width as usize, 3], image.into_raw())
}

/// Decode an encoded image held in memory into an HWC tensor.
///
/// The format is detected from the contents of `data`.
pub fn decode_image(data: &[u8]) -> Result<NdTensor<u8, 3>, ReadImageError> {
    let image = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()?;
    Ok(image_to_tensor(image))
}

/// Read an image from a file into an HWC tensor.
///
/// The format is detected from the file contents rather than the extension,
/// since datasets commonly store frames under a fixed `.jpg` name regardless
/// of how they were encoded.
pub fn read_image<P: AsRef<Path>>(path: P) -> Result<NdTensor<u8, 3>, ReadImageError> {
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(image_to_tensor(image))
}

/// Errors returned when writing a tensor to an image.
#[derive(Debug)]
pub enum WriteImageError {
    /// The number of channels in the image tensor is unsupported.
    UnsupportedChannelCount,
    /// The image could not be written.
    ImageError(image::ImageError),
}

impl std::fmt::Display for WriteImageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ImageError(e) => write!(f, "failed to write image: {}", e),
            Self::UnsupportedChannelCount => write!(f, "image has unsupported number of channels"),
        }
    }
}

impl Error for WriteImageError {}

/// Write an HWC tensor to a file as a losslessly encoded PNG.
///
/// PNG is used whatever the extension of `path`, so that frames written by
/// this function read back pixel-for-pixel.
pub fn write_image<P: AsRef<Path>>(
    path: P,
    img: NdTensorView<u8, 3>,
) -> Result<(), WriteImageError> {
    let [height, width, channels] = img.shape();
    let color_type = match channels {
        1 => image::ColorType::L8,
        3 => image::ColorType::Rgb8,
        4 => image::ColorType::Rgba8,
        _ => return Err(WriteImageError::UnsupportedChannelCount),
    };

    image::save_buffer_with_format(
        path,
        &img.to_vec(),
        width as u32,
        height as u32,
        color_type,
        image::ImageFormat::Png,
    )
    .map_err(WriteImageError::ImageError)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use rten_tensor::prelude::*;
    use rten_tensor::NdTensor;

    use super::{decode_image, read_image, write_image, ReadImageError};

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.jpg");

        let img = NdTensor::from_data([2, 3, 3], (0..18u8).map(|x| x * 10).collect::<Vec<_>>());
        write_image(&path, img.view()).unwrap();

        let loaded = read_image(&path).unwrap();
        assert_eq!(loaded.shape(), [2, 3, 3]);
        assert_eq!(loaded.to_vec(), img.to_vec());
    }

    #[test]
    fn test_gray_image_is_replicated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.jpg");

        let mask = NdTensor::from_data([1, 2, 1], vec![0u8, 255]);
        write_image(&path, mask.view()).unwrap();

        let loaded = read_image(&path).unwrap();
        assert_eq!(loaded.shape(), [1, 2, 3]);
        assert_eq!(loaded.to_vec(), [0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_image(dir.path().join("missing.jpg"));
        assert!(matches!(result, Err(ReadImageError::IoError(_))));
    }

    #[test]
    fn test_decode_invalid_data() {
        let result = decode_image(b"not an image");
        assert!(result.is_err());
    }
}
