//! Error types that are reported by various public APIs.

use std::error::Error;
use std::fmt;
use std::path::PathBuf;

use depthseq_imageio::ReadImageError;
use depthseq_imageproc::ImageProcError;

/// Errors caused by tensors whose shapes do not match the configured sizes,
/// or by values that would produce a degenerate camera model.
///
/// These indicate a configuration mistake rather than a transient failure
/// and are not recoverable by retrying.
#[derive(Clone, Debug, PartialEq)]
pub enum ShapeError {
    /// A frame strip does not have the expected `[height, width, channels]`.
    StripShape {
        expected: [usize; 3],
        actual: [usize; 3],
    },

    /// The source frame count cannot be split evenly around a centered
    /// target frame.
    InvalidSourceCount(usize),

    /// Per-element parameters of a batch have different lengths.
    BatchSizeMismatch { expected: usize, actual: usize },

    /// Tensors that are combined into one batch have different shapes.
    IncompatibleShapes {
        name: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A batch contained no samples.
    EmptyBatch,

    /// A combined image does not have the channel count implied by the
    /// number of source frames.
    ChannelCount { expected: usize, actual: usize },

    /// An intrinsics matrix had a non-positive or non-finite focal length.
    InvalidFocalLength { fx: f32, fy: f32 },

    /// A resize or crop could not be applied to the batch.
    ImageProc(ImageProcError),
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StripShape { expected, actual } => write!(
                f,
                "expected frame strip of shape {:?} but found {:?}",
                expected, actual
            ),
            Self::InvalidSourceCount(n) => write!(
                f,
                "source frame count {} must be even and non-zero to center the target frame",
                n
            ),
            Self::BatchSizeMismatch { expected, actual } => write!(
                f,
                "batch size mismatch: expected {} elements but found {}",
                expected, actual
            ),
            Self::IncompatibleShapes {
                name,
                expected,
                actual,
            } => write!(
                f,
                "shape of {} is {:?}, expected {:?}",
                name, actual, expected
            ),
            Self::EmptyBatch => write!(f, "batch is empty"),
            Self::ChannelCount { expected, actual } => write!(
                f,
                "expected image with {} channels but found {}",
                expected, actual
            ),
            Self::InvalidFocalLength { fx, fy } => {
                write!(f, "invalid focal length fx={} fy={}", fx, fy)
            }
            Self::ImageProc(e) => write!(f, "image processing failed: {}", e),
        }
    }
}

impl Error for ShapeError {}

impl From<ImageProcError> for ShapeError {
    fn from(value: ImageProcError) -> Self {
        ShapeError::ImageProc(value)
    }
}

/// Errors reported when parsing a camera intrinsics file.
#[derive(Clone, Debug, PartialEq)]
pub enum CameraFileError {
    /// The file contains no non-empty line.
    Empty,
    /// The first line does not contain exactly nine fields.
    FieldCount(usize),
    /// A field could not be parsed as a number.
    InvalidNumber(String),
}

impl fmt::Display for CameraFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "camera file is empty"),
            Self::FieldCount(n) => write!(f, "expected 9 comma-separated values, found {}", n),
            Self::InvalidNumber(s) => write!(f, "invalid number \"{}\"", s),
        }
    }
}

impl Error for CameraFileError {}

/// Errors reported when parsing a sample manifest.
#[derive(Clone, Debug, PartialEq)]
pub struct ManifestError {
    /// One-based line number of the malformed entry.
    pub line: usize,
    /// Content of the malformed line.
    pub content: String,
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: expected \"<subfolder> <frame_id>\" but found \"{}\"",
            self.line, self.content
        )
    }
}

impl Error for ManifestError {}

/// Errors reported when loading or validating a [`Config`](crate::Config).
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    IoError(std::io::Error),
    /// The configuration file is not valid JSON or is missing a key.
    ParseError(serde_json::Error),
    /// A configuration value is outside of its allowed range.
    InvalidValue {
        key: &'static str,
        message: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IoError(e) => write!(f, "failed to read config: {}", e),
            Self::ParseError(e) => write!(f, "failed to parse config: {}", e),
            Self::InvalidValue { key, message } => write!(f, "invalid `{}`: {}", key, message),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::IoError(e) => Some(e),
            Self::ParseError(e) => Some(e),
            Self::InvalidValue { .. } => None,
        }
    }
}

/// Top-level error for loading samples and assembling batches.
///
/// Any of these ends batch production. Samples are never skipped, since that
/// would desynchronize the image, mask and intrinsics streams.
#[derive(Debug)]
pub enum DataError {
    /// Tensor shapes did not match the configuration.
    Shape(ShapeError),
    /// The configuration is invalid.
    Config(ConfigError),
    /// The manifest is malformed.
    Manifest(ManifestError),
    /// A file could not be read.
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
    /// An image or mask could not be decoded.
    Image {
        path: PathBuf,
        error: ReadImageError,
    },
    /// A camera file is malformed.
    Camera {
        path: PathBuf,
        error: CameraFileError,
    },
    /// A sample index is outside of the dataset.
    SampleIndex { index: usize, len: usize },
    /// The background loader stopped without reporting an error.
    LoaderDisconnected,
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shape(e) => write!(f, "shape error: {}", e),
            Self::Config(e) => write!(f, "config error: {}", e),
            Self::Manifest(e) => write!(f, "manifest error: {}", e),
            Self::Io { path, error } => write!(f, "{}: {}", path.display(), error),
            Self::Image { path, error } => write!(f, "{}: {}", path.display(), error),
            Self::Camera { path, error } => write!(f, "{}: {}", path.display(), error),
            Self::SampleIndex { index, len } => {
                write!(f, "sample index {} out of range for {} samples", index, len)
            }
            Self::LoaderDisconnected => write!(f, "loader thread exited unexpectedly"),
        }
    }
}

impl Error for DataError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Shape(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Manifest(e) => Some(e),
            Self::Io { error, .. } => Some(error),
            Self::Image { error, .. } => Some(error),
            Self::Camera { error, .. } => Some(error),
            Self::SampleIndex { .. } | Self::LoaderDisconnected => None,
        }
    }
}

impl From<ShapeError> for DataError {
    fn from(value: ShapeError) -> Self {
        DataError::Shape(value)
    }
}

impl From<ConfigError> for DataError {
    fn from(value: ConfigError) -> Self {
        DataError::Config(value)
    }
}

impl From<ManifestError> for DataError {
    fn from(value: ManifestError) -> Self {
        DataError::Manifest(value)
    }
}
