//! Camera intrinsics and their adjustment for image scaling and cropping.

use rten_tensor::prelude::*;
use rten_tensor::{NdTensor, NdTensorView};

use crate::errors::{CameraFileError, ShapeError};

/// Pinhole camera intrinsics.
///
/// As a matrix this is
///
/// ```text
/// | fx  0 cx |
/// |  0 fy cy |
/// |  0  0  1 |
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Intrinsics {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Intrinsics {
        Intrinsics { fx, fy, cx, cy }
    }

    /// Extract focal lengths and principal point from a 3x3 matrix.
    ///
    /// Skew and the bottom row are ignored.
    pub fn from_matrix(matrix: NdTensorView<f32, 2>) -> Result<Intrinsics, ShapeError> {
        if matrix.shape() != [3, 3] {
            return Err(ShapeError::IncompatibleShapes {
                name: "intrinsics",
                expected: vec![3, 3],
                actual: matrix.shape().to_vec(),
            });
        }
        Ok(Intrinsics {
            fx: matrix[[0, 0]],
            fy: matrix[[1, 1]],
            cx: matrix[[0, 2]],
            cy: matrix[[1, 2]],
        })
    }

    /// Parse the contents of a camera file.
    ///
    /// The first non-empty line must hold the nine entries of a row-major 3x3
    /// matrix, separated by commas. Empty fields default to `1.0`.
    pub fn parse_camera_file(text: &str) -> Result<NdTensor<f32, 2>, CameraFileError> {
        let line = text
            .lines()
            .map(|line| line.trim())
            .find(|line| !line.is_empty())
            .ok_or(CameraFileError::Empty)?;

        let values = line
            .split(',')
            .map(|field| match field.trim() {
                "" => Ok(1.0),
                field => field
                    .parse::<f32>()
                    .map_err(|_| CameraFileError::InvalidNumber(field.to_string())),
            })
            .collect::<Result<Vec<f32>, _>>()?;

        if values.len() != 9 {
            return Err(CameraFileError::FieldCount(values.len()));
        }
        Ok(NdTensor::from_data([3, 3], values))
    }

    /// Return the intrinsics for an image that has been resized by
    /// `x_scale` horizontally and `y_scale` vertically.
    pub fn scaled(&self, x_scale: f32, y_scale: f32) -> Intrinsics {
        Intrinsics {
            fx: self.fx * x_scale,
            fy: self.fy * y_scale,
            cx: self.cx * x_scale,
            cy: self.cy * y_scale,
        }
    }

    /// Return the intrinsics for a window of an image whose top-left corner
    /// is at (`offset_x`, `offset_y`).
    ///
    /// Cropping moves the principal point but leaves focal lengths unchanged.
    pub fn cropped(&self, offset_x: usize, offset_y: usize) -> Intrinsics {
        Intrinsics {
            cx: self.cx - offset_x as f32,
            cy: self.cy - offset_y as f32,
            ..*self
        }
    }

    /// Return the intrinsics for level `scale` of an image pyramid, where each
    /// level halves the resolution of the previous one.
    pub fn downscaled(&self, scale: usize) -> Intrinsics {
        let exponent = i32::try_from(scale).unwrap_or(i32::MAX);
        let factor = 2f32.powi(exponent);
        Intrinsics {
            fx: self.fx / factor,
            fy: self.fy / factor,
            cx: self.cx / factor,
            cy: self.cy / factor,
        }
    }

    /// Check that focal lengths are positive and finite.
    pub fn validate(&self) -> Result<(), ShapeError> {
        let valid = |f: f32| f.is_finite() && f > 0.;
        if !valid(self.fx) || !valid(self.fy) {
            return Err(ShapeError::InvalidFocalLength {
                fx: self.fx,
                fy: self.fy,
            });
        }
        Ok(())
    }

    pub fn to_matrix(&self) -> [[f32; 3]; 3] {
        [
            [self.fx, 0., self.cx],
            [0., self.fy, self.cy],
            [0., 0., 1.],
        ]
    }
}

/// Build a batch of intrinsics matrices with shape `[batch, 3, 3]`.
///
/// The batch size is the length of `fx`. The other slices must have the same
/// length. The bottom row of every matrix is `[0, 0, 1]`.
pub fn make_intrinsics_matrix(
    fx: &[f32],
    fy: &[f32],
    cx: &[f32],
    cy: &[f32],
) -> Result<NdTensor<f32, 3>, ShapeError> {
    let batch = fx.len();
    for len in [fy.len(), cx.len(), cy.len()] {
        if len != batch {
            return Err(ShapeError::BatchSizeMismatch {
                expected: batch,
                actual: len,
            });
        }
    }

    let intrinsics: Vec<Intrinsics> = (0..batch)
        .map(|b| Intrinsics::new(fx[b], fy[b], cx[b], cy[b]))
        .collect();
    Ok(intrinsics_to_matrices(&intrinsics))
}

/// Extract the intrinsics of each matrix in a `[batch, 3, 3]` tensor.
pub fn batch_intrinsics(matrices: NdTensorView<f32, 3>) -> Result<Vec<Intrinsics>, ShapeError> {
    let [batch, rows, cols] = matrices.shape();
    if rows != 3 || cols != 3 {
        return Err(ShapeError::IncompatibleShapes {
            name: "intrinsics",
            expected: vec![batch, 3, 3],
            actual: vec![batch, rows, cols],
        });
    }
    (0..batch)
        .map(|b| Intrinsics::from_matrix(matrices.slice(b)))
        .collect()
}

/// Build a `[batch, 3, 3]` tensor from a list of intrinsics.
pub fn intrinsics_to_matrices(intrinsics: &[Intrinsics]) -> NdTensor<f32, 3> {
    let data: Vec<f32> = intrinsics
        .iter()
        .flat_map(|k| k.to_matrix().into_iter().flatten())
        .collect();
    NdTensor::from_data([intrinsics.len(), 3, 3], data)
}

/// Compute intrinsics for each level of an image pyramid.
///
/// `intrinsics` has shape `[batch, 3, 3]`. The result has shape
/// `[batch, num_scales, 3, 3]`, where scale `s` has focal lengths and
/// principal point divided by `2^s`. Scale 0 matches the input.
pub fn multi_scale_intrinsics(
    intrinsics: NdTensorView<f32, 3>,
    num_scales: usize,
) -> Result<NdTensor<f32, 4>, ShapeError> {
    let base = batch_intrinsics(intrinsics)?;
    let batch = base.len();

    let mut output = NdTensor::zeros([batch, num_scales, 3, 3]);
    for s in 0..num_scales {
        let scaled: Vec<Intrinsics> = base.iter().map(|k| k.downscaled(s)).collect();
        output
            .slice_mut((.., s))
            .copy_from(&intrinsics_to_matrices(&scaled));
    }
    Ok(output)
}
