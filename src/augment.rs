//! Random geometric and photometric augmentation of training batches.
//!
//! Images and their semantic masks are augmented together as one tensor whose
//! channels hold the color frames followed by the mask frames. Geometric
//! transforms are applied to all channels and the intrinsics are updated to
//! match. Photometric changes are only applied to the color channels, since
//! altering mask values would corrupt the labels.

use std::ops::Range;

use depthseq_imageproc::{crop_to_bounding_box, resize_area};
use rten_tensor::prelude::*;
use rten_tensor::{NdTensor, NdTensorView};
use serde::{Deserialize, Serialize};

use crate::errors::ShapeError;
use crate::intrinsics::{batch_intrinsics, intrinsics_to_matrices, Intrinsics};
use crate::rng::UniformSource;
use crate::unpack::{check_source_count, FRAME_CHANNELS};

/// Ranges of the random draws made by an [`Augmenter`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentOptions {
    /// Range for the horizontal and vertical scale factors.
    pub scale: Range<f32>,

    /// Photometric jitter is applied when a value drawn from `[0, 1)` is
    /// greater than this.
    pub jitter_threshold: f32,

    /// Range for the gamma exponent applied to normalized pixel values.
    pub gamma: Range<f32>,

    /// Range for the brightness multiplier.
    pub brightness: Range<f32>,

    /// Range for the per-channel color multipliers.
    pub color: Range<f32>,
}

impl Default for AugmentOptions {
    fn default() -> Self {
        AugmentOptions {
            scale: 1.0..1.15,
            jitter_threshold: 0.5,
            gamma: 0.8..1.2,
            brightness: 0.5..2.0,
            color: 0.8..1.2,
        }
    }
}

/// Output of [`Augmenter::augment`].
#[derive(Clone, Debug)]
pub struct Augmented {
    /// Color frames with shape `[batch, out_h, out_w, 3 * (num_source + 1)]`.
    /// The first three channels are the target frame.
    pub color: NdTensor<u8, 4>,

    /// Semantic masks with the same shape and channel layout as `color`.
    pub semantic: NdTensor<u8, 4>,

    /// Intrinsics adjusted for scaling and cropping, shape `[batch, 3, 3]`.
    pub intrinsics: NdTensor<f32, 3>,
}

/// Convert a working `f32` pixel value to `u8`.
///
/// The fractional part is truncated and values outside `[0, 255]` saturate.
fn to_pixel(value: f32) -> u8 {
    value as u8
}

/// Scale the images in a batch by random factors and adjust the intrinsics
/// to match.
///
/// Draws the horizontal factor and then the vertical factor from
/// `scale_range`. The batch is resized to
/// `(round(in_h * y_scale), round(in_w * x_scale))`.
pub fn random_scaling<R: UniformSource>(
    images: NdTensorView<u8, 4>,
    intrinsics: &[Intrinsics],
    scale_range: Range<f32>,
    rng: &mut R,
) -> Result<(NdTensor<f32, 4>, Vec<Intrinsics>), ShapeError> {
    let x_scale = rng.uniform_f32(scale_range.clone());
    let y_scale = rng.uniform_f32(scale_range);

    let [_, in_h, in_w, _] = images.shape();
    let out_h = (in_h as f32 * y_scale).round() as usize;
    let out_w = (in_w as f32 * x_scale).round() as usize;
    tracing::trace!(x_scale, y_scale, out_h, out_w, "random scaling");

    let resized = resize_area(images, out_h, out_w)?;
    let scaled = intrinsics
        .iter()
        .map(|k| {
            let k = k.scaled(x_scale, y_scale);
            k.validate().map(|_| k)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((resized, scaled))
}

/// Crop a randomly positioned `(out_h, out_w)` window from each image in a
/// batch and adjust the intrinsics to match.
///
/// Draws the vertical offset from `[0, in_h - out_h]` and then the horizontal
/// offset from `[0, in_w - out_w]`. The same window is used for every image.
pub fn random_cropping<T: Copy, R: UniformSource>(
    images: NdTensorView<T, 4>,
    intrinsics: &[Intrinsics],
    out_h: usize,
    out_w: usize,
    rng: &mut R,
) -> Result<(NdTensor<T, 4>, Vec<Intrinsics>), ShapeError> {
    let [_, in_h, in_w, _] = images.shape();
    if out_h > in_h || out_w > in_w {
        return Err(depthseq_imageproc::ImageProcError::CropOutOfBounds {
            image: [in_h, in_w],
            offset: [0, 0],
            size: [out_h, out_w],
        }
        .into());
    }

    let offset_y = rng.uniform_usize(0..=in_h - out_h);
    let offset_x = rng.uniform_usize(0..=in_w - out_w);
    tracing::trace!(offset_y, offset_x, "random cropping");

    let cropped = crop_to_bounding_box(images, offset_y, offset_x, out_h, out_w)?;
    let intrinsics = intrinsics
        .iter()
        .map(|k| k.cropped(offset_x, offset_y))
        .collect();

    Ok((cropped, intrinsics))
}

/// Apply a random gamma, brightness and per-channel color shift to a batch.
///
/// Values are processed in normalized `[0, 1]` space, clipped and converted
/// back to `u8`. One gamma and brightness value is drawn for the whole batch,
/// followed by one color multiplier for each channel.
pub fn random_coloring<R: UniformSource>(
    images: NdTensorView<u8, 4>,
    options: &AugmentOptions,
    rng: &mut R,
) -> NdTensor<u8, 4> {
    let chans = images.size(3);
    let gamma = rng.uniform_f32(options.gamma.clone());
    let brightness = rng.uniform_f32(options.brightness.clone());
    let colors: Vec<f32> = (0..chans)
        .map(|_| rng.uniform_f32(options.color.clone()))
        .collect();
    tracing::trace!(gamma, brightness, ?colors, "random coloring");

    let mut output = images.to_tensor();
    for (i, pixel) in output.iter_mut().enumerate() {
        let value = *pixel as f32 / 255.;
        let value = (value.powf(gamma) * brightness * colors[i % chans]).clamp(0., 1.);
        *pixel = to_pixel(value * 255.5);
    }
    output
}

/// Augments training batches of color frames and their semantic masks.
#[derive(Clone, Debug)]
pub struct Augmenter {
    num_source: usize,
    options: AugmentOptions,
}

impl Augmenter {
    pub fn new(num_source: usize, options: AugmentOptions) -> Result<Augmenter, ShapeError> {
        check_source_count(num_source)?;
        Ok(Augmenter {
            num_source,
            options,
        })
    }

    pub fn options(&self) -> &AugmentOptions {
        &self.options
    }

    /// Number of leading channels in a combined batch that hold color frames.
    pub fn color_channels(&self) -> usize {
        FRAME_CHANNELS * (self.num_source + 1)
    }

    /// Augment a batch of color frames and semantic masks.
    ///
    /// `combined` has shape `[batch, in_h, in_w, 2 * C]` where the first
    /// `C = 3 * (num_source + 1)` channels hold the target and source color
    /// frames and the remaining channels hold the corresponding masks.
    /// `intrinsics` has shape `[batch, 3, 3]`.
    ///
    /// The batch is randomly scaled up, cropped to `(out_h, out_w)` and, with
    /// probability determined by [`AugmentOptions::jitter_threshold`], the
    /// color channels are photometrically jittered. Random values are drawn
    /// from `rng` in the order scale, crop offset, jitter decision, jitter
    /// parameters.
    pub fn augment<R: UniformSource>(
        &self,
        combined: NdTensorView<u8, 4>,
        intrinsics: NdTensorView<f32, 3>,
        out_h: usize,
        out_w: usize,
        rng: &mut R,
    ) -> Result<Augmented, ShapeError> {
        let color_chans = self.color_channels();
        let [batch, _, _, chans] = combined.shape();
        if chans != 2 * color_chans {
            return Err(ShapeError::ChannelCount {
                expected: 2 * color_chans,
                actual: chans,
            });
        }

        let base = batch_intrinsics(intrinsics)?;
        if base.len() != batch {
            return Err(ShapeError::BatchSizeMismatch {
                expected: batch,
                actual: base.len(),
            });
        }
        for k in &base {
            k.validate()?;
        }

        let (scaled, scaled_k) =
            random_scaling(combined, &base, self.options.scale.clone(), rng)?;
        let (cropped, cropped_k) = random_cropping(scaled.view(), &scaled_k, out_h, out_w, rng)?;
        let cropped = cropped.map(|&x| to_pixel(x));

        let color = cropped.slice((.., .., .., ..color_chans));
        let semantic = cropped.slice((.., .., .., color_chans..)).to_tensor();

        let do_jitter = rng.uniform_f32(0.0..1.0);
        let color = if do_jitter > self.options.jitter_threshold {
            random_coloring(color, &self.options, rng)
        } else {
            color.to_tensor()
        };

        Ok(Augmented {
            color,
            semantic,
            intrinsics: intrinsics_to_matrices(&cropped_k),
        })
    }
}
