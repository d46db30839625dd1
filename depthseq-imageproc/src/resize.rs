use rayon::prelude::*;
use rten_tensor::prelude::*;
use rten_tensor::{NdTensor, NdTensorView};

use crate::ImageProcError;

/// Input pixels which contribute to one output coordinate along an axis,
/// paired with their normalized weights.
type Span = Vec<(usize, f32)>;

/// Compute the input coordinates covered by each output coordinate when
/// resizing an axis of size `in_size` to `out_size` by area averaging.
///
/// Output pixel `o` covers the input interval `[o * scale, (o + 1) * scale)`
/// where `scale = in_size / out_size`. Each input pixel overlapping that
/// interval is weighted by the length of the overlap, divided by `scale` so
/// the weights of a span sum to one.
fn area_spans(in_size: usize, out_size: usize) -> Vec<Span> {
    let scale = in_size as f32 / out_size as f32;
    (0..out_size)
        .map(|o| {
            let start = o as f32 * scale;
            let end = start + scale;
            let mut span = Vec::new();
            let mut i = start.floor() as usize;
            while (i as f32) < end {
                let overlap = end.min(i as f32 + 1.) - start.max(i as f32);
                if overlap > 0. {
                    span.push((i.min(in_size - 1), overlap / scale));
                }
                i += 1;
            }
            span
        })
        .collect()
}

/// Resize the height and width dimensions of an NHWC image batch using area
/// interpolation.
///
/// Each output pixel is the average of the input pixels it covers, weighted by
/// the covered fraction of each. This matches the behavior of TensorFlow's
/// `resize_area`. All channels are resized identically and the output is
/// returned in `f32`, without rounding back to the input type.
pub fn resize_area<T: Copy + Into<f32> + Sync>(
    input: NdTensorView<T, 4>,
    out_height: usize,
    out_width: usize,
) -> Result<NdTensor<f32, 4>, ImageProcError> {
    let [batch, in_height, in_width, chans] = input.shape();
    if in_height == 0 || in_width == 0 {
        return Err(ImageProcError::EmptyInput);
    }
    if out_height == 0 || out_width == 0 {
        return Err(ImageProcError::EmptyOutput);
    }

    let y_spans = area_spans(in_height, out_height);
    let x_spans = area_spans(in_width, out_width);

    let in_data = input.to_vec();
    let mut out_data = vec![0f32; batch * out_height * out_width * chans];

    let in_image_len = in_height * in_width * chans;
    let out_image_len = out_height * out_width * chans;
    if in_image_len == 0 || out_image_len == 0 {
        return Ok(NdTensor::from_data(
            [batch, out_height, out_width, chans],
            out_data,
        ));
    }

    let h_stride = in_width * chans;
    let w_stride = chans;

    out_data
        .par_chunks_mut(out_image_len)
        .zip(in_data.par_chunks(in_image_len))
        .for_each(|(out_img, in_img)| {
            let mut acc = vec![0f32; chans];
            for (y, y_span) in y_spans.iter().enumerate() {
                for (x, x_span) in x_spans.iter().enumerate() {
                    acc.fill(0.);
                    for &(in_y, weight_y) in y_span {
                        for &(in_x, weight_x) in x_span {
                            let weight = weight_y * weight_x;
                            let base = in_y * h_stride + in_x * w_stride;
                            for c in 0..chans {
                                let value: f32 = in_img[base + c].into();
                                acc[c] += weight * value;
                            }
                        }
                    }
                    let out_base = (y * out_width + x) * chans;
                    out_img[out_base..out_base + chans].copy_from_slice(&acc);
                }
            }
        });

    Ok(NdTensor::from_data(
        [batch, out_height, out_width, chans],
        out_data,
    ))
}
