use rten_tensor::prelude::*;
use rten_tensor::{NdTensor, NdTensorView};

use crate::errors::ShapeError;

/// Number of color channels in each frame of a strip.
pub const FRAME_CHANNELS: usize = 3;

/// A target frame and its temporally adjacent source frames, separated out
/// of a [frame strip](unpack_sequence).
#[derive(Clone, Debug, PartialEq)]
pub struct UnpackedSequence<T = u8> {
    /// Target frame with shape `[height, width, 3]`.
    pub target: NdTensor<T, 3>,

    /// Source frames stacked along the channel axis, with shape
    /// `[height, width, 3 * num_source]`.
    ///
    /// Channels `3 * i .. 3 * (i + 1)` hold the `i`th source frame. Frames
    /// preceding the target come first, followed by the frames after it, each
    /// group in temporal order.
    pub sources: NdTensor<T, 3>,
}

/// Check that `num_source` source frames can be split evenly around a
/// centered target frame.
pub fn check_source_count(num_source: usize) -> Result<(), ShapeError> {
    if num_source == 0 || num_source % 2 != 0 {
        return Err(ShapeError::InvalidSourceCount(num_source));
    }
    Ok(())
}

/// Return the index of the frame in a strip that holds source frame `i`.
///
/// Source frames skip over the target frame, which sits in the middle of the
/// strip.
fn strip_frame_index(source: usize, num_source: usize) -> usize {
    if source < num_source / 2 {
        source
    } else {
        source + 1
    }
}

/// Split a frame strip into a target frame and a channel-stacked set of
/// source frames.
///
/// `strip` is an HWC image of shape `[height, width * (num_source + 1), 3]`
/// containing `num_source + 1` consecutive frames placed side by side in
/// temporal order, with the target frame in the middle. The frames before the
/// target are stacked first, then the frames after it.
///
/// The same function is used for semantic mask strips, after the masks have
/// been expanded to three channels.
pub fn unpack_sequence<T: Copy + Default>(
    strip: NdTensorView<T, 3>,
    height: usize,
    width: usize,
    num_source: usize,
) -> Result<UnpackedSequence<T>, ShapeError> {
    check_source_count(num_source)?;

    let expected = [height, width * (num_source + 1), FRAME_CHANNELS];
    if strip.shape() != expected {
        return Err(ShapeError::StripShape {
            expected,
            actual: strip.shape(),
        });
    }

    let frame = |index: usize| {
        let start = index * width;
        strip.slice((.., start..start + width, ..))
    };

    let target_start = width * (num_source / 2);
    let target = strip
        .slice((.., target_start..target_start + width, ..))
        .to_tensor();

    let mut sources = NdTensor::zeros([height, width, FRAME_CHANNELS * num_source]);
    for i in 0..num_source {
        let chan_start = i * FRAME_CHANNELS;
        sources
            .slice_mut((.., .., chan_start..chan_start + FRAME_CHANNELS))
            .copy_from(&frame(strip_frame_index(i, num_source)));
    }

    Ok(UnpackedSequence { target, sources })
}
