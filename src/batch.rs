//! Assembly of unpacked samples into training and evaluation batches.

use rten_tensor::prelude::*;
use rten_tensor::{NdTensor, NdTensorView};

use crate::augment::Augmenter;
use crate::config::Config;
use crate::errors::ShapeError;
use crate::intrinsics::multi_scale_intrinsics;
use crate::rng::UniformSource;
use crate::unpack::{unpack_sequence, UnpackedSequence, FRAME_CHANNELS};

/// A decoded training sample.
///
/// All five parts of a sample are kept together so that they are always
/// batched at the same position.
#[derive(Clone, Debug)]
pub struct TrainSample {
    pub image: UnpackedSequence,
    pub semantic: UnpackedSequence,
    /// Camera intrinsics, shape `[3, 3]`.
    pub intrinsics: NdTensor<f32, 2>,
}

/// A decoded evaluation sample. Evaluation does not use masks.
#[derive(Clone, Debug)]
pub struct EvalSample {
    pub image: UnpackedSequence,
    /// Camera intrinsics, shape `[3, 3]`.
    pub intrinsics: NdTensor<f32, 2>,
}

/// An augmented training batch.
#[derive(Clone, Debug)]
pub struct TrainBatch {
    /// Target frames, shape `[batch, height, width, 3]`.
    pub tgt_image: NdTensor<u8, 4>,
    /// Source frames, shape `[batch, height, width, 3 * num_source]`.
    pub src_image_stack: NdTensor<u8, 4>,
    /// Target frame masks, shape `[batch, height, width, 3]`.
    pub tgt_sem: NdTensor<u8, 4>,
    /// Source frame masks, shape `[batch, height, width, 3 * num_source]`.
    pub src_sem_stack: NdTensor<u8, 4>,
    /// Intrinsics for each pyramid level, shape `[batch, num_scales, 3, 3]`.
    pub intrinsics: NdTensor<f32, 4>,
}

/// An evaluation batch.
#[derive(Clone, Debug)]
pub struct EvalBatch {
    /// Target frames, shape `[batch, height, width, 3]`.
    pub tgt_image: NdTensor<u8, 4>,
    /// Source frames, shape `[batch, height, width, 3 * num_source]`.
    pub src_image_stack: NdTensor<u8, 4>,
    /// Intrinsics as read from the camera files, shape `[batch, 3, 3]`.
    pub intrinsics: NdTensor<f32, 3>,
}

/// Stack tensors of identical shape along a new leading batch dimension.
fn stack<T: Copy>(
    name: &'static str,
    items: &[NdTensorView<T, 3>],
) -> Result<NdTensor<T, 4>, ShapeError> {
    let first = items.first().ok_or(ShapeError::EmptyBatch)?;
    let shape = first.shape();

    let mut data = Vec::with_capacity(items.len() * first.len());
    for item in items {
        if item.shape() != shape {
            return Err(ShapeError::IncompatibleShapes {
                name,
                expected: shape.to_vec(),
                actual: item.shape().to_vec(),
            });
        }
        data.extend(item.iter().copied());
    }

    let [d0, d1, d2] = shape;
    Ok(NdTensor::from_data([items.len(), d0, d1, d2], data))
}

/// Stack `[3, 3]` intrinsics matrices into a `[batch, 3, 3]` tensor.
fn stack_intrinsics(items: &[NdTensorView<f32, 2>]) -> Result<NdTensor<f32, 3>, ShapeError> {
    let mut data = Vec::with_capacity(items.len() * 9);
    for item in items {
        if item.shape() != [3, 3] {
            return Err(ShapeError::IncompatibleShapes {
                name: "intrinsics",
                expected: vec![3, 3],
                actual: item.shape().to_vec(),
            });
        }
        data.extend(item.iter().copied());
    }
    if items.is_empty() {
        return Err(ShapeError::EmptyBatch);
    }
    Ok(NdTensor::from_data([items.len(), 3, 3], data))
}

/// Concatenate NHWC tensors along the channel axis.
fn concat_channels(parts: &[NdTensorView<u8, 4>]) -> Result<NdTensor<u8, 4>, ShapeError> {
    let first = parts.first().ok_or(ShapeError::EmptyBatch)?;
    let [batch, height, width, _] = first.shape();
    let total_chans = parts.iter().map(|p| p.size(3)).sum();

    let mut output = NdTensor::zeros([batch, height, width, total_chans]);
    let mut chan = 0;
    for part in parts {
        let [b, h, w, c] = part.shape();
        if [b, h, w] != [batch, height, width] {
            return Err(ShapeError::IncompatibleShapes {
                name: "channel group",
                expected: vec![batch, height, width, c],
                actual: vec![b, h, w, c],
            });
        }
        output.slice_mut((.., .., .., chan..chan + c)).copy_from(part);
        chan += c;
    }
    Ok(output)
}

/// Split an NHWC tensor into the target frame channels and the source frame
/// channels.
fn split_target(images: NdTensorView<u8, 4>) -> (NdTensor<u8, 4>, NdTensor<u8, 4>) {
    let target = images.slice((.., .., .., ..FRAME_CHANNELS)).to_tensor();
    let sources = images.slice((.., .., .., FRAME_CHANNELS..)).to_tensor();
    (target, sources)
}

/// Unpacks samples and combines them into batches.
#[derive(Clone, Debug)]
pub struct BatchAssembler {
    height: usize,
    width: usize,
    num_source: usize,
    num_scales: usize,
    augmenter: Augmenter,
}

impl BatchAssembler {
    pub fn new(config: &Config) -> Result<BatchAssembler, ShapeError> {
        Ok(BatchAssembler {
            height: config.img_height,
            width: config.img_width,
            num_source: config.num_source,
            num_scales: config.num_scales,
            augmenter: Augmenter::new(config.num_source, config.augment.clone())?,
        })
    }

    /// Unpack the frame strip, mask strip and intrinsics of a training
    /// sample.
    ///
    /// The image and mask strips are unpacked independently of each other.
    pub fn unpack_train_sample(
        &self,
        image_strip: NdTensorView<u8, 3>,
        sem_strip: NdTensorView<u8, 3>,
        intrinsics: NdTensor<f32, 2>,
    ) -> Result<TrainSample, ShapeError> {
        Ok(TrainSample {
            image: unpack_sequence(image_strip, self.height, self.width, self.num_source)?,
            semantic: unpack_sequence(sem_strip, self.height, self.width, self.num_source)?,
            intrinsics,
        })
    }

    /// Unpack the frame strip and intrinsics of an evaluation sample.
    pub fn unpack_eval_sample(
        &self,
        image_strip: NdTensorView<u8, 3>,
        intrinsics: NdTensor<f32, 2>,
    ) -> Result<EvalSample, ShapeError> {
        Ok(EvalSample {
            image: unpack_sequence(image_strip, self.height, self.width, self.num_source)?,
            intrinsics,
        })
    }

    /// Combine training samples into an augmented batch.
    ///
    /// Samples are batched in the order given. The color frames and masks are
    /// augmented together, then the intrinsics are expanded to one matrix per
    /// pyramid level.
    pub fn assemble_train<R: UniformSource>(
        &self,
        samples: &[TrainSample],
        rng: &mut R,
    ) -> Result<TrainBatch, ShapeError> {
        let tgt_images: Vec<_> = samples.iter().map(|s| s.image.target.view()).collect();
        let src_images: Vec<_> = samples.iter().map(|s| s.image.sources.view()).collect();
        let tgt_sems: Vec<_> = samples.iter().map(|s| s.semantic.target.view()).collect();
        let src_sems: Vec<_> = samples.iter().map(|s| s.semantic.sources.view()).collect();
        let intrinsics: Vec<_> = samples.iter().map(|s| s.intrinsics.view()).collect();

        let tgt_image = stack("tgt_image", &tgt_images)?;
        let src_image_stack = stack("src_image_stack", &src_images)?;
        let tgt_sem = stack("tgt_sem", &tgt_sems)?;
        let src_sem_stack = stack("src_sem_stack", &src_sems)?;
        let intrinsics = stack_intrinsics(&intrinsics)?;

        let combined = concat_channels(&[
            tgt_image.view(),
            src_image_stack.view(),
            tgt_sem.view(),
            src_sem_stack.view(),
        ])?;
        let augmented = self.augmenter.augment(
            combined.view(),
            intrinsics.view(),
            self.height,
            self.width,
            rng,
        )?;

        let (tgt_image, src_image_stack) = split_target(augmented.color.view());
        let (tgt_sem, src_sem_stack) = split_target(augmented.semantic.view());
        let intrinsics = multi_scale_intrinsics(augmented.intrinsics.view(), self.num_scales)?;

        Ok(TrainBatch {
            tgt_image,
            src_image_stack,
            tgt_sem,
            src_sem_stack,
            intrinsics,
        })
    }

    /// Combine evaluation samples into a batch, without augmentation.
    pub fn assemble_eval(&self, samples: &[EvalSample]) -> Result<EvalBatch, ShapeError> {
        let targets: Vec<_> = samples.iter().map(|s| s.image.target.view()).collect();
        let sources: Vec<_> = samples.iter().map(|s| s.image.sources.view()).collect();
        let intrinsics: Vec<_> = samples.iter().map(|s| s.intrinsics.view()).collect();

        Ok(EvalBatch {
            tgt_image: stack("tgt_image", &targets)?,
            src_image_stack: stack("src_image_stack", &sources)?,
            intrinsics: stack_intrinsics(&intrinsics)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use rten_tensor::prelude::*;
    use rten_tensor::NdTensor;

    use super::{concat_channels, stack, BatchAssembler, EvalSample, TrainSample};
    use crate::config::Config;
    use crate::errors::ShapeError;
    use crate::intrinsics::{intrinsics_to_matrices, Intrinsics};
    use crate::rng::seeded_rng;

    fn test_config(height: usize, width: usize) -> Config {
        Config {
            dataset_dir: "data".into(),
            semantic_dataset_dir: "sem".into(),
            img_height: height,
            img_width: width,
            num_source: 2,
            num_scales: 4,
            batch_size: 2,
            num_threads: 1,
            seed: Some(1),
            prefetch: 1,
            split: "train".into(),
            augment: Default::default(),
        }
    }

    /// Create a strip whose frames are filled with `value + 10 * frame_index`.
    fn strip(height: usize, width: usize, value: u8) -> NdTensor<u8, 3> {
        let mut strip = NdTensor::zeros([height, width * 3, 3]);
        for frame in 0..3 {
            strip
                .slice_mut((.., frame * width..(frame + 1) * width, ..))
                .iter_mut()
                .for_each(|x| *x = value + 10 * frame as u8);
        }
        strip
    }

    fn camera(fx: f32) -> NdTensor<f32, 2> {
        intrinsics_to_matrices(&[Intrinsics::new(fx, fx, 8., 4.)])
            .slice(0usize)
            .to_tensor()
    }

    #[test]
    fn test_stack() {
        let a = NdTensor::from_data([1, 2, 1], vec![1u8, 2]);
        let b = NdTensor::from_data([1, 2, 1], vec![3u8, 4]);
        let stacked = stack("test", &[a.view(), b.view()]).unwrap();
        assert_eq!(stacked.shape(), [2, 1, 2, 1]);
        assert_eq!(stacked.to_vec(), [1, 2, 3, 4]);

        let c = NdTensor::from_data([2, 1, 1], vec![5u8, 6]);
        assert!(matches!(
            stack("test", &[a.view(), c.view()]),
            Err(ShapeError::IncompatibleShapes { name: "test", .. })
        ));
        assert_eq!(
            stack::<u8>("test", &[]).err(),
            Some(ShapeError::EmptyBatch)
        );
    }

    #[test]
    fn test_concat_channels() {
        let a = NdTensor::from_data([1, 1, 2, 1], vec![1u8, 2]);
        let b = NdTensor::from_data([1, 1, 2, 2], vec![10u8, 11, 20, 21]);
        let combined = concat_channels(&[a.view(), b.view()]).unwrap();
        assert_eq!(combined.shape(), [1, 1, 2, 3]);
        assert_eq!(combined.to_vec(), [1, 10, 11, 2, 20, 21]);
    }

    #[test]
    fn test_assemble_eval() {
        let (height, width) = (4, 6);
        let assembler = BatchAssembler::new(&test_config(height, width)).unwrap();

        let samples: Vec<EvalSample> = [10u8, 50]
            .iter()
            .enumerate()
            .map(|(i, &value)| {
                assembler
                    .unpack_eval_sample(strip(height, width, value).view(), camera(100. + i as f32))
                    .unwrap()
            })
            .collect();
        let batch = assembler.assemble_eval(&samples).unwrap();

        assert_eq!(batch.tgt_image.shape(), [2, height, width, 3]);
        assert_eq!(batch.src_image_stack.shape(), [2, height, width, 6]);
        assert_eq!(batch.intrinsics.shape(), [2, 3, 3]);

        // Batch order follows sample order and pixels are untouched.
        assert!(batch.tgt_image.slice(0usize).iter().all(|&x| x == 20));
        assert!(batch.tgt_image.slice(1usize).iter().all(|&x| x == 60));
        assert_eq!(batch.src_image_stack[[1, 0, 0, 0]], 50);
        assert_eq!(batch.src_image_stack[[1, 0, 0, 3]], 70);
        assert_eq!(batch.intrinsics.slice(1usize).to_tensor(), camera(101.));
    }

    #[test]
    fn test_assemble_train_keeps_streams_aligned() {
        let (height, width) = (8, 12);
        let assembler = BatchAssembler::new(&test_config(height, width)).unwrap();

        // Each sample's mask strip has the same per-frame values as its image
        // strip, so alignment can be checked after augmentation.
        let samples: Vec<TrainSample> = [20u8, 120]
            .iter()
            .map(|&value| {
                assembler
                    .unpack_train_sample(
                        strip(height, width, value).view(),
                        strip(height, width, value).view(),
                        camera(200.),
                    )
                    .unwrap()
            })
            .collect();

        let mut rng = seeded_rng(Some(3));
        let batch = assembler.assemble_train(&samples, &mut rng).unwrap();

        assert_eq!(batch.tgt_image.shape(), [2, height, width, 3]);
        assert_eq!(batch.src_image_stack.shape(), [2, height, width, 6]);
        assert_eq!(batch.tgt_sem.shape(), [2, height, width, 3]);
        assert_eq!(batch.src_sem_stack.shape(), [2, height, width, 6]);
        assert_eq!(batch.intrinsics.shape(), [2, 4, 3, 3]);

        // Each frame is a constant image, so area resizing and cropping keep
        // its value up to rounding. Masks are never jittered.
        let near = |x: u8, expected: u8| (x as i32 - expected as i32).abs() <= 1;
        for (b, value) in [(0usize, 20u8), (1, 120)] {
            assert!(batch.tgt_sem.slice(b).iter().all(|&x| near(x, value + 10)));
            let src_sem = batch.src_sem_stack.slice(b);
            assert!(src_sem.slice((.., .., ..3)).iter().all(|&x| near(x, value)));
            assert!(src_sem.slice((.., .., 3..)).iter().all(|&x| near(x, value + 20)));
        }

        // Intrinsics are scaled up by augmentation and halved per level.
        let fx0 = batch.intrinsics[[0, 0, 0, 0]];
        assert!((200.0..=230.0).contains(&fx0));
        for s in 1..4 {
            assert_eq!(
                batch.intrinsics[[0, s, 0, 0]],
                fx0 / (1 << s) as f32
            );
        }
    }

    #[test]
    fn test_assemble_train_rejects_bad_strip() {
        let assembler = BatchAssembler::new(&test_config(4, 6)).unwrap();
        let result = assembler.unpack_train_sample(
            strip(4, 6, 0).view(),
            strip(4, 5, 0).view(),
            camera(1.),
        );
        assert!(matches!(result, Err(ShapeError::StripShape { .. })));
    }
}
