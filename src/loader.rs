//! Background loading of batches from a dataset on disk.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender};
use depthseq_imageio::read_image;
use rayon::prelude::*;
use rten_tensor::prelude::*;

use crate::batch::{BatchAssembler, EvalBatch, EvalSample, TrainBatch, TrainSample};
use crate::config::Config;
use crate::errors::{DataError, ShapeError};
use crate::intrinsics::Intrinsics;
use crate::manifest::{format_file_list, parse_manifest, SamplePaths};
use crate::rng::{seeded_rng, Permutation};
use crate::threading::ThreadPool;

/// State shared between a [`DataLoader`] and its background threads.
struct LoaderState {
    config: Config,
    samples: Vec<SamplePaths>,
    assembler: BatchAssembler,
    pool: ThreadPool,
}

impl LoaderState {
    fn read_strip(path: &Path) -> Result<rten_tensor::NdTensor<u8, 3>, DataError> {
        read_image(path).map_err(|error| DataError::Image {
            path: path.to_path_buf(),
            error,
        })
    }

    fn read_camera(path: &Path) -> Result<rten_tensor::NdTensor<f32, 2>, DataError> {
        let text = std::fs::read_to_string(path).map_err(|error| DataError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        Intrinsics::parse_camera_file(&text).map_err(|error| DataError::Camera {
            path: path.to_path_buf(),
            error,
        })
    }

    fn sample_paths(&self, index: usize) -> Result<&SamplePaths, DataError> {
        self.samples.get(index).ok_or(DataError::SampleIndex {
            index,
            len: self.samples.len(),
        })
    }

    fn load_train_sample(&self, index: usize) -> Result<TrainSample, DataError> {
        let paths = self.sample_paths(index)?;
        let image = Self::read_strip(&paths.image)?;
        let semantic = Self::read_strip(&paths.semantic)?;
        let intrinsics = Self::read_camera(&paths.camera)?;
        let sample = self
            .assembler
            .unpack_train_sample(image.view(), semantic.view(), intrinsics)?;
        Ok(sample)
    }

    fn load_eval_sample(&self, index: usize) -> Result<EvalSample, DataError> {
        let paths = self.sample_paths(index)?;
        let image = Self::read_strip(&paths.image)?;
        let intrinsics = Self::read_camera(&paths.camera)?;
        let sample = self.assembler.unpack_eval_sample(image.view(), intrinsics)?;
        Ok(sample)
    }

    /// Decode samples in parallel. The result preserves the order of
    /// `indices`.
    fn load_many<S: Send>(
        &self,
        indices: &[usize],
        load: impl Fn(&Self, usize) -> Result<S, DataError> + Sync + Send,
    ) -> Result<Vec<S>, DataError> {
        indices.par_iter().map(|&i| load(self, i)).collect()
    }

    /// Decode the samples at `indices` and assemble an augmented batch.
    ///
    /// Decoding and augmentation both run on the loader's thread pool.
    fn build_train_batch(
        &self,
        indices: &[usize],
        rng: &mut fastrand::Rng,
    ) -> Result<TrainBatch, DataError> {
        self.pool.run(|| -> Result<TrainBatch, DataError> {
            let samples = self.load_many(indices, Self::load_train_sample)?;
            let batch = self.assembler.assemble_train(&samples, rng)?;
            Ok(batch)
        })
    }

    fn build_eval_batch(&self, indices: &[usize]) -> Result<EvalBatch, DataError> {
        self.pool.run(|| -> Result<EvalBatch, DataError> {
            let samples = self.load_many(indices, Self::load_eval_sample)?;
            let batch = self.assembler.assemble_eval(&samples)?;
            Ok(batch)
        })
    }

    /// Produce shuffled, augmented training batches until the consumer goes
    /// away or an error occurs.
    ///
    /// Each epoch visits every sample once in a new random order. Batches may
    /// span the boundary between epochs.
    fn produce_train(&self, sender: Sender<Result<TrainBatch, DataError>>) {
        let num_samples = self.samples.len();
        if num_samples == 0 {
            let _ = sender.send(Err(ShapeError::EmptyBatch.into()));
            return;
        }

        let mut shuffle_rng = seeded_rng(self.config.seed);
        let mut augment_rng = fastrand::Rng::with_seed(shuffle_rng.u64(..));
        let batch_size = self.config.batch_size;
        let mut pending = VecDeque::new();
        let mut epoch = 0;

        loop {
            while pending.len() < batch_size {
                let order = Permutation::shuffled(num_samples, &mut shuffle_rng);
                pending.extend(order.indices().iter().copied());
                epoch += 1;
                tracing::debug!(epoch, "starting epoch");
            }
            let indices: Vec<usize> = pending.drain(..batch_size).collect();

            let start = Instant::now();
            let batch = self.build_train_batch(&indices, &mut augment_rng);
            tracing::debug!(
                epoch,
                elapsed_ms = start.elapsed().as_secs_f64() * 1000.,
                "assembled training batch"
            );

            let failed = batch.is_err();
            if let Err(err) = &batch {
                tracing::error!("failed to load training batch: {}", err);
            }
            if sender.send(batch).is_err() || failed {
                break;
            }
        }
    }

    /// Produce evaluation batches in manifest order, then stop.
    ///
    /// The final batch is smaller than the others if the number of samples
    /// is not a multiple of the batch size.
    fn produce_eval(&self, sender: Sender<Result<EvalBatch, DataError>>) {
        let order = Permutation::identity(self.samples.len());
        for (i, indices) in order.indices().chunks(self.config.batch_size).enumerate() {
            let start = Instant::now();
            let batch = self.build_eval_batch(indices);
            tracing::debug!(
                batch = i,
                elapsed_ms = start.elapsed().as_secs_f64() * 1000.,
                "assembled evaluation batch"
            );

            let failed = batch.is_err();
            if let Err(err) = &batch {
                tracing::error!("failed to load evaluation batch: {}", err);
            }
            if sender.send(batch).is_err() || failed {
                break;
            }
        }
    }
}

/// Loads batches of frame sequences, masks and intrinsics from a dataset.
///
/// The dataset is described by a manifest at
/// [`Config::manifest_path`]. Batches are produced on a background thread
/// and buffered in a queue of [`Config::prefetch`] batches. Decoding and
/// augmentation of each batch run on a pool of [`Config::num_threads`]
/// threads.
pub struct DataLoader {
    state: Arc<LoaderState>,
}

impl DataLoader {
    /// Read the manifest for the configured split and create a loader.
    pub fn new(config: Config) -> Result<DataLoader, DataError> {
        let manifest_path = config.manifest_path();
        let text = std::fs::read_to_string(&manifest_path).map_err(|error| DataError::Io {
            path: manifest_path.clone(),
            error,
        })?;
        let entries = parse_manifest(&text)?;
        let samples = format_file_list(
            &config.dataset_dir,
            &config.semantic_dataset_dir,
            &entries,
        );
        Self::with_samples(config, samples)
    }

    /// Create a loader for an explicit list of samples.
    pub fn with_samples(
        config: Config,
        samples: Vec<SamplePaths>,
    ) -> Result<DataLoader, DataError> {
        config.validate()?;
        let assembler = BatchAssembler::new(&config)?;
        let pool = ThreadPool::with_num_threads(config.num_threads);
        tracing::info!(
            split = %config.split,
            samples = samples.len(),
            threads = pool.num_threads(),
            "created data loader"
        );
        Ok(DataLoader {
            state: Arc::new(LoaderState {
                config,
                samples,
                assembler,
                pool,
            }),
        })
    }

    /// Number of samples in the dataset.
    pub fn len(&self) -> usize {
        self.state.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.samples.is_empty()
    }

    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// Number of batches in one pass over the dataset, counting a final
    /// partial batch.
    pub fn batches_per_epoch(&self) -> usize {
        self.len().div_ceil(self.state.config.batch_size)
    }

    /// Load and unpack a single training sample.
    ///
    /// Returns [`DataError::SampleIndex`] if `index` is out of range.
    pub fn load_train_sample(&self, index: usize) -> Result<TrainSample, DataError> {
        self.state.load_train_sample(index)
    }

    /// Load and unpack a single evaluation sample.
    ///
    /// Returns [`DataError::SampleIndex`] if `index` is out of range.
    pub fn load_eval_sample(&self, index: usize) -> Result<EvalSample, DataError> {
        self.state.load_eval_sample(index)
    }

    /// Return an endless stream of shuffled, augmented training batches.
    ///
    /// With a configured seed, the stream is identical across runs. The
    /// stream ends after yielding the first error.
    pub fn train_batches(&self) -> Batches<TrainBatch> {
        let state = self.state.clone();
        Batches::spawn(self.state.config.prefetch, move |sender| {
            state.produce_train(sender)
        })
    }

    /// Return a single pass over the dataset in manifest order, without
    /// augmentation.
    pub fn eval_batches(&self) -> Batches<EvalBatch> {
        let state = self.state.clone();
        Batches::spawn(self.state.config.prefetch, move |sender| {
            state.produce_eval(sender)
        })
    }
}

/// Iterator over batches produced by a background thread.
///
/// Dropping the iterator stops the producer once it next tries to queue a
/// batch.
pub struct Batches<B> {
    receiver: Receiver<Result<B, DataError>>,
    producer: Option<JoinHandle<()>>,
    finished: bool,
}

impl<B: Send + 'static> Batches<B> {
    fn spawn<F>(capacity: usize, produce: F) -> Batches<B>
    where
        F: FnOnce(Sender<Result<B, DataError>>) + Send + 'static,
    {
        let (sender, receiver) = bounded(capacity);
        let producer = std::thread::Builder::new()
            .name("depthseq-producer".to_string())
            .spawn(move || produce(sender));

        match producer {
            Ok(handle) => Batches {
                receiver,
                producer: Some(handle),
                finished: false,
            },
            Err(err) => {
                tracing::error!("failed to spawn loader thread: {}", err);
                Batches {
                    receiver,
                    producer: None,
                    finished: false,
                }
            }
        }
    }
}

impl<B> Iterator for Batches<B> {
    type Item = Result<B, DataError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.receiver.recv() {
            Ok(item) => {
                self.finished = item.is_err();
                Some(item)
            }
            Err(_) => {
                // The producer has exited and all batches were consumed.
                self.finished = true;
                let panicked = match self.producer.take() {
                    Some(handle) => handle.join().is_err(),
                    None => true,
                };
                panicked.then_some(Err(DataError::LoaderDisconnected))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use depthseq_imageio::write_image;
    use rten_tensor::prelude::*;
    use rten_tensor::NdTensor;

    use super::DataLoader;
    use crate::config::Config;
    use crate::errors::DataError;

    const HEIGHT: usize = 8;
    const WIDTH: usize = 10;

    fn test_config(root: &Path, batch_size: usize, split: &str) -> Config {
        Config {
            dataset_dir: root.join("data"),
            semantic_dataset_dir: root.join("sem"),
            img_height: HEIGHT,
            img_width: WIDTH,
            num_source: 2,
            num_scales: 4,
            batch_size,
            num_threads: 2,
            seed: Some(42),
            prefetch: 2,
            split: split.to_string(),
            augment: Default::default(),
        }
    }

    /// Strip whose frames are constant images with values `base`,
    /// `base + 10` and `base + 20`.
    fn strip(base: u8) -> NdTensor<u8, 3> {
        let mut strip = NdTensor::zeros([HEIGHT, WIDTH * 3, 3]);
        for frame in 0..3 {
            strip
                .slice_mut((.., frame * WIDTH..(frame + 1) * WIDTH, ..))
                .iter_mut()
                .for_each(|x| *x = base + 10 * frame as u8);
        }
        strip
    }

    /// Write a dataset where sample `i` uses pixel base `10 + 30 * i` for
    /// both its frame strip and mask strip, and focal length `100 + i`.
    fn write_dataset(root: &Path, split: &str, num_samples: usize) {
        let mut manifest = String::new();
        for i in 0..num_samples {
            let seq = format!("seq_{:02}", i % 2);
            let frame_id = format!("{:010}", i);
            let data_dir = root.join("data").join(&seq);
            let sem_dir = root.join("sem").join(&seq);
            fs::create_dir_all(&data_dir).unwrap();
            fs::create_dir_all(&sem_dir).unwrap();

            let base = 10 + 30 * i as u8;
            write_image(data_dir.join(format!("{}.jpg", frame_id)), strip(base).view()).unwrap();
            write_image(sem_dir.join(format!("{}.jpg", frame_id)), strip(base).view()).unwrap();
            fs::write(
                data_dir.join(format!("{}_cam.txt", frame_id)),
                format!("{}.,0.,5.,0.,{}.,4.,0.,0.,1.\n", 100 + i, 100 + i),
            )
            .unwrap();

            manifest.push_str(&format!("{} {}\n", seq, frame_id));
        }
        fs::write(root.join("data").join(format!("{}.txt", split)), manifest).unwrap();
    }

    #[test]
    fn test_eval_batches_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), "val", 5);

        let loader = DataLoader::new(test_config(dir.path(), 2, "val")).unwrap();
        assert_eq!(loader.len(), 5);
        assert_eq!(loader.batches_per_epoch(), 3);

        let batches: Vec<_> = loader.eval_batches().collect::<Result<_, _>>().unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].tgt_image.shape(), [2, HEIGHT, WIDTH, 3]);
        assert_eq!(batches[2].tgt_image.shape(), [1, HEIGHT, WIDTH, 3]);
        assert_eq!(batches[2].src_image_stack.shape(), [1, HEIGHT, WIDTH, 6]);

        for (b, batch) in batches.iter().enumerate() {
            for i in 0..batch.tgt_image.size(0) {
                let sample = b * 2 + i;
                let base = 10 + 30 * sample as u8;
                assert_eq!(batch.tgt_image[[i, 0, 0, 0]], base + 10);
                assert_eq!(batch.src_image_stack[[i, 0, 0, 0]], base);
                assert_eq!(batch.src_image_stack[[i, 0, 0, 3]], base + 20);
                assert_eq!(batch.intrinsics[[i, 0, 0]], 100. + sample as f32);
            }
        }
    }

    #[test]
    fn test_train_batches_are_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), "train", 3);

        let take = |n| {
            let loader = DataLoader::new(test_config(dir.path(), 2, "train")).unwrap();
            loader
                .train_batches()
                .take(n)
                .collect::<Result<Vec<_>, _>>()
                .unwrap()
        };

        // More batches than one epoch holds, so the stream has to wrap.
        let first = take(4);
        let second = take(4);
        assert_eq!(first.len(), 4);
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.tgt_image, b.tgt_image);
            assert_eq!(a.src_image_stack, b.src_image_stack);
            assert_eq!(a.tgt_sem, b.tgt_sem);
            assert_eq!(a.intrinsics, b.intrinsics);
        }
    }

    #[test]
    fn test_train_batches_keep_masks_aligned() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), "train", 4);

        let loader = DataLoader::new(test_config(dir.path(), 2, "train")).unwrap();
        for batch in loader.train_batches().take(3) {
            let batch = batch.unwrap();
            assert_eq!(batch.tgt_sem.shape(), [2, HEIGHT, WIDTH, 3]);
            assert_eq!(batch.src_sem_stack.shape(), [2, HEIGHT, WIDTH, 6]);
            assert_eq!(batch.intrinsics.shape(), [2, 4, 3, 3]);

            for i in 0..2 {
                // Recover the sample from its target mask, then check its
                // focal length matches.
                let tgt_value = batch.tgt_sem[[i, 0, 0, 0]] as i32;
                let sample = (0..4)
                    .find(|&s| (tgt_value - (20 + 30 * s)).abs() <= 1)
                    .expect("mask should identify a sample");
                let fx = batch.intrinsics[[i, 0, 0, 0]];
                let base_fx = 100. + sample as f32;
                assert!(fx >= base_fx && fx <= base_fx * 1.15);

                let src_value = batch.src_sem_stack[[i, 0, 0, 3]] as i32;
                assert!((src_value - (tgt_value + 10)).abs() <= 2);
            }
        }
    }

    #[test]
    fn test_missing_file_ends_stream() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), "val", 3);
        fs::remove_file(dir.path().join("sem/seq_01/0000000001.jpg")).unwrap();

        let loader = DataLoader::new(test_config(dir.path(), 3, "val")).unwrap();

        // Evaluation does not read masks.
        assert_eq!(loader.eval_batches().count(), 1);

        let mut batches = loader.train_batches();
        match batches.next() {
            Some(Err(DataError::Image { path, .. })) => {
                assert!(path.ends_with("sem/seq_01/0000000001.jpg"))
            }
            other => panic!("unexpected result {:?}", other.map(|r| r.is_ok())),
        }
        assert!(batches.next().is_none());
    }

    #[test]
    fn test_load_sample_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), "train", 2);

        let loader = DataLoader::new(test_config(dir.path(), 1, "train")).unwrap();
        assert!(loader.load_train_sample(1).is_ok());
        assert!(matches!(
            loader.load_train_sample(2),
            Err(DataError::SampleIndex { index: 2, len: 2 })
        ));
        assert!(matches!(
            loader.load_eval_sample(usize::MAX),
            Err(DataError::SampleIndex { len: 2, .. })
        ));
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let result = DataLoader::new(test_config(dir.path(), 1, "train"));
        assert!(matches!(result, Err(DataError::Io { .. })));
    }

    #[test]
    fn test_empty_dataset() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(dir.path().join("data/train.txt"), "\n").unwrap();

        let loader = DataLoader::new(test_config(dir.path(), 1, "train")).unwrap();
        assert!(loader.is_empty());
        assert_eq!(loader.eval_batches().count(), 0);
        assert!(matches!(
            loader.train_batches().next(),
            Some(Err(DataError::Shape(_)))
        ));
    }
}
