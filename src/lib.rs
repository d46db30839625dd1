//! depthseq loads training data for self-supervised depth and ego-motion
//! models.
//!
//! A dataset consists of frame strips, which hold a target frame and its
//! neighboring source frames side by side, semantic mask strips with the same
//! layout, and a camera intrinsics file per sample. The manifest for a split
//! lists the samples as `<subfolder> <frame_id>` lines.
//!
//! # Loading batches
//!
//! The basic workflow is:
//!
//! 1. Read a [`Config`] using [`Config::from_json_file`].
//! 2. Create a [`DataLoader`] using [`DataLoader::new`].
//! 3. Iterate over [`DataLoader::train_batches`] for training, or
//!    [`DataLoader::eval_batches`] for evaluation.
//!
//! Training batches are shuffled, randomly scaled and cropped, and optionally
//! color jittered. The masks are scaled and cropped together with the color
//! frames but never jittered. Intrinsics are adjusted for the geometric
//! augmentations and expanded to one matrix per pyramid level.
//!
//! ## Threading
//!
//! Batches are assembled on a background thread and queued ahead of the
//! consumer. Samples within a batch are decoded in parallel on a Rayon
//! thread pool owned by the loader.
//!
//! ## Reproducibility
//!
//! When [`Config::seed`] is set, the sample order and all augmentation
//! parameters are derived from it, so repeated runs yield identical batches.
//!
//! # Lower-level APIs
//!
//! The individual stages are also available as functions operating on
//! tensors: [`unpack_sequence`], [`make_intrinsics_matrix`],
//! [`multi_scale_intrinsics`], [`Augmenter`] and [`BatchAssembler`].

mod augment;
mod batch;
mod config;
mod errors;
mod intrinsics;
mod loader;
mod manifest;
mod rng;
mod threading;
mod unpack;

pub use augment::{
    random_coloring, random_cropping, random_scaling, AugmentOptions, Augmented, Augmenter,
};
pub use batch::{BatchAssembler, EvalBatch, EvalSample, TrainBatch, TrainSample};
pub use config::Config;
pub use errors::{CameraFileError, ConfigError, DataError, ManifestError, ShapeError};
pub use intrinsics::{
    batch_intrinsics, intrinsics_to_matrices, make_intrinsics_matrix, multi_scale_intrinsics,
    Intrinsics,
};
pub use loader::{Batches, DataLoader};
pub use manifest::{format_file_list, parse_manifest, ManifestEntry, SamplePaths};
pub use rng::{seeded_rng, Permutation, UniformSource};
pub use unpack::{check_source_count, unpack_sequence, UnpackedSequence, FRAME_CHANNELS};

// Re-export the tensor and image crates used in the public API.
pub use depthseq_imageio as imageio;
pub use depthseq_imageproc as imageproc;
pub use rten_tensor;
