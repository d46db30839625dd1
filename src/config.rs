use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::augment::AugmentOptions;
use crate::errors::ConfigError;
use crate::unpack::check_source_count;

fn default_prefetch() -> usize {
    2
}

fn default_split() -> String {
    "train".to_string()
}

/// Configuration for loading a dataset.
///
/// This is usually read from a JSON file using [`Config::from_json_file`].
/// The dataset directories and all sizes are required. The remaining fields
/// have defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root directory containing the manifest, frame strips and camera files.
    pub dataset_dir: PathBuf,

    /// Root directory containing the semantic mask strips.
    pub semantic_dataset_dir: PathBuf,

    /// Height of each frame, in pixels.
    pub img_height: usize,

    /// Width of each frame, in pixels.
    pub img_width: usize,

    /// Number of source frames around each target frame.
    pub num_source: usize,

    /// Number of pyramid levels to compute intrinsics for.
    pub num_scales: usize,

    /// Number of samples per batch.
    pub batch_size: usize,

    /// Number of threads used to decode samples.
    pub num_threads: usize,

    /// Seed for shuffling and augmentation. If not set, a seed is chosen from
    /// entropy and runs are not reproducible.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Number of assembled batches to buffer ahead of the consumer.
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,

    /// Name of the manifest file, without the `.txt` extension.
    #[serde(default = "default_split")]
    pub split: String,

    /// Ranges for random augmentation.
    #[serde(default)]
    pub augment: AugmentOptions,
}

impl Config {
    /// Parse and validate a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Config, ConfigError> {
        let config: Config = serde_json::from_str(json).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(ConfigError::IoError)?;
        Self::from_json(&json)
    }

    /// Check that sizes are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("img_height", self.img_height),
            ("img_width", self.img_width),
            ("num_scales", self.num_scales),
            ("batch_size", self.batch_size),
            ("num_threads", self.num_threads),
            ("prefetch", self.prefetch),
        ];
        for (key, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    message: "must be greater than zero",
                });
            }
        }

        if check_source_count(self.num_source).is_err() {
            return Err(ConfigError::InvalidValue {
                key: "num_source",
                message: "must be even and greater than zero",
            });
        }

        let augment = &self.augment;
        let ranges = [
            ("augment.scale", &augment.scale),
            ("augment.gamma", &augment.gamma),
            ("augment.brightness", &augment.brightness),
            ("augment.color", &augment.color),
        ];
        for (key, range) in ranges {
            if !(range.start.is_finite() && range.end.is_finite() && range.start < range.end) {
                return Err(ConfigError::InvalidValue {
                    key,
                    message: "must be a non-empty range of finite values",
                });
            }
        }
        if augment.scale.start < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "augment.scale",
                message: "must start at 1.0 or more",
            });
        }
        if !(0.0..=1.0).contains(&augment.jitter_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "augment.jitter_threshold",
                message: "must be between 0 and 1",
            });
        }

        Ok(())
    }

    /// Path of the manifest listing the samples in the configured split.
    pub fn manifest_path(&self) -> PathBuf {
        self.dataset_dir.join(format!("{}.txt", self.split))
    }
}
