//! Sample manifests and the paths of the files belonging to each sample.

use std::path::{Path, PathBuf};

use crate::errors::ManifestError;

/// A line of a manifest, identifying one sample.
#[derive(Clone, Debug, PartialEq)]
pub struct ManifestEntry {
    /// Directory of the sequence the sample belongs to.
    pub subfolder: String,
    /// Name of the sample's files within `subfolder`, without extension.
    pub frame_id: String,
}

/// Paths of the files which make up one sample.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplePaths {
    /// Frame strip.
    pub image: PathBuf,
    /// Semantic mask strip, aligned pixel-for-pixel with `image`.
    pub semantic: PathBuf,
    /// Camera intrinsics file.
    pub camera: PathBuf,
}

/// Parse a manifest with one `<subfolder> <frame_id>` entry per line.
///
/// Blank lines are skipped. Any other line that does not contain exactly two
/// whitespace-separated fields is an error.
pub fn parse_manifest(text: &str) -> Result<Vec<ManifestEntry>, ManifestError> {
    let mut entries = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next(), fields.next()) {
            (Some(subfolder), Some(frame_id), None) => entries.push(ManifestEntry {
                subfolder: subfolder.to_string(),
                frame_id: frame_id.to_string(),
            }),
            _ => {
                return Err(ManifestError {
                    line: i + 1,
                    content: line.to_string(),
                })
            }
        }
    }
    Ok(entries)
}

/// Resolve the image, mask and camera paths of each manifest entry.
///
/// Frame strips are at `<data_root>/<subfolder>/<frame_id>.jpg`, masks at
/// `<sem_root>/<subfolder>/<frame_id>.jpg` and camera files at
/// `<data_root>/<subfolder>/<frame_id>_cam.txt`.
pub fn format_file_list(
    data_root: &Path,
    sem_root: &Path,
    entries: &[ManifestEntry],
) -> Vec<SamplePaths> {
    entries
        .iter()
        .map(|entry| {
            let image_dir = data_root.join(&entry.subfolder);
            SamplePaths {
                image: image_dir.join(format!("{}.jpg", entry.frame_id)),
                semantic: sem_root
                    .join(&entry.subfolder)
                    .join(format!("{}.jpg", entry.frame_id)),
                camera: image_dir.join(format!("{}_cam.txt", entry.frame_id)),
            }
        })
        .collect()
}
