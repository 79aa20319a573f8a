use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::output::ShardOutcome;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read shard manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid shard manifest {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The shards the last completed write produced, in order.
///
/// Shards numbered past the last one are left on disk, so the directory
/// alone does not say which files belong to the current catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardManifest {
    /// File names relative to the output directory.
    pub shards: Vec<String>,
}

/// Path of the manifest kept next to the shards.
pub fn manifest_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}.manifest.json"))
}

impl ShardManifest {
    pub fn from_outcomes(outcomes: &[ShardOutcome]) -> Self {
        let shards = outcomes
            .iter()
            .filter_map(|o| o.path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        Self { shards }
    }

    /// Reads a manifest; `Ok(None)` when the file does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>, ManifestError> {
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ManifestError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|source| ManifestError::Parse {
                path: path.display().to_string(),
                source,
            })
    }

    /// Shard paths under `dir`. Entries that are not plain file names are
    /// skipped.
    pub fn paths(&self, dir: &Path) -> Vec<PathBuf> {
        self.shards
            .iter()
            .filter(|name| {
                let plain = is_plain_file_name(name);
                if !plain {
                    tracing::warn!(entry = %name, "Ignoring shard manifest entry outside the output directory");
                }
                plain
            })
            .map(|name| dir.join(name))
            .collect()
    }

    pub(crate) fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}
