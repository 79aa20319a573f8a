//! Shard output.
//!
//! The merged catalog is written as one or more self-contained YML
//! documents, `{stem}_1.yml`, `{stem}_2.yml`, ..., each below a size limit.
//! Shards whose content did not change since the last run are left alone.
//! A manifest next to the shards records which of them the last write
//! produced.

mod digest;
mod manifest;
mod writer;

use std::path::{Path, PathBuf};

pub use digest::stable_digest;
pub use manifest::{manifest_path, ManifestError, ShardManifest};
pub use writer::{
    ShardOutcome, ShardStatus, ShardWriter, ShopInfo, WriteError, DEFAULT_MAX_SHARD_BYTES,
};

/// Path of the `n`th shard (1-based).
pub fn shard_path(dir: &Path, stem: &str, n: usize) -> PathBuf {
    dir.join(format!("{stem}_{n}.yml"))
}
