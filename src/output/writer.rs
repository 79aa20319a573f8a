use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::MergedCatalog;
use crate::output::{manifest_path, shard_path, stable_digest, ShardManifest};
use crate::util::{sanitize_attr, sanitize_text, QuotePolicy};

/// Default shard size limit (95 MiB), just under common upload caps.
pub const DEFAULT_MAX_SHARD_BYTES: usize = 95 * 1024 * 1024;

const FOOTER: &str = "</offers>\n</shop>\n</yml_catalog>\n";

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode shard manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl WriteError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Shop block written at the top of every shard.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ShopInfo {
    pub name: String,
    pub company: String,
    pub url: String,
}

impl Default for ShopInfo {
    fn default() -> Self {
        Self {
            name: "MyShop".to_string(),
            company: "My Company".to_string(),
            url: "https://myshop.example.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStatus {
    /// New content was written to disk.
    Written,
    /// The file on disk already had this content; nothing was touched.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardOutcome {
    /// 1-based shard number.
    pub index: usize,
    pub path: PathBuf,
    pub bytes: usize,
    pub offers: usize,
    pub status: ShardStatus,
}

/// Writes a merged catalog as size-bounded YML shards.
#[derive(Debug, Clone)]
pub struct ShardWriter {
    dir: PathBuf,
    stem: String,
    shop: ShopInfo,
}

impl ShardWriter {
    pub fn new(dir: impl Into<PathBuf>, stem: impl Into<String>, shop: ShopInfo) -> Self {
        Self {
            dir: dir.into(),
            stem: stem.into(),
            shop,
        }
    }

    /// Writes `catalog` in catalog order, starting a new shard whenever the
    /// next offer would push the current one past `max_shard_bytes`.
    ///
    /// A shard always takes at least one offer, so an offer bigger than the
    /// limit ends up alone in an oversized shard. An empty catalog still
    /// yields one shard with an empty `<offers>` block. Shards numbered past
    /// the last one written by this call are left on disk as they are; the
    /// shard manifest is updated to list only this call's shards.
    pub fn write(
        &self,
        catalog: &MergedCatalog,
        max_shard_bytes: usize,
        generated_at: NaiveDateTime,
    ) -> Result<Vec<ShardOutcome>, WriteError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| WriteError::io(&self.dir, e))?;

        let header = self.header(catalog, generated_at);
        let mut outcomes = Vec::new();
        let mut shard = ShardBuffer::new(&header);

        for offer in catalog.iter() {
            let xml = offer.to_xml();
            let needed = xml.len() + 1;
            if shard.offers > 0 && shard.content.len() + needed + FOOTER.len() > max_shard_bytes {
                let full = std::mem::replace(&mut shard, ShardBuffer::new(&header));
                outcomes.push(self.persist(outcomes.len() + 1, full)?);
            }
            shard.push(&xml);
        }
        outcomes.push(self.persist(outcomes.len() + 1, shard)?);

        self.record(&outcomes)?;
        Ok(outcomes)
    }

    /// Rewrites the shard manifest if its content changed.
    fn record(&self, outcomes: &[ShardOutcome]) -> Result<(), WriteError> {
        let path = manifest_path(&self.dir, &self.stem);
        let bytes = ShardManifest::from_outcomes(outcomes).to_json()?;
        if std::fs::read(&path).is_ok_and(|existing| existing == bytes) {
            return Ok(());
        }
        write_atomic(&path, &bytes)?;
        tracing::debug!(path = %path.display(), shards = outcomes.len(), "Updated shard manifest");
        Ok(())
    }

    fn header(&self, catalog: &MergedCatalog, generated_at: NaiveDateTime) -> String {
        let text = |s: &str| sanitize_text(s, QuotePolicy::Keep).into_owned();

        let mut out = String::with_capacity(1024);
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str(&format!(
            "<yml_catalog date=\"{}\">\n<shop>\n",
            generated_at.format("%Y-%m-%d %H:%M")
        ));
        out.push_str(&format!("<name>{}</name>\n", text(&self.shop.name)));
        out.push_str(&format!("<company>{}</company>\n", text(&self.shop.company)));
        out.push_str(&format!("<url>{}</url>\n", text(&self.shop.url)));

        out.push_str("<categories>\n");
        for category in catalog.referenced_categories() {
            out.push_str(&format!(
                "<category id=\"{}\">{}</category>\n",
                sanitize_attr(&category.id, QuotePolicy::Keep),
                category.name
            ));
        }
        out.push_str("</categories>\n<offers>\n");
        out
    }

    fn persist(&self, index: usize, shard: ShardBuffer) -> Result<ShardOutcome, WriteError> {
        let path = shard_path(&self.dir, &self.stem, index);
        let offers = shard.offers;
        let content = shard.finish();
        let bytes = content.as_bytes();

        let status = if matches_on_disk(&path, bytes)? {
            tracing::debug!(path = %path.display(), "Shard unchanged, skipping write");
            ShardStatus::Unchanged
        } else {
            write_atomic(&path, bytes)?;
            tracing::info!(path = %path.display(), bytes = bytes.len(), offers, "Wrote shard");
            ShardStatus::Written
        };

        Ok(ShardOutcome {
            index,
            path,
            bytes: bytes.len(),
            offers,
            status,
        })
    }
}

/// One shard being assembled in memory.
struct ShardBuffer {
    content: String,
    offers: usize,
}

impl ShardBuffer {
    fn new(header: &str) -> Self {
        Self {
            content: header.to_string(),
            offers: 0,
        }
    }

    fn push(&mut self, offer_xml: &str) {
        self.content.push_str(offer_xml);
        self.content.push('\n');
        self.offers += 1;
    }

    fn finish(mut self) -> String {
        self.content.push_str(FOOTER);
        self.content
    }
}

/// Whether `path` already holds a document equal to `bytes` up to the
/// generation date.
fn matches_on_disk(path: &Path, bytes: &[u8]) -> Result<bool, WriteError> {
    // The date has a fixed width, so equal content means equal length
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() != bytes.len() as u64 => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(WriteError::io(path, e)),
    }
    let existing = std::fs::read(path).map_err(|e| WriteError::io(path, e))?;
    Ok(stable_digest(&existing) == stable_digest(bytes))
}

/// Writes via a uniquely named temp file and a rename, so a crash never
/// leaves a half-written file behind.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), WriteError> {
    use std::time::{SystemTime, UNIX_EPOCH};
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(format!(".tmp.{suffix:016x}"));
    let temp_path = path.with_file_name(temp_name);

    let cleanup = |e: std::io::Error| {
        let _ = std::fs::remove_file(&temp_path);
        WriteError::io(path, e)
    };

    let mut temp_file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .map_err(|e| WriteError::io(&temp_path, e))?;
    temp_file.write_all(bytes).map_err(cleanup)?;
    temp_file.sync_all().map_err(cleanup)?;
    drop(temp_file);

    // Windows refuses to rename onto an existing file
    #[cfg(windows)]
    if path.exists() {
        std::fs::remove_file(path).map_err(cleanup)?;
    }

    std::fs::rename(&temp_path, path).map_err(cleanup)
}
