//! Configuration file parser for `ymlmerge.toml`.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos. Command-line flags override whatever is loaded
//! here.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::{FetchOptions, DEFAULT_USER_AGENT};
use crate::output::{ShopInfo, DEFAULT_MAX_SHARD_BYTES};
use crate::util::QuotePolicy;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Allowed range for the per-request timeout, in seconds.
const TIMEOUT_RANGE_SECS: (u64, u64) = (60, 180);

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feed list, one `URL [prefix]` per line.
    pub feeds_file: PathBuf,

    /// Directory the shards are written to.
    pub output_dir: PathBuf,

    /// Shard file name stem; shards are `{stem}_{n}.yml`.
    pub output_stem: String,

    pub max_shard_bytes: usize,

    /// Per-feed request timeout. Clamped to 60..=180.
    pub request_timeout_secs: u64,

    /// Maximum feeds fetched at once.
    pub concurrency: usize,

    pub max_feed_bytes: usize,

    pub user_agent: String,

    /// Replace `"` with `'` in text content.
    pub normalize_quotes: bool,

    /// Accept feed URLs on localhost and private networks.
    pub allow_private_hosts: bool,

    /// Where to export the change table as TSV, if anywhere.
    pub changes_file: Option<PathBuf>,

    pub shop: ShopInfo,
}

impl Default for Config {
    fn default() -> Self {
        let fetch = FetchOptions::default();
        Self {
            feeds_file: PathBuf::from("feeds.txt"),
            output_dir: PathBuf::from("output"),
            output_stem: "catalog".to_string(),
            max_shard_bytes: DEFAULT_MAX_SHARD_BYTES,
            request_timeout_secs: fetch.timeout.as_secs(),
            concurrency: fetch.concurrency,
            max_feed_bytes: fetch.max_feed_bytes,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            normalize_quotes: false,
            allow_private_hosts: false,
            changes_file: None,
            shop: ShopInfo::default(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check the size before reading so a corrupted file cannot exhaust memory
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "feeds_file",
                "output_dir",
                "output_stem",
                "max_shard_bytes",
                "request_timeout_secs",
                "concurrency",
                "max_feed_bytes",
                "user_agent",
                "normalize_quotes",
                "allow_private_hosts",
                "changes_file",
                "shop",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            feeds = %config.feeds_file.display(),
            output = %config.output_dir.display(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// The request timeout, clamped into the supported range.
    pub fn request_timeout(&self) -> Duration {
        let (min, max) = TIMEOUT_RANGE_SECS;
        let secs = self.request_timeout_secs.clamp(min, max);
        if secs != self.request_timeout_secs {
            tracing::warn!(
                requested = self.request_timeout_secs,
                used = secs,
                "request_timeout_secs out of range, clamping"
            );
        }
        Duration::from_secs(secs)
    }

    pub fn quote_policy(&self) -> QuotePolicy {
        if self.normalize_quotes {
            QuotePolicy::Normalize
        } else {
            QuotePolicy::Keep
        }
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            timeout: self.request_timeout(),
            concurrency: self.concurrency.max(1),
            max_feed_bytes: self.max_feed_bytes,
            quotes: self.quote_policy(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
