//! One aggregation run: fetch, merge, diff against the previous run, write.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;

use crate::catalog::{detect_changes, merge, ChangeRecord, Snapshot, SnapshotError};
use crate::feed::{fetch_all, FeedDescriptor, FeedOutcome, FetchOptions};
use crate::output::{ShardOutcome, ShardStatus, ShardWriter, WriteError};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub fetch: FetchOptions,
    pub max_shard_bytes: usize,
    /// Stamped into the root `date` attribute of every shard.
    pub generated_at: NaiveDateTime,
}

/// Counters describing one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub feeds_total: usize,
    pub feeds_succeeded: usize,
    pub feeds_failed: usize,
    pub offers_considered: usize,
    pub offers_retained: usize,
    pub shards_written: usize,
    pub shards_unchanged: usize,
    /// Per-feed detail, in feed-list order.
    pub feeds: Vec<FeedOutcome>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Feeds:  {} total, {} succeeded, {} failed",
            self.feeds_total, self.feeds_succeeded, self.feeds_failed
        )?;
        for feed in self.feeds.iter().filter(|feed| !feed.succeeded) {
            writeln!(
                f,
                "  failed {} ({}): {}",
                feed.prefix,
                feed.url,
                feed.error.as_deref().unwrap_or("unknown error")
            )?;
        }
        writeln!(
            f,
            "Offers: {} considered, {} retained",
            self.offers_considered, self.offers_retained
        )?;
        write!(
            f,
            "Shards: {} written, {} unchanged",
            self.shards_written, self.shards_unchanged
        )
    }
}

/// Everything a run produced.
#[derive(Debug, Default)]
pub struct RunReport {
    pub summary: RunSummary,
    pub changes: Vec<ChangeRecord>,
    pub shards: Vec<ShardOutcome>,
}

/// Reads the state the change detector compares against.
///
/// Explicit `paths` must be readable; their errors abort the run. Without
/// them the shards a previous run left in the output directory are used,
/// and an unreadable one only costs the change report.
pub fn load_previous(paths: &[PathBuf], output_dir: &Path, stem: &str) -> Result<Snapshot, RunError> {
    if !paths.is_empty() {
        return Ok(Snapshot::load(paths)?);
    }
    match Snapshot::from_existing_shards(output_dir, stem) {
        Ok(snapshot) => Ok(snapshot),
        Err(e) => {
            tracing::warn!(error = %e, "Previous output unreadable, reporting every offer as new");
            Ok(Snapshot::new())
        }
    }
}

/// Runs the whole aggregation.
///
/// Failed feeds are reported in the summary and otherwise ignored; only
/// output I/O errors fail the run. With no feeds configured nothing is
/// fetched or written.
pub async fn run(
    client: &reqwest::Client,
    feeds: &[FeedDescriptor],
    previous: &Snapshot,
    writer: &ShardWriter,
    options: &RunOptions,
) -> Result<RunReport, RunError> {
    if feeds.is_empty() {
        tracing::warn!("No feeds configured, nothing to do");
        return Ok(RunReport::default());
    }

    tracing::info!(feeds = feeds.len(), concurrency = options.fetch.concurrency, "Fetching feeds");
    let results = fetch_all(client, feeds, &options.fetch).await;
    let outcomes: Vec<FeedOutcome> = results.iter().map(|r| r.outcome.clone()).collect();

    let (catalog, stats) = merge(results);
    tracing::info!(
        considered = stats.offers_considered,
        retained = stats.offers_retained,
        overwritten = stats.overwritten,
        "Merged feeds"
    );

    let changes = detect_changes(&catalog, previous);
    let shards = writer.write(&catalog, options.max_shard_bytes, options.generated_at)?;

    let summary = RunSummary {
        feeds_total: feeds.len(),
        feeds_succeeded: stats.feeds_succeeded,
        feeds_failed: stats.feeds_failed,
        offers_considered: stats.offers_considered,
        offers_retained: stats.offers_retained,
        shards_written: count_status(&shards, ShardStatus::Written),
        shards_unchanged: count_status(&shards, ShardStatus::Unchanged),
        feeds: outcomes,
    };

    Ok(RunReport {
        summary,
        changes,
        shards,
    })
}

fn count_status(shards: &[ShardOutcome], status: ShardStatus) -> usize {
    shards.iter().filter(|s| s.status == status).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::ShopInfo;
    use chrono::NaiveDate;

    fn options() -> RunOptions {
        RunOptions {
            fetch: FetchOptions::default(),
            max_shard_bytes: 1024,
            generated_at: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        }
    }

    #[tokio::test]
    async fn test_no_feeds_is_an_empty_run() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ShardWriter::new(dir.path(), "out", ShopInfo::default());
        let client = reqwest::Client::new();

        let report = run(&client, &[], &Snapshot::new(), &writer, &options())
            .await
            .unwrap();
        assert_eq!(report.summary, RunSummary::default());
        assert!(report.shards.is_empty());
        assert!(!dir.path().join("out_1.yml").exists());
    }

    #[test]
    fn test_summary_display_lists_failures() {
        let summary = RunSummary {
            feeds_total: 2,
            feeds_succeeded: 1,
            feeds_failed: 1,
            offers_considered: 3,
            offers_retained: 2,
            shards_written: 1,
            shards_unchanged: 0,
            feeds: vec![FeedOutcome {
                url: "https://b.example.com/feed.yml".into(),
                prefix: "f2".into(),
                offer_count: 0,
                succeeded: false,
                error: Some("HTTP error: status 503".into()),
            }],
        };
        let text = summary.to_string();
        assert!(text.contains("2 total, 1 succeeded, 1 failed"));
        assert!(text.contains("failed f2 (https://b.example.com/feed.yml): HTTP error: status 503"));
        assert!(text.ends_with("1 written, 0 unchanged"));
    }

    #[test]
    fn test_explicit_snapshot_errors_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("prev.yml");
        std::fs::write(&broken, "<offers><offer id=\"a\"><price>1</pri").unwrap();

        let result = load_previous(&[broken], dir.path(), "out");
        assert!(matches!(result, Err(RunError::Snapshot(_))));
    }

    #[test]
    fn test_unreadable_own_shards_start_fresh() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out_1.yml"), "<offers><offer id=\"a\"><pri").unwrap();

        let snapshot = load_previous(&[], dir.path(), "out").unwrap();
        assert!(snapshot.is_empty());
    }
}
