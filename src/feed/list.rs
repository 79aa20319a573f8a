use std::borrow::Cow;
use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;

use crate::util::validate_feed_url;

/// Errors reading the feed list file.
#[derive(Debug, Error)]
pub enum FeedListError {
    #[error("Failed to read feed list {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One configured feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDescriptor {
    /// 1-based position in the feed list.
    pub index: usize,
    pub url: String,
    /// Explicit supplier label used as id prefix.
    pub label: Option<String>,
}

impl FeedDescriptor {
    pub fn new(index: usize, url: impl Into<String>, label: Option<String>) -> Self {
        Self {
            index,
            url: url.into(),
            label,
        }
    }

    /// Id prefix for offers from this feed: the label, or `f{index}`.
    pub fn prefix(&self) -> Cow<'_, str> {
        match &self.label {
            Some(label) => Cow::Borrowed(label),
            None => Cow::Owned(format!("f{}", self.index)),
        }
    }
}

/// Reads the feed list file.
///
/// See [`parse_feed_list`] for the line format.
pub async fn load_feed_list(
    path: &Path,
    allow_private: bool,
) -> Result<Vec<FeedDescriptor>, FeedListError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| FeedListError::Io {
            path: path.display().to_string(),
            source,
        })?;
    Ok(parse_feed_list(&content, allow_private))
}

/// Parses a feed list: one `URL [label]` per line.
///
/// Blank lines, `#` comments and lines that do not start with `http` are
/// skipped. Labels are lower-cased and must match `[a-z0-9_-]+`; an invalid
/// label falls back to the positional prefix. So does a label of the form
/// `f<digits>`, which would share a namespace with a positional prefix.
/// Feeds of one supplier may share a label, in which case their offers share
/// an id namespace and the later feed wins on collisions. URLs failing
/// validation are skipped with a warning and do not consume an index.
pub fn parse_feed_list(content: &str, allow_private: bool) -> Vec<FeedDescriptor> {
    let mut feeds = Vec::new();
    let mut labels = HashSet::new();

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if !line.starts_with("http") {
            continue;
        }

        let mut parts = line.split_whitespace();
        let Some(url) = parts.next() else { continue };

        if let Err(e) = validate_feed_url(url, allow_private) {
            tracing::warn!(line = line_no + 1, url = %url, error = %e, "Skipping invalid feed URL");
            continue;
        }

        let index = feeds.len() + 1;
        let label = parts.next().and_then(|raw| {
            let label = raw.to_lowercase();
            if !is_valid_label(&label) {
                tracing::warn!(line = line_no + 1, label = %raw, "Invalid feed label, using positional prefix");
                return None;
            }
            if is_positional(&label) {
                tracing::warn!(
                    line = line_no + 1,
                    label = %raw,
                    "Feed label looks like a positional prefix, using positional prefix"
                );
                return None;
            }
            if !labels.insert(label.clone()) {
                tracing::debug!(line = line_no + 1, label = %label, "Feed shares its label with an earlier feed");
            }
            Some(label)
        });

        feeds.push(FeedDescriptor::new(index, url, label));
    }

    feeds
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '_' | '-'))
}

/// `f1`, `f02`, ...: the shape of prefixes assigned to unlabeled feeds.
fn is_positional(label: &str) -> bool {
    label
        .strip_prefix('f')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}
