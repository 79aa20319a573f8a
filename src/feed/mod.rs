//! Feed retrieval and offer extraction.
//!
//! - [`list`] - Reading the feed list into [`FeedDescriptor`]s
//! - [`fetcher`] - Concurrent HTTP retrieval with per-feed failure isolation
//! - [`extract`] - Streaming, fault-tolerant `<offer>` extraction
//! - [`payload`] - Spooled downloads the extractor reads from
//! - [`identity`] - Feed-prefixed global offer ids
//!
//! # Example
//!
//! ```ignore
//! use ymlmerge::feed::{build_client, fetch_all, load_feed_list, FetchOptions};
//!
//! let feeds = load_feed_list(Path::new("feeds.txt"), false).await?;
//! let client = build_client(DEFAULT_USER_AGENT)?;
//! let results = fetch_all(&client, &feeds, &FetchOptions::default()).await;
//! ```

mod extract;
mod fetcher;
mod identity;
mod list;
mod payload;

pub use extract::{extract_offers, ExtractReport, OfferExtractor};
pub use fetcher::{
    build_client, fetch_all, fetch_feed, FeedOutcome, FeedResult, FetchError, FetchOptions,
    DEFAULT_USER_AGENT,
};
pub use identity::resolve_id;
pub use list::{load_feed_list, parse_feed_list, FeedDescriptor, FeedListError};
pub use payload::{Payload, SpooledPayload};
