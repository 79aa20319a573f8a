//! Aggregates supplier YML product feeds into one deduplicated catalog,
//! written as size-bounded shards, with a report of price and stock changes
//! since the previous run.
//!
//! - [`feed`] - Feed list, concurrent retrieval, streaming offer extraction
//! - [`catalog`] - Merge, snapshot of the previous run, change detection
//! - [`output`] - Sharded writer with no-op rewrites
//! - [`pipeline`] - The run tying them together
//! - [`config`] - Optional TOML configuration
//! - [`util`] - Text sanitizing, URL validation, column layout

pub mod catalog;
pub mod config;
pub mod feed;
pub mod output;
pub mod pipeline;
pub mod util;
