//! The merged catalog and everything derived from it.
//!
//! - [`offer`] - Offer and field model shared by extraction and output
//! - `merge` - Cross-feed last-writer-wins deduplication
//! - `snapshot` - Previous run state read back from output documents
//! - `changes` - Price and stock change detection

mod changes;
mod merge;
pub(crate) mod offer;
mod snapshot;

pub use changes::{
    detect_changes, render_change_table, write_change_table_tsv, ChangeRecord, NEW_MARKER,
};
pub use merge::{merge, MergeStats, MergedCatalog};
pub use offer::{Category, Field, Node, Offer};
pub use snapshot::{Snapshot, SnapshotEntry, SnapshotError};
