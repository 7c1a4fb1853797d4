//! Persistence of already-published GUIDs.
//!
//! The ingestion pipeline only sees the [`DedupGate`] trait; delivery marks
//! articles through [`PublishRecorder`]. [`PublishedStore`] implements both
//! on SQLite.

mod published;

use crate::feed::Article;

pub use published::{PublishedStore, StoreError};

/// Answers "was this GUID already delivered in an earlier run?".
#[allow(async_fn_in_trait)]
pub trait DedupGate {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn is_published(&self, guid: &str) -> Result<bool, Self::Error>;
}

/// Records delivered articles so later runs skip them.
///
/// Marking an already-marked GUID must be a no-op.
#[allow(async_fn_in_trait)]
pub trait PublishRecorder {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns how many articles were newly marked.
    async fn mark_published(&self, articles: &[Article]) -> Result<usize, Self::Error>;
}
