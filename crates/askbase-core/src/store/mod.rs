//! Storage abstractions for askbase.
//!
//! Four traits cover everything the pipeline persists:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`FragmentStore`] | Per-user fragment partitions with transactional per-source replace |
//! | [`UsageLedger`] | Atomic quota admission, compensating release, commit |
//! | [`CallSink`] | Append-only call-log writes |
//! | [`HistorySink`] | Write-only query history |
//!
//! Implementations must be `Send + Sync`. The application crate provides
//! SQLite backends; [`memory`] provides in-memory ones for tests.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    Admission, CallLogEntry, ContentFilter, Fragment, FragmentHit, QueryResult, SourceMeta,
};

/// Per-user partitioned fragment storage.
#[async_trait]
pub trait FragmentStore: Send + Sync {
    /// Replace the entire fragment set for one source, atomically.
    ///
    /// Upserts the source row, deletes any prior fragments for
    /// `(user_id, meta.source_id)`, and inserts the new set with its
    /// vectors, all within one transaction — a concurrent query sees the
    /// old set or the new set, never a mix. `vectors` must be the same
    /// length as `fragments`.
    async fn replace_source(
        &self,
        user_id: &str,
        meta: &SourceMeta,
        fragments: &[Fragment],
        vectors: &[Vec<f32>],
    ) -> Result<()>;

    /// Delete a source and all its fragments (cascade).
    async fn delete_source(&self, user_id: &str, source_id: &str) -> Result<()>;

    /// Toggle the favorite flag on a source. Fragments inherit it at
    /// query time; nothing else is rewritten.
    async fn set_favorite(&self, user_id: &str, source_id: &str, favorite: bool) -> Result<()>;

    /// Return all of the user's fragments passing `filter`, each with
    /// its stored vector and parent-source metadata. Fragments are
    /// read-only during a query, so no synchronization is required on
    /// the returned data.
    async fn scan_fragments(
        &self,
        user_id: &str,
        filter: ContentFilter,
    ) -> Result<Vec<FragmentHit>>;
}

/// Atomic per-user usage accounting.
///
/// `admit` performs the quota check and the free-tier increment as one
/// linearizable step per user: two concurrent calls can never both take
/// the last free slot. The critical section covers only the counter —
/// never a provider call.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Decide whether a question may proceed to paid model calls.
    ///
    /// Allowed when the user has an active subscription window
    /// (evaluated lazily: an expired window flips inactive on first read
    /// past its end) or a free slot remains; a free-tier admission
    /// increments the counter in the same step.
    async fn admit(&self, user_id: &str) -> Result<Admission>;

    /// Compensating decrement for a free-tier admission whose pipeline
    /// failed before an answer attempt completed.
    async fn release(&self, user_id: &str, admission: &Admission) -> Result<()>;

    /// Finalize a successful answer attempt. With increment-at-admit
    /// this changes no counter; failures here are logged by the caller
    /// and never retract the answer.
    async fn commit(&self, user_id: &str, admission: &Admission) -> Result<()>;
}

/// Append-only call-log storage. Entries are never mutated.
#[async_trait]
pub trait CallSink: Send + Sync {
    async fn append(&self, entry: &CallLogEntry) -> Result<()>;
}

/// Write-only query history.
#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Record the outcome of one question. `outcome` is one of
    /// `"answered"`, `"insufficient-context"`.
    async fn record(&self, user_id: &str, result: &QueryResult, outcome: &str) -> Result<()>;
}
