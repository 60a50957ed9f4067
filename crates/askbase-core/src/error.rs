//! Error taxonomy for the query pipeline.
//!
//! Quota rejection and insufficient context are *not* errors — they are
//! defined outcomes ([`crate::models::QueryOutcome`]). The types here
//! cover the genuinely failed paths: provider outages, store faults, and
//! configuration problems. Telemetry write failures never appear at this
//! level; the call ledger swallows them.

use thiserror::Error;

/// The pipeline stage at which a provider call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Embedding,
    Generation,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Embedding => write!(f, "embedding"),
            Stage::Generation => write!(f, "generation"),
        }
    }
}

/// A question that could not be answered. The front-end maps
/// `ProviderUnavailable` to a retry-suggested message; everything else
/// is an internal fault.
#[derive(Error, Debug)]
pub enum QueryError {
    /// An external-model call failed or timed out. Usage was not
    /// committed on this path.
    #[error("{stage} provider unavailable: {detail}")]
    ProviderUnavailable { stage: Stage, detail: String },

    /// The usage ledger could not produce an admission decision. A hard
    /// failure: no question is answered without a quota decision.
    #[error("usage ledger error: {0}")]
    Ledger(String),

    /// The fragment store failed during retrieval or history writes.
    #[error("store error: {0}")]
    Store(String),
}

/// An indexing run that aborted. No partial fragment set is ever left
/// behind: the store's replace is transactional per source.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Embedding failed for some fragment; the whole source was skipped.
    #[error("embedding failed for fragment {ordinal} of {source_id}: {detail}")]
    Provider {
        source_id: String,
        ordinal: i64,
        detail: String,
    },

    /// The store rejected the replacement transaction.
    #[error("store error while indexing {source_id}: {detail}")]
    Store { source_id: String, detail: String },
}
