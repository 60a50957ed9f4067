//! Content indexer: fragment → embed → transactional replace.
//!
//! Converts the already-extracted text of one source into overlapping
//! fragments, obtains an embedding for each (every call wrapped by the
//! call ledger), and replaces the source's fragment set in one atomic
//! store operation. All-or-nothing per source: if any embedding fails,
//! nothing is written and previously indexed sources are untouched.
//!
//! Re-indexing is idempotent — the same text always produces the same
//! ordinal/text sequence, and the transactional replace removes any old
//! fragments beyond the new count.

use uuid::Uuid;

use crate::error::IndexError;
use crate::fragment::split_fragments;
use crate::models::{CallKind, SourceMeta, TokenUsage};
use crate::provider::Embedder;
use crate::store::FragmentStore;
use crate::telemetry::{CallLedger, Observed};

/// Fragmenting parameters for the indexer.
#[derive(Debug, Clone)]
pub struct IndexParams {
    /// Target fragment length in tokens.
    pub fragment_tokens: usize,
    /// Overlap between consecutive fragments in tokens.
    pub overlap_tokens: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            fragment_tokens: 300,
            overlap_tokens: 50,
        }
    }
}

/// Index (or re-index) one source for a user.
///
/// Returns the number of fragments written. Empty text indexes zero
/// fragments (and clears any previous set for the source id).
pub async fn index_source<S: FragmentStore + ?Sized, E: Embedder + ?Sized>(
    store: &S,
    embedder: &E,
    calls: &CallLedger,
    user_id: &str,
    meta: &SourceMeta,
    full_text: &str,
    params: &IndexParams,
) -> Result<usize, IndexError> {
    let fragments = split_fragments(
        user_id,
        &meta.source_id,
        full_text,
        params.fragment_tokens,
        params.overlap_tokens,
    );

    // One correlation id per indexing run, shared by all embedding calls.
    let correlation_id = Uuid::new_v4().to_string();
    let model = embedder.model_name().to_string();

    let mut vectors = Vec::with_capacity(fragments.len());
    for fragment in &fragments {
        let vector = calls
            .observe(
                CallKind::Embedding,
                &model,
                &correlation_id,
                fragment.text.len(),
                async {
                    let embedding = embedder.embed(&fragment.text).await?;
                    Ok(Observed {
                        value: embedding.vector,
                        usage: TokenUsage {
                            prompt: None,
                            completion: None,
                            total: embedding.tokens,
                        },
                        output_chars: 0,
                    })
                },
            )
            .await
            .map_err(|e| IndexError::Provider {
                source_id: meta.source_id.clone(),
                ordinal: fragment.ordinal,
                detail: e.to_string(),
            })?;
        vectors.push(vector);
    }

    store
        .replace_source(user_id, meta, &fragments, &vectors)
        .await
        .map_err(|e| IndexError::Store {
            source_id: meta.source_id.clone(),
            detail: e.to_string(),
        })?;

    tracing::debug!(
        user_id,
        source_id = %meta.source_id,
        kind = meta.kind.as_str(),
        fragments = fragments.len(),
        "source indexed"
    );

    Ok(fragments.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;
    use crate::provider::MockEmbedder;
    use crate::store::memory::{MemoryCallLog, MemoryStore};
    use std::sync::Arc;

    fn meta(source_id: &str) -> SourceMeta {
        SourceMeta {
            source_id: source_id.to_string(),
            kind: SourceKind::Document,
            favorite: false,
            created_at: 1_700_000_000,
        }
    }

    fn params() -> IndexParams {
        IndexParams {
            fragment_tokens: 20,
            overlap_tokens: 4,
        }
    }

    #[tokio::test]
    async fn test_index_writes_fragments_and_logs_embeddings() {
        let store = MemoryStore::new();
        let log = Arc::new(MemoryCallLog::new());
        let calls = CallLedger::new(log.clone());
        let embedder = MockEmbedder::new(16);

        let text = "A transcript line. ".repeat(30);
        let count = index_source(&store, &embedder, &calls, "u1", &meta("s1"), &text, &params())
            .await
            .unwrap();

        assert!(count > 1);
        assert_eq!(store.fragment_count("u1", "s1"), count);
        // One log entry per fragment embedding, all successful.
        assert_eq!(log.len(), count);
        assert!(log.entries().iter().all(|e| e.success));
        // All calls of one run share a correlation id.
        let cid = &log.entries()[0].correlation_id;
        assert!(log.entries().iter().all(|e| &e.correlation_id == cid));
    }

    #[tokio::test]
    async fn test_embedding_failure_aborts_without_partial_commit() {
        let store = MemoryStore::new();
        let log = Arc::new(MemoryCallLog::new());
        let calls = CallLedger::new(log.clone());

        // Seed a previous index of the same source.
        let good = MockEmbedder::new(16);
        let prior = index_source(
            &store,
            &good,
            &calls,
            "u1",
            &meta("s1"),
            "earlier version of the source text",
            &params(),
        )
        .await
        .unwrap();
        assert_eq!(store.fragment_count("u1", "s1"), prior);

        let failing = MockEmbedder::new(16).failing();
        let err = index_source(
            &store,
            &failing,
            &calls,
            "u1",
            &meta("s1"),
            "new text that will fail to embed",
            &params(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, IndexError::Provider { .. }));
        // The old fragment set is untouched.
        assert_eq!(store.fragment_count("u1", "s1"), prior);
        // The failed embedding call was still logged.
        assert!(log.entries().iter().any(|e| !e.success));
    }

    #[tokio::test]
    async fn test_reindex_is_idempotent() {
        let store = MemoryStore::new();
        let calls = CallLedger::new(Arc::new(MemoryCallLog::new()));
        let embedder = MockEmbedder::new(16);

        let text = "Stable content that is indexed twice. ".repeat(20);
        let first = index_source(&store, &embedder, &calls, "u1", &meta("s1"), &text, &params())
            .await
            .unwrap();
        let texts_first = store.fragment_texts("u1", "s1");

        let second =
            index_source(&store, &embedder, &calls, "u1", &meta("s1"), &text, &params())
                .await
                .unwrap();
        let texts_second = store.fragment_texts("u1", "s1");

        assert_eq!(first, second);
        assert_eq!(texts_first, texts_second);
    }

    #[tokio::test]
    async fn test_shrinking_reindex_drops_old_fragments() {
        let store = MemoryStore::new();
        let calls = CallLedger::new(Arc::new(MemoryCallLog::new()));
        let embedder = MockEmbedder::new(16);

        let long = "Many words in a long source text. ".repeat(40);
        index_source(&store, &embedder, &calls, "u1", &meta("s1"), &long, &params())
            .await
            .unwrap();

        let short = "Just one small fragment now.";
        let count = index_source(&store, &embedder, &calls, "u1", &meta("s1"), short, &params())
            .await
            .unwrap();

        assert_eq!(count, 1);
        assert_eq!(store.fragment_count("u1", "s1"), 1);
    }
}
