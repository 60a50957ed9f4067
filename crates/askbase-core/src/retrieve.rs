//! Retrieval: similarity scoring, threshold exclusion, deterministic
//! ranking.
//!
//! Given a query embedding, the retriever scores every fragment the user
//! owns that passes the content filter, drops fragments below the
//! similarity threshold, and returns at most `limit` of the rest in a
//! fully deterministic order:
//!
//! 1. similarity, descending
//! 2. parent-source creation time, descending (newer sources win ties)
//! 3. ordinal, ascending
//!
//! Determinism matters: reproducible answers need reproducible context.
//! An empty result is not an error — the orchestrator maps it to the
//! insufficient-context outcome.

use anyhow::Result;

use crate::models::{ContentFilter, FragmentHit, ScoredFragment};
use crate::store::FragmentStore;
use crate::vector::cosine_similarity;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrieveParams {
    /// Minimum cosine similarity a fragment must meet to be considered.
    pub threshold: f32,
    /// Maximum fragments to return.
    pub limit: usize,
}

/// Score, filter, and rank a set of fragment hits against a query vector.
///
/// Pure function over already-scanned hits; [`retrieve`] is the
/// store-backed entry point.
pub fn rank_fragments(
    hits: Vec<FragmentHit>,
    query_vec: &[f32],
    params: &RetrieveParams,
) -> Vec<ScoredFragment> {
    let mut scored: Vec<ScoredFragment> = hits
        .into_iter()
        .filter_map(|hit| {
            let similarity = cosine_similarity(query_vec, &hit.vector);
            if similarity < params.threshold {
                return None;
            }
            Some(ScoredFragment {
                fragment: hit.fragment,
                kind: hit.kind,
                source_created_at: hit.source_created_at,
                similarity,
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.source_created_at.cmp(&a.source_created_at))
            .then_with(|| a.fragment.ordinal.cmp(&b.fragment.ordinal))
    });

    scored.truncate(params.limit);
    scored
}

/// Run a retrieval against a [`FragmentStore`].
///
/// Scans the user's partition under `filter` (per-user isolation is the
/// store's contract) and ranks in memory; fragments are read-only during
/// a query so the scan needs no synchronization.
pub async fn retrieve<S: FragmentStore + ?Sized>(
    store: &S,
    user_id: &str,
    query_vec: &[f32],
    filter: ContentFilter,
    params: &RetrieveParams,
) -> Result<Vec<ScoredFragment>> {
    let hits = store.scan_fragments(user_id, filter).await?;
    Ok(rank_fragments(hits, query_vec, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Fragment, SourceKind};

    fn hit(
        source_id: &str,
        ordinal: i64,
        vector: Vec<f32>,
        source_created_at: i64,
    ) -> FragmentHit {
        FragmentHit {
            fragment: Fragment {
                id: format!("{}#{}", source_id, ordinal),
                user_id: "u1".to_string(),
                source_id: source_id.to_string(),
                ordinal,
                text: format!("fragment {} of {}", ordinal, source_id),
                hash: String::new(),
            },
            vector,
            kind: SourceKind::Document,
            favorite: false,
            source_created_at,
        }
    }

    const QUERY: [f32; 2] = [1.0, 0.0];

    #[test]
    fn test_threshold_excludes_regardless_of_limit() {
        let hits = vec![
            hit("s1", 0, vec![1.0, 0.0], 100),   // sim 1.0
            hit("s1", 1, vec![0.0, 1.0], 100),   // sim 0.0
            hit("s2", 0, vec![0.9, 0.436], 200), // sim ≈ 0.9
        ];
        let params = RetrieveParams {
            threshold: 0.75,
            limit: 50,
        };
        let out = rank_fragments(hits, &QUERY, &params);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|s| s.similarity >= 0.75));
    }

    #[test]
    fn test_order_similarity_then_recency_then_ordinal() {
        // Two fragments with identical vectors (tied similarity) from
        // sources created at different times, plus ordinal ties.
        let hits = vec![
            hit("old", 0, vec![1.0, 0.0], 100),
            hit("new", 3, vec![1.0, 0.0], 200),
            hit("new", 1, vec![1.0, 0.0], 200),
            hit("best", 0, vec![1.0, 0.001], 50),
        ];
        let params = RetrieveParams {
            threshold: 0.5,
            limit: 10,
        };
        let out = rank_fragments(hits, &QUERY, &params);
        let ids: Vec<&str> = out.iter().map(|s| s.fragment.id.as_str()).collect();
        // "best" has the (slightly) lower similarity of the exact-match
        // trio, so the exact matches sort by source recency, then ordinal.
        assert_eq!(ids, vec!["new#1", "new#3", "old#0", "best#0"]);
    }

    #[test]
    fn test_deterministic_across_calls() {
        let make = || {
            vec![
                hit("a", 0, vec![0.8, 0.6], 10),
                hit("b", 0, vec![0.8, 0.6], 10),
                hit("c", 2, vec![0.9, 0.436], 30),
            ]
        };
        let params = RetrieveParams {
            threshold: 0.0,
            limit: 10,
        };
        let first: Vec<String> = rank_fragments(make(), &QUERY, &params)
            .iter()
            .map(|s| s.fragment.id.clone())
            .collect();
        let second: Vec<String> = rank_fragments(make(), &QUERY, &params)
            .iter()
            .map(|s| s.fragment.id.clone())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_limit_truncates() {
        let hits = (0..10)
            .map(|i| hit("s", i, vec![1.0, 0.0], 100 + i))
            .collect();
        let params = RetrieveParams {
            threshold: 0.5,
            limit: 3,
        };
        assert_eq!(rank_fragments(hits, &QUERY, &params).len(), 3);
    }

    #[test]
    fn test_empty_result_is_not_an_error() {
        let hits = vec![hit("s1", 0, vec![0.0, 1.0], 100)];
        let params = RetrieveParams {
            threshold: 0.75,
            limit: 5,
        };
        assert!(rank_fragments(hits, &QUERY, &params).is_empty());
    }
}
