//! Static per-model USD rate table.
//!
//! Costs are computed from provider-reported token counts at log time.
//! Unknown models record their token counts with a null cost rather than
//! failing — the call ledger must never abort a call over pricing.

use crate::models::TokenUsage;

/// USD per million tokens, split by direction. Embedding models only use
/// the prompt rate.
struct ModelRate {
    model: &'static str,
    prompt_per_mtok: f64,
    completion_per_mtok: f64,
}

/// Published list prices, reviewed 2026-06.
const RATES: &[ModelRate] = &[
    ModelRate {
        model: "text-embedding-3-small",
        prompt_per_mtok: 0.02,
        completion_per_mtok: 0.0,
    },
    ModelRate {
        model: "text-embedding-3-large",
        prompt_per_mtok: 0.13,
        completion_per_mtok: 0.0,
    },
    ModelRate {
        model: "gpt-4o",
        prompt_per_mtok: 2.50,
        completion_per_mtok: 10.00,
    },
    ModelRate {
        model: "gpt-4o-mini",
        prompt_per_mtok: 0.15,
        completion_per_mtok: 0.60,
    },
    ModelRate {
        model: "gpt-4.1",
        prompt_per_mtok: 2.00,
        completion_per_mtok: 8.00,
    },
    ModelRate {
        model: "gpt-4.1-mini",
        prompt_per_mtok: 0.40,
        completion_per_mtok: 1.60,
    },
];

/// Compute the USD cost of a call, or `None` for models not in the table.
///
/// When only a total token count is known (embeddings), the prompt rate
/// is applied to it.
pub fn cost_usd(model: &str, usage: &TokenUsage) -> Option<f64> {
    let rate = RATES.iter().find(|r| r.model == model)?;

    let prompt = usage.prompt.or(usage.total).unwrap_or(0) as f64;
    let completion = usage.completion.unwrap_or(0) as f64;

    Some((prompt * rate.prompt_per_mtok + completion * rate.completion_per_mtok) / 1_000_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_cost_from_total() {
        let usage = TokenUsage::total_only(1_000_000);
        let cost = cost_usd("text-embedding-3-small", &usage).unwrap();
        assert!((cost - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_generation_cost_splits_directions() {
        let usage = TokenUsage {
            prompt: Some(1_000_000),
            completion: Some(500_000),
            total: Some(1_500_000),
        };
        let cost = cost_usd("gpt-4o-mini", &usage).unwrap();
        assert!((cost - (0.15 + 0.30)).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_is_none() {
        assert!(cost_usd("whisper-1", &TokenUsage::default()).is_none());
        assert!(cost_usd("some-local-model", &TokenUsage::total_only(10)).is_none());
    }

    #[test]
    fn test_missing_counts_cost_zero() {
        let cost = cost_usd("gpt-4o", &TokenUsage::default()).unwrap();
        assert_eq!(cost, 0.0);
    }
}
