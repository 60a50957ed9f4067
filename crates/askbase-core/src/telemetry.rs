//! Call ledger: uniform timing and accounting for external-model calls.
//!
//! Every embedding, generation, and transcription call goes through
//! [`CallLedger::observe`], which times the call, captures token counts
//! from the provider's own response metadata, computes cost from the
//! static rate table, and appends exactly one [`CallLogEntry`] — on
//! success and failure alike — before returning or re-raising.
//!
//! Writing the log entry must never abort the wrapped call: a failed
//! append is reported through `tracing::warn!` and swallowed. This is a
//! deliberate isolation boundary, so telemetry outages cannot become
//! user-visible failures.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use uuid::Uuid;

use crate::cost::cost_usd;
use crate::models::{CallKind, CallLogEntry, TokenUsage};
use crate::store::CallSink;

/// A successful provider response plus the metadata the ledger records.
#[derive(Debug)]
pub struct Observed<T> {
    pub value: T,
    pub usage: TokenUsage,
    pub output_chars: usize,
}

/// Wraps external-model calls with timing, token/cost accounting, and
/// durable per-call records.
#[derive(Clone)]
pub struct CallLedger {
    sink: Arc<dyn CallSink>,
}

impl CallLedger {
    pub fn new(sink: Arc<dyn CallSink>) -> Self {
        Self { sink }
    }

    /// Run `call`, recording exactly one log entry for it.
    ///
    /// The entry is written before the result is returned, whether the
    /// call succeeded or failed; a timeout inside `call` surfaces as a
    /// failure entry with the timeout as error detail. No retry happens
    /// here: one attempt, one entry, one outcome.
    pub async fn observe<T, F>(
        &self,
        kind: CallKind,
        model: &str,
        correlation_id: &str,
        input_chars: usize,
        call: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<Observed<T>>>,
    {
        let started = Instant::now();
        let outcome = call.await;
        let latency_ms = started.elapsed().as_millis() as i64;

        let (usage, output_chars, success, error) = match &outcome {
            Ok(observed) => (observed.usage, observed.output_chars as i64, true, None),
            Err(e) => (TokenUsage::default(), 0, false, Some(e.to_string())),
        };

        let entry = CallLogEntry {
            id: Uuid::new_v4().to_string(),
            kind,
            model: model.to_string(),
            correlation_id: correlation_id.to_string(),
            input_chars: input_chars as i64,
            output_chars,
            usage,
            latency_ms,
            cost_usd: cost_usd(model, &usage),
            success,
            error,
            created_at: Utc::now(),
        };

        if let Err(log_err) = self.sink.append(&entry).await {
            tracing::warn!(
                kind = kind.as_str(),
                model,
                correlation_id,
                error = %log_err,
                "call log write failed; entry dropped"
            );
        }

        outcome.map(|observed| observed.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryCallLog;

    #[tokio::test]
    async fn test_success_writes_one_entry() {
        let log = Arc::new(MemoryCallLog::new());
        let ledger = CallLedger::new(log.clone());

        let out: i32 = ledger
            .observe(CallKind::Embedding, "text-embedding-3-small", "q1", 12, async {
                Ok(Observed {
                    value: 7,
                    usage: TokenUsage::total_only(3),
                    output_chars: 0,
                })
            })
            .await
            .unwrap();

        assert_eq!(out, 7);
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].success);
        assert_eq!(entries[0].usage.total, Some(3));
        assert!(entries[0].cost_usd.is_some());
        assert_eq!(entries[0].correlation_id, "q1");
    }

    #[tokio::test]
    async fn test_failure_still_writes_entry_and_reraises() {
        let log = Arc::new(MemoryCallLog::new());
        let ledger = CallLedger::new(log.clone());

        let result: Result<()> = ledger
            .observe(CallKind::Generation, "gpt-4o-mini", "q2", 40, async {
                anyhow::bail!("upstream timed out")
            })
            .await;

        assert!(result.is_err());
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].success);
        assert_eq!(entries[0].error.as_deref(), Some("upstream timed out"));
        assert_eq!(entries[0].output_chars, 0);
    }

    #[tokio::test]
    async fn test_unknown_model_records_null_cost() {
        let log = Arc::new(MemoryCallLog::new());
        let ledger = CallLedger::new(log.clone());

        ledger
            .observe(CallKind::Transcription, "whisper-1", "q3", 0, async {
                Ok(Observed {
                    value: (),
                    usage: TokenUsage::default(),
                    output_chars: 120,
                })
            })
            .await
            .unwrap();

        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].cost_usd.is_none());
        assert!(entries[0].success);
    }

    #[tokio::test]
    async fn test_log_write_failure_is_swallowed() {
        let log = Arc::new(MemoryCallLog::new());
        log.set_failing(true);
        let ledger = CallLedger::new(log.clone());

        let out: &str = ledger
            .observe(CallKind::Generation, "gpt-4o", "q4", 5, async {
                Ok(Observed {
                    value: "answer",
                    usage: TokenUsage::default(),
                    output_chars: 6,
                })
            })
            .await
            .unwrap();

        assert_eq!(out, "answer");
        assert!(log.is_empty());
    }
}
