//! Query orchestrator: the end-to-end ask flow.
//!
//! Drives the state machine
//! `Received → Admitted → Retrieved → Assembled → Synthesized → Committed`
//! with `Rejected` as the quota terminal and `Failed` for unrecovered
//! errors. This is the only component front-ends call; it guarantees
//! exactly one of {answer, insufficient-context, quota notice, error}
//! per question — never silence, never a partial answer.
//!
//! Quota accounting: admission increments the free counter atomically
//! (check-and-increment in one step), so the per-user critical section
//! is never held across a provider call. If the pipeline fails after
//! admission but before an answer attempt completes, the slot is
//! released with a compensating decrement. Reaching the
//! insufficient-context outcome *is* an answer attempt — an embedding
//! call was made — so that path commits.

use std::sync::Arc;

use uuid::Uuid;

use crate::assemble::assemble;
use crate::error::{QueryError, Stage};
use crate::models::{
    CallKind, QueryOutcome, QueryResult, TokenUsage, UserProfile,
};
use crate::provider::{Embedder, Generator};
use crate::retrieve::{retrieve, RetrieveParams};
use crate::store::{FragmentStore, HistorySink, UsageLedger};
use crate::synthesize::synthesize;
use crate::telemetry::{CallLedger, Observed};

/// Pipeline-wide tuning, validated once at startup.
#[derive(Debug, Clone)]
pub struct PipelineParams {
    /// Minimum cosine similarity for a fragment to count as relevant.
    pub similarity_threshold: f32,
    /// Maximum context size, in estimated tokens.
    pub token_budget: usize,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.75,
            token_budget: 2000,
        }
    }
}

/// The retrieval-augmented query pipeline with usage gating.
pub struct QueryPipeline {
    store: Arc<dyn FragmentStore>,
    ledger: Arc<dyn UsageLedger>,
    calls: CallLedger,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    history: Option<Arc<dyn HistorySink>>,
    params: PipelineParams,
}

impl QueryPipeline {
    pub fn new(
        store: Arc<dyn FragmentStore>,
        ledger: Arc<dyn UsageLedger>,
        calls: CallLedger,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        params: PipelineParams,
    ) -> Self {
        Self {
            store,
            ledger,
            calls,
            embedder,
            generator,
            history: None,
            params,
        }
    }

    /// Attach a query-history sink. History is write-only and
    /// best-effort: a failed write never affects the outcome.
    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    /// Answer one question for one (already-authenticated) user.
    pub async fn ask(
        &self,
        user: &UserProfile,
        question: &str,
    ) -> Result<QueryOutcome, QueryError> {
        // Received → Admitted | Rejected. Ledger unavailability is a
        // hard failure: no answer without a quota decision.
        let admission = self
            .ledger
            .admit(&user.id)
            .await
            .map_err(|e| QueryError::Ledger(e.to_string()))?;
        if !admission.allowed {
            tracing::debug!(user_id = %user.id, "question rejected: quota exhausted");
            return Ok(QueryOutcome::QuotaExceeded);
        }

        let correlation_id = Uuid::new_v4().to_string();

        // Admitted → Retrieved. Embedding failure releases the slot.
        let embed_model = self.embedder.model_name().to_string();
        let query_vec = match self
            .calls
            .observe(
                CallKind::Embedding,
                &embed_model,
                &correlation_id,
                question.len(),
                async {
                    let embedding = self.embedder.embed(question).await?;
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
        {
            Ok(v) => v,
            Err(e) => {
                self.release(&user.id, &admission).await;
                return Err(QueryError::ProviderUnavailable {
                    stage: Stage::Embedding,
                    detail: e.to_string(),
                });
            }
        };

        let retrieve_params = RetrieveParams {
            threshold: self.params.similarity_threshold,
            limit: user.search_limit,
        };
        let scored = match retrieve(
            self.store.as_ref(),
            &user.id,
            &query_vec,
            user.filter,
            &retrieve_params,
        )
        .await
        {
            Ok(s) => s,
            Err(e) => {
                self.release(&user.id, &admission).await;
                return Err(QueryError::Store(e.to_string()));
            }
        };

        // Retrieved → Assembled (always succeeds).
        let block = assemble(&scored, self.params.token_budget);

        if block.is_empty() {
            // Distinct no-context outcome: the generator is never
            // invoked, but the attempt consumed a quota slot.
            self.commit(&user.id, &admission).await;
            self.record(
                &user.id,
                &QueryResult {
                    question: question.to_string(),
                    answer: String::new(),
                    citations: Vec::new(),
                    style: user.style,
                },
                "insufficient-context",
            )
            .await;
            return Ok(QueryOutcome::InsufficientContext);
        }

        // Assembled → Synthesized. Generation failure releases the slot.
        let answer = match synthesize(
            self.generator.as_ref(),
            &self.calls,
            &correlation_id,
            question,
            &block,
            user.style,
        )
        .await
        {
            Ok(a) => a,
            Err(e) => {
                self.release(&user.id, &admission).await;
                return Err(e);
            }
        };

        // Synthesized → Committed. A commit failure never retracts the
        // answer already produced.
        self.commit(&user.id, &admission).await;

        let result = QueryResult {
            question: question.to_string(),
            answer: answer.text,
            citations: answer.citations,
            style: user.style,
        };
        self.record(&user.id, &result, "answered").await;

        Ok(QueryOutcome::Answered(result))
    }

    async fn release(&self, user_id: &str, admission: &crate::models::Admission) {
        if let Err(e) = self.ledger.release(user_id, admission).await {
            tracing::warn!(user_id, error = %e, "quota release failed; slot may be over-counted");
        }
    }

    async fn commit(&self, user_id: &str, admission: &crate::models::Admission) {
        if let Err(e) = self.ledger.commit(user_id, admission).await {
            tracing::error!(
                user_id,
                error = %e,
                "usage commit failed after successful attempt; recorded for reconciliation"
            );
        }
    }

    async fn record(&self, user_id: &str, result: &QueryResult, outcome: &str) {
        if let Some(history) = &self.history {
            if let Err(e) = history.record(user_id, result, outcome).await {
                tracing::warn!(user_id, error = %e, "query history write failed");
            }
        }
    }
}
