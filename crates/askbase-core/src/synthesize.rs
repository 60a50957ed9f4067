//! Answer synthesis: style-directed prompting over the assembled context.
//!
//! The synthesizer builds a single prompt embedding the user's answer
//! style (a closed enum, never free text) and the assembled context, and
//! invokes the generation capability through the call ledger. Citations
//! are taken from the context block — the synthesizer never invents
//! them.

use crate::error::{QueryError, Stage};
use crate::models::{Answer, AnswerStyle, CallKind};
use crate::provider::Generator;
use crate::telemetry::{CallLedger, Observed};

use crate::assemble::ContextBlock;

/// Instruction appended for each answer style.
pub fn style_directive(style: AnswerStyle) -> &'static str {
    match style {
        AnswerStyle::Concise => "Answer in at most three sentences, direct and to the point.",
        AnswerStyle::Detailed => {
            "Answer thoroughly, covering the relevant details found in the context."
        }
        AnswerStyle::StepByStep => {
            "Answer as a numbered sequence of steps, one action or idea per step."
        }
    }
}

/// Build the single generation prompt for a question.
///
/// The model is instructed to use only the supplied context and to cite
/// the `[source#ordinal]` markers it drew from; grounding is enforced
/// upstream (no context → no generation call at all).
pub fn build_prompt(question: &str, block: &ContextBlock, style: AnswerStyle) -> String {
    format!(
        "You are an assistant that answers questions using only the user's \
own content library, supplied as context below. Each context passage is \
prefixed with a [source#ordinal] marker; mention the markers of the \
passages you used. Do not add facts that are not in the context. If the \
context does not contain the information needed, say that the content \
library does not cover the question.\n\
{directive}\n\n\
Context:\n{context}\n\n\
Question: {question}\n\n\
Answer:",
        directive = style_directive(style),
        context = block.text,
        question = question,
    )
}

/// Invoke the generation model and pair its text with the context's
/// citation set.
///
/// Generation failure propagates as
/// [`QueryError::ProviderUnavailable`]; the orchestrator releases the
/// quota slot on that path.
pub async fn synthesize(
    generator: &dyn Generator,
    calls: &CallLedger,
    correlation_id: &str,
    question: &str,
    block: &ContextBlock,
    style: AnswerStyle,
) -> Result<Answer, QueryError> {
    let prompt = build_prompt(question, block, style);
    let model = generator.model_name().to_string();

    let text = calls
        .observe(
            CallKind::Generation,
            &model,
            correlation_id,
            prompt.len(),
            async {
                let generation = generator.generate(&prompt).await?;
                let output_chars = generation.text.len();
                Ok(Observed {
                    value: generation.text,
                    usage: generation.usage,
                    output_chars,
                })
            },
        )
        .await
        .map_err(|e| QueryError::ProviderUnavailable {
            stage: Stage::Generation,
            detail: e.to_string(),
        })?;

    Ok(Answer {
        text: text.trim().to_string(),
        citations: block.citations.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::assemble;
    use crate::models::{Fragment, ScoredFragment, SourceKind};
    use crate::provider::MockGenerator;
    use crate::store::memory::MemoryCallLog;
    use std::sync::Arc;

    fn block_with_one_fragment() -> ContextBlock {
        let scored = ScoredFragment {
            fragment: Fragment {
                id: "f1".to_string(),
                user_id: "u1".to_string(),
                source_id: "doc-1".to_string(),
                ordinal: 0,
                text: "The onboarding call covers pricing tiers.".to_string(),
                hash: String::new(),
            },
            kind: SourceKind::Document,
            source_created_at: 0,
            similarity: 0.9,
        };
        assemble(&[scored], 500)
    }

    #[test]
    fn test_prompt_embeds_style_context_and_question() {
        let block = block_with_one_fragment();
        let prompt = build_prompt("What do calls cover?", &block, AnswerStyle::StepByStep);
        assert!(prompt.contains("numbered sequence of steps"));
        assert!(prompt.contains("[doc-1#0]"));
        assert!(prompt.contains("Question: What do calls cover?"));
    }

    #[tokio::test]
    async fn test_citations_come_from_context() {
        let log = Arc::new(MemoryCallLog::new());
        let calls = CallLedger::new(log.clone());
        let generator = MockGenerator::new("Pricing tiers, per [doc-1#0].");
        let block = block_with_one_fragment();

        let answer = synthesize(
            &generator,
            &calls,
            "q1",
            "What do calls cover?",
            &block,
            AnswerStyle::Concise,
        )
        .await
        .unwrap();

        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].source_id, "doc-1");
        assert_eq!(log.len(), 1);
        assert!(log.entries()[0].success);
    }

    #[tokio::test]
    async fn test_generation_failure_maps_to_provider_unavailable() {
        let log = Arc::new(MemoryCallLog::new());
        let calls = CallLedger::new(log.clone());
        let generator = MockGenerator::new("unused").failing();
        let block = block_with_one_fragment();

        let err = synthesize(
            &generator,
            &calls,
            "q1",
            "anything",
            &block,
            AnswerStyle::Detailed,
        )
        .await
        .unwrap_err();

        match err {
            QueryError::ProviderUnavailable { stage, .. } => {
                assert_eq!(stage, Stage::Generation)
            }
            other => panic!("unexpected error: {other}"),
        }
        // Failure still produced exactly one log entry.
        assert_eq!(log.len(), 1);
        assert!(!log.entries()[0].success);
    }
}
