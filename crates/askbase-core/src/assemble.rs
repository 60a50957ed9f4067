//! Context assembly: token-budgeted packing with citation markers.
//!
//! Fragments arrive in the retriever's order and are included greedily
//! until adding the next one would exceed the token budget. A fragment
//! that does not fit is skipped, never cut — except when the very first
//! fragment alone exceeds the budget, in which case it is truncated at a
//! sentence boundary as a last resort and flagged as truncated in its
//! citation.
//!
//! Each included fragment is prefixed with a stable marker
//! (`[source-id#ordinal]`) so an answer can be cross-checked against the
//! real sources.

use crate::fragment::{estimate_tokens, CHARS_PER_TOKEN};
use crate::models::{Citation, ScoredFragment};

/// Maximum excerpt length carried on a citation, in characters.
const EXCERPT_CHARS: usize = 160;

/// Separator between fragments in the assembled block.
const SEPARATOR: &str = "\n\n---\n\n";

/// An assembled, token-budgeted context ready for the synthesizer.
#[derive(Debug, Clone)]
pub struct ContextBlock {
    pub text: String,
    pub citations: Vec<Citation>,
    pub token_estimate: usize,
}

impl ContextBlock {
    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }
}

/// Pack fragments into a context block of at most `token_budget` tokens.
///
/// Skip-and-continue: a fragment that would overflow the budget is
/// skipped and later (smaller) fragments may still be included. The
/// returned block's `token_estimate` never exceeds `token_budget`; the
/// single-fragment truncation fallback is flagged via
/// [`Citation::truncated`].
pub fn assemble(fragments: &[ScoredFragment], token_budget: usize) -> ContextBlock {
    let mut text = String::new();
    let mut citations = Vec::new();

    for scored in fragments {
        let marker = format!(
            "[{}#{}]\n",
            scored.fragment.source_id, scored.fragment.ordinal
        );
        let mut piece_text = scored.fragment.text.clone();
        let mut truncated = false;

        let sep_tokens = if text.is_empty() {
            0
        } else {
            estimate_tokens(SEPARATOR)
        };
        let piece_tokens = estimate_tokens(&marker) + estimate_tokens(&piece_text);

        if estimate_tokens(&text) + sep_tokens + piece_tokens > token_budget {
            if !citations.is_empty() {
                continue; // skip, never cut
            }
            // First fragment alone exceeds the budget: sentence-boundary
            // truncation as a last resort.
            let budget_chars = token_budget
                .saturating_sub(estimate_tokens(&marker))
                .saturating_mul(CHARS_PER_TOKEN);
            if budget_chars == 0 {
                continue;
            }
            piece_text = truncate_at_sentence(&piece_text, budget_chars);
            if piece_text.is_empty() {
                continue;
            }
            truncated = true;
        }

        if !text.is_empty() {
            text.push_str(SEPARATOR);
        }
        text.push_str(&marker);
        text.push_str(&piece_text);

        citations.push(Citation {
            source_id: scored.fragment.source_id.clone(),
            kind: scored.kind,
            ordinal: scored.fragment.ordinal,
            excerpt: excerpt(&scored.fragment.text),
            similarity: scored.similarity,
            truncated,
        });
    }

    let token_estimate = estimate_tokens(&text);
    ContextBlock {
        text,
        citations,
        token_estimate,
    }
}

/// Cut `text` to at most `max_chars`, ending at the last sentence
/// terminator (`.`, `!`, `?`) inside the window when one exists,
/// otherwise at the nearest char boundary.
fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let cut = snap(text, max_chars);
    let window = &text[..cut];
    match window.rfind(['.', '!', '?']) {
        Some(pos) => window[..=pos].trim().to_string(),
        None => window.trim().to_string(),
    }
}

fn excerpt(text: &str) -> String {
    if text.len() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let cut = snap(text, EXCERPT_CHARS);
    format!("{}…", text[..cut].trim_end())
}

fn snap(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Fragment, SourceKind};

    fn scored(source_id: &str, ordinal: i64, text: &str, similarity: f32) -> ScoredFragment {
        ScoredFragment {
            fragment: Fragment {
                id: format!("{}#{}", source_id, ordinal),
                user_id: "u1".to_string(),
                source_id: source_id.to_string(),
                ordinal,
                text: text.to_string(),
                hash: String::new(),
            },
            kind: SourceKind::Document,
            source_created_at: 0,
            similarity,
        }
    }

    #[test]
    fn test_budget_never_exceeded() {
        let fragments: Vec<ScoredFragment> = (0..8)
            .map(|i| scored("s", i, &"alpha beta gamma delta. ".repeat(12), 0.9))
            .collect();
        let block = assemble(&fragments, 120);
        assert!(block.token_estimate <= 120);
        assert!(!block.citations.is_empty());
        assert!(block.citations.iter().all(|c| !c.truncated));
    }

    #[test]
    fn test_skip_and_continue_not_cut() {
        let big = "x".repeat(2000); // 500 tokens
        let small = "short fragment.";
        let fragments = vec![
            scored("s", 0, small, 0.95),
            scored("s", 1, &big, 0.9), // would overflow: skipped whole
            scored("s", 2, small, 0.85),
        ];
        let block = assemble(&fragments, 60);
        let ordinals: Vec<i64> = block.citations.iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, vec![0, 2]);
        assert!(!block.text.contains(&big));
    }

    #[test]
    fn test_first_fragment_truncation_fallback_is_flagged() {
        let long = "First sentence here. Second sentence follows. ".repeat(40);
        let fragments = vec![scored("s", 0, &long, 0.9)];
        let block = assemble(&fragments, 50);
        assert_eq!(block.citations.len(), 1);
        assert!(block.citations[0].truncated);
        assert!(block.token_estimate <= 50);
        // Truncation landed on a sentence boundary.
        assert!(block.text.trim_end().ends_with('.'));
    }

    #[test]
    fn test_citation_markers_present() {
        let fragments = vec![
            scored("doc-42", 0, "Fragment zero.", 0.9),
            scored("vid-7", 3, "Fragment three.", 0.8),
        ];
        let block = assemble(&fragments, 500);
        assert!(block.text.contains("[doc-42#0]"));
        assert!(block.text.contains("[vid-7#3]"));
        assert_eq!(block.citations.len(), 2);
        assert_eq!(block.citations[0].source_id, "doc-42");
        assert_eq!(block.citations[1].ordinal, 3);
    }

    #[test]
    fn test_empty_input_empty_block() {
        let block = assemble(&[], 500);
        assert!(block.is_empty());
        assert!(block.text.is_empty());
        assert_eq!(block.token_estimate, 0);
    }

    #[test]
    fn test_excerpt_is_bounded() {
        let long = "y".repeat(1000);
        let fragments = vec![scored("s", 0, &long, 0.9)];
        let block = assemble(&fragments, 1000);
        assert!(block.citations[0].excerpt.chars().count() <= EXCERPT_CHARS + 1);
    }
}
