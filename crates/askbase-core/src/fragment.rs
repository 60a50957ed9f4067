//! Fixed-size overlapping fragmenter.
//!
//! Splits ingested text into [`Fragment`]s of a target token length with
//! a configurable overlap between consecutive fragments. The overlap
//! exists so a concept straddling a fragment boundary is still fully
//! contained in at least one fragment.
//!
//! # Algorithm
//!
//! 1. Convert the token sizes to character sizes using a 4 chars/token
//!    ratio (a rough heuristic, same one the context assembler uses).
//! 2. Slide a window of `target` chars over the text; each window ends
//!    at the last whitespace inside it when one exists past the halfway
//!    point, otherwise at the nearest UTF-8 char boundary.
//! 3. The next window starts `overlap` chars before the previous end,
//!    snapped forward so progress is always made.
//! 4. Ordinals are contiguous from 0; whitespace-only windows are
//!    dropped without consuming an ordinal.
//!
//! Fragmenting is deterministic: the same text always yields the same
//! ordinal/text sequence, which is what makes re-indexing idempotent.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Fragment;

/// Approximate characters-per-token ratio used across the pipeline.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of a text under the 4 chars/token heuristic.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Split `text` into overlapping fragments owned by `user_id`/`source_id`.
///
/// # Arguments
///
/// * `target_tokens` — target fragment length (must be > 0).
/// * `overlap_tokens` — overlap between consecutive fragments; clamped
///   below `target_tokens` so the window always advances.
///
/// # Guarantees
///
/// - Empty or whitespace-only text yields no fragments.
/// - Ordinals are contiguous: `0, 1, 2, …`.
/// - Every fragment's `hash` is the SHA-256 of its text.
/// - The split never lands inside a UTF-8 code point.
pub fn split_fragments(
    user_id: &str,
    source_id: &str,
    text: &str,
    target_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Fragment> {
    let target_chars = target_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = (overlap_tokens * CHARS_PER_TOKEN).min(target_chars.saturating_sub(1));

    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let mut fragments = Vec::new();
    let mut ordinal: i64 = 0;
    let mut start = 0usize;

    while start < text.len() {
        let mut end = snap_to_char_boundary(text, (start + target_chars).min(text.len()));

        // Prefer a whitespace break inside the back half of the window.
        if end < text.len() {
            let window = &text[start..end];
            if let Some(pos) = window.rfind(|c: char| c.is_whitespace()) {
                if pos > window.len() / 2 {
                    end = start + pos + 1;
                }
            }
            end = snap_to_char_boundary(text, end);
        }

        // Guarantee progress even for pathological input.
        if end <= start {
            end = text[start..]
                .char_indices()
                .nth(1)
                .map(|(i, _)| start + i)
                .unwrap_or(text.len());
        }

        let piece = text[start..end].trim();
        if !piece.is_empty() {
            fragments.push(make_fragment(user_id, source_id, ordinal, piece));
            ordinal += 1;
        }

        if end >= text.len() {
            break;
        }

        let mut next = snap_to_char_boundary(text, end.saturating_sub(overlap_chars));
        if next <= start {
            next = end;
        }
        start = next;
    }

    fragments
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_fragment(user_id: &str, source_id: &str, ordinal: i64, text: &str) -> Fragment {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Fragment {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        source_id: source_id.to_string(),
        ordinal,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_fragment() {
        let frags = split_fragments("u1", "s1", "Hello, world!", 200, 20);
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].ordinal, 0);
        assert_eq!(frags[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text_no_fragments() {
        assert!(split_fragments("u1", "s1", "", 200, 20).is_empty());
        assert!(split_fragments("u1", "s1", "   \n\t ", 200, 20).is_empty());
    }

    #[test]
    fn test_long_text_splits_with_contiguous_ordinals() {
        let text = (0..200)
            .map(|i| format!("Sentence number {} in a long transcript.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let frags = split_fragments("u1", "s1", &text, 50, 10);
        assert!(frags.len() > 1);
        for (i, f) in frags.iter().enumerate() {
            assert_eq!(f.ordinal, i as i64);
            assert!(estimate_tokens(&f.text) <= 50);
        }
    }

    #[test]
    fn test_overlap_repeats_boundary_text() {
        let text = (0..40)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let frags = split_fragments("u1", "s1", &text, 20, 8);
        assert!(frags.len() > 1);
        // The tail of each fragment reappears at the head of the next.
        for pair in frags.windows(2) {
            let tail_word = pair[0].text.split_whitespace().last().unwrap();
            assert!(
                pair[1].text.contains(tail_word),
                "expected overlap to carry '{}' into the next fragment",
                tail_word
            );
        }
    }

    #[test]
    fn test_deterministic_resplit() {
        let text = "Alpha beta gamma delta epsilon zeta eta theta iota kappa.".repeat(30);
        let a = split_fragments("u1", "s1", &text, 25, 5);
        let b = split_fragments("u1", "s1", &text, 25, 5);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.ordinal, y.ordinal);
            assert_eq!(x.text, y.text);
            assert_eq!(x.hash, y.hash);
        }
    }

    #[test]
    fn test_multibyte_text_never_splits_code_points() {
        let text = "Юнікод текст з кирилицею та емодзі 🎥 ".repeat(40);
        let frags = split_fragments("u1", "s1", &text, 10, 2);
        assert!(!frags.is_empty());
        for f in &frags {
            assert!(!f.text.is_empty());
        }
    }

    #[test]
    fn test_no_whitespace_hard_split() {
        let text = "x".repeat(5000);
        let frags = split_fragments("u1", "s1", &text, 100, 10);
        assert!(frags.len() > 1);
        for (i, f) in frags.iter().enumerate() {
            assert_eq!(f.ordinal, i as i64);
        }
    }
}
