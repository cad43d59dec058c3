//! Boundary-aware overlapping text chunker.
//!
//! Splits file text into windows of at most `size` bytes. When a window does
//! not reach the end of the text, the cut point is moved back to the nearest
//! paragraph break (`"\n\n"`) or sentence terminator (`". "`) found at or
//! after half the window; otherwise the window is cut exactly at `size`.
//! After each cut the cursor steps back by `overlap` so adjacent chunks
//! share context. Fragments whose trimmed length is below `min_length` are
//! discarded.
//!
//! Each produced chunk receives a UUID and a SHA-256 hash of its text so
//! re-indexing can be compared across runs.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Split `text` into overlapping fragments. Pure splitting; no identity.
///
/// Guaranteed to terminate for any `overlap < size`: a boundary cut always
/// lands at or after half the window, and the fallback cut advances the
/// cursor by a full window.
pub fn split_text(text: &str, size: usize, overlap: usize, min_length: usize) -> Vec<String> {
    if text.is_empty() || size == 0 {
        return Vec::new();
    }
    // Callers validate this; clamp anyway so the loop cannot stall.
    let overlap = overlap.min(size.saturating_sub(1));

    let len = text.len();
    let mut fragments = Vec::new();
    let mut start = 0usize;

    while start < len {
        let hard_end = floor_char_boundary(text, (start + size).min(len));
        let hard_end = if hard_end <= start {
            ceil_char_boundary(text, start + 1)
        } else {
            hard_end
        };

        let (cut, resume) = if hard_end < len {
            match find_break(&text[start..hard_end], size) {
                Some((rel_end, rel_resume)) => (start + rel_end, start + rel_resume),
                None => (hard_end, hard_end),
            }
        } else {
            (hard_end, hard_end)
        };

        fragments.push(text[start..cut].to_string());

        if resume >= len {
            break;
        }
        let next = resume.saturating_sub(overlap).max(start + 1);
        start = ceil_char_boundary(text, next);
    }

    fragments
        .into_iter()
        .filter(|f| f.trim().len() >= min_length)
        .collect()
}

/// Find the best break inside a full window, scanning backward from the end.
///
/// Returns `(fragment_end, resume)` relative to the window start, or `None`
/// when no acceptable break exists. Breaks before half the window are
/// rejected so fragments stay reasonably sized.
fn find_break(window: &str, size: usize) -> Option<(usize, usize)> {
    let half = size / 2;

    let para = window.rfind("\n\n");
    let sentence = window.rfind(". ");

    // Nearest to the window end wins; a paragraph break beats a sentence
    // terminator at the same position.
    let best = match (para, sentence) {
        (Some(p), Some(s)) if s > p => Some((s + 1, s + 2)),
        (Some(p), _) => Some((p, p + 2)),
        (None, Some(s)) => Some((s + 1, s + 2)),
        (None, None) => None,
    };

    best.filter(|(end, _)| *end >= half)
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Chunk one file's text into persistable [`Chunk`]s with contiguous
/// ordinals starting at 0.
pub fn chunk_file(
    source_id: &str,
    repo_name: &str,
    file_path: &str,
    language: &str,
    text: &str,
    config: &ChunkingConfig,
) -> Vec<Chunk> {
    let now = chrono::Utc::now().timestamp();
    split_text(text, config.size, config.overlap, config.min_length)
        .into_iter()
        .enumerate()
        .map(|(i, content)| {
            let mut hasher = Sha256::new();
            hasher.update(content.as_bytes());
            let hash = format!("{:x}", hasher.finalize());

            Chunk {
                id: Uuid::new_v4().to_string(),
                source_id: source_id.to_string(),
                repo_name: repo_name.to_string(),
                file_path: file_path.to_string(),
                chunk_index: i as i64,
                content,
                language: language.to_string(),
                hash,
                created_at: now,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_text("", 1500, 200, 100).is_empty());
    }

    #[test]
    fn short_text_below_minimum_is_discarded() {
        assert!(split_text("too short", 1500, 200, 100).is_empty());
    }

    #[test]
    fn short_text_single_chunk() {
        let text = "a".repeat(300);
        let chunks = split_text(&text, 1500, 200, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], text);
    }

    #[test]
    fn paragraph_break_is_preferred() {
        // 2000 bytes, size 1500, overlap 200, paragraph break at 1400.
        let text = format!("{}\n\n{}", "x".repeat(1400), "y".repeat(598));
        assert_eq!(text.len(), 2000);

        let chunks = split_text(&text, 1500, 200, 100);
        assert_eq!(chunks.len(), 2);
        // First chunk ends at the break, well before the hard cut.
        assert_eq!(chunks[0], "x".repeat(1400));
        // Cursor resumed past the break (1402) minus overlap: position 1202.
        assert_eq!(chunks[1], &text[1202..]);
    }

    #[test]
    fn sentence_terminator_keeps_the_period() {
        let text = format!("{}. {}", "x".repeat(1198), "y".repeat(800));
        let chunks = split_text(&text, 1500, 200, 100);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].ends_with('.'));
        assert_eq!(chunks[0].len(), 1199);
    }

    #[test]
    fn break_before_half_window_is_ignored() {
        // Break at 100 < 750: the window must hard-cut at exactly `size`.
        let text = format!("{}\n\n{}", "x".repeat(100), "y".repeat(2000));
        let chunks = split_text(&text, 1500, 200, 100);
        assert_eq!(chunks[0].len(), 1500);
    }

    #[test]
    fn hard_cuts_advance_by_full_windows() {
        let text = "a".repeat(3500);
        let chunks = split_text(&text, 1000, 100, 100);
        // Windows: 0..1000, 900..1900, 1800..2800, 2700..3500.
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].len(), 1000);
        assert_eq!(chunks[1].len(), 1000);
        assert_eq!(chunks[2].len(), 1000);
        assert_eq!(chunks[3].len(), 800);
    }

    #[test]
    fn overlap_repeats_trailing_context() {
        let text: String = (0..2600).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunks = split_text(&text, 1000, 100, 100);
        assert!(chunks.len() >= 2);
        let tail = &chunks[0][chunks[0].len() - 100..];
        assert!(chunks[1].starts_with(tail));
    }

    #[test]
    fn rechunking_is_deterministic() {
        let text = format!(
            "{}\n\n{}. {}",
            "alpha ".repeat(100),
            "beta ".repeat(150),
            "gamma ".repeat(120)
        );
        let a = split_text(&text, 700, 80, 100);
        let b = split_text(&text, 700, 80, 100);
        assert_eq!(a, b);
    }

    #[test]
    fn no_fragment_below_minimum_survives() {
        // With no overlap the 40-byte tail becomes its own fragment and is
        // dropped by the minimum-length filter.
        let text = format!("{}\n\n{}", "x".repeat(790), "y".repeat(40));
        let chunks = split_text(&text, 800, 0, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "x".repeat(790));
    }

    #[test]
    fn terminates_with_maximal_overlap() {
        let text = "z".repeat(5000);
        let chunks = split_text(&text, 200, 199, 10);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn multibyte_text_does_not_split_mid_char() {
        let text = "é".repeat(1200); // 2 bytes per char
        let chunks = split_text(&text, 1000, 100, 100);
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.chars().all(|c| c == 'é'));
        }
    }

    #[test]
    fn chunk_file_assigns_contiguous_ordinals() {
        let text = "a".repeat(4000);
        let cfg = ChunkingConfig {
            size: 1000,
            overlap: 100,
            min_length: 100,
        };
        let chunks = chunk_file("src-1", "acme/docs", "guide/intro.md", "markdown", &text, &cfg);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.file_path, "guide/intro.md");
            assert_eq!(c.repo_name, "acme/docs");
            assert!(!c.hash.is_empty());
        }
    }
}
