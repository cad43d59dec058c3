//! Lexical retrieval scoring.
//!
//! Ranks stored chunks against a query by counting case-insensitive token
//! occurrences, with a fixed bonus when the full query appears verbatim.
//! Candidates come from a capped scan window rather than a search index —
//! an explicit latency/simplicity trade-off. Retrieval never fails the
//! caller: any internal error degrades to an empty result set.

use sqlx::SqlitePool;

use crate::config::RetrievalConfig;
use crate::models::{Chunk, ScoredChunk};
use crate::store;

/// Added when the chunk contains the whole query verbatim.
const PHRASE_BONUS: i64 = 10;
/// Query words at or below this length are ignored.
const MIN_TOKEN_LEN: usize = 3;

/// Lowercase query words longer than [`MIN_TOKEN_LEN`] characters.
pub fn tokenize_query(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() > MIN_TOKEN_LEN)
        .collect()
}

/// Score candidates against `query` and return the top `max_results`.
///
/// Ties keep the candidates' original order (stable sort), so earlier
/// stored chunks win when scores are equal.
pub fn score_chunks(chunks: Vec<Chunk>, query: &str, max_results: usize) -> Vec<ScoredChunk> {
    let query = query.trim();
    let tokens = tokenize_query(query);
    if tokens.is_empty() {
        return Vec::new();
    }
    let query_lower = query.to_lowercase();

    let mut scored: Vec<ScoredChunk> = chunks
        .into_iter()
        .filter_map(|chunk| {
            let content_lower = chunk.content.to_lowercase();

            let mut score: i64 = tokens
                .iter()
                .map(|t| content_lower.matches(t.as_str()).count() as i64)
                .sum();
            if content_lower.contains(&query_lower) {
                score += PHRASE_BONUS;
            }

            (score > 0).then_some(ScoredChunk { chunk, score })
        })
        .collect();

    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored.truncate(max_results);
    scored
}

/// Scan up to `scan_limit` stored chunks and rank them against `query`.
///
/// Any storage error is recovered locally to an empty result set — the
/// chat path degrades to "no context" instead of failing the response.
pub async fn retrieve(
    pool: &SqlitePool,
    config: &RetrievalConfig,
    query: &str,
    max_results: usize,
) -> Vec<ScoredChunk> {
    match store::query_chunks(pool, None, config.scan_limit).await {
        Ok(chunks) => score_chunks(chunks, query, max_results),
        Err(err) => {
            tracing::debug!(error = %err, "retrieval degraded to empty result set");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, content: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            source_id: "src".to_string(),
            repo_name: "acme/docs".to_string(),
            file_path: format!("{id}.md"),
            chunk_index: 0,
            content: content.to_string(),
            language: "markdown".to_string(),
            hash: String::new(),
            created_at: 0,
        }
    }

    #[test]
    fn tokenizer_drops_short_words() {
        assert_eq!(tokenize_query("how do I use the index"), vec!["index"]);
        assert!(tokenize_query("a an to of").is_empty());
    }

    #[test]
    fn short_only_query_returns_empty() {
        let chunks = vec![chunk("a", "the cat sat on the mat")];
        assert!(score_chunks(chunks, "cat on mat", 5).is_empty());
    }

    #[test]
    fn occurrences_are_counted_case_insensitively() {
        // "quickly" never appears, so no phrase bonus muddies the count.
        let chunks = vec![chunk("a", "Deploy the app. DEPLOY again. deploy forever.")];
        let ranked = score_chunks(chunks, "deploy quickly", 5);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].score, 3);
    }

    #[test]
    fn more_occurrences_never_score_lower() {
        let once = score_chunks(vec![chunk("a", "apple pie")], "apple", 5)[0].score;
        let thrice =
            score_chunks(vec![chunk("b", "apple apple apple")], "apple", 5)[0].score;
        assert!(thrice >= once);
    }

    #[test]
    fn verbatim_phrase_wins_over_repetition() {
        // A: one occurrence; B: three occurrences; C: the exact phrase.
        let chunks = vec![
            chunk("a", "an apple fell from the tree"),
            chunk("b", "apple cider, apple juice, apple butter"),
            chunk("c", "order an apple banana smoothie today"),
        ];
        let ranked = score_chunks(chunks, "apple banana", 5);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].chunk.id, "c"); // 1 + 1 + 10
        assert_eq!(ranked[1].chunk.id, "b"); // 3
        assert_eq!(ranked[2].chunk.id, "a"); // 1
        assert_eq!(ranked[0].score, 12);
    }

    #[test]
    fn zero_score_chunks_are_dropped() {
        let chunks = vec![
            chunk("a", "completely unrelated text"),
            chunk("b", "searching the index"),
        ];
        let ranked = score_chunks(chunks, "index", 5);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].chunk.id, "b");
    }

    #[test]
    fn ties_keep_scan_order() {
        let chunks = vec![
            chunk("first", "index once"),
            chunk("second", "index once more"),
        ];
        let ranked = score_chunks(chunks, "index", 5);
        assert_eq!(ranked[0].chunk.id, "first");
        assert_eq!(ranked[1].chunk.id, "second");
    }

    #[test]
    fn max_results_truncates() {
        let chunks: Vec<Chunk> = (0..10)
            .map(|i| chunk(&format!("c{i}"), "index index"))
            .collect();
        assert_eq!(score_chunks(chunks, "index", 3).len(), 3);
    }

    #[tokio::test]
    async fn retrieve_degrades_to_empty_on_storage_error() {
        // No schema applied: the scan query fails and must be recovered.
        let pool = crate::db::connect_memory().await.unwrap();
        let cfg = RetrievalConfig::default();
        assert!(retrieve(&pool, &cfg, "anything useful", 5).await.is_empty());
    }
}
