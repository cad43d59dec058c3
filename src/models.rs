//! Core data models used throughout docpilot.
//!
//! These types represent the sources, chunks, conversations, and retrieval
//! results that flow through the indexing and chat pipelines.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Pending,
    Indexing,
    Ready,
    Error,
}

impl SourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceState::Pending => "pending",
            SourceState::Indexing => "indexing",
            SourceState::Ready => "ready",
            SourceState::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "indexing" => SourceState::Indexing,
            "ready" => SourceState::Ready,
            "error" => SourceState::Error,
            _ => SourceState::Pending,
        }
    }
}

/// A registered GitHub repository to be indexed.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub state: SourceState,
    pub progress: i64,
    pub error: Option<String>,
    pub file_count: i64,
    pub chunk_count: i64,
    pub last_sync: Option<i64>,
    pub created_at: i64,
}

impl Source {
    /// `owner/repo` label used in chunk provenance and citations.
    pub fn repo_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Snapshot of an indexing run's externally visible status.
///
/// The orchestrator carries one of these through the pipeline and writes it
/// at defined checkpoints instead of patching individual fields ad hoc.
#[derive(Debug, Clone)]
pub struct RunStatus {
    pub state: SourceState,
    pub progress: i64,
    pub error: Option<String>,
    pub file_count: Option<i64>,
    pub chunk_count: Option<i64>,
    pub last_sync: Option<i64>,
}

impl RunStatus {
    /// Status at the start of a run: `indexing`, progress reset to zero.
    pub fn started() -> Self {
        Self {
            state: SourceState::Indexing,
            progress: 0,
            error: None,
            file_count: None,
            chunk_count: None,
            last_sync: None,
        }
    }

    /// Advance progress, keeping it monotonically non-decreasing.
    pub fn advance(&mut self, progress: i64) {
        if progress > self.progress {
            self.progress = progress.min(100);
        }
    }
}

/// One retrievable unit of a source file's text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub source_id: String,
    pub repo_name: String,
    pub file_path: String,
    pub chunk_index: i64,
    pub content: String,
    pub language: String,
    pub hash: String,
    pub created_at: i64,
}

/// A chunk paired with its lexical relevance score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: i64,
}

/// Message author role within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

/// A chat and its metadata. Turns are stored separately.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub owner: String,
    pub title: String,
    pub pinned: bool,
    pub guide_id: Option<String>,
    pub message_count: i64,
    pub created_at: i64,
}

/// One message within a conversation.
#[derive(Debug, Clone)]
pub struct Turn {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub citations: Vec<Citation>,
    pub is_error: bool,
    pub created_at: i64,
}

/// Provenance attached to an assistant turn, pointing back to the chunk used.
///
/// Serialized inline on the turn; never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub repo_name: String,
    pub file_path: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_state_round_trip() {
        for state in [
            SourceState::Pending,
            SourceState::Indexing,
            SourceState::Ready,
            SourceState::Error,
        ] {
            assert_eq!(SourceState::parse(state.as_str()), state);
        }
    }

    #[test]
    fn unknown_state_defaults_to_pending() {
        assert_eq!(SourceState::parse("bogus"), SourceState::Pending);
    }

    #[test]
    fn run_status_progress_is_monotonic() {
        let mut status = RunStatus::started();
        status.advance(20);
        status.advance(10);
        assert_eq!(status.progress, 20);
        status.advance(150);
        assert_eq!(status.progress, 100);
    }
}
