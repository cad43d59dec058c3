//! Conversation assembly.
//!
//! Merges retrieved chunks, recent turn history, and the persona prompt
//! into a single generation request, then persists the exchange. Retrieval
//! failures degrade to "no context"; generation failures abort only the
//! in-flight response, leaving the user turn persisted.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::error::ChatError;
use crate::github;
use crate::history;
use crate::llm::{GenerateOptions, Generator};
use crate::models::{Citation, Conversation, Role, ScoredChunk, Turn};
use crate::retrieval;
use crate::store;

/// Delivery channel for a response. Voice trades grounding width for
/// latency and asks for speakable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMode {
    Text,
    Voice,
}

impl ChatMode {
    pub fn parse(s: &str) -> Self {
        match s {
            "voice" => ChatMode::Voice,
            _ => ChatMode::Text,
        }
    }

    fn context_width(self, config: &Config) -> usize {
        match self {
            ChatMode::Text => config.chat.context_chunks_text,
            ChatMode::Voice => config.chat.context_chunks_voice,
        }
    }
}

/// The caller-facing result of one assistant response.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub message_id: String,
    pub conversation_id: String,
    pub response_text: String,
    pub citations: Vec<Citation>,
}

pub struct ChatService {
    pool: SqlitePool,
    config: Config,
    generator: Arc<dyn Generator>,
}

impl ChatService {
    pub fn new(pool: SqlitePool, config: Config, generator: Arc<dyn Generator>) -> Self {
        Self {
            pool,
            config,
            generator,
        }
    }

    /// Produce an assistant response for `user_text`.
    ///
    /// The user turn is persisted before generation; on generation failure
    /// it stays persisted and no assistant turn is appended.
    pub async fn respond(
        &self,
        conversation_id: Option<&str>,
        owner: &str,
        user_text: &str,
        mode: ChatMode,
    ) -> Result<ChatReply, ChatError> {
        let text = user_text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let limit = self.config.chat.max_message_len;
        if text.chars().count() > limit {
            return Err(ChatError::MessageTooLong { limit });
        }

        let conversation = match conversation_id {
            Some(id) => history::get_conversation(&self.pool, id)
                .await?
                .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))?,
            None => {
                history::create_conversation(
                    &self.pool,
                    owner,
                    &history::derive_title(text),
                    None,
                )
                .await?
            }
        };

        let user_turn =
            history::append_turn(&self.pool, &conversation.id, Role::User, text, &[], false)
                .await?;

        // Prior history: last K turns, excluding the turn just appended.
        let window = self.config.chat.history_turns;
        let mut prior = history::load_recent_turns(&self.pool, &conversation.id, window + 1).await?;
        prior.retain(|t| t.id != user_turn.id);
        if prior.len() > window as usize {
            prior.remove(0);
        }

        let retrieved = retrieval::retrieve(
            &self.pool,
            &self.config.retrieval,
            text,
            mode.context_width(&self.config),
        )
        .await;

        let prompt = compose_prompt(
            &self.config.chat.persona,
            mode,
            &conversation,
            &retrieved,
            &prior,
            text,
        );

        let opts = GenerateOptions::from(&self.config.generation);
        let response_text = self.generator.generate(&prompt, &opts).await?;

        let citations = self.derive_citations(&retrieved).await;
        let assistant_turn = history::append_turn(
            &self.pool,
            &conversation.id,
            Role::Assistant,
            &response_text,
            &citations,
            false,
        )
        .await?;

        Ok(ChatReply {
            message_id: assistant_turn.id,
            conversation_id: conversation.id,
            response_text,
            citations,
        })
    }

    /// One citation per chunk used, with a browsable URL. The branch comes
    /// from the owning source record; `main` when the source is gone.
    async fn derive_citations(&self, retrieved: &[ScoredChunk]) -> Vec<Citation> {
        let mut branches: HashMap<String, String> = HashMap::new();
        for scored in retrieved {
            let sid = &scored.chunk.source_id;
            if !branches.contains_key(sid) {
                let branch = store::get_source(&self.pool, sid)
                    .await
                    .ok()
                    .flatten()
                    .map(|s| s.branch)
                    .unwrap_or_else(|| "main".to_string());
                branches.insert(sid.clone(), branch);
            }
        }

        retrieved
            .iter()
            .map(|scored| {
                let chunk = &scored.chunk;
                let branch = branches
                    .get(&chunk.source_id)
                    .map(String::as_str)
                    .unwrap_or("main");
                let (owner, repo) = chunk
                    .repo_name
                    .split_once('/')
                    .unwrap_or(("", chunk.repo_name.as_str()));
                Citation {
                    repo_name: chunk.repo_name.clone(),
                    file_path: chunk.file_path.clone(),
                    url: github::blob_url(owner, repo, branch, &chunk.file_path),
                }
            })
            .collect()
    }
}

/// Build the single generation prompt: persona, channel instructions, a
/// labeled knowledge-base section with provenance, a labeled history
/// section oldest-first, and the new user message.
fn compose_prompt(
    persona: &str,
    mode: ChatMode,
    conversation: &Conversation,
    retrieved: &[ScoredChunk],
    prior: &[Turn],
    user_text: &str,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(persona);
    prompt.push('\n');

    if mode == ChatMode::Voice {
        prompt.push_str(
            "\nThis is a voice conversation: keep the answer brief and speakable, \
             without markdown formatting.\n",
        );
    }
    if let Some(guide) = &conversation.guide_id {
        prompt.push_str(&format!(
            "\nThe user is working through the \"{guide}\" guide; keep answers \
             aligned with it.\n"
        ));
    }

    prompt.push_str("\nKnowledge base:\n");
    if retrieved.is_empty() {
        prompt.push_str("(no relevant documentation found)\n");
    } else {
        for (i, scored) in retrieved.iter().enumerate() {
            prompt.push_str(&format!(
                "[{}] {}:{}\n{}\n\n",
                i + 1,
                scored.chunk.repo_name,
                scored.chunk.file_path,
                scored.chunk.content.trim()
            ));
        }
    }

    prompt.push_str("History:\n");
    if prior.is_empty() {
        prompt.push_str("(start of conversation)\n");
    } else {
        for turn in prior {
            prompt.push_str(&format!("{}: {}\n", turn.role.as_str(), turn.content));
        }
    }

    prompt.push_str("\nUser message:\n");
    prompt.push_str(user_text);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::error::LlmError;
    use crate::llm::MockGenerator;
    use crate::migrate;
    use crate::models::Chunk;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Captures the composed prompt so tests can assert on its sections.
    struct RecordingGenerator {
        prompts: Mutex<Vec<String>>,
        reply: String,
    }

    impl RecordingGenerator {
        fn new(reply: &str) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                reply: reply.to_string(),
            }
        }

        fn last_prompt(&self) -> String {
            self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        async fn generate(
            &self,
            prompt: &str,
            _opts: &GenerateOptions,
        ) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    async fn test_pool() -> SqlitePool {
        let pool = db::connect_memory().await.unwrap();
        migrate::apply_schema(&pool).await.unwrap();
        pool
    }

    fn service(pool: &SqlitePool, generator: Arc<dyn Generator>) -> ChatService {
        ChatService::new(pool.clone(), Config::minimal(":memory:"), generator)
    }

    async fn seed_chunks(pool: &SqlitePool) -> String {
        let src = store::create_source(pool, "acme", "docs", "main").await.unwrap();
        let chunks: Vec<Chunk> = vec![Chunk {
            id: "c1".to_string(),
            source_id: src.id.clone(),
            repo_name: "acme/docs".to_string(),
            file_path: "guide/deploy.md".to_string(),
            chunk_index: 0,
            content: "To deploy the service, run the release pipeline.".to_string(),
            language: "markdown".to_string(),
            hash: "h".to_string(),
            created_at: 0,
        }];
        store::insert_chunks(pool, &chunks).await.unwrap();
        src.id
    }

    #[tokio::test]
    async fn respond_appends_user_and_assistant_turns() {
        let pool = test_pool().await;
        seed_chunks(&pool).await;
        let svc = service(&pool, Arc::new(MockGenerator::replying("Run the pipeline.")));

        let reply = svc
            .respond(None, "local", "How do I deploy the service?", ChatMode::Text)
            .await
            .unwrap();

        assert_eq!(reply.response_text, "Run the pipeline.");
        assert_eq!(reply.citations.len(), 1);
        assert_eq!(reply.citations[0].file_path, "guide/deploy.md");
        assert_eq!(
            reply.citations[0].url,
            "https://github.com/acme/docs/blob/main/guide/deploy.md"
        );

        let turns = history::list_turns(&pool, &reply.conversation_id).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].citations.len(), 1);
    }

    #[tokio::test]
    async fn generation_failure_keeps_only_the_user_turn() {
        let pool = test_pool().await;
        let svc = service(&pool, Arc::new(MockGenerator::failing()));

        let err = svc
            .respond(None, "local", "Will this fail?", ChatMode::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Generation(_)));

        let conversations = history::list_conversations(&pool, None).await.unwrap();
        assert_eq!(conversations.len(), 1);
        let turns = history::list_turns(&pool, &conversations[0].id).await.unwrap();
        assert_eq!(turns.len(), 1, "only the user turn survives");
        assert_eq!(turns[0].role, Role::User);
    }

    #[tokio::test]
    async fn empty_message_is_rejected_before_side_effects() {
        let pool = test_pool().await;
        let svc = service(&pool, Arc::new(MockGenerator::replying("x")));

        let err = svc.respond(None, "local", "   ", ChatMode::Text).await.unwrap_err();
        assert!(matches!(err, ChatError::EmptyMessage));
        assert!(history::list_conversations(&pool, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_message_is_rejected() {
        let pool = test_pool().await;
        let svc = service(&pool, Arc::new(MockGenerator::replying("x")));

        let big = "x".repeat(10_001);
        let err = svc.respond(None, "local", &big, ChatMode::Text).await.unwrap_err();
        assert!(matches!(err, ChatError::MessageTooLong { limit: 10_000 }));
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let pool = test_pool().await;
        let svc = service(&pool, Arc::new(MockGenerator::replying("x")));

        let err = svc
            .respond(Some("missing"), "local", "hello there friend", ChatMode::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn prompt_contains_labeled_sections_and_prior_history() {
        let pool = test_pool().await;
        seed_chunks(&pool).await;
        let recorder = Arc::new(RecordingGenerator::new("ok"));
        let svc = service(&pool, recorder.clone());

        let first = svc
            .respond(None, "local", "How do I deploy the service?", ChatMode::Text)
            .await
            .unwrap();
        let prompt = recorder.last_prompt();
        assert!(prompt.contains("Knowledge base:"));
        assert!(prompt.contains("acme/docs:guide/deploy.md"));
        assert!(prompt.contains("History:\n(start of conversation)"));
        // The just-appended user turn must not leak into history.
        assert!(!prompt.contains("user: How do I deploy the service?"));

        svc.respond(
            Some(&first.conversation_id),
            "local",
            "And how do I roll it back?",
            ChatMode::Text,
        )
        .await
        .unwrap();
        let prompt = recorder.last_prompt();
        assert!(prompt.contains("user: How do I deploy the service?"));
        assert!(prompt.contains("assistant: ok"));
        assert!(!prompt.contains("user: And how do I roll it back?"));
    }

    #[tokio::test]
    async fn voice_mode_adds_channel_instructions() {
        let pool = test_pool().await;
        let recorder = Arc::new(RecordingGenerator::new("ok"));
        let svc = service(&pool, recorder.clone());

        svc.respond(None, "local", "Tell me about deployments", ChatMode::Voice)
            .await
            .unwrap();
        assert!(recorder.last_prompt().contains("voice conversation"));
    }

    #[tokio::test]
    async fn no_retrieval_matches_degrades_to_no_context() {
        let pool = test_pool().await;
        let recorder = Arc::new(RecordingGenerator::new("ok"));
        let svc = service(&pool, recorder.clone());

        let reply = svc
            .respond(None, "local", "completely unrelated question", ChatMode::Text)
            .await
            .unwrap();
        assert!(reply.citations.is_empty());
        assert!(recorder
            .last_prompt()
            .contains("(no relevant documentation found)"));
    }
}
