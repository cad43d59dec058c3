use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Window size in characters.
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    /// Characters the cursor steps back after each cut.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    /// Fragments shorter than this (after trim) are discarded.
    #[serde(default = "default_min_length")]
    pub min_length: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_overlap(),
            min_length: default_min_length(),
        }
    }
}

fn default_chunk_size() -> usize {
    1500
}
fn default_overlap() -> usize {
    200
}
fn default_min_length() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    /// REST API host. Overridable for tests and GitHub Enterprise.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Raw content host used for file downloads.
    #[serde(default = "default_raw_base")]
    pub raw_base: String,
    /// Environment variable holding an optional bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            raw_base: default_raw_base(),
            token_env: default_token_env(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_raw_base() -> String {
    "https://raw.githubusercontent.com".to_string()
}
fn default_token_env() -> String {
    "DOCPILOT_GITHUB_TOKEN".to_string()
}
fn default_http_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// Files fetched and chunked concurrently per batch.
    #[serde(default = "default_file_batch")]
    pub batch_size: usize,
    /// Files larger than this many bytes are skipped.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: i64,
    /// Extensions eligible for indexing (documentation formats).
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    /// Directory names excluded anywhere in the tree.
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,
    /// Seconds before an abandoned run's lease expires.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: i64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_file_batch(),
            max_file_size: default_max_file_size(),
            allowed_extensions: default_allowed_extensions(),
            ignored_dirs: default_ignored_dirs(),
            lease_secs: default_lease_secs(),
        }
    }
}

fn default_file_batch() -> usize {
    10
}
fn default_max_file_size() -> i64 {
    512_000
}
fn default_allowed_extensions() -> Vec<String> {
    ["md", "mdx", "markdown", "txt", "rst", "adoc"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_ignored_dirs() -> Vec<String> {
    [
        "node_modules",
        "vendor",
        "target",
        "dist",
        "build",
        "third_party",
        ".git",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_lease_secs() -> i64 {
    900
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Upper bound on chunks scanned per query. A capped window keeps
    /// retrieval latency predictable; this is lexical relevance, not a
    /// search index.
    #[serde(default = "default_scan_limit")]
    pub scan_limit: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            scan_limit: default_scan_limit(),
        }
    }
}

fn default_scan_limit() -> i64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// OpenAI-compatible chat completions endpoint base.
    #[serde(default = "default_generation_base")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_generation_base(),
            model: default_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f64 {
    0.3
}
fn default_max_output_tokens() -> u32 {
    1024
}
fn default_api_key_env() -> String {
    "DOCPILOT_LLM_API_KEY".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
    /// Prior turns included in the prompt, oldest first.
    #[serde(default = "default_history_turns")]
    pub history_turns: u32,
    /// Retrieved chunks for the text channel.
    #[serde(default = "default_context_chunks_text")]
    pub context_chunks_text: usize,
    /// Retrieved chunks for the latency-sensitive voice channel.
    #[serde(default = "default_context_chunks_voice")]
    pub context_chunks_voice: usize,
    #[serde(default = "default_persona")]
    pub persona: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_len: default_max_message_len(),
            history_turns: default_history_turns(),
            context_chunks_text: default_context_chunks_text(),
            context_chunks_voice: default_context_chunks_voice(),
            persona: default_persona(),
        }
    }
}

fn default_max_message_len() -> usize {
    10_000
}
fn default_history_turns() -> u32 {
    12
}
fn default_context_chunks_text() -> usize {
    5
}
fn default_context_chunks_voice() -> usize {
    3
}
fn default_persona() -> String {
    "You are a documentation assistant. Answer using the knowledge base \
     excerpts when they are relevant, cite the files you used, and say so \
     plainly when the documentation does not cover the question."
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token required on admin routes (index triggers, source
    /// removal). Unset means those routes are open — local use only.
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            admin_token: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7070".to_string()
}

impl Config {
    /// A default configuration rooted at the given database path. Used by
    /// tests and by commands that can run without a config file.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            chunking: ChunkingConfig::default(),
            github: GithubConfig::default(),
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig::default(),
            chat: ChatConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.size == 0 {
        anyhow::bail!("chunking.size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.size");
    }
    if config.indexing.batch_size == 0 {
        anyhow::bail!("indexing.batch_size must be > 0");
    }
    if config.indexing.max_file_size <= 0 {
        anyhow::bail!("indexing.max_file_size must be > 0");
    }
    if config.retrieval.scan_limit < 1 {
        anyhow::bail!("retrieval.scan_limit must be >= 1");
    }
    if config.chat.max_message_len == 0 {
        anyhow::bail!("chat.max_message_len must be > 0");
    }
    if config.chat.history_turns == 0 {
        anyhow::bail!("chat.history_turns must be > 0");
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_has_sane_defaults() {
        let cfg = Config::minimal("/tmp/docpilot.db");
        assert_eq!(cfg.chunking.size, 1500);
        assert_eq!(cfg.chunking.overlap, 200);
        assert!(cfg.chunking.overlap < cfg.chunking.size);
        assert_eq!(cfg.indexing.batch_size, 10);
        assert_eq!(cfg.chat.context_chunks_text, 5);
        assert_eq!(cfg.chat.context_chunks_voice, 3);
    }

    #[test]
    fn parse_partial_toml_fills_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [db]
            path = "data/docpilot.db"

            [chunking]
            size = 900
            "#,
        )
        .unwrap();
        assert_eq!(cfg.chunking.size, 900);
        assert_eq!(cfg.chunking.overlap, 200);
        assert_eq!(cfg.retrieval.scan_limit, 500);
        assert_eq!(cfg.server.bind, "127.0.0.1:7070");
    }
}
