//! # docpilot
//!
//! Documentation ingestion and retrieval-grounded chat.
//!
//! docpilot pulls documentation out of GitHub repositories, splits it into
//! overlapping chunks, and serves an assistant that answers questions
//! grounded in those chunks plus the ongoing conversation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────┐
//! │ GitHub tree  │──▶│ Indexer           │──▶│  SQLite  │
//! │ + raw files  │   │ filter+chunk+save │   │  chunks  │
//! └──────────────┘   └──────────────────┘   └────┬─────┘
//!                                                │
//!                       ┌────────────────────────┤
//!                       ▼                        ▼
//!                 ┌───────────┐            ┌───────────┐
//!                 │ Retrieval │───────────▶│   Chat    │──▶ generation API
//!                 │  scorer   │            │ assembler │
//!                 └───────────┘            └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docpilot init                          # create database
//! docpilot source add acme/docs          # register a repository
//! docpilot index acme/docs               # fetch, chunk, and store
//! docpilot search "deployment"           # inspect retrieval ranking
//! docpilot chat "How do I deploy?"       # grounded answer with citations
//! docpilot serve                         # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunker`] | Boundary-aware overlapping text chunking |
//! | [`github`] | Remote tree listing and raw file download |
//! | [`indexer`] | Indexing run state machine |
//! | [`store`] | Source and chunk persistence |
//! | [`retrieval`] | Lexical relevance scoring |
//! | [`history`] | Conversation and turn persistence |
//! | [`chat`] | Prompt assembly and response orchestration |
//! | [`llm`] | Generation service boundary |
//! | [`server`] | HTTP API |
//! | [`db`] / [`migrate`] | Connection pool and schema |

pub mod chat;
pub mod chunker;
pub mod config;
pub mod db;
pub mod error;
pub mod github;
pub mod history;
pub mod indexer;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod retrieval;
pub mod server;
pub mod store;
