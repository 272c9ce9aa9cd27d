//! # agent-runtime
//!
//! Runtime backends for the plant-care agent.
//!
//! ## Backends
//!
//! - **Ollama chat** (default feature): local LLM inference via `ollama-rs`
//! - **Ollama embeddings**: `POST /api/embed` over `reqwest`
//! - **SQLite chat history**: [`SqliteSessionStore`] via `sqlx`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::{OllamaConfig, OllamaProvider, SqliteSessionStore};
//!
//! let provider = OllamaProvider::from_config(OllamaConfig::from_env());
//! let store = SqliteSessionStore::connect("sqlite://chat.db").await?;
//! ```

pub mod embedding;
#[cfg(feature = "ollama")]
pub mod ollama;
pub mod sqlite;

pub use embedding::OllamaEmbedder;
#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaProvider};
pub use sqlite::SqliteSessionStore;
