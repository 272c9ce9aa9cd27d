//! # agent-core
//!
//! Core agent logic with provider-agnostic LLM abstraction, a closed tool
//! table and append-only chat session storage.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Agent                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │  Reasoning  │  │    Tool     │  │   LlmProvider       │  │
//! │  │    Loop     │──│    Table    │──│   (Strategy)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │ TurnOutcome
//!                  ┌─────────▼─────────┐
//!                  │ ChatSessionStore  │
//!                  └───────────────────┘
//! ```

pub mod error;
pub mod message;
pub mod mock;
pub mod provider;
pub mod reasoning;
pub mod session;
pub mod tool;

pub use error::{AgentError, Result};
pub use message::{Conversation, Message, Role};
pub use provider::{EmbeddingProvider, GenerationOptions, LlmProvider};
pub use reasoning::{Agent, AgentBuilder, AgentConfig, TurnEvent, TurnOutcome};
pub use session::{ChatSession, ChatSessionStore, MemorySessionStore, SessionId, SessionLocks, StoredMessage};
pub use tool::{Tool, ToolCall, ToolCallRecord, ToolKind, ToolResult, ToolTable};
