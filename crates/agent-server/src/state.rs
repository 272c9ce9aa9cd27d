//! Application State

use std::sync::Arc;
use std::time::Duration;

use agent_access::{RateLimiter, TokenVerifier};
use agent_core::{Agent, ChatSessionStore};
use plant_advisor::KnowledgeBase;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Agent with the plant-care tool table
    pub agent: Arc<Agent>,

    /// Knowledge base behind the `knowledge_base` tool and document routes
    pub knowledge: Arc<KnowledgeBase>,

    /// Chat history
    pub sessions: Arc<dyn ChatSessionStore>,

    pub verifier: Arc<TokenVerifier>,

    pub limiter: Arc<RateLimiter>,

    /// Ceiling for one whole chat turn
    pub request_timeout: Duration,
}
