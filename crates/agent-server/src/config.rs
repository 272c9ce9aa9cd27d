//! Server Configuration
//!
//! Everything comes from the environment (after `.env` is loaded):
//!
//! | Variable | Default |
//! |----------|---------|
//! | `BIND_ADDR` | `0.0.0.0:3000` |
//! | `JWT_SECRET` | required |
//! | `DATABASE_URL` | unset: in-memory chat history |
//! | `KNOWLEDGE_DIR` | unset: start with an empty knowledge base |
//! | `EMBEDDING_PROVIDER` | `ollama` (or `hashing`) |
//! | `AGENT_MAX_STEPS` | 8 |
//! | `REQUEST_TIMEOUT_SECS` | 120 |
//! | `CORS_ORIGINS` | any origin |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use agent_access::RateLimitConfig;
use agent_core::reasoning::DEFAULT_MAX_STEPS;
use agent_runtime::OllamaConfig;
use plant_advisor::RetrievalConfig;

/// Where knowledge-base embeddings come from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// Ollama `/api/embed`
    Ollama,
    /// Local token hashing, no model needed
    Hashing,
}

impl FromStr for EmbeddingBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "hashing" | "hash" | "local" => Ok(Self::Hashing),
            other => Err(format!("unknown embedding provider '{other}' (expected ollama or hashing)")),
        }
    }
}

#[derive(Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub jwt_secret: String,
    pub database_url: Option<String>,
    pub knowledge_dir: Option<PathBuf>,
    pub embedding: EmbeddingBackend,
    pub max_steps: usize,
    pub request_timeout: Duration,
    /// Empty means any origin
    pub cors_origins: Vec<String>,
    pub ollama: OllamaConfig,
    pub retrieval: RetrievalConfig,
    pub rate_limits: RateLimitConfig,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = non_empty("JWT_SECRET").context("JWT_SECRET must be set")?;

        let embedding = non_empty("EMBEDDING_PROVIDER")
            .map_or(Ok(EmbeddingBackend::Ollama), |v| v.parse())
            .map_err(anyhow::Error::msg)?;

        let max_steps = parsed("AGENT_MAX_STEPS")?.unwrap_or(DEFAULT_MAX_STEPS);
        if max_steps == 0 {
            bail!("AGENT_MAX_STEPS must be at least 1");
        }
        let timeout_secs: u64 = parsed("REQUEST_TIMEOUT_SECS")?.unwrap_or(120);
        if timeout_secs == 0 {
            bail!("REQUEST_TIMEOUT_SECS must be at least 1");
        }

        Ok(Self {
            bind_addr: non_empty("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
            jwt_secret,
            database_url: non_empty("DATABASE_URL"),
            knowledge_dir: non_empty("KNOWLEDGE_DIR").map(PathBuf::from),
            embedding,
            max_steps,
            request_timeout: Duration::from_secs(timeout_secs),
            cors_origins: non_empty("CORS_ORIGINS")
                .map(|v| v.split(',').map(str::trim).filter(|o| !o.is_empty()).map(String::from).collect())
                .unwrap_or_default(),
            ollama: OllamaConfig::from_env(),
            retrieval: RetrievalConfig::from_env(),
            rate_limits: RateLimitConfig::from_env()?,
        })
    }
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    non_empty(key)
        .map(|v| v.trim().parse::<T>().map_err(|e| anyhow::anyhow!("{key}: {e}")))
        .transpose()
}
