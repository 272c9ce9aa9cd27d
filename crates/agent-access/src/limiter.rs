//! Rolling-Window Rate Limiter
//!
//! Sliding-window log keyed by `(route, subject)`. Each key keeps the
//! instants of its admitted requests; a request is admitted while fewer than
//! `max_requests` fall inside the trailing window.

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{AccessError, Result};

/// Requests allowed per window
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteLimit {
    pub max_requests: u32,
    pub window: Duration,
}

impl RouteLimit {
    pub const fn new(max_requests: u32, window: Duration) -> Self {
        Self { max_requests, window }
    }

    pub const fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }
}

impl FromStr for RouteLimit {
    type Err = AccessError;

    /// Parses `"30/minute"` or `"30 per minute"`; units are
    /// second, minute, hour and day (singular or plural).
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || AccessError::Config(format!("invalid rate limit '{s}'"));
        let normalized = s.trim().to_lowercase().replace('/', " per ");
        let mut words = normalized.split_whitespace();

        let count: u32 = words.next().and_then(|n| n.parse().ok()).ok_or_else(invalid)?;
        if words.next() != Some("per") {
            return Err(invalid());
        }
        let secs = match words.next().map(|u| u.trim_end_matches('s')) {
            Some("second" | "sec") => 1,
            Some("minute" | "min") => 60,
            Some("hour") => 3_600,
            Some("day") => 86_400,
            _ => return Err(invalid()),
        };
        if words.next().is_some() || count == 0 {
            return Err(invalid());
        }

        Ok(Self::new(count, Duration::from_secs(secs)))
    }
}

/// Outcome of one rate-limit check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

/// Per-route limits, loaded from the environment
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub default: RouteLimit,
    pub routes: Vec<(String, RouteLimit)>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default: RouteLimit::new(200, Duration::from_secs(86_400)),
            routes: vec![
                ("/api/v1/chatbot/chat".into(), RouteLimit::per_minute(30)),
                ("/api/v1/chatbot/chat/stream".into(), RouteLimit::per_minute(20)),
                ("/api/v1/chatbot/messages".into(), RouteLimit::per_minute(50)),
                ("/api/v1/documents".into(), RouteLimit::per_minute(20)),
            ],
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let read = |key: &str, fallback: RouteLimit| -> Result<RouteLimit> {
            std::env::var(key).map_or(Ok(fallback), |value| value.parse())
        };

        let env_keys = [
            "RATE_LIMIT_CHAT",
            "RATE_LIMIT_CHAT_STREAM",
            "RATE_LIMIT_MESSAGES",
            "RATE_LIMIT_DOCUMENTS",
        ];
        let routes = defaults
            .routes
            .into_iter()
            .zip(env_keys)
            .map(|((route, limit), key)| read(key, limit).map(|limit| (route, limit)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            default: read("RATE_LIMIT_DEFAULT", defaults.default)?,
            routes,
        })
    }
}

/// Sliding-window log limiter
#[derive(Debug)]
pub struct RateLimiter {
    default: RouteLimit,
    routes: HashMap<String, RouteLimit>,
    log: Mutex<HashMap<(String, String), VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(default: RouteLimit) -> Self {
        Self {
            default,
            routes: HashMap::new(),
            log: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        config
            .routes
            .iter()
            .fold(Self::new(config.default), |limiter, (route, limit)| {
                limiter.with_route(route.clone(), *limit)
            })
    }

    #[must_use]
    pub fn with_route(mut self, route: impl Into<String>, limit: RouteLimit) -> Self {
        self.routes.insert(route.into(), limit);
        self
    }

    pub fn limit_for(&self, route: &str) -> RouteLimit {
        self.routes.get(route).copied().unwrap_or(self.default)
    }

    /// Check and record one request now; `Ok` carries the remaining budget
    pub fn check(&self, route: &str, subject: &str) -> Result<u32> {
        match self.check_at(route, subject, Instant::now()) {
            Decision::Allowed { remaining } => Ok(remaining),
            Decision::Limited { retry_after } => {
                tracing::debug!(route, subject, ?retry_after, "Rate limit exceeded");
                Err(AccessError::RateLimited { retry_after })
            }
        }
    }

    /// Check and record one request at `now`
    pub fn check_at(&self, route: &str, subject: &str, now: Instant) -> Decision {
        let limit = self.limit_for(route);
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        let hits = log.entry((route.to_string(), subject.to_string())).or_default();

        while hits
            .front()
            .is_some_and(|&t| now.saturating_duration_since(t) >= limit.window)
        {
            hits.pop_front();
        }

        let used = u32::try_from(hits.len()).unwrap_or(u32::MAX);
        if used >= limit.max_requests {
            let retry_after = hits
                .front()
                .map_or(limit.window, |&oldest| {
                    limit.window.saturating_sub(now.saturating_duration_since(oldest))
                });
            return Decision::Limited { retry_after };
        }

        hits.push_back(now);
        Decision::Allowed {
            remaining: limit.max_requests - used - 1,
        }
    }

    /// Drop keys whose windows have fully elapsed
    pub fn purge_idle(&self, now: Instant) {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.retain(|(route, _), hits| {
            let window = self.routes.get(route).map_or(self.default.window, |l| l.window);
            hits.back().is_some_and(|&t| now.saturating_duration_since(t) < window)
        });
    }

    /// Number of tracked `(route, subject)` keys
    pub fn tracked_keys(&self) -> usize {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
