//! # agent-access
//!
//! Request admission for the plant-care API: who is calling, and whether
//! they may call again yet.
//!
//! ## Bearer Tokens
//!
//! ```text
//! Authorization: Bearer <header>.<claims>.<signature>
//!                          │        │         │
//!                          │        │         └─ HMAC-SHA256(JWT_SECRET)
//!                          │        └─ { "sub": user id, "exp": unix secs }
//!                          └─ { "alg": "HS256" }
//! ```
//!
//! The `sub` claim becomes the user id that owns chat sessions.
//!
//! ## Rate Limits
//!
//! Sliding-window log per `(route, subject)`, where the subject is the user
//! id when authenticated and the client address otherwise. Limits are read
//! from `RATE_LIMIT_*` variables in the `"30 per minute"` form.

pub mod error;
pub mod limiter;
pub mod token;

pub use error::{AccessError, Result};
pub use limiter::{Decision, RateLimitConfig, RateLimiter, RouteLimit};
pub use token::{Claims, TokenVerifier, bearer_token};
