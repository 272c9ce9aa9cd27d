//! Authentication and rate-limit middleware

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, MatchedPath, Query, Request, State},
    http::{HeaderValue, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;

use agent_access::{AccessError, bearer_token};

use crate::error::ApiError;
use crate::state::AppState;

/// Verified caller, inserted by [`require_auth`]
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: String,
}

/// Browsers cannot set headers on a WebSocket handshake, so the stream
/// route also accepts `?access_token=`.
#[derive(Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

fn request_token(req: &Request) -> Result<String, AccessError> {
    if let Some(header) = req.headers().get(AUTHORIZATION) {
        let value = header
            .to_str()
            .map_err(|_| AccessError::InvalidToken("authorization header is not ASCII".into()))?;
        return bearer_token(value).map(String::from);
    }

    Query::<TokenQuery>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(q)| q.access_token)
        .filter(|t| !t.is_empty())
        .ok_or(AccessError::MissingToken)
}

/// Reject requests without a valid HS256 bearer token
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let token = request_token(&req)?;
    let claims = state.verifier.verify(&token)?;

    tracing::debug!(user_id = %claims.sub, path = %req.uri().path(), "Authenticated");
    req.extensions_mut().insert(AuthUser { user_id: claims.sub });
    Ok(next.run(req).await)
}

/// Per-route sliding-window limit keyed by user, else client address.
///
/// Runs outside [`require_auth`], so the token is inspected here only to
/// pick the subject; an invalid token falls back to the address.
pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, ApiError> {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| req.uri().path().to_owned(), |p| p.as_str().to_owned());

    let subject = request_token(&req)
        .ok()
        .and_then(|token| state.verifier.verify(&token).ok())
        .map(|claims| format!("user:{}", claims.sub))
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| format!("ip:{}", addr.ip()))
        })
        .unwrap_or_else(|| "ip:unknown".into());

    let remaining = state.limiter.check(&route, &subject).inspect_err(|_| {
        tracing::warn!(%route, %subject, "Rate limit exceeded");
    })?;

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    Ok(response)
}
