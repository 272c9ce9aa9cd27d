//! Bearer Token Verification
//!
//! HS256 JSON Web Tokens: `base64url(header).base64url(claims).base64url(sig)`
//! where `sig = HMAC-SHA256(secret, header "." claims)`. Only `HS256` is
//! accepted; `exp` is mandatory.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{AccessError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by an access token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,

    /// Expiry, seconds since the Unix epoch
    pub exp: i64,

    /// Issued at, seconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

impl Claims {
    /// Claims for `sub` valid for `ttl` from now
    pub fn new(sub: impl Into<String>, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: sub.into(),
            exp: (now + ttl).timestamp(),
            iat: Some(now.timestamp()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

/// Signs and verifies HS256 tokens with one shared secret
#[derive(Clone)]
pub struct TokenVerifier {
    secret: Vec<u8>,
    /// Clock skew tolerated on `exp`, in seconds
    leeway_secs: i64,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let secret = secret.as_ref().to_vec();
        if secret.is_empty() {
            return Err(AccessError::Config("JWT secret must not be empty".into()));
        }
        Ok(Self {
            secret,
            leeway_secs: 0,
        })
    }

    #[must_use]
    pub const fn with_leeway(mut self, secs: i64) -> Self {
        self.leeway_secs = secs;
        self
    }

    fn mac(&self, signing_input: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AccessError::Config(format!("invalid JWT secret: {e}")))?;
        mac.update(signing_input.as_bytes());
        Ok(mac)
    }

    /// Sign claims into a compact token
    pub fn issue(&self, claims: &Claims) -> Result<String> {
        let header = Header {
            alg: "HS256".into(),
            typ: Some("JWT".into()),
        };
        let signing_input = format!("{}.{}", encode_segment(&header)?, encode_segment(claims)?);
        let signature = self.mac(&signing_input)?.finalize().into_bytes();

        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Verify signature and expiry against the current time
    pub fn verify(&self, token: &str) -> Result<Claims> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Verify signature and expiry against `now` (seconds since the epoch)
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Claims> {
        let mut parts = token.trim().split('.');
        let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AccessError::InvalidToken("expected three segments".into()));
        };

        let header: Header = decode_segment(header_b64, "header")?;
        if header.alg != "HS256" {
            return Err(AccessError::InvalidToken(format!("unsupported algorithm {}", header.alg)));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| AccessError::InvalidToken("signature is not base64url".into()))?;
        self.mac(&format!("{header_b64}.{claims_b64}"))?
            .verify_slice(&signature)
            .map_err(|_| AccessError::InvalidToken("signature mismatch".into()))?;

        let claims: Claims = decode_segment(claims_b64, "claims")?;
        if claims.sub.trim().is_empty() {
            return Err(AccessError::InvalidToken("empty subject".into()));
        }
        if claims.exp.saturating_add(self.leeway_secs) <= now {
            return Err(AccessError::Expired);
        }

        Ok(claims)
    }
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_vec(value)
        .map(|bytes| URL_SAFE_NO_PAD.encode(bytes))
        .map_err(|e| AccessError::Config(format!("failed to encode token: {e}")))
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str, what: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| AccessError::InvalidToken(format!("{what} is not base64url")))?;
    serde_json::from_slice(&bytes).map_err(|e| AccessError::InvalidToken(format!("{what} is not valid JSON: {e}")))
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header_value: &str) -> Result<&str> {
    let (scheme, token) = header_value
        .trim()
        .split_once(' ')
        .ok_or(AccessError::MissingToken)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AccessError::InvalidToken(format!("unsupported scheme {scheme}")));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AccessError::MissingToken);
    }
    Ok(token)
}
