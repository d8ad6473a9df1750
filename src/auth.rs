//! Caller identity.
//!
//! Token issuance and password handling live elsewhere; this crate only needs
//! to turn a bearer token into a user id.

use std::collections::HashMap;

use axum::http::{header, HeaderMap};

pub type UserId = i64;

pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<UserId>;
}

/// Fixed token table loaded from `[auth.tokens]`.
pub struct StaticTokenVerifier {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: HashMap<String, UserId>) -> Self {
        Self { tokens }
    }
}

impl IdentityVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Option<UserId> {
        self.tokens.get(token).copied()
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
