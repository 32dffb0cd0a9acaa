//! Shared handler state and caller trust.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use depot_runtime::Daemon;
use std::convert::Infallible;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub daemon: Arc<Daemon>,
}

impl AppState {
    pub fn new(daemon: Arc<Daemon>) -> Self {
        Self { daemon }
    }

    /// Whether the request carries one of the configured bearer tokens.
    pub fn is_trusted(&self, headers: &HeaderMap) -> bool {
        let Some(token) = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
        else {
            return false;
        };
        self.daemon
            .config()
            .trusted_tokens
            .iter()
            .any(|t| !t.is_empty() && t == token.trim())
    }
}

/// Trust level of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub trusted: bool,
}

impl Caller {
    /// Reject untrusted callers.
    pub fn require_trusted(&self) -> ApiResult<()> {
        if self.trusted {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Caller {
            trusted: state.is_trusted(&parts.headers),
        })
    }
}
