//! API key authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the API key from the Authorization header
//! 2. Hash it and compare it with the configured key hashes
//! 3. Inject authentication context into the request
//! 4. Reject unauthorized requests with HTTP 401

use std::collections::HashSet;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};

use crate::{app::AppState, error::AppError};

/// Authentication context attached to authenticated requests.
///
/// Handlers extract it with `Extension<AuthContext>` to attribute operations
/// in the logs.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// First 8 hex characters of the key hash (never the key itself)
    pub key_fingerprint: String,
}

/// Accepted API keys, stored as SHA-256 hex digests.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    hashes: HashSet<String>,
    disabled: bool,
}

impl ApiKeys {
    pub fn new(hashes: impl IntoIterator<Item = String>) -> Self {
        Self {
            hashes: hashes
                .into_iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            disabled: false,
        }
    }

    /// Accept every request (local development only).
    pub fn disabled() -> Self {
        Self {
            hashes: HashSet::new(),
            disabled: true,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// SHA-256 hex digest of a raw key.
    pub fn hash_key(api_key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(api_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Context for an accepted key, `None` otherwise.
    pub fn verify(&self, api_key: &str) -> Option<AuthContext> {
        let key_hash = Self::hash_key(api_key);
        self.hashes.contains(&key_hash).then(|| AuthContext {
            key_fingerprint: key_hash[..8].to_string(),
        })
    }
}

/// API key authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <key>` header from request
/// 2. Hash the `<key>` using SHA-256
/// 3. Look the hash up in the configured set
/// 4. If found: inject `AuthContext` into request, call next handler
/// 5. If not found: return 401 Unauthorized error
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_context = if state.api_keys.is_disabled() {
        AuthContext {
            key_fingerprint: "anonymous".to_string(),
        }
    } else {
        // Expected format: "Bearer <api_key>"
        let api_key = request
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or(AppError::InvalidApiKey)?;

        state
            .api_keys
            .verify(api_key)
            .ok_or(AppError::InvalidApiKey)?
    };

    // Route handlers can now extract this using Extension<AuthContext>
    request.extensions_mut().insert(auth_context);

    Ok(next.run(request).await)
}
