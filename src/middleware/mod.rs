//! HTTP middleware components.
//!
//! Middleware run before route handlers and can short-circuit a request
//! (for example rejecting an unknown API key).

/// API key authentication middleware
pub mod auth;
