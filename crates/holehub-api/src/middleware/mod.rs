//! Middleware modules for the API server

pub mod auth;

pub use auth::{extract_token, require_auth, AuthUser};
