//! Core library for hrdesk.
//!
//! Provides the pieces every hrdesk front end shares:
//!
//! - `auth::SessionStore`: tokens, current user, PIN/biometric unlock state
//!   and their persistence in the OS credential store
//! - `api::ApiClient`: authenticated request gateway with single-flight
//!   token refresh and retry-once on 401
//! - `config::Config`: API endpoint and timeout settings

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiError};
pub use auth::{SessionState, SessionStore};
pub use config::Config;
