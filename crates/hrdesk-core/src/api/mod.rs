//! REST API client module for the HR backend.
//!
//! This module provides the `ApiClient` request gateway, which attaches the
//! session's bearer token to every call and recovers from an expired access
//! token by running one shared refresh and replaying the request once.
//!
//! Login and refresh go through `AuthEndpoints`, outside the gateway.

pub mod auth;
pub mod client;
pub mod error;
pub mod transport;

pub use auth::{AuthEndpoints, TokenRefresher};
pub use client::ApiClient;
pub use error::ApiError;
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
