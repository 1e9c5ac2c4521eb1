//! Data models for the authentication endpoints.
//!
//! - `User`: the signed-in employee
//! - `TokenPair`: access/refresh credentials
//! - request/response bodies for `/auth/login` and `/auth/refresh`

pub mod auth;
pub mod user;

pub use auth::{LoginRequest, LoginResponse, RefreshRequest, RefreshResponse, TokenPair};
pub use user::User;
