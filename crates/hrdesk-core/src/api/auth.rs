//! Calls to the `/auth` endpoints.
//!
//! These go out unauthenticated and never pass through the refresh/retry
//! gateway: a 401 here is a final answer.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::transport::{ApiRequest, ApiResponse, Transport};
use super::ApiError;
use crate::models::{LoginRequest, LoginResponse, RefreshRequest, RefreshResponse, TokenPair};

const LOGIN_PATH: &str = "/auth/login";
const REFRESH_PATH: &str = "/auth/refresh";

/// Exchanges a refresh token for a new token pair.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenPair, ApiError>;
}

#[derive(Clone)]
pub struct AuthEndpoints {
    transport: Arc<dyn Transport>,
}

impl AuthEndpoints {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let body = serde_json::to_value(LoginRequest { username, password })
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        let response = self
            .transport
            .send(ApiRequest::new(Method::POST, LOGIN_PATH).with_body(body))
            .await?;

        if response.status == StatusCode::UNAUTHORIZED {
            debug!("Login rejected");
            return Err(ApiError::InvalidCredentials);
        }
        Self::decode(response)
    }

    fn decode<T: DeserializeOwned>(response: ApiResponse) -> Result<T, ApiError> {
        if !response.status.is_success() {
            return Err(ApiError::from_status(response.status, &response.body));
        }
        serde_json::from_str(&response.body).map_err(|e| {
            warn!(error = %e, "Failed to parse auth response");
            ApiError::InvalidResponse(e.to_string())
        })
    }
}

#[async_trait]
impl TokenRefresher for AuthEndpoints {
    async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let body = serde_json::to_value(RefreshRequest { refresh_token })
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        let response = self
            .transport
            .send(ApiRequest::new(Method::POST, REFRESH_PATH).with_body(body))
            .await?;

        let refreshed: RefreshResponse = Self::decode(response)?;
        let mut tokens = refreshed.tokens;
        // Servers that don't rotate refresh tokens omit the field
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        Ok(tokens)
    }
}
