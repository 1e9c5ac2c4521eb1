//! Authenticated request gateway.
//!
//! Every call goes through `ApiClient::send`, which attaches the session's
//! access token, and on a first 401 runs (or joins) the single in-flight
//! token refresh before replaying the request exactly once.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::auth::{AuthEndpoints, TokenRefresher};
use super::transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
use super::ApiError;
use crate::auth::demo;
use crate::auth::SessionStore;
use crate::config::Config;
use crate::models::{TokenPair, User};

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

type RefreshFuture = Shared<BoxFuture<'static, Result<TokenPair, ApiError>>>;

/// API client for the HR backend.
/// Clone is cheap - clones share the transport, session and refresh slot.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    auth: AuthEndpoints,
    session: Arc<SessionStore>,
    /// At most one refresh in flight; cleared by the refresh task once it settles
    pending_refresh: Arc<Mutex<Option<RefreshFuture>>>,
    max_rate_limit_retries: u32,
}

impl ApiClient {
    /// Create a client talking to the configured backend over HTTP
    pub fn new(config: &Config, session: Arc<SessionStore>) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(&config.api_base_url, config.request_timeout())?;
        Ok(Self::with_transport(
            Arc::new(transport),
            session,
            config.max_rate_limit_retries,
        ))
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        session: Arc<SessionStore>,
        max_rate_limit_retries: u32,
    ) -> Self {
        Self {
            auth: AuthEndpoints::new(Arc::clone(&transport)),
            transport,
            session,
            pending_refresh: Arc::new(Mutex::new(None)),
            max_rate_limit_retries,
        }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// Restore the persisted session, refreshing it against the backend.
    pub async fn bootstrap(&self) {
        self.session.bootstrap(&self.auth).await;
    }

    // ===== Authentication =====

    /// Sign in and install the new session.
    ///
    /// The demo account is handled locally and never reaches the backend.
    pub async fn login(&self, username: &str, password: &str) -> Result<User, ApiError> {
        let (tokens, user) = if demo::is_demo_login(username, password) {
            info!("Signing in with the demo account");
            demo::demo_session()
        } else {
            let response = self.auth.login(username.trim(), password).await?;
            (response.tokens, response.user)
        };

        self.session
            .set_session(tokens, user.clone())
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to store new session");
                ApiError::Storage(e.to_string())
            })?;
        Ok(user)
    }

    pub async fn logout(&self) -> anyhow::Result<()> {
        self.session.clear_session().await
    }

    // ===== Requests =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(ApiRequest::new(Method::GET, path)).await?;
        Self::parse(&response)
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = ApiRequest::new(Method::POST, path).with_body(Self::encode(body)?);
        Self::parse(&self.send(request).await?)
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = ApiRequest::new(Method::PUT, path).with_body(Self::encode(body)?);
        Self::parse(&self.send(request).await?)
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(ApiRequest::new(Method::DELETE, path)).await?;
        Self::parse(&response)
    }

    /// Send a request with the current credentials.
    ///
    /// A first 401 triggers the shared refresh and one replay; a second 401
    /// ends the session. 429s back off exponentially. Any other non-success
    /// status is translated with `ApiError::from_status`.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut auth_retried = false;
        let mut rate_limit_retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let token = self.session.access_token().await;
            let response = self
                .transport
                .send(request.clone().with_bearer(token.clone()))
                .await?;
            let status = response.status;

            if status.is_success() {
                return Ok(response);
            }

            if status == StatusCode::UNAUTHORIZED {
                if auth_retried {
                    warn!(path = %request.path, "Still unauthorized after refresh, signing out");
                    self.end_session().await;
                    return Err(ApiError::Unauthorized);
                }
                auth_retried = true;
                self.recover_unauthorized(token.as_deref()).await?;
                continue;
            }

            if status == StatusCode::TOO_MANY_REQUESTS
                && rate_limit_retries < self.max_rate_limit_retries
            {
                rate_limit_retries += 1;
                warn!(path = %request.path, retry = rate_limit_retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2; // Exponential backoff
                continue;
            }

            return Err(ApiError::from_status(status, &response.body));
        }
    }

    /// Get fresh credentials after a 401 for a request sent with `sent_token`.
    ///
    /// Join-or-start is decided under the `pending_refresh` lock against the
    /// session as it is at that moment. A refresh that settled before the
    /// lock was taken has already rotated the tokens, so the request just
    /// replays.
    async fn recover_unauthorized(&self, sent_token: Option<&str>) -> Result<(), ApiError> {
        let refresh = {
            let mut slot = self.pending_refresh.lock().await;
            let in_flight = slot.as_ref().cloned();
            match in_flight {
                Some(in_flight) => {
                    debug!("Joining in-flight token refresh");
                    in_flight
                }
                None => {
                    let state = self.session.snapshot().await;

                    // Another request already rotated the token after this one was sent
                    if state.access_token.is_some() && state.access_token.as_deref() != sent_token {
                        debug!("Access token already refreshed, replaying");
                        return Ok(());
                    }

                    let Some(refresh_token) = state.refresh_token else {
                        drop(slot);
                        info!("Unauthorized with no refresh token, signing out");
                        self.end_session().await;
                        return Err(ApiError::Unauthorized);
                    };

                    let started = self.start_refresh(refresh_token);
                    *slot = Some(started.clone());
                    started
                }
            }
        };
        refresh.await.map(|_| ())
    }

    /// Spawn the refresh so it settles even if every waiter goes away.
    /// Must be called with the `pending_refresh` lock held.
    fn start_refresh(&self, refresh_token: String) -> RefreshFuture {
        let auth = self.auth.clone();
        let session = Arc::clone(&self.session);
        let slot = Arc::clone(&self.pending_refresh);

        let task = tokio::spawn(async move {
            info!("Refreshing access token");
            let result = match auth.refresh_tokens(&refresh_token).await {
                Ok(tokens) => match session.update_tokens(&refresh_token, tokens.clone()).await {
                    Ok(_) => Ok(tokens),
                    Err(e) => {
                        error!(error = %e, "Failed to store refreshed tokens");
                        Err(ApiError::Storage(e.to_string()))
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Token refresh failed, signing out");
                    if let Err(clear_err) = session.clear_session_if(&refresh_token).await {
                        warn!(error = %clear_err, "Failed to clear session after refresh failure");
                    }
                    Err(ApiError::RefreshFailed(Box::new(e)))
                }
            };
            *slot.lock().await = None;
            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(ApiError::RefreshFailed(Box::new(ApiError::Network(format!(
                    "refresh task failed: {}",
                    e
                ))))),
            }
        }
        .boxed()
        .shared()
    }

    async fn end_session(&self) {
        if let Err(e) = self.session.clear_session().await {
            warn!(error = %e, "Failed to clear session");
        }
    }

    fn encode<B: Serialize + ?Sized>(body: &B) -> Result<serde_json::Value, ApiError> {
        serde_json::to_value(body).map_err(|e| ApiError::InvalidRequest(e.to_string()))
    }

    /// Decode a JSON body; an empty body decodes as `null`.
    fn parse<T: DeserializeOwned>(response: &ApiResponse) -> Result<T, ApiError> {
        let body = if response.body.trim().is_empty() {
            "null"
        } else {
            response.body.as_str()
        };
        serde_json::from_str(body).map_err(|e| {
            warn!(error = %e, "Failed to parse JSON response");
            ApiError::InvalidResponse(e.to_string())
        })
    }
}
