//! Scripted collaborators shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::Notify;

use crate::api::transport::{ApiRequest, ApiResponse, Transport};
use crate::api::ApiError;
use crate::auth::biometrics::{BiometricError, Biometrics};

const LOGIN_PATH: &str = "/auth/login";
const REFRESH_PATH: &str = "/auth/refresh";

/// In-memory backend.
///
/// Protected paths answer 200 when the bearer matches the currently valid
/// access token and 401 otherwise, unless a response was scripted for the
/// path with `on_path`.
#[derive(Default)]
pub struct FakeTransport {
    login: Mutex<Option<ApiResponse>>,
    refresh: Mutex<VecDeque<Result<ApiResponse, ApiError>>>,
    routes: Mutex<HashMap<String, VecDeque<Result<ApiResponse, ApiError>>>>,
    valid_token: Mutex<Option<String>>,
    requests: Mutex<Vec<ApiRequest>>,
    unauthorized: AtomicUsize,
    hold_refresh_until: AtomicUsize,
    refresh_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn login_body(access: &str, refresh: &str) -> String {
        serde_json::json!({
            "accessToken": access,
            "refreshToken": refresh,
            "user": {"id": 7, "name": "Ama Mensah", "email": "ama@acme.co", "role": "employee"}
        })
        .to_string()
    }

    pub fn tokens_body(access: &str, refresh: &str) -> String {
        serde_json::json!({"accessToken": access, "refreshToken": refresh}).to_string()
    }

    pub fn on_login(&self, status: StatusCode, body: impl Into<String>) {
        *self.login.lock().unwrap() = Some(ApiResponse::new(status, body));
    }

    pub fn on_refresh(&self, status: StatusCode, body: impl Into<String>) {
        self.refresh
            .lock()
            .unwrap()
            .push_back(Ok(ApiResponse::new(status, body)));
    }

    pub fn on_refresh_error(&self, err: ApiError) {
        self.refresh.lock().unwrap().push_back(Err(err));
    }

    pub fn on_path(&self, path: &str, result: Result<ApiResponse, ApiError>) {
        self.routes
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn accept_token(&self, token: &str) {
        *self.valid_token.lock().unwrap() = Some(token.to_string());
    }

    /// Keep refresh calls pending until `count` requests were rejected with 401.
    pub fn hold_refresh_until_unauthorized(&self, count: usize) {
        self.hold_refresh_until.store(count, Ordering::SeqCst);
    }

    /// Keep refresh calls pending until the returned gate is notified.
    pub fn gate_refresh(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.refresh_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    pub fn refresh_calls(&self) -> usize {
        self.requests_to(REFRESH_PATH).len()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn answer_login(&self) -> ApiResponse {
        self.login
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| ApiResponse::new(StatusCode::INTERNAL_SERVER_ERROR, ""))
    }

    fn next_refresh(&self) -> Result<ApiResponse, ApiError> {
        let mut queue = self.refresh.lock().unwrap();
        let next = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
        next.unwrap_or_else(|| Ok(ApiResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "")))
    }

    async fn answer_refresh(&self) -> Result<ApiResponse, ApiError> {
        let hold = self.hold_refresh_until.load(Ordering::SeqCst);
        while self.unauthorized.load(Ordering::SeqCst) < hold {
            tokio::task::yield_now().await;
        }
        let gate = self.refresh_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.next_refresh()
    }

    fn answer_protected(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        if let Some(queue) = self.routes.lock().unwrap().get_mut(&request.path) {
            if let Some(next) = queue.pop_front() {
                return next;
            }
        }
        let valid = self.valid_token.lock().unwrap().clone();
        match (&request.bearer, valid) {
            (Some(sent), Some(valid)) if *sent == valid => Ok(ApiResponse::new(
                StatusCode::OK,
                serde_json::json!({"path": request.path, "token": sent}).to_string(),
            )),
            _ => {
                self.unauthorized.fetch_add(1, Ordering::SeqCst);
                Ok(ApiResponse::new(StatusCode::UNAUTHORIZED, ""))
            }
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.requests.lock().unwrap().push(request.clone());
        match request.path.as_str() {
            LOGIN_PATH => Ok(self.answer_login()),
            REFRESH_PATH => self.answer_refresh().await,
            _ => self.answer_protected(&request),
        }
    }
}

/// Biometrics whose outcome is set by the test.
pub struct FakeBiometrics {
    outcome: Mutex<Result<(), BiometricError>>,
    prompts: AtomicUsize,
}

impl FakeBiometrics {
    pub fn succeeding() -> Self {
        Self {
            outcome: Mutex::new(Ok(())),
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: BiometricError) -> Self {
        Self {
            outcome: Mutex::new(Err(err)),
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn set_outcome(&self, outcome: Result<(), BiometricError>) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Biometrics for FakeBiometrics {
    fn is_available(&self) -> bool {
        !matches!(*self.outcome.lock().unwrap(), Err(BiometricError::Unavailable))
    }

    async fn authenticate(&self, _reason: &str) -> Result<(), BiometricError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.outcome.lock().unwrap().clone()
    }
}
