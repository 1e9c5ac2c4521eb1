use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Failures surfaced by the request gateway.
///
/// Clone so that one refresh failure can be handed to every request waiting
/// on it. Display is for logs; `user_message` is what the user sees.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Unauthorized - session expired")]
    Unauthorized,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(Box<ApiError>),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Access denied: {0:?}")]
    Forbidden(Option<String>),

    #[error("Resource not found: {0:?}")]
    NotFound(Option<String>),

    #[error("Bad request: {0:?}")]
    BadRequest(Option<String>),

    #[error("Conflict: {0:?}")]
    Conflict(Option<String>),

    #[error("Validation failed: {0:?}")]
    Validation(Option<String>),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error {status}: {message:?}")]
    ServerError { status: u16, message: Option<String> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Secure storage error: {0}")]
    Storage(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Common shapes of an error body: `{"message": "..."}`,
/// `{"message": ["...", "..."]}` or `{"error": "..."}`.
#[derive(Deserialize)]
struct ErrorBody {
    message: Option<MessageField>,
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MessageField {
    One(String),
    Many(Vec<String>),
}

impl ApiError {
    /// Truncate a message to avoid logging excessive data
    fn truncate(message: &str) -> String {
        if message.len() <= MAX_ERROR_BODY_LENGTH {
            return message.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &message[..end])
    }

    /// Pull a human-readable message out of an error response body.
    /// Raw non-JSON bodies are never surfaced.
    pub fn server_message(body: &str) -> Option<String> {
        let parsed: ErrorBody = serde_json::from_str(body).ok()?;
        let message = match parsed.message {
            Some(MessageField::One(m)) => Some(m),
            Some(MessageField::Many(list)) => Some(list.join("; ")),
            None => parsed.error,
        }?;
        let message = message.trim();
        if message.is_empty() {
            None
        } else {
            Some(Self::truncate(message))
        }
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = Self::server_message(body);
        match status.as_u16() {
            400 => ApiError::BadRequest(message),
            401 => ApiError::Unauthorized,
            403 => ApiError::Forbidden(message),
            404 => ApiError::NotFound(message),
            409 => ApiError::Conflict(message),
            422 => ApiError::Validation(message),
            429 => ApiError::RateLimited,
            code @ 500..=599 => ApiError::ServerError { status: code, message },
            _ => ApiError::InvalidResponse(format!("Unexpected status {}", status)),
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }

    /// Whether this failure ended the session.
    pub fn is_session_terminating(&self) -> bool {
        matches!(self, ApiError::Unauthorized | ApiError::RefreshFailed(_))
    }

    /// One sentence suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Unauthorized => {
                "Your session has expired. Please sign in again.".to_string()
            }
            ApiError::RefreshFailed(_) => {
                "We couldn't renew your session. Please sign in again.".to_string()
            }
            ApiError::InvalidCredentials => "Incorrect username or password.".to_string(),
            ApiError::Forbidden(m) => with_fallback(m, "You don't have permission to do that."),
            ApiError::NotFound(m) => with_fallback(m, "The requested item could not be found."),
            ApiError::BadRequest(m) => with_fallback(m, "The request could not be processed."),
            ApiError::Conflict(m) => {
                with_fallback(m, "This request conflicts with an existing record.")
            }
            ApiError::Validation(m) => {
                with_fallback(m, "Some of the submitted information is invalid.")
            }
            ApiError::RateLimited => {
                "Too many requests. Please wait a moment and try again.".to_string()
            }
            ApiError::ServerError { message, .. } => {
                with_fallback(message, "The server ran into a problem. Please try again later.")
            }
            ApiError::Network(_) => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }
            ApiError::Timeout => {
                "The server took too long to respond. Please try again.".to_string()
            }
            ApiError::InvalidResponse(_) => {
                "The server sent an unexpected response.".to_string()
            }
            ApiError::InvalidRequest(_) => "The request could not be prepared.".to_string(),
            ApiError::Storage(_) => {
                "Your sign-in could not be saved on this device.".to_string()
            }
        }
    }
}

fn with_fallback(message: &Option<String>, fallback: &str) -> String {
    match message {
        Some(m) => {
            let m = m.trim_end();
            if m.ends_with(['.', '!', '?']) {
                m.to_string()
            } else {
                format!("{}.", m)
            }
        }
        None => fallback.to_string(),
    }
}
