//! Typed errors for API calls and session handling.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::storage::StorageError;

/// Status used for failures that never reached an HTTP response.
pub const STATUS_NONE: u16 = 0;

/// Status used when the server could not be reached at all.
pub const STATUS_SERVICE_UNAVAILABLE: u16 = 503;

/// Categories of API failures.
///
/// The kind is fixed when the error is built (from the status code or the
/// failure site) and is the only input for user-facing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// 400 or 422
    BadRequest,
    /// 401
    Unauthorized,
    /// 403
    Forbidden,
    /// 404
    NotFound,
    /// 409
    Conflict,
    /// 429
    RateLimited,
    /// Any 5xx returned by the server
    Server,
    /// Any other non-2xx status
    Http,
    /// Connection could not be established (normalized to 503)
    ServiceUnavailable,
    /// Per-request timeout elapsed
    Timeout,
    /// Superseded by a newer request with the same key, or cancelled manually
    Cancelled,
    /// 2xx body was not the expected JSON
    Decode,
    /// Anything else
    Unknown,
}

impl ApiErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            429 => Self::RateLimited,
            500..=599 => Self::Server,
            _ => Self::Http,
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ApiErrorKind::BadRequest => "bad_request",
            ApiErrorKind::Unauthorized => "unauthorized",
            ApiErrorKind::Forbidden => "forbidden",
            ApiErrorKind::NotFound => "not_found",
            ApiErrorKind::Conflict => "conflict",
            ApiErrorKind::RateLimited => "rate_limited",
            ApiErrorKind::Server => "server",
            ApiErrorKind::Http => "http",
            ApiErrorKind::ServiceUnavailable => "service_unavailable",
            ApiErrorKind::Timeout => "timeout",
            ApiErrorKind::Cancelled => "cancelled",
            ApiErrorKind::Decode => "decode",
            ApiErrorKind::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Where an error surfaced, for picking user-facing wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorContext {
    Login,
    Register,
    General,
}

/// The single error shape every API call resolves to.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    /// HTTP status, [`STATUS_NONE`] when no response was received.
    pub status: u16,
    /// One-line summary
    pub message: String,
    /// Parsed JSON body, or the raw text wrapped in a JSON string.
    pub body: Option<Value>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, status: u16, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            body: None,
        }
    }

    /// Builds an error for a non-2xx response.
    ///
    /// Lifts `message`, `error` or `error.message` out of a JSON body when
    /// the server sends one.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = ApiErrorKind::from_status(status);
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Self::new(kind, status, format!("HTTP {status}"));
        }

        match serde_json::from_str::<Value>(trimmed) {
            Ok(json) => {
                let message = server_message(&json).map_or_else(
                    || format!("HTTP {status}"),
                    |msg| format!("HTTP {status}: {msg}"),
                );
                Self {
                    kind,
                    status,
                    message,
                    body: Some(json),
                }
            }
            Err(_) => Self {
                kind,
                status,
                message: format!("HTTP {status}"),
                body: Some(Value::String(trimmed.to_string())),
            },
        }
    }

    pub fn service_unavailable(detail: impl fmt::Display) -> Self {
        Self::new(
            ApiErrorKind::ServiceUnavailable,
            STATUS_SERVICE_UNAVAILABLE,
            format!("Service unavailable: {detail}"),
        )
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ApiErrorKind::Timeout,
            STATUS_NONE,
            format!("Request timed out after {}ms", after.as_millis()),
        )
    }

    pub fn cancelled(key: &str) -> Self {
        Self::new(
            ApiErrorKind::Cancelled,
            STATUS_NONE,
            format!("Request cancelled: {key}"),
        )
    }

    pub fn decode(detail: impl fmt::Display) -> Self {
        Self::new(
            ApiErrorKind::Decode,
            STATUS_NONE,
            format!("Invalid response body: {detail}"),
        )
    }

    pub fn unknown(detail: impl fmt::Display) -> Self {
        Self::new(ApiErrorKind::Unknown, STATUS_NONE, detail.to_string())
    }

    /// Normalizes a transport error from reqwest.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_connect() {
            Self::service_unavailable(err)
        } else if err.is_timeout() {
            Self::new(ApiErrorKind::Timeout, STATUS_NONE, err.to_string())
        } else if err.is_decode() {
            Self::decode(err)
        } else {
            Self::unknown(err)
        }
    }

    /// 5xx, including unreachable-server failures.
    pub fn is_retryable(&self) -> bool {
        self.status >= 500
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ApiErrorKind::Cancelled
    }

    /// Text safe to show to an end user.
    pub fn user_message(&self, context: ErrorContext) -> String {
        match (self.kind, context) {
            (ApiErrorKind::Unauthorized, ErrorContext::Login) => {
                "Invalid email or password.".into()
            }
            (ApiErrorKind::Conflict, ErrorContext::Register) => {
                "An account with this email already exists.".into()
            }
            (ApiErrorKind::Unauthorized, _) => {
                "Your session has expired. Please log in again.".into()
            }
            (ApiErrorKind::Forbidden, _) => "You do not have access to this resource.".into(),
            (ApiErrorKind::NotFound, _) => "The requested resource was not found.".into(),
            (ApiErrorKind::BadRequest | ApiErrorKind::Conflict, _) => self
                .body
                .as_ref()
                .and_then(server_message)
                .map_or_else(
                    || "The request was rejected. Please check your input.".into(),
                    str::to_string,
                ),
            (ApiErrorKind::RateLimited, _) => {
                "Too many requests. Please wait a moment and try again.".into()
            }
            (ApiErrorKind::ServiceUnavailable, _) => {
                "Unable to reach the server. Please check your connection.".into()
            }
            (ApiErrorKind::Timeout, _) => "The server took too long to respond.".into(),
            (ApiErrorKind::Server, _) => "Server error. Please try again later.".into(),
            (ApiErrorKind::Cancelled, _) => "The request was cancelled.".into(),
            (ApiErrorKind::Decode | ApiErrorKind::Http | ApiErrorKind::Unknown, _) => {
                "An unexpected error occurred. Please try again.".into()
            }
        }
    }
}

fn server_message(json: &Value) -> Option<&str> {
    json.get("message")
        .and_then(Value::as_str)
        .or_else(|| json.get("error").and_then(Value::as_str))
        .or_else(|| {
            json.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
        })
}

/// Failures from session mutators.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{message}")]
    Persist {
        message: &'static str,
        #[source]
        source: StorageError,
    },

    #[error("Failed to encode session data: {0}")]
    Encode(#[from] serde_json::Error),
}
