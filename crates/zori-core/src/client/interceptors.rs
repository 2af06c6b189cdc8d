//! Interceptor chains around each request attempt.
//!
//! Request interceptors see the outgoing [`RequestParts`] after auth and
//! default headers are applied. Response interceptors see the
//! [`RawResponse`] before its status is interpreted. Error interceptors map
//! one [`ApiError`] to another; they can rewrite an error but never drop it.
//! Each chain runs in registration order.

use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use crate::error::ApiError;

/// Header stamped by [`RequestIdInterceptor`].
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Everything needed to send one attempt.
#[derive(Debug, Clone)]
pub struct RequestParts {
    pub method: Method,
    /// Path relative to the client's base URL, starting with `/`.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub timeout: Duration,
}

/// Response as received, before status interpretation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub trait RequestInterceptor: Send + Sync {
    /// # Errors
    /// An error aborts the attempt; it still flows through the error chain.
    fn on_request(&self, parts: RequestParts) -> Result<RequestParts, ApiError>;
}

pub trait ResponseInterceptor: Send + Sync {
    /// # Errors
    /// An error replaces the response; it still flows through the error chain.
    fn on_response(&self, response: RawResponse) -> Result<RawResponse, ApiError>;
}

pub trait ErrorInterceptor: Send + Sync {
    fn on_error(&self, error: ApiError) -> ApiError;
}

impl<F> RequestInterceptor for F
where
    F: Fn(RequestParts) -> Result<RequestParts, ApiError> + Send + Sync,
{
    fn on_request(&self, parts: RequestParts) -> Result<RequestParts, ApiError> {
        self(parts)
    }
}

impl<F> ResponseInterceptor for F
where
    F: Fn(RawResponse) -> Result<RawResponse, ApiError> + Send + Sync,
{
    fn on_response(&self, response: RawResponse) -> Result<RawResponse, ApiError> {
        self(response)
    }
}

impl<F> ErrorInterceptor for F
where
    F: Fn(ApiError) -> ApiError + Send + Sync,
{
    fn on_error(&self, error: ApiError) -> ApiError {
        self(error)
    }
}

/// Stamps a fresh UUID on every attempt unless the caller set one.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestIdInterceptor;

impl RequestInterceptor for RequestIdInterceptor {
    fn on_request(&self, mut parts: RequestParts) -> Result<RequestParts, ApiError> {
        let name = HeaderName::from_static(REQUEST_ID_HEADER);
        if !parts.headers.contains_key(&name) {
            let id = uuid::Uuid::new_v4().to_string();
            let value = HeaderValue::from_str(&id).map_err(ApiError::unknown)?;
            parts.headers.insert(name, value);
        }
        Ok(parts)
    }
}
