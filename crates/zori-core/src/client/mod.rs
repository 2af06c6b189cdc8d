//! Authenticated JSON client for the Zori API.
//!
//! Every call goes through the same pipeline:
//!
//! 1. register `METHOD:path` in the pending registry (superseding any older
//!    call with the same key)
//! 2. per attempt: resolve a bearer token from the [`SessionStore`],
//!    refreshing an expired session first; build headers; run request
//!    interceptors; send with a timeout; run response interceptors;
//!    interpret the status; run error interceptors on failure
//! 3. retry 5xx failures with exponential backoff
//!
//! A refresh failure does not fail the call: the request goes out without a
//! token and the server decides.

mod interceptors;
mod registry;

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

pub use self::interceptors::{
    ErrorInterceptor, REQUEST_ID_HEADER, RawResponse, RequestIdInterceptor, RequestInterceptor,
    RequestParts, ResponseInterceptor,
};
pub use self::registry::{PendingGuard, PendingRequests, request_key};
use crate::config::ApiConfig;
use crate::error::{ApiError, ApiErrorKind};
use crate::session::SessionStore;

/// User-Agent sent with every request.
pub const USER_AGENT: &str = concat!("zori/", env!("CARGO_PKG_VERSION"));

/// Client-wide defaults; each call may override them.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    pub default_headers: HeaderMap,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&ApiConfig::default())
    }
}

impl From<&ApiConfig> for ClientConfig {
    fn from(config: &ApiConfig) -> Self {
        Self {
            timeout: config.timeout(),
            retries: config.retries,
            retry_delay: config.retry_delay(),
            default_headers: HeaderMap::new(),
        }
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    /// Applied last; wins over every other header.
    pub headers: HeaderMap,
    /// Send without a bearer token and never refresh for this call.
    pub anonymous: bool,
}

impl RequestOptions {
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }
}

#[derive(Default)]
struct Interceptors {
    request: Vec<Arc<dyn RequestInterceptor>>,
    response: Vec<Arc<dyn ResponseInterceptor>>,
    error: Vec<Arc<dyn ErrorInterceptor>>,
}

pub struct ApiClientBuilder {
    base_url: Url,
    session: Arc<SessionStore>,
    config: ClientConfig,
    http: Option<reqwest::Client>,
    interceptors: Interceptors,
}

impl ApiClientBuilder {
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    #[must_use]
    pub fn request_interceptor(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.interceptors.request.push(Arc::new(interceptor));
        self
    }

    #[must_use]
    pub fn response_interceptor(mut self, interceptor: impl ResponseInterceptor + 'static) -> Self {
        self.interceptors.response.push(Arc::new(interceptor));
        self
    }

    #[must_use]
    pub fn error_interceptor(mut self, interceptor: impl ErrorInterceptor + 'static) -> Self {
        self.interceptors.error.push(Arc::new(interceptor));
        self
    }

    /// # Errors
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn build(self) -> Result<ApiClient, ApiError> {
        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .map_err(|e| ApiError::unknown(format!("Failed to build HTTP client: {e}")))?,
        };
        Ok(ApiClient {
            http,
            base_url: self.base_url,
            session: self.session,
            config: self.config,
            interceptors: self.interceptors,
            pending: PendingRequests::new(),
        })
    }
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    session: Arc<SessionStore>,
    config: ClientConfig,
    interceptors: Interceptors,
    pending: PendingRequests,
}

impl ApiClient {
    pub fn builder(base_url: Url, session: Arc<SessionStore>) -> ApiClientBuilder {
        ApiClientBuilder {
            base_url,
            session,
            config: ClientConfig::default(),
            http: None,
            interceptors: Interceptors::default(),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// # Errors
    /// Returns the final [`ApiError`] after retries.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::GET, path, None, &RequestOptions::default())
            .await
    }

    /// # Errors
    /// Returns the final [`ApiError`] after retries.
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, Some(encode_body(body)?), &RequestOptions::default())
            .await
    }

    /// `post` with per-call overrides.
    ///
    /// # Errors
    /// Returns the final [`ApiError`] after retries.
    pub async fn post_with<T, B>(
        &self,
        path: &str,
        body: &B,
        options: &RequestOptions,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, Some(encode_body(body)?), options)
            .await
    }

    /// # Errors
    /// Returns the final [`ApiError`] after retries.
    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PUT, path, Some(encode_body(body)?), &RequestOptions::default())
            .await
    }

    /// # Errors
    /// Returns the final [`ApiError`] after retries.
    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PATCH, path, Some(encode_body(body)?), &RequestOptions::default())
            .await
    }

    /// # Errors
    /// Returns the final [`ApiError`] after retries.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::DELETE, path, None, &RequestOptions::default())
            .await
    }

    /// Sends one call through the full pipeline.
    ///
    /// A 204 or empty body decodes from JSON `null`, so `()`, `Option<_>`
    /// and `serde_json::Value` all accept it.
    ///
    /// # Errors
    /// Returns the final [`ApiError`] after retries, or
    /// [`ApiErrorKind::Cancelled`] if a newer call with the same key (or a
    /// manual cancel) superseded this one.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: &RequestOptions,
    ) -> Result<T, ApiError> {
        let guard = self.pending.register(&request_key(&method, path));
        let value = self
            .run_with_retries(&guard, method, path, body, options)
            .await?;
        serde_json::from_value(value).map_err(|e| self.intercept_error(ApiError::decode(e)))
    }

    /// Cancels the in-flight call registered under `key` (`METHOD:path`).
    pub fn cancel_request(&self, key: &str) -> bool {
        self.pending.cancel(key)
    }

    /// Cancels every in-flight call. Returns how many were cancelled.
    pub fn cancel_all_requests(&self) -> usize {
        self.pending.cancel_all()
    }

    /// Keys of the calls currently in flight, sorted.
    pub fn pending_requests(&self) -> Vec<String> {
        self.pending.keys()
    }

    async fn run_with_retries(
        &self,
        guard: &PendingGuard<'_>,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: &RequestOptions,
    ) -> Result<Value, ApiError> {
        let retries = options.retries.unwrap_or(self.config.retries);
        let base_delay = options.retry_delay.unwrap_or(self.config.retry_delay);
        let cancel = guard.token();

        let mut attempt: u32 = 0;
        loop {
            let outcome = tokio::select! {
                () = cancel.cancelled() => Err(ApiError::cancelled(guard.key())),
                result = self.attempt(method.clone(), path, body.clone(), options, attempt) => result,
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => self.intercept_error(err),
            };

            if !err.is_retryable() || attempt >= retries {
                return Err(err);
            }

            let delay = backoff_delay(base_delay, attempt);
            warn!(
                key = guard.key(),
                status = err.status,
                attempt = attempt + 1,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "retrying after server error"
            );
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(self.intercept_error(ApiError::cancelled(guard.key())));
                }
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: &RequestOptions,
        attempt: u32,
    ) -> Result<Value, ApiError> {
        let token = if options.anonymous {
            None
        } else {
            self.resolve_token().await
        };
        let authenticated = token.is_some();

        let mut parts = RequestParts {
            method,
            path: path.to_string(),
            headers: self.build_headers(token.as_deref(), &options.headers),
            body,
            timeout: options.timeout.unwrap_or(self.config.timeout),
        };
        for interceptor in &self.interceptors.request {
            parts = interceptor.on_request(parts)?;
        }

        let timeout = parts.timeout;
        let started = Instant::now();
        debug!(method = %parts.method, path = %parts.path, attempt, authenticated, "sending request");

        let mut raw = tokio::time::timeout(timeout, self.send(parts))
            .await
            .map_err(|_elapsed| ApiError::timeout(timeout))??;
        debug!(
            status = raw.status,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "response received"
        );

        for interceptor in &self.interceptors.response {
            raw = interceptor.on_response(raw)?;
        }

        let result = interpret(&raw);
        if let Err(err) = &result
            && err.kind == ApiErrorKind::Unauthorized
            && authenticated
        {
            info!("server rejected the session token; clearing session");
            self.session.clear();
        }
        result
    }

    async fn send(&self, parts: RequestParts) -> Result<RawResponse, ApiError> {
        let mut builder = self
            .http
            .request(parts.method, self.url_for(&parts.path))
            .headers(parts.headers);
        if let Some(body) = &parts.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::from_transport(&e))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::from_transport(&e))?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    /// A usable access token, refreshing an expired session first.
    async fn resolve_token(&self) -> Option<String> {
        if let Some(token) = self.session.access_token() {
            return Some(token);
        }
        if !self.session.is_expired() || self.session.refresh_token().is_none() {
            return None;
        }

        debug!("access token expired; refreshing before request");
        match self.session.refresh().await {
            Some(tokens) => Some(tokens.access_token),
            None => {
                warn!("token refresh failed; sending request without credentials");
                None
            }
        }
    }

    fn build_headers(&self, token: Option<&str>, overrides: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = token {
            match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    headers.insert(AUTHORIZATION, value);
                }
                Err(_) => warn!("stored access token is not a valid header value; omitting"),
            }
        }
        for source in [&self.config.default_headers, overrides] {
            for (name, value) in source {
                headers.insert(name.clone(), value.clone());
            }
        }
        headers
    }

    fn url_for(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    fn intercept_error(&self, error: ApiError) -> ApiError {
        self.interceptors
            .error
            .iter()
            .fold(error, |err, interceptor| interceptor.on_error(err))
    }
}

/// `base * 2^attempt`, saturating.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

fn encode_body<B: Serialize + ?Sized>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body)
        .map_err(|e| ApiError::unknown(format!("Failed to encode request body: {e}")))
}

fn interpret(raw: &RawResponse) -> Result<Value, ApiError> {
    if !(200..300).contains(&raw.status) {
        return Err(ApiError::from_status(
            raw.status,
            &String::from_utf8_lossy(&raw.body),
        ));
    }
    if raw.status == 204 || raw.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&raw.body).map_err(ApiError::decode)
}
