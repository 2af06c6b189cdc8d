//! Login, registration, logout and password recovery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::{ApiClient, RequestOptions, USER_AGENT};
use crate::error::{ApiError, SessionError};
use crate::models::{
    AuthResponse, LoginRequest, LogoutRequest, MessageResponse, RecoverConfirmRequest,
    RecoverRequest, RefreshRequest, RegisterRequest,
};
use crate::session::{Session, SessionStore, TokenRefresher};

pub const LOGIN_PATH: &str = "/api/v1/auth/login";
pub const REGISTER_PATH: &str = "/api/v1/auth/register";
pub const REFRESH_PATH: &str = "/api/v1/auth/refresh";
pub const LOGOUT_PATH: &str = "/api/v1/auth/logout";
pub const RECOVER_PATH: &str = "/api/v1/auth/recover";
pub const RECOVER_CONFIRM_PATH: &str = "/api/v1/auth/recover-confirm";

/// Upper bound for one refresh exchange.
const REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Redeems refresh tokens with a plain POST.
///
/// Goes straight to the HTTP client rather than through [`ApiClient`]:
/// the refresh must not attach a bearer token, be retried, or trigger
/// another refresh.
pub struct HttpTokenRefresher {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpTokenRefresher {
    /// # Errors
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(base_url: Url) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REFRESH_TIMEOUT)
            .build()
            .map_err(|e| ApiError::unknown(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, base_url })
    }

    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}{REFRESH_PATH}",
            self.base_url.as_str().trim_end_matches('/')
        )
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn exchange(&self, refresh_token: &str) -> Result<AuthResponse, ApiError> {
        debug!("exchanging refresh token");
        let response = self
            .http
            .post(self.endpoint())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .json(&RefreshRequest {
                refresh_token: refresh_token.to_string(),
            })
            .send()
            .await
            .map_err(|e| ApiError::from_transport(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::from_transport(&e))?;
        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(ApiError::decode)
    }
}

/// Failures of login and registration.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

pub struct AuthService {
    client: Arc<ApiClient>,
}

impl AuthService {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        self.client.session()
    }

    /// Signs in and stores the returned session.
    ///
    /// Sent without credentials, so a stale stored session is neither
    /// refreshed nor presented. Any failure leaves the store empty.
    ///
    /// # Errors
    /// Returns [`AuthError::Api`] if the server rejects the credentials and
    /// [`AuthError::Session`] if the new session cannot be saved.
    pub async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, AuthError> {
        let result = self.client.post_with(LOGIN_PATH, request, &anonymous()).await;
        self.establish(result, "logged in")
    }

    /// Creates the account and organization, then signs in.
    ///
    /// # Errors
    /// Same as [`AuthService::login`].
    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, AuthError> {
        let result = self
            .client
            .post_with(REGISTER_PATH, request, &anonymous())
            .await;
        self.establish(result, "registered")
    }

    fn establish(
        &self,
        result: Result<AuthResponse, ApiError>,
        action: &str,
    ) -> Result<AuthResponse, AuthError> {
        let data = match result {
            Ok(data) => data,
            Err(err) => {
                self.session().clear();
                return Err(err.into());
            }
        };
        if let Err(err) = self.session().set_session(&data) {
            self.session().clear();
            return Err(err.into());
        }
        info!(
            account = data.account.as_ref().map(|a| a.email.as_str()),
            "{action}"
        );
        Ok(data)
    }

    /// Tells the server to revoke the refresh token, then clears local state.
    ///
    /// The local session is cleared even when the server call fails; the
    /// server outcome is returned only for reporting.
    ///
    /// # Errors
    /// Returns the [`ApiError`] from the revoke call, after clearing.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let result = match self.session().refresh_token() {
            Some(refresh_token) => self
                .client
                .post::<Value, _>(LOGOUT_PATH, &LogoutRequest { refresh_token })
                .await
                .map(drop),
            None => Ok(()),
        };
        if let Err(err) = &result {
            warn!(status = err.status, error = %err, "logout request failed; clearing local session anyway");
        }
        self.session().clear();
        info!("logged out");
        result
    }

    /// Asks the server to send a password recovery email.
    ///
    /// # Errors
    /// Returns the [`ApiError`] from the server.
    pub async fn recover(&self, request: &RecoverRequest) -> Result<MessageResponse, ApiError> {
        let response: Option<MessageResponse> = self
            .client
            .post_with(RECOVER_PATH, request, &anonymous())
            .await?;
        Ok(response.unwrap_or_default())
    }

    /// Sets a new password using a recovery token.
    ///
    /// # Errors
    /// Returns the [`ApiError`] from the server.
    pub async fn recover_confirm(
        &self,
        request: &RecoverConfirmRequest,
    ) -> Result<MessageResponse, ApiError> {
        let response: Option<MessageResponse> = self
            .client
            .post_with(RECOVER_CONFIRM_PATH, request, &anonymous())
            .await?;
        Ok(response.unwrap_or_default())
    }

    pub fn current(&self) -> Session {
        self.session().snapshot()
    }
}

fn anonymous() -> RequestOptions {
    RequestOptions::default().anonymous()
}

/// Short, log-safe rendering of a token.
pub fn mask_token(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    if prefix.len() < token.len() {
        format!("{prefix}…")
    } else {
        "********".to_string()
    }
}
