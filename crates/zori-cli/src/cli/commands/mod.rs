//! CLI command handlers.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use tracing::debug;
use zori_core::auth::HttpTokenRefresher;
use zori_core::client::{ApiClient, ClientConfig, RequestIdInterceptor};
use zori_core::config::Config;
use zori_core::storage::FileStore;
use zori_core::validation::ValidationErrors;
use zori_core::{ApiError, ErrorContext, SessionStore};

pub mod auth;
pub mod config;
pub mod keepalive;
pub mod projects;

/// Everything a command needs to talk to the API.
pub struct Context {
    pub config: Config,
    pub session: Arc<SessionStore>,
    pub client: Arc<ApiClient>,
    pub session_path: PathBuf,
}

impl Context {
    pub fn new(config: Config, base_url: Option<&str>) -> Result<Self> {
        let base_url = config.resolve_base_url(base_url)?;
        debug!(base_url = %base_url, "using API");

        let store = FileStore::default_location();
        let session_path = store.path().to_path_buf();

        let refresher = HttpTokenRefresher::new(base_url.clone()).context("create HTTP client")?;
        let session = Arc::new(
            SessionStore::new(Arc::new(store)).with_refresher(Arc::new(refresher)),
        );
        let client = ApiClient::builder(base_url, Arc::clone(&session))
            .config(ClientConfig::from(&config.api))
            .request_interceptor(RequestIdInterceptor)
            .build()
            .context("create API client")?;

        Ok(Self {
            config,
            session,
            client: Arc::new(client),
            session_path,
        })
    }

    /// Fails unless a session (possibly expired but refreshable) is stored.
    pub fn require_login(&self) -> Result<()> {
        if self.session.refresh_token().is_none() {
            anyhow::bail!("Not logged in. Run `zori login --email <EMAIL>` first.");
        }
        Ok(())
    }
}

/// Turns field problems into one error listing each field on its own line.
pub fn check(result: Result<(), ValidationErrors>) -> Result<()> {
    result.map_err(|errors| anyhow!("{errors}").context("Invalid input"))
}

/// Maps an API failure to the text shown to the user.
pub fn api_failure(err: &ApiError, context: ErrorContext) -> anyhow::Error {
    debug!(status = err.status, kind = %err.kind, error = %err, "request failed");
    anyhow!(err.user_message(context))
}

/// Uses `provided`, otherwise reads one line from stdin.
pub fn read_password(provided: Option<String>, prompt: &str) -> Result<String> {
    if let Some(password) = provided {
        return Ok(password);
    }

    let stdin = io::stdin();
    if stdin.is_terminal() {
        eprint!("{prompt}: ");
        io::stderr().flush()?;
    }
    let mut line = String::new();
    stdin.lock().read_line(&mut line).context("read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
