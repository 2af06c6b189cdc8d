//! Session state: tokens, expiry, and the cached account/organization.
//!
//! [`SessionStore`] is the single owner of persisted auth state. It is built
//! once per process and shared by `Arc` with the API client, the auth
//! service and the refresh scheduler. Every mutator writes through to the
//! [`KeyValueStore`] synchronously; reads go to the store as well, so two
//! processes sharing a `FileStore` see each other's logins.
//!
//! Token values are never logged.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{ApiError, SessionError};
use crate::models::{Account, AuthResponse, Organization};
use crate::storage::{KeyValueStore, StorageError};

/// Persisted keys.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    /// Epoch milliseconds, string-encoded.
    pub const TOKEN_EXPIRY: &str = "token_expiry";
    pub const ACCOUNT: &str = "account";
    pub const ORGANIZATION: &str = "organization";

    pub const ALL: [&str; 5] = [ACCESS_TOKEN, REFRESH_TOKEN, TOKEN_EXPIRY, ACCOUNT, ORGANIZATION];
}

const SAVE_FAILED: &str = "Failed to save authentication data";
const UPDATE_FAILED: &str = "Failed to update authentication tokens";
const ORGANIZATION_FAILED: &str = "Failed to save organization";

/// Exchanges a refresh token for a new token pair.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn exchange(&self, refresh_token: &str) -> Result<AuthResponse, ApiError>;
}

/// Point-in-time copy of everything the store holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Absolute expiry, epoch milliseconds.
    pub expires_at: Option<u64>,
    pub account: Option<Account>,
    pub organization: Option<Organization>,
}

#[derive(Debug, Default)]
struct RefreshOutcome {
    generation: u64,
    result: Option<AuthResponse>,
}

pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    refresh_gate: Mutex<RefreshOutcome>,
    // Mirrors `refresh_gate.generation` so callers can read it before queueing.
    refresh_generation: AtomicU64,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            refresher: None,
            refresh_gate: Mutex::new(RefreshOutcome::default()),
            refresh_generation: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Stores a fresh token pair and, when present, the account and
    /// organization.
    ///
    /// On failure the session must be treated as not durably saved; some
    /// keys may already have been written.
    ///
    /// # Errors
    /// Returns [`SessionError::Persist`] if the storage medium rejects a write.
    pub fn set_session(&self, data: &AuthResponse) -> Result<(), SessionError> {
        self.write_tokens(&data.access_token, &data.refresh_token, data.expires_in)
            .map_err(|source| persist_failed(SAVE_FAILED, source))?;

        if let Some(account) = &data.account {
            self.write_json(keys::ACCOUNT, account, SAVE_FAILED)?;
        }
        if let Some(organization) = &data.organization {
            self.write_json(keys::ORGANIZATION, organization, SAVE_FAILED)?;
        }

        debug!(expires_in = data.expires_in, "session stored");
        Ok(())
    }

    /// Replaces just the token pair, leaving cached records alone.
    ///
    /// # Errors
    /// Returns [`SessionError::Persist`] if the storage medium rejects a write.
    pub fn update_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in: u64,
    ) -> Result<(), SessionError> {
        self.write_tokens(access_token, refresh_token, expires_in)
            .map_err(|source| persist_failed(UPDATE_FAILED, source))
    }

    /// Replaces the cached organization record.
    ///
    /// # Errors
    /// Returns [`SessionError::Persist`] if the storage medium rejects the write.
    pub fn set_organization(&self, organization: &Organization) -> Result<(), SessionError> {
        self.write_json(keys::ORGANIZATION, organization, ORGANIZATION_FAILED)
    }

    fn write_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in: u64,
    ) -> Result<(), StorageError> {
        let expires_at = self
            .now_millis()
            .saturating_add(expires_in.saturating_mul(1000));
        self.store.set(keys::ACCESS_TOKEN, access_token)?;
        self.store.set(keys::REFRESH_TOKEN, refresh_token)?;
        self.store.set(keys::TOKEN_EXPIRY, &expires_at.to_string())
    }

    fn write_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        message: &'static str,
    ) -> Result<(), SessionError> {
        let encoded = serde_json::to_string(value)?;
        self.store
            .set(key, &encoded)
            .map_err(|source| persist_failed(message, source))
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "failed to read session key");
                None
            }
        }
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.read(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "ignoring malformed cached record");
                None
            }
        }
    }

    /// The access token, only while it is present and unexpired.
    pub fn access_token(&self) -> Option<String> {
        let token = self.read(keys::ACCESS_TOKEN)?;
        if self.is_expired() {
            return None;
        }
        Some(token)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read(keys::REFRESH_TOKEN)
    }

    pub fn expires_at(&self) -> Option<u64> {
        self.read(keys::TOKEN_EXPIRY)?.trim().parse().ok()
    }

    pub fn account(&self) -> Option<Account> {
        self.read_json(keys::ACCOUNT)
    }

    pub fn organization(&self) -> Option<Organization> {
        self.read_json(keys::ORGANIZATION)
    }

    /// True when no usable expiry is recorded or it has passed.
    pub fn is_expired(&self) -> bool {
        self.expires_at()
            .is_none_or(|expires_at| self.now_millis() >= expires_at)
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    /// Milliseconds until expiry; negative once expired.
    pub fn time_until_expiry(&self) -> Option<i64> {
        let expires_at = i64::try_from(self.expires_at()?).unwrap_or(i64::MAX);
        let now = i64::try_from(self.now_millis()).unwrap_or(i64::MAX);
        Some(expires_at - now)
    }

    pub fn snapshot(&self) -> Session {
        Session {
            access_token: self.read(keys::ACCESS_TOKEN),
            refresh_token: self.refresh_token(),
            expires_at: self.expires_at(),
            account: self.account(),
            organization: self.organization(),
        }
    }

    /// Removes every session key. Failures are logged and skipped.
    pub fn clear(&self) {
        for key in keys::ALL {
            if let Err(err) = self.store.remove(key) {
                error!(key, error = %err, "failed to clear session key");
            }
        }
        debug!("session cleared");
    }

    /// Exchanges the refresh token for a new session.
    ///
    /// Returns the new tokens, or `None` after clearing the whole session
    /// when there is no refresh token or the exchange fails. Callers that
    /// arrive while another refresh is running wait for it and share its
    /// outcome rather than redeeming the refresh token a second time.
    ///
    /// The exchange runs on its own task, so dropping the returned future
    /// (a cancelled request, a stopped scheduler) never abandons a refresh
    /// the server has already seen; later callers still share its result.
    pub async fn refresh(self: &Arc<Self>) -> Option<AuthResponse> {
        let observed = self.refresh_generation.load(Ordering::Acquire);
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.refresh_after(observed).await });
        match task.await {
            Ok(result) => result,
            Err(err) => {
                error!(error = %err, "token refresh task failed");
                None
            }
        }
    }

    async fn refresh_after(&self, observed: u64) -> Option<AuthResponse> {
        let mut gate = self.refresh_gate.lock().await;
        if gate.generation != observed {
            debug!("sharing result of concurrent token refresh");
            return gate.result.clone();
        }

        let result = self.exchange_refresh_token().await;
        gate.generation += 1;
        gate.result.clone_from(&result);
        self.refresh_generation
            .store(gate.generation, Ordering::Release);
        result
    }

    async fn exchange_refresh_token(&self) -> Option<AuthResponse> {
        let Some(refresh_token) = self.refresh_token() else {
            warn!("no refresh token available; clearing session");
            self.clear();
            return None;
        };

        let Some(refresher) = &self.refresher else {
            error!("session store has no token refresher configured; clearing session");
            self.clear();
            return None;
        };

        match refresher.exchange(&refresh_token).await {
            Ok(data) => match self.set_session(&data) {
                Ok(()) => {
                    info!(expires_in = data.expires_in, "access token refreshed");
                    Some(data)
                }
                Err(err) => {
                    error!(error = %err, "refreshed tokens could not be stored; clearing session");
                    self.clear();
                    None
                }
            },
            Err(err) => {
                warn!(status = err.status, kind = %err.kind, error = %err, "token refresh failed; clearing session");
                self.clear();
                None
            }
        }
    }
}

fn persist_failed(message: &'static str, source: StorageError) -> SessionError {
    error!(error = %source, "{message}");
    SessionError::Persist { message, source }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;

    const START: u64 = 1_700_000_000_000;

    struct StubRefresher {
        calls: AtomicUsize,
        response: Result<AuthResponse, ApiError>,
        delay: Duration,
    }

    impl StubRefresher {
        fn ok(access: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                response: Ok(auth_response(access, "R2", 3600)),
                delay: Duration::ZERO,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                response: Err(ApiError::service_unavailable("connection refused")),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl TokenRefresher for StubRefresher {
        async fn exchange(&self, _refresh_token: &str) -> Result<AuthResponse, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.response.clone()
        }
    }

    /// Accepts reads, rejects every write.
    struct ReadOnlyStore;

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("quota exceeded".into()))
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("quota exceeded".into()))
        }
    }

    fn auth_response(access: &str, refresh: &str, expires_in: u64) -> AuthResponse {
        AuthResponse {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            expires_in,
            account: Some(Account {
                id: "acc_1".into(),
                email: "a@b.com".into(),
                first_name: Some("Ada".into()),
                last_name: None,
                email_verified: None,
                created_at: None,
                updated_at: None,
            }),
            organization: Some(Organization {
                id: "org_1".into(),
                name: "Acme".into(),
                slug: None,
                created_at: None,
                updated_at: None,
            }),
        }
    }

    fn store_with_clock() -> (SessionStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let store = SessionStore::new(Arc::new(MemoryStore::new())).with_clock(Arc::<ManualClock>::clone(&clock));
        (store, clock)
    }

    #[test]
    fn test_last_set_token_wins_before_expiry() {
        let (store, clock) = store_with_clock();
        for token in ["T1", "T2", "T3"] {
            store.set_session(&auth_response(token, "R1", 60)).unwrap();
            clock.advance(Duration::from_secs(10));
            assert_eq!(store.access_token().as_deref(), Some(token));
        }
    }

    #[test]
    fn test_login_scenario_expires_after_ttl() {
        let (store, clock) = store_with_clock();
        store.set_session(&auth_response("T1", "R1", 3600)).unwrap();

        assert!(store.is_authenticated());
        assert_eq!(store.access_token().as_deref(), Some("T1"));
        assert_eq!(store.expires_at(), Some(START + 3_600_000));
        assert_eq!(store.account().unwrap().email, "a@b.com");
        assert_eq!(store.organization().unwrap().name, "Acme");

        clock.advance(Duration::from_secs(3599));
        assert!(store.is_authenticated());

        clock.advance(Duration::from_secs(1));
        assert!(!store.is_authenticated());
        assert_eq!(store.access_token(), None);
        // The raw token is still there for the refresh path.
        assert_eq!(store.snapshot().access_token.as_deref(), Some("T1"));
        assert_eq!(store.refresh_token().as_deref(), Some("R1"));
    }

    #[test]
    fn test_expired_session_hides_token() {
        let (store, clock) = store_with_clock();
        store.set_session(&auth_response("T1", "R1", 1)).unwrap();
        clock.advance(Duration::from_secs(5));

        assert!(store.is_expired());
        assert_eq!(store.access_token(), None);
        assert_eq!(store.time_until_expiry(), Some(-4000));
    }

    #[test]
    fn test_missing_or_garbled_expiry_counts_as_expired() {
        let backing = Arc::new(MemoryStore::new());
        let store = SessionStore::new(Arc::<MemoryStore>::clone(&backing));
        backing.set(keys::ACCESS_TOKEN, "T1").unwrap();
        assert!(store.is_expired());
        assert_eq!(store.access_token(), None);

        backing.set(keys::TOKEN_EXPIRY, "soon").unwrap();
        assert!(store.is_expired());
    }

    #[test]
    fn test_clear_empties_every_getter() {
        let (store, _clock) = store_with_clock();
        store.set_session(&auth_response("T1", "R1", 3600)).unwrap();

        store.clear();

        assert_eq!(store.snapshot(), Session::default());
        assert_eq!(store.access_token(), None);
        assert_eq!(store.time_until_expiry(), None);
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_update_tokens_keeps_cached_records() {
        let (store, _clock) = store_with_clock();
        store.set_session(&auth_response("T1", "R1", 3600)).unwrap();

        store.update_tokens("T9", "R9", 120).unwrap();

        assert_eq!(store.access_token().as_deref(), Some("T9"));
        assert_eq!(store.refresh_token().as_deref(), Some("R9"));
        assert_eq!(store.expires_at(), Some(START + 120_000));
        assert!(store.account().is_some());
    }

    #[test]
    fn test_persist_failure_is_reported_not_panicking() {
        let store = SessionStore::new(Arc::new(ReadOnlyStore));

        let err = store
            .set_session(&auth_response("T1", "R1", 3600))
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to save authentication data");

        let err = store.update_tokens("T1", "R1", 10).unwrap_err();
        assert_eq!(err.to_string(), "Failed to update authentication tokens");

        // Clearing an unwritable store only logs.
        store.clear();
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_set_organization_keeps_tokens() {
        let (store, _clock) = store_with_clock();
        store.set_session(&auth_response("T1", "R1", 3600)).unwrap();

        store
            .set_organization(&Organization {
                id: "org_1".into(),
                name: "Acme Labs".into(),
                slug: Some("acme-labs".into()),
                created_at: None,
                updated_at: None,
            })
            .unwrap();

        let organization = store.organization().unwrap();
        assert_eq!(organization.name, "Acme Labs");
        assert_eq!(organization.slug.as_deref(), Some("acme-labs"));
        assert_eq!(store.access_token().as_deref(), Some("T1"));
    }

    #[test]
    fn test_malformed_cached_account_reads_as_none() {
        let backing = Arc::new(MemoryStore::new());
        let store = SessionStore::new(Arc::<MemoryStore>::clone(&backing));
        backing.set(keys::ACCOUNT, "{broken").unwrap();
        assert_eq!(store.account(), None);
    }

    #[tokio::test]
    async fn test_refresh_replaces_session() {
        let refresher = Arc::new(StubRefresher::ok("T2"));
        let (store, clock) = store_with_clock();
        let store = Arc::new(store.with_refresher(Arc::<StubRefresher>::clone(&refresher)));
        store.set_session(&auth_response("T1", "R1", 60)).unwrap();
        clock.advance(Duration::from_secs(120));

        let refreshed = store.refresh().await.unwrap();

        assert_eq!(refreshed.access_token, "T2");
        assert_eq!(store.access_token().as_deref(), Some("T2"));
        assert_eq!(store.refresh_token().as_deref(), Some("R2"));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_network_failure_clears_everything() {
        let refresher = Arc::new(StubRefresher::failing());
        let (store, _clock) = store_with_clock();
        let store = Arc::new(store.with_refresher(Arc::<StubRefresher>::clone(&refresher)));
        store.set_session(&auth_response("T1", "R1", 3600)).unwrap();

        assert!(store.refresh().await.is_none());

        assert!(!store.is_authenticated());
        assert_eq!(store.snapshot(), Session::default());
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_skips_network() {
        let refresher = Arc::new(StubRefresher::ok("T2"));
        let store = Arc::new(
            SessionStore::new(Arc::new(MemoryStore::new())).with_refresher(Arc::<StubRefresher>::clone(&refresher)),
        );

        assert!(store.refresh().await.is_none());
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_exchange() {
        let refresher = Arc::new(StubRefresher {
            delay: Duration::from_millis(50),
            ..StubRefresher::ok("T2")
        });
        let (store, _clock) = store_with_clock();
        let store = Arc::new(store.with_refresher(Arc::<StubRefresher>::clone(&refresher)));
        store.set_session(&auth_response("T1", "R1", 1)).unwrap();

        let (a, b, c) = tokio::join!(store.refresh(), store.refresh(), store.refresh());

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        for outcome in [a, b, c] {
            assert_eq!(outcome.unwrap().access_token, "T2");
        }

        // A later refresh is a new exchange.
        store.refresh().await.unwrap();
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_abandon_refresh() {
        let refresher = Arc::new(StubRefresher {
            delay: Duration::from_millis(100),
            ..StubRefresher::ok("T2")
        });
        let (store, _clock) = store_with_clock();
        let store = Arc::new(store.with_refresher(Arc::<StubRefresher>::clone(&refresher)));
        store.set_session(&auth_response("T1", "R1", 1)).unwrap();

        let first = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        first.abort();

        let second = store.refresh().await.unwrap();

        assert_eq!(second.access_token, "T2");
        assert_eq!(store.refresh_token().as_deref(), Some("R2"));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }
}
