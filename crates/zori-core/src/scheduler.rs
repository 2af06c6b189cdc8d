//! Background refresh of sessions that are about to expire.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::session::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Time between checks.
    pub interval: Duration,
    /// Refresh once the remaining lifetime drops to this or below.
    pub threshold: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for RefreshPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            interval: config.refresh_interval(),
            threshold: config.refresh_threshold(),
        }
    }
}

impl RefreshPolicy {
    /// True for a session that is still valid but inside the threshold.
    ///
    /// Already-expired sessions are left to the next request, which
    /// refreshes on demand.
    pub fn should_refresh(&self, remaining_ms: Option<i64>) -> bool {
        let threshold = i64::try_from(self.threshold.as_millis()).unwrap_or(i64::MAX);
        remaining_ms.is_some_and(|remaining| remaining > 0 && remaining <= threshold)
    }
}

pub struct RefreshScheduler;

impl RefreshScheduler {
    /// Starts the refresh loop on the current tokio runtime.
    ///
    /// The first check runs immediately.
    pub fn spawn(session: Arc<SessionStore>, policy: RefreshPolicy) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(session, policy, cancel.clone()));
        debug!(
            interval_secs = policy.interval.as_secs(),
            threshold_secs = policy.threshold.as_secs(),
            "refresh scheduler started"
        );
        SchedulerHandle {
            cancel,
            task: Some(task),
        }
    }
}

async fn run(session: Arc<SessionStore>, policy: RefreshPolicy, cancel: CancellationToken) {
    // `interval` rejects a zero period.
    let mut ticker = tokio::time::interval(policy.interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let remaining = session.time_until_expiry();
        if !policy.should_refresh(remaining) {
            continue;
        }

        info!(remaining_ms = remaining, "session close to expiry; refreshing");
        tokio::select! {
            () = cancel.cancelled() => break,
            refreshed = session.refresh() => {
                if refreshed.is_none() {
                    warn!("scheduled refresh failed; session cleared");
                }
            }
        }
    }
    debug!("refresh scheduler stopped");
}

/// Owns the scheduler task. Dropping the handle stops the loop.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            warn!(error = %err, "refresh scheduler task ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
