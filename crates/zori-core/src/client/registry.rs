//! In-flight request registry.
//!
//! One entry per `METHOD:path` key. Registering a key that is already
//! present cancels the older request's token; the older call then resolves
//! with a cancellation error while the newer one proceeds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Registry key for a request.
pub fn request_key(method: &Method, path: &str) -> String {
    format!("{method}:{path}")
}

#[derive(Debug)]
struct Entry {
    ticket: u64,
    token: CancellationToken,
}

#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: Mutex<HashMap<String, Entry>>,
    next_ticket: AtomicU64,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // Entries stay consistent even if a holder panicked mid-insert.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `key`, cancelling whatever was in flight under it.
    pub fn register(&self, key: &str) -> PendingGuard<'_> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let previous = self.lock().insert(
            key.to_string(),
            Entry {
                ticket,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!(key, "superseding in-flight request");
            previous.token.cancel();
        }
        PendingGuard {
            registry: self,
            key: key.to_string(),
            ticket,
            token,
        }
    }

    /// Cancels the request under `key`. Returns whether one was in flight.
    pub fn cancel(&self, key: &str) -> bool {
        match self.lock().remove(key) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels everything. Returns how many requests were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Entry> = self.lock().drain().map(|(_, entry)| entry).collect();
        for entry in &drained {
            entry.token.cancel();
        }
        drained.len()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn finish(&self, key: &str, ticket: u64) {
        let mut entries = self.lock();
        if entries.get(key).is_some_and(|e| e.ticket == ticket) {
            entries.remove(key);
        }
    }
}

/// Registration for one call; removes its own entry when dropped.
#[derive(Debug)]
pub struct PendingGuard<'a> {
    registry: &'a PendingRequests,
    key: String,
    ticket: u64,
    token: CancellationToken,
}

impl PendingGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.registry.finish(&self.key, self.ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_key_format() {
        assert_eq!(request_key(&Method::GET, "/api/v1/projects"), "GET:/api/v1/projects");
    }

    #[test]
    fn test_register_supersedes_same_key() {
        let registry = PendingRequests::new();
        let first = registry.register("GET:/a");
        let second = registry.register("GET:/a");

        assert!(first.token().is_cancelled());
        assert!(!second.token().is_cancelled());
        assert_eq!(registry.keys(), vec!["GET:/a".to_string()]);

        // The superseded guard must not remove the newer entry.
        drop(first);
        assert_eq!(registry.keys(), vec!["GET:/a".to_string()]);

        drop(second);
        assert!(registry.keys().is_empty());
    }

    #[test]
    fn test_different_keys_are_independent() {
        let registry = PendingRequests::new();
        let a = registry.register("GET:/a");
        let b = registry.register("POST:/a");
        assert!(!a.token().is_cancelled());
        assert!(!b.token().is_cancelled());
        assert_eq!(registry.keys().len(), 2);
    }

    #[test]
    fn test_manual_cancel() {
        let registry = PendingRequests::new();
        let a = registry.register("GET:/a");
        let b = registry.register("GET:/b");

        assert!(registry.cancel("GET:/a"));
        assert!(!registry.cancel("GET:/a"));
        assert!(a.token().is_cancelled());
        assert!(!b.token().is_cancelled());

        assert_eq!(registry.cancel_all(), 1);
        assert!(b.token().is_cancelled());
        assert!(registry.keys().is_empty());
    }
}
