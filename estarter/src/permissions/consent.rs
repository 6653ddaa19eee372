//! User-consent broker.
//!
//! Each waiter gets its own completion channel; a single
//! [`ConsentBroker::complete`] resolves every waiter for the same
//! (app, permission) pair. Abandoned waits (timeouts) unregister their
//! channel so the pending table cannot grow without bound.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::oneshot;

use estarter_shared::Permission;

type PendingKey = (String, u64);

/// Handle for one outstanding consent wait.
pub struct ConsentTicket {
    key: PendingKey,
    token: u64,
    rx: oneshot::Receiver<bool>,
}

impl ConsentTicket {
    /// Await the user's decision. Resolves to `false` if the broker is
    /// dropped before a decision arrives.
    pub async fn decided(self) -> bool {
        self.rx.await.unwrap_or(false)
    }

    pub fn key(&self) -> (&str, Permission) {
        (
            &self.key.0,
            Permission::from_bits_truncate(self.key.1),
        )
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

#[derive(Default)]
pub struct ConsentBroker {
    pending: parking_lot::Mutex<HashMap<PendingKey, Vec<(u64, oneshot::Sender<bool>)>>>,
    next_token: AtomicU64,
}

impl ConsentBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for (app, permission) and return its ticket.
    pub fn begin(&self, app_id: &str, permission: Permission) -> ConsentTicket {
        let key = (app_id.to_string(), permission.bits());
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .entry(key.clone())
            .or_default()
            .push((token, tx));
        ConsentTicket { key, token, rx }
    }

    /// Resolve every waiter for (app, permission). Returns how many waiters
    /// were notified; zero means the decision arrived for a request nobody
    /// is waiting on anymore.
    pub fn complete(&self, app_id: &str, permission: Permission, allowed: bool) -> usize {
        let key = (app_id.to_string(), permission.bits());
        let waiters = self.pending.lock().remove(&key).unwrap_or_default();
        let count = waiters.len();
        for (_, tx) in waiters {
            // A receiver that already gave up is fine.
            let _ = tx.send(allowed);
        }
        count
    }

    /// Drop one waiter after its timeout expired. The entry is removed when
    /// the last waiter abandons.
    pub fn abandon(&self, app_id: &str, permission: Permission, token: u64) {
        let key = (app_id.to_string(), permission.bits());
        let mut pending = self.pending.lock();
        if let Some(waiters) = pending.get_mut(&key) {
            waiters.retain(|(t, _)| *t != token);
            if waiters.is_empty() {
                pending.remove(&key);
            }
        }
    }

    /// Whether any waiter is outstanding for (app, permission).
    pub fn is_pending(&self, app_id: &str, permission: Permission) -> bool {
        let key = (app_id.to_string(), permission.bits());
        self.pending.lock().contains_key(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_resolves_waiter() {
        let broker = ConsentBroker::new();
        let ticket = broker.begin("app.a", Permission::CAMERA);
        assert!(broker.is_pending("app.a", Permission::CAMERA));

        assert_eq!(broker.complete("app.a", Permission::CAMERA, true), 1);
        assert!(ticket.decided().await);
        assert!(!broker.is_pending("app.a", Permission::CAMERA));
    }

    #[tokio::test]
    async fn test_complete_resolves_all_concurrent_waiters() {
        let broker = ConsentBroker::new();
        let first = broker.begin("app.a", Permission::LOCATION);
        let second = broker.begin("app.a", Permission::LOCATION);

        assert_eq!(broker.complete("app.a", Permission::LOCATION, false), 2);
        assert!(!first.decided().await);
        assert!(!second.decided().await);
    }

    #[tokio::test]
    async fn test_distinct_permissions_do_not_cross_complete() {
        let broker = ConsentBroker::new();
        let camera = broker.begin("app.a", Permission::CAMERA);

        assert_eq!(broker.complete("app.a", Permission::MICROPHONE, true), 0);
        assert!(broker.is_pending("app.a", Permission::CAMERA));

        broker.complete("app.a", Permission::CAMERA, true);
        assert!(camera.decided().await);
    }

    #[tokio::test]
    async fn test_abandon_removes_single_waiter() {
        let broker = ConsentBroker::new();
        let ticket = broker.begin("app.a", Permission::CAMERA);
        let other = broker.begin("app.a", Permission::CAMERA);

        broker.abandon("app.a", Permission::CAMERA, ticket.token());
        assert!(broker.is_pending("app.a", Permission::CAMERA));

        broker.abandon("app.a", Permission::CAMERA, other.token());
        assert!(!broker.is_pending("app.a", Permission::CAMERA));
    }

    #[tokio::test]
    async fn test_dropped_broker_counts_as_denial() {
        let broker = ConsentBroker::new();
        let ticket = broker.begin("app.a", Permission::CAMERA);
        drop(broker);
        assert!(!ticket.decided().await);
    }
}
