//! Permission persistence and the user-consent protocol.
//!
//! The capability bit definitions and [`PermissionSet`] value type live in
//! `estarter-shared`; this module owns what the runtime does with them:
//! the persistent grant store, global policies, and consent brokering.

mod consent;
mod policy;
mod store;

pub use consent::{ConsentBroker, ConsentTicket};
pub use policy::{PolicyCategory, PolicyStore, SystemPolicies};
pub use store::{PermissionGrant, PermissionStore};

pub use estarter_shared::{Permission, PermissionSet};

/// Owns persistent grants and drives the consent protocol.
///
/// Kernel-facing façade over the store and broker; the kernel remains the
/// only mutator of live process permission sets.
pub struct PermissionManager {
    store: PermissionStore,
    consent: ConsentBroker,
}

impl PermissionManager {
    pub fn new(store: PermissionStore) -> Self {
        Self {
            store,
            consent: ConsentBroker::new(),
        }
    }

    pub fn store(&self) -> &PermissionStore {
        &self.store
    }

    pub fn consent(&self) -> &ConsentBroker {
        &self.consent
    }

    /// Stored set for an app, or an empty set when nothing is persisted.
    pub fn stored_set(&self, app_id: &str) -> PermissionSet {
        self.store.stored_set(app_id).unwrap_or_default()
    }

    /// Whether a persisted denial is standing for any bit of `p`.
    pub fn is_denied(&self, app_id: &str, p: Permission) -> bool {
        self.stored_set(app_id).denied.intersects(p)
    }
}
