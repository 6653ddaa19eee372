//! Persistent per-app permission grants.
//!
//! The store is loaded once at construction and written back as a full
//! snapshot on every change. Writes are asynchronous and last-writer-wins;
//! a failed load yields an empty store, a failed write is logged and
//! dropped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use estarter_shared::{Permission, PermissionSet};

/// One persisted grant record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGrant {
    pub app_id: String,
    pub granted: Permission,
    pub denied: Permission,
    pub updated_at: DateTime<Utc>,
}

impl PermissionGrant {
    pub fn set(&self) -> PermissionSet {
        PermissionSet {
            granted: self.granted,
            denied: self.denied,
        }
    }
}

struct StoreInner {
    path: PathBuf,
    entries: parking_lot::Mutex<HashMap<String, PermissionGrant>>,
    /// Serializes snapshot writes so an older snapshot can never clobber a
    /// newer one.
    write_lock: tokio::sync::Mutex<()>,
}

/// appId → grant record, mirrored to `permissions.json`.
#[derive(Clone)]
pub struct PermissionStore {
    inner: Arc<StoreInner>,
}

impl PermissionStore {
    /// Load the store from disk; any read or parse error yields an empty
    /// store.
    pub fn load(path: PathBuf) -> Self {
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<PermissionGrant>>(&bytes) {
                Ok(grants) => grants
                    .into_iter()
                    .map(|g| (g.app_id.clone(), g))
                    .collect(),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Malformed permission store, starting empty"
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to read permission store, starting empty"
                );
                HashMap::new()
            }
        };

        Self {
            inner: Arc::new(StoreInner {
                path,
                entries: parking_lot::Mutex::new(entries),
                write_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Stored permission set for an app, if any grant record exists.
    pub fn stored_set(&self, app_id: &str) -> Option<PermissionSet> {
        self.inner.entries.lock().get(app_id).map(|g| g.set())
    }

    /// Record `granted ∪ p, denied ∖ p` for an app.
    pub fn record_grant(&self, app_id: &str, p: Permission) {
        self.update(app_id, |set| set.grant(p));
    }

    /// Record a sticky denial: `denied ∪ p`, granted untouched.
    pub fn record_denial(&self, app_id: &str, p: Permission) {
        self.update(app_id, |set| set.deny(p));
    }

    /// Remove `p` from both masks.
    pub fn record_revoke(&self, app_id: &str, p: Permission) {
        self.update(app_id, |set| set.revoke(p));
    }

    /// Drop every record for an app (uninstall).
    pub fn remove_app(&self, app_id: &str) {
        let removed = self.inner.entries.lock().remove(app_id).is_some();
        if removed {
            self.schedule_save();
        }
    }

    fn update(&self, app_id: &str, f: impl FnOnce(PermissionSet) -> PermissionSet) {
        {
            let mut entries = self.inner.entries.lock();
            let entry = entries
                .entry(app_id.to_string())
                .or_insert_with(|| PermissionGrant {
                    app_id: app_id.to_string(),
                    granted: Permission::empty(),
                    denied: Permission::empty(),
                    updated_at: Utc::now(),
                });
            let updated = f(entry.set());
            entry.granted = updated.granted;
            entry.denied = updated.denied;
            entry.updated_at = Utc::now();
        }
        self.schedule_save();
    }

    fn snapshot(&self) -> Vec<PermissionGrant> {
        let mut grants: Vec<_> = self.inner.entries.lock().values().cloned().collect();
        grants.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        grants
    }

    /// Write the current snapshot. Runs on the tokio runtime when one is
    /// available, synchronously otherwise.
    fn schedule_save(&self) {
        let inner = self.inner.clone();
        let grants = self.snapshot();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _guard = inner.write_lock.lock().await;
                    if let Err(e) = write_snapshot(&inner.path, &grants).await {
                        tracing::warn!(
                            path = %inner.path.display(),
                            error = %e,
                            "Failed to persist permission grants"
                        );
                    }
                });
            }
            Err(_) => {
                if let Err(e) = write_snapshot_sync(&inner.path, &grants) {
                    tracing::warn!(
                        path = %inner.path.display(),
                        error = %e,
                        "Failed to persist permission grants"
                    );
                }
            }
        }
    }
}

async fn write_snapshot(path: &PathBuf, grants: &[PermissionGrant]) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(grants)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

fn write_snapshot_sync(path: &PathBuf, grants: &[PermissionGrant]) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(grants)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, path)
}
