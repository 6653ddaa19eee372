//! Global permission policies.
//!
//! A policy category switched off blocks new grants of its bits and strips
//! them from every live process (the kernel drives the revocation).

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use estarter_shared::Permission;

/// High-level policy categories, each covering one or more permission bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyCategory {
    Location,
    Camera,
    Microphone,
    FileSystem,
    Network,
    Ipc,
    Notifications,
}

impl PolicyCategory {
    pub const ALL: &'static [PolicyCategory] = &[
        PolicyCategory::Location,
        PolicyCategory::Camera,
        PolicyCategory::Microphone,
        PolicyCategory::FileSystem,
        PolicyCategory::Network,
        PolicyCategory::Ipc,
        PolicyCategory::Notifications,
    ];

    /// Permission bits this category governs.
    pub fn permission_mask(&self) -> Permission {
        match self {
            PolicyCategory::Location => Permission::LOCATION,
            PolicyCategory::Camera => Permission::CAMERA,
            PolicyCategory::Microphone => Permission::MICROPHONE,
            PolicyCategory::FileSystem => {
                Permission::FILE_READ | Permission::FILE_WRITE | Permission::FILE_DELETE
            }
            PolicyCategory::Network => Permission::NETWORK_ACCESS | Permission::NETWORK_LISTEN,
            PolicyCategory::Ipc => {
                Permission::IPC_SEND | Permission::IPC_RECEIVE | Permission::IPC_BROADCAST
            }
            PolicyCategory::Notifications => Permission::NOTIFICATION,
        }
    }
}

/// Persisted global booleans, one per category. Everything defaults to
/// allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemPolicies {
    pub allow_location: bool,
    pub allow_camera: bool,
    pub allow_microphone: bool,
    pub allow_file_system: bool,
    pub allow_network: bool,
    pub allow_ipc: bool,
    pub allow_notifications: bool,
}

impl Default for SystemPolicies {
    fn default() -> Self {
        Self {
            allow_location: true,
            allow_camera: true,
            allow_microphone: true,
            allow_file_system: true,
            allow_network: true,
            allow_ipc: true,
            allow_notifications: true,
        }
    }
}

impl SystemPolicies {
    pub fn is_allowed(&self, category: PolicyCategory) -> bool {
        match category {
            PolicyCategory::Location => self.allow_location,
            PolicyCategory::Camera => self.allow_camera,
            PolicyCategory::Microphone => self.allow_microphone,
            PolicyCategory::FileSystem => self.allow_file_system,
            PolicyCategory::Network => self.allow_network,
            PolicyCategory::Ipc => self.allow_ipc,
            PolicyCategory::Notifications => self.allow_notifications,
        }
    }

    pub fn set_allowed(&mut self, category: PolicyCategory, allowed: bool) {
        match category {
            PolicyCategory::Location => self.allow_location = allowed,
            PolicyCategory::Camera => self.allow_camera = allowed,
            PolicyCategory::Microphone => self.allow_microphone = allowed,
            PolicyCategory::FileSystem => self.allow_file_system = allowed,
            PolicyCategory::Network => self.allow_network = allowed,
            PolicyCategory::Ipc => self.allow_ipc = allowed,
            PolicyCategory::Notifications => self.allow_notifications = allowed,
        }
    }

    /// Union of the permission bits of every disabled category.
    pub fn disallowed_mask(&self) -> Permission {
        let mut mask = Permission::empty();
        for category in PolicyCategory::ALL {
            if !self.is_allowed(*category) {
                mask |= category.permission_mask();
            }
        }
        mask
    }

    /// True iff no bit of `p` falls under a disabled category.
    pub fn is_globally_allowed(&self, p: Permission) -> bool {
        !p.intersects(self.disallowed_mask())
    }
}

struct PolicyInner {
    path: PathBuf,
    policies: parking_lot::RwLock<SystemPolicies>,
    write_lock: tokio::sync::Mutex<()>,
}

/// [`SystemPolicies`] mirrored to `system-policies.json`.
///
/// Same persistence contract as the permission store: load errors fall back
/// to defaults, writes are asynchronous full snapshots.
#[derive(Clone)]
pub struct PolicyStore {
    inner: Arc<PolicyInner>,
}

impl PolicyStore {
    pub fn load(path: PathBuf) -> Self {
        let policies = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Malformed policy store, using defaults"
                );
                SystemPolicies::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SystemPolicies::default(),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to read policy store, using defaults"
                );
                SystemPolicies::default()
            }
        };

        Self {
            inner: Arc::new(PolicyInner {
                path,
                policies: parking_lot::RwLock::new(policies),
                write_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn current(&self) -> SystemPolicies {
        self.inner.policies.read().clone()
    }

    pub fn is_allowed(&self, category: PolicyCategory) -> bool {
        self.inner.policies.read().is_allowed(category)
    }

    pub fn is_globally_allowed(&self, p: Permission) -> bool {
        self.inner.policies.read().is_globally_allowed(p)
    }

    /// Flip a category and persist. Returns the previous value.
    pub fn set_allowed(&self, category: PolicyCategory, allowed: bool) -> bool {
        let previous = {
            let mut policies = self.inner.policies.write();
            let previous = policies.is_allowed(category);
            policies.set_allowed(category, allowed);
            previous
        };
        self.schedule_save();
        previous
    }

    fn schedule_save(&self) {
        let inner = self.inner.clone();
        let snapshot = self.current();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _guard = inner.write_lock.lock().await;
                    if let Err(e) = write_snapshot(&inner.path, &snapshot).await {
                        tracing::warn!(
                            path = %inner.path.display(),
                            error = %e,
                            "Failed to persist system policies"
                        );
                    }
                });
            }
            Err(_) => {
                if let Err(e) = write_snapshot_sync(&inner.path, &snapshot) {
                    tracing::warn!(
                        path = %inner.path.display(),
                        error = %e,
                        "Failed to persist system policies"
                    );
                }
            }
        }
    }
}

async fn write_snapshot(path: &PathBuf, policies: &SystemPolicies) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(policies)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

fn write_snapshot_sync(path: &PathBuf, policies: &SystemPolicies) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(policies)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, path)
}
