//! The owning façade over the runtime core.
//!
//! An [`AppRuntime`] wires the layout, kernel, VFS, and permission stores
//! together, tracks live app hosts, and exposes the launch / stop /
//! install surface the launcher UI consumes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::host::{create_host, AppHost};
use crate::installer;
use crate::kernel::{Kernel, KernelEvent};
use crate::layout::{FilesystemLayout, RuntimeOptions};
use crate::manifest::AppManifest;
use crate::permissions::{PermissionManager, PermissionStore, PolicyStore};
use crate::vfs::VirtualFs;
use estarter_shared::{EstarterError, EstarterResult};

/// Main entry point for embedding the runtime core.
///
/// Cheaply cloneable; all clones share the same state.
#[derive(Clone)]
pub struct AppRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    layout: FilesystemLayout,
    kernel: Arc<Kernel>,
    hosts: parking_lot::Mutex<HashMap<String, AppHost>>,
}

impl AppRuntime {
    /// Construct the runtime. All setup (directories, logging, stores,
    /// kernel) completes before this returns.
    pub fn new(options: RuntimeOptions) -> EstarterResult<Self> {
        if !options.home_dir.is_absolute() {
            return Err(EstarterError::Config(format!(
                "home_dir must be an absolute path, got: {}",
                options.home_dir.display()
            )));
        }

        let layout = FilesystemLayout::new(options.home_dir);
        layout.prepare()?;
        crate::init_logging_for(&layout)?;

        let permissions = PermissionManager::new(PermissionStore::load(layout.permissions_path()));
        let policies = PolicyStore::load(layout.policies_path());
        let vfs = Arc::new(VirtualFs::new(layout.vfs_root())?);
        let kernel = Kernel::new(permissions, policies, vfs);

        tracing::debug!(home = %layout.home_dir().display(), "Runtime initialized");

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                layout,
                kernel,
                hosts: parking_lot::Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn with_defaults() -> EstarterResult<Self> {
        Self::new(RuntimeOptions::default())
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.inner.kernel
    }

    pub fn layout(&self) -> &FilesystemLayout {
        &self.inner.layout
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<KernelEvent> {
        self.inner.kernel.events().subscribe()
    }

    // ========================================================================
    // INSTALLATION
    // ========================================================================

    /// Install a ZIP package into the apps directory.
    pub fn install(&self, package_path: &Path) -> EstarterResult<AppManifest> {
        installer::install_package(&self.inner.layout, package_path)
    }

    /// Remove an installed app: its directory, VFS data, and persisted
    /// permission grants. A running instance is stopped first.
    pub async fn uninstall(&self, app_id: &str) -> EstarterResult<()> {
        if let Some(host) = self.live_host(app_id) {
            host.dispose().await;
            self.inner.hosts.lock().remove(app_id);
        }

        installer::remove_app_dir(&self.inner.layout, app_id)?;
        self.inner.kernel.vfs().delete_app_data(app_id)?;
        self.inner.kernel.permissions().store().remove_app(app_id);
        tracing::info!(app_id = %app_id, "App uninstalled");
        Ok(())
    }

    pub fn installed_apps(&self) -> Vec<AppManifest> {
        installer::installed_apps(&self.inner.layout)
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Launch an installed app.
    ///
    /// Loads the manifest, prepares the VFS sandbox, builds the matching
    /// host, and starts it. Launch failures surface as a user-facing
    /// notification event; the kernel stays healthy.
    pub async fn launch(&self, app_id: &str) -> EstarterResult<AppHost> {
        if self.live_host(app_id).is_some() {
            return Err(EstarterError::InvalidState(format!(
                "app {} is already running",
                app_id
            )));
        }

        let result = self.try_launch(app_id).await;
        if let Err(e) = &result {
            tracing::warn!(app_id = %app_id, error = %e, "Launch failed");
            self.inner.kernel.events().emit(KernelEvent::Notification {
                app_id: app_id.to_string(),
                title: "Launch failed".to_string(),
                message: e.to_string(),
            });
        }
        result
    }

    async fn try_launch(&self, app_id: &str) -> EstarterResult<AppHost> {
        let manifest = AppManifest::load(&self.inner.layout.app_dir(app_id))?;
        if manifest.id != app_id {
            return Err(EstarterError::Config(format!(
                "manifest id '{}' does not match app directory '{}'",
                manifest.id, app_id
            )));
        }

        self.inner.kernel.vfs().initialize_app_sandbox(app_id)?;

        let host = create_host(self.inner.kernel.clone(), &self.inner.layout, &manifest)?;
        host.start().await?;

        let mut hosts = self.inner.hosts.lock();
        hosts.retain(|_, h| !h.state().is_terminal());
        hosts.insert(app_id.to_string(), host.clone());
        Ok(host)
    }

    /// Stop a running app.
    pub async fn stop_app(&self, app_id: &str) -> EstarterResult<()> {
        let host = self
            .live_host(app_id)
            .ok_or_else(|| EstarterError::NotFound(format!("app {} is not running", app_id)))?;
        host.stop().await?;
        self.inner.hosts.lock().remove(app_id);
        Ok(())
    }

    /// App ids with a live (non-terminal) host.
    pub fn running_apps(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .inner
            .hosts
            .lock()
            .iter()
            .filter(|(_, host)| !host.state().is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Stop every running app. Idempotent.
    pub async fn shutdown(&self) {
        let hosts: Vec<AppHost> = self.inner.hosts.lock().values().cloned().collect();
        for host in hosts {
            host.dispose().await;
        }
        self.inner.hosts.lock().clear();
        tracing::info!("Runtime shut down");
    }

    fn live_host(&self, app_id: &str) -> Option<AppHost> {
        self.inner
            .hosts
            .lock()
            .get(app_id)
            .filter(|host| !host.state().is_terminal())
            .cloned()
    }
}
