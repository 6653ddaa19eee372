//! eStarter runtime core.
//!
//! This crate is the host-side kernel of a Metro-style launcher: it runs
//! third-party apps in isolated sandboxes (native process or WebAssembly)
//! and mediates every privileged operation through a capability-based
//! permission model. The launcher UI and installer front-end are external
//! consumers of [`AppRuntime`] and the kernel event stream.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

// Global guard for tracing-appender to keep the writer thread alive
static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

pub mod host;
pub mod installer;
pub mod kernel;
pub mod layout;
pub mod limits;
pub mod manifest;
pub mod permissions;
pub mod runtime;
pub mod vfs;

pub use estarter_shared::{
    ApiCommand, ApiRequest, ApiResponse, ApiStatus, EstarterError, EstarterResult, Permission,
    PermissionSet,
};
pub use host::{AppHost, HostState};
pub use kernel::{Kernel, KernelEvent, ProcessInfo, ProcessState};
pub use layout::{FilesystemLayout, RuntimeOptions};
pub use manifest::{AppManifest, AppRuntimeKind, SandboxPolicy};
pub use runtime::AppRuntime;
pub use vfs::{VirtualFileInfo, VirtualFs, VirtualPath, Zone};

/// Initialize tracing for the runtime using the provided layout.
///
/// Logs go to `<home>/logs/estarter.log` with daily rotation, filtered by
/// `RUST_LOG` (default `info`). Idempotent: subsequent calls return
/// immediately once initialized.
pub fn init_logging_for(layout: &FilesystemLayout) -> EstarterResult<()> {
    let logs_dir = layout.logs_dir();
    std::fs::create_dir_all(&logs_dir).map_err(|e| {
        EstarterError::Storage(format!(
            "Failed to create logs directory {}: {}",
            logs_dir.display(),
            e
        ))
    })?;

    let _ = LOG_GUARD.get_or_init(|| {
        let file_appender = tracing_appender::rolling::daily(logs_dir, "estarter.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("info"))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        // If a global subscriber is already set this fails; we ignore it
        // to avoid interfering with host-configured tracing.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(non_blocking)
            .with_ansi(false)
            .try_init();

        guard
    });

    Ok(())
}
