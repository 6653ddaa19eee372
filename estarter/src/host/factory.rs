//! Host selection from the app manifest.

use std::sync::Arc;

use crate::host::{AppHost, ProcessHost, WasmHost};
use crate::kernel::Kernel;
use crate::layout::FilesystemLayout;
use crate::manifest::{AppManifest, AppRuntimeKind};
use estarter_shared::{EstarterError, EstarterResult};

/// Build the host variant the manifest asks for.
///
/// The entry path comes from `entry` with a legacy `exePath` fallback;
/// unknown or unimplemented runtimes are refused as unsupported.
pub fn create_host(
    kernel: Arc<Kernel>,
    layout: &FilesystemLayout,
    manifest: &AppManifest,
) -> EstarterResult<AppHost> {
    let app_dir = layout.app_dir(&manifest.id);
    let entry = manifest.entry_path(&app_dir)?;
    let policy = manifest.sandbox_policy();
    let requested = manifest.requested_permissions();

    match manifest.runtime {
        AppRuntimeKind::Native => Ok(AppHost::Process(Arc::new(ProcessHost::new(
            kernel,
            manifest.id.clone(),
            manifest.version.clone(),
            app_dir,
            entry,
            manifest.arguments.clone(),
            requested,
            policy,
        )))),
        AppRuntimeKind::Wasm => Ok(AppHost::Wasm(Arc::new(WasmHost::new(
            kernel,
            manifest.id.clone(),
            manifest.version.clone(),
            entry,
            requested,
            policy,
        )))),
        AppRuntimeKind::Dotnet => Err(EstarterError::NotSupported(format!(
            "runtime {} is not implemented",
            manifest.runtime
        ))),
    }
}
