//! Per-app manifest model.
//!
//! Every installed app carries a `manifest.json` at its root. The manifest
//! is the single source for the app's identity, entry point, requested
//! permissions, and sandbox envelope.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use estarter_shared::{EstarterError, EstarterResult, Permission};

/// Which host variant runs the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppRuntimeKind {
    Native,
    Wasm,
    Dotnet,
}

impl Default for AppRuntimeKind {
    fn default() -> Self {
        AppRuntimeKind::Native
    }
}

impl std::fmt::Display for AppRuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AppRuntimeKind::Native => "Native",
            AppRuntimeKind::Wasm => "Wasm",
            AppRuntimeKind::Dotnet => "Dotnet",
        };
        write!(f, "{}", name)
    }
}

/// Parsed `manifest.json`.
///
/// `id` is mandatory; everything else has a default. Unknown permission
/// names are ignored and names resolve case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppManifest {
    pub id: String,

    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Preferred entry file, relative to the app directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    /// Legacy alias for `entry`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exe_path: Option<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub background: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_size: Option<String>,

    #[serde(default)]
    pub permissions: Vec<String>,

    #[serde(default = "default_min_api_version")]
    pub min_api_version: u32,
    #[serde(default = "default_sandboxed")]
    pub sandboxed: bool,
    #[serde(default)]
    pub runtime: AppRuntimeKind,

    #[serde(default)]
    pub memory_limit_mb: u64,
    #[serde(default)]
    pub max_processes: u32,
    /// CPU quota in percent, 0–100; 0 means unlimited.
    #[serde(default)]
    pub cpu_quota: u32,
    #[serde(default)]
    pub network_allowed: bool,
    #[serde(default)]
    pub max_runtime_seconds: u64,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_min_api_version() -> u32 {
    1
}

fn default_sandboxed() -> bool {
    true
}

impl AppManifest {
    /// Parse a manifest from JSON bytes, validating mandatory fields.
    pub fn parse(bytes: &[u8]) -> EstarterResult<Self> {
        let mut manifest: AppManifest = serde_json::from_slice(bytes)
            .map_err(|e| EstarterError::Config(format!("invalid manifest: {}", e)))?;
        if manifest.id.trim().is_empty() {
            return Err(EstarterError::Config(
                "manifest is missing the mandatory 'id' field".to_string(),
            ));
        }
        if manifest.name.is_empty() {
            manifest.name = manifest.id.clone();
        }
        if manifest.cpu_quota > 100 {
            return Err(EstarterError::Config(format!(
                "cpuQuota must be 0-100, got {}",
                manifest.cpu_quota
            )));
        }
        Ok(manifest)
    }

    /// Load and parse `manifest.json` from an app directory.
    pub fn load(app_dir: &Path) -> EstarterResult<Self> {
        let path = app_dir.join("manifest.json");
        let bytes = std::fs::read(&path).map_err(|e| {
            EstarterError::NotFound(format!("manifest at {}: {}", path.display(), e))
        })?;
        Self::parse(&bytes)
    }

    /// Permission mask the app requests at launch. Unknown names are
    /// ignored; Admin/Kernel are stripped later by the kernel.
    pub fn requested_permissions(&self) -> Permission {
        let mut mask = Permission::empty();
        for name in &self.permissions {
            match Permission::from_name(name) {
                Some(p) => mask |= p,
                None => {
                    tracing::debug!(permission = %name, app_id = %self.id, "Ignoring unknown permission name");
                }
            }
        }
        mask
    }

    /// Entry path relative to the app directory: `entry`, falling back to
    /// the legacy `exePath`.
    pub fn entry_path(&self, app_dir: &Path) -> EstarterResult<PathBuf> {
        let rel = self
            .entry
            .as_deref()
            .or(self.exe_path.as_deref())
            .ok_or_else(|| {
                EstarterError::Config(format!("app {} declares no entry point", self.id))
            })?;
        Ok(app_dir.join(rel))
    }

    /// The per-launch sandbox envelope this manifest describes.
    pub fn sandbox_policy(&self) -> SandboxPolicy {
        SandboxPolicy {
            memory_limit_bytes: self.memory_limit_mb * 1024 * 1024,
            max_processes: self.max_processes,
            cpu_quota_percent: self.cpu_quota,
            network_allowed: self.network_allowed,
            max_runtime: if self.max_runtime_seconds == 0 {
                None
            } else {
                Some(Duration::from_secs(self.max_runtime_seconds))
            },
            runtime: self.runtime,
        }
    }
}

/// Immutable per-launch limits derived from the manifest.
///
/// A zero value for any numeric limit means "unlimited".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPolicy {
    pub memory_limit_bytes: u64,
    pub max_processes: u32,
    pub cpu_quota_percent: u32,
    pub network_allowed: bool,
    pub max_runtime: Option<Duration>,
    pub runtime: AppRuntimeKind,
}

impl SandboxPolicy {
    /// True when no OS-level limit is requested at all.
    pub fn is_unlimited(&self) -> bool {
        self.memory_limit_bytes == 0 && self.max_processes == 0 && self.cpu_quota_percent == 0
    }
}
