//! Filesystem layout for everything the runtime persists.
//!
//! All state lives under a single home directory, by default the platform
//! local-data dir plus `eStarter`.

use std::path::{Path, PathBuf};

use estarter_shared::{EstarterError, EstarterResult};

/// Options for constructing an [`crate::runtime::AppRuntime`].
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Root directory for all persisted state. Must be absolute.
    pub home_dir: PathBuf,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            home_dir: base.join("eStarter"),
        }
    }
}

/// Maps the home directory onto every persistent path the runtime uses.
///
/// Immutable after construction.
#[derive(Debug, Clone)]
pub struct FilesystemLayout {
    home_dir: PathBuf,
}

impl FilesystemLayout {
    pub fn new(home_dir: PathBuf) -> Self {
        Self { home_dir }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    /// Serialized permission grants, one entry per app.
    pub fn permissions_path(&self) -> PathBuf {
        self.home_dir.join("permissions.json")
    }

    /// Global permission policies.
    pub fn policies_path(&self) -> PathBuf {
        self.home_dir.join("system-policies.json")
    }

    /// Root of the zoned virtual filesystem.
    pub fn vfs_root(&self) -> PathBuf {
        self.home_dir.join("vfs")
    }

    /// Installed apps, one directory per app id.
    pub fn apps_dir(&self) -> PathBuf {
        self.home_dir.join("apps")
    }

    pub fn app_dir(&self, app_id: &str) -> PathBuf {
        self.apps_dir().join(app_id)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join("logs")
    }

    /// Create the directory tree. Called once during runtime construction.
    pub fn prepare(&self) -> EstarterResult<()> {
        for dir in [
            self.home_dir.clone(),
            self.vfs_root(),
            self.apps_dir(),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                EstarterError::Storage(format!(
                    "Failed to create directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}
