//! Package installation.
//!
//! A package is a ZIP archive whose root holds `manifest.json` and the
//! entry file(s). Installing extracts it into `<apps>/<id>/` with
//! overwrite; entries that would escape the target directory abort the
//! install.

use std::io::Read;
use std::path::Path;

use crate::layout::FilesystemLayout;
use crate::manifest::AppManifest;
use estarter_shared::{EstarterError, EstarterResult};

/// Install a package archive, returning its parsed manifest.
pub fn install_package(
    layout: &FilesystemLayout,
    package_path: &Path,
) -> EstarterResult<AppManifest> {
    let file = std::fs::File::open(package_path).map_err(|e| {
        EstarterError::NotFound(format!("package {}: {}", package_path.display(), e))
    })?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| EstarterError::Storage(format!("not a valid package archive: {}", e)))?;

    let manifest = {
        let mut entry = archive.by_name("manifest.json").map_err(|_| {
            EstarterError::Config("package has no manifest.json at its root".to_string())
        })?;
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| EstarterError::Storage(format!("failed to read manifest: {}", e)))?;
        AppManifest::parse(&bytes)?
    };

    validate_app_id(&manifest.id)?;
    let target = layout.app_dir(&manifest.id);
    std::fs::create_dir_all(&target).map_err(|e| {
        EstarterError::Storage(format!(
            "failed to create app directory {}: {}",
            target.display(),
            e
        ))
    })?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| EstarterError::Storage(format!("corrupt package entry: {}", e)))?;

        let relative = entry.enclosed_name().map(|p| p.to_path_buf()).ok_or_else(|| {
            EstarterError::Storage(format!(
                "package entry '{}' escapes the app directory",
                entry.name()
            ))
        })?;
        let out_path = target.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| {
                EstarterError::Storage(format!(
                    "failed to create {}: {}",
                    out_path.display(),
                    e
                ))
            })?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EstarterError::Storage(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
        let mut out = std::fs::File::create(&out_path).map_err(|e| {
            EstarterError::Storage(format!("failed to create {}: {}", out_path.display(), e))
        })?;
        std::io::copy(&mut entry, &mut out).map_err(|e| {
            EstarterError::Storage(format!("failed to extract {}: {}", out_path.display(), e))
        })?;
    }

    tracing::info!(
        app_id = %manifest.id,
        package = %package_path.display(),
        "Package installed"
    );
    Ok(manifest)
}

/// Remove an installed app's directory.
pub fn remove_app_dir(layout: &FilesystemLayout, app_id: &str) -> EstarterResult<()> {
    validate_app_id(app_id)?;
    let dir = layout.app_dir(app_id);
    if dir.exists() {
        std::fs::remove_dir_all(&dir).map_err(|e| {
            EstarterError::Storage(format!("failed to remove {}: {}", dir.display(), e))
        })?;
    }
    Ok(())
}

/// Enumerate installed apps by their manifests. Unreadable manifests are
/// logged and skipped.
pub fn installed_apps(layout: &FilesystemLayout) -> Vec<AppManifest> {
    let mut apps = Vec::new();
    let entries = match std::fs::read_dir(layout.apps_dir()) {
        Ok(entries) => entries,
        Err(_) => return apps,
    };

    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        match AppManifest::load(&dir) {
            Ok(manifest) => apps.push(manifest),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Skipping unreadable app");
            }
        }
    }

    apps.sort_by(|a, b| a.id.cmp(&b.id));
    apps
}

/// App ids become directory names; refuse anything that could traverse.
fn validate_app_id(app_id: &str) -> EstarterResult<()> {
    if app_id.is_empty()
        || app_id.starts_with('.')
        || app_id.contains('/')
        || app_id.contains('\\')
    {
        return Err(EstarterError::InvalidArgument(format!(
            "invalid app id '{}'",
            app_id
        )));
    }
    Ok(())
}
