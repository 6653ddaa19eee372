//! Sandboxed, zoned virtual filesystem.
//!
//! Every hosted app sees the namespace `/{zone}/{appId}/...`; the VFS maps
//! it under a single root directory and refuses anything that would leave
//! the sandbox: foreign app paths, traversal shapes, writes into the
//! read-only `system` zone, and resolved paths escaping the root.

mod handlers;
mod locks;
mod path;

pub use handlers::register_fs_handlers;
pub use locks::PathLockMap;
pub use path::{VirtualPath, Zone};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use estarter_shared::{EstarterError, EstarterResult};

/// Outcome of one file operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResult {
    pub success: bool,
    pub error: Option<String>,
    pub bytes_affected: u64,
    kind: FileResultKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileResultKind {
    Ok,
    NotFound,
    Denied,
    ReadOnlyZone,
    Io,
}

impl FileResult {
    pub fn ok(bytes_affected: u64) -> Self {
        Self {
            success: true,
            error: None,
            bytes_affected,
            kind: FileResultKind::Ok,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            bytes_affected: 0,
            kind: FileResultKind::Io,
        }
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self {
            kind: FileResultKind::NotFound,
            ..Self::fail(error)
        }
    }

    pub fn denied() -> Self {
        Self {
            kind: FileResultKind::Denied,
            ..Self::fail("Access denied or invalid path")
        }
    }

    pub fn read_only_zone() -> Self {
        Self {
            kind: FileResultKind::ReadOnlyZone,
            ..Self::fail("System zone is read-only")
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == FileResultKind::NotFound
    }
}

/// Directory entry / file metadata as exposed to apps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualFileInfo {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch.
    pub modified_ticks: u64,
}

/// Aggregate storage usage of one app across its owned zones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUsage {
    pub app_data: u64,
    pub cache: u64,
    pub temp: u64,
}

impl StorageUsage {
    pub fn total(&self) -> u64 {
        self.app_data + self.cache + self.temp
    }
}

pub struct VirtualFs {
    root: PathBuf,
    locks: PathLockMap,
}

impl VirtualFs {
    /// Create the VFS rooted at `root`, pre-creating every zone directory.
    pub fn new(root: PathBuf) -> EstarterResult<Self> {
        std::fs::create_dir_all(&root).map_err(|e| {
            EstarterError::Storage(format!(
                "Failed to create VFS root {}: {}",
                root.display(),
                e
            ))
        })?;
        for zone in Zone::ALL {
            let dir = root.join(zone.as_str());
            std::fs::create_dir_all(&dir).map_err(|e| {
                EstarterError::Storage(format!(
                    "Failed to create zone directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        // Canonicalize once so containment checks are symlink-proof.
        let root = root.canonicalize().map_err(|e| {
            EstarterError::Storage(format!(
                "Failed to canonicalize VFS root {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(Self {
            root,
            locks: PathLockMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ========================================================================
    // RESOLUTION
    // ========================================================================

    /// Map a virtual path to its physical location on behalf of a caller.
    ///
    /// Fails for foreign paths and for anything whose canonical form
    /// escapes the VFS root.
    pub fn resolve(&self, vpath: &VirtualPath, caller_app_id: &str) -> EstarterResult<PathBuf> {
        if !vpath.belongs_to(caller_app_id) {
            return Err(EstarterError::Vfs(format!(
                "app {} may not access {}",
                caller_app_id, vpath
            )));
        }

        let physical = vpath.physical(&self.root);
        self.check_containment(&physical)?;
        Ok(physical)
    }

    /// Canonicalize the deepest existing ancestor and require it to stay
    /// under the root. Parsing already rejects traversal lexically; this
    /// catches symlinks planted inside the tree.
    fn check_containment(&self, physical: &Path) -> EstarterResult<()> {
        let mut probe = physical;
        let canonical = loop {
            match probe.canonicalize() {
                Ok(canonical) => break canonical,
                Err(_) => match probe.parent() {
                    Some(parent) => probe = parent,
                    None => {
                        return Err(EstarterError::Vfs(format!(
                            "path {} has no resolvable ancestor",
                            physical.display()
                        )))
                    }
                },
            }
        };

        if !canonical.starts_with(&self.root) {
            return Err(EstarterError::Vfs(format!(
                "path {} escapes the VFS root",
                physical.display()
            )));
        }
        Ok(())
    }

    fn resolve_or_denied(&self, vpath: &VirtualPath, caller: &str) -> Result<PathBuf, FileResult> {
        self.resolve(vpath, caller).map_err(|e| {
            tracing::debug!(path = %vpath, caller = %caller, error = %e, "VFS access refused");
            FileResult::denied()
        })
    }

    // ========================================================================
    // FILE OPERATIONS
    // ========================================================================

    pub async fn read_file(
        &self,
        vpath: &VirtualPath,
        caller: &str,
    ) -> (FileResult, Option<Vec<u8>>) {
        let physical = match self.resolve_or_denied(vpath, caller) {
            Ok(p) => p,
            Err(result) => return (result, None),
        };

        let lock = self.locks.lock_for(&physical);
        let _guard = lock.lock().await;

        match tokio::fs::read(&physical).await {
            Ok(bytes) => {
                let len = bytes.len() as u64;
                (FileResult::ok(len), Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                (FileResult::not_found(format!("File not found: {}", vpath)), None)
            }
            Err(e) => (FileResult::fail(format!("Read failed: {}", e)), None),
        }
    }

    pub async fn read_text(
        &self,
        vpath: &VirtualPath,
        caller: &str,
    ) -> (FileResult, Option<String>) {
        let (result, bytes) = self.read_file(vpath, caller).await;
        match bytes {
            Some(bytes) => match String::from_utf8(bytes) {
                Ok(text) => (result, Some(text)),
                Err(_) => (
                    FileResult::fail(format!("File is not valid UTF-8: {}", vpath)),
                    None,
                ),
            },
            None => (result, None),
        }
    }

    /// Write bytes, creating missing parent directories.
    pub async fn write_file(&self, vpath: &VirtualPath, caller: &str, data: &[u8]) -> FileResult {
        if vpath.zone().is_read_only() {
            return FileResult::read_only_zone();
        }
        let physical = match self.resolve_or_denied(vpath, caller) {
            Ok(p) => p,
            Err(result) => return result,
        };

        let lock = self.locks.lock_for(&physical);
        let _guard = lock.lock().await;

        if let Some(parent) = physical.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return FileResult::fail(format!("Failed to create parent directory: {}", e));
            }
        }

        match tokio::fs::write(&physical, data).await {
            Ok(()) => FileResult::ok(data.len() as u64),
            Err(e) => FileResult::fail(format!("Write failed: {}", e)),
        }
    }

    pub async fn write_text(&self, vpath: &VirtualPath, caller: &str, text: &str) -> FileResult {
        self.write_file(vpath, caller, text.as_bytes()).await
    }

    pub async fn delete_file(&self, vpath: &VirtualPath, caller: &str) -> FileResult {
        if vpath.zone().is_read_only() {
            return FileResult::read_only_zone();
        }
        let physical = match self.resolve_or_denied(vpath, caller) {
            Ok(p) => p,
            Err(result) => return result,
        };

        let lock = self.locks.lock_for(&physical);
        let _guard = lock.lock().await;

        let size = tokio::fs::metadata(&physical)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        match tokio::fs::remove_file(&physical).await {
            Ok(()) => FileResult::ok(size),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                FileResult::not_found(format!("File not found: {}", vpath))
            }
            Err(e) => FileResult::fail(format!("Delete failed: {}", e)),
        }
    }

    /// Existence check; never reports why a path is inaccessible.
    pub async fn file_exists(&self, vpath: &VirtualPath, caller: &str) -> (FileResult, bool) {
        let physical = match self.resolve_or_denied(vpath, caller) {
            Ok(p) => p,
            Err(result) => return (result, false),
        };
        let exists = tokio::fs::try_exists(&physical).await.unwrap_or(false);
        (FileResult::ok(0), exists)
    }

    /// Metadata query; lock-free by design.
    pub async fn get_file_info(
        &self,
        vpath: &VirtualPath,
        caller: &str,
    ) -> (FileResult, Option<VirtualFileInfo>) {
        let physical = match self.resolve_or_denied(vpath, caller) {
            Ok(p) => p,
            Err(result) => return (result, None),
        };

        match tokio::fs::metadata(&physical).await {
            Ok(meta) => {
                let info = VirtualFileInfo {
                    name: vpath.file_name().to_string(),
                    path: vpath.to_string(),
                    is_directory: meta.is_dir(),
                    size: if meta.is_dir() { 0 } else { meta.len() },
                    modified_ticks: modified_ticks(&meta),
                };
                (FileResult::ok(0), Some(info))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                (FileResult::not_found(format!("Not found: {}", vpath)), None)
            }
            Err(e) => (FileResult::fail(format!("Stat failed: {}", e)), None),
        }
    }

    pub async fn create_directory(&self, vpath: &VirtualPath, caller: &str) -> FileResult {
        if vpath.zone().is_read_only() {
            return FileResult::read_only_zone();
        }
        let physical = match self.resolve_or_denied(vpath, caller) {
            Ok(p) => p,
            Err(result) => return result,
        };
        match tokio::fs::create_dir_all(&physical).await {
            Ok(()) => FileResult::ok(0),
            Err(e) => FileResult::fail(format!("Failed to create directory: {}", e)),
        }
    }

    /// Directory listing; lock-free, observes any consistent snapshot.
    pub async fn list_directory(
        &self,
        vpath: &VirtualPath,
        caller: &str,
    ) -> (FileResult, Vec<VirtualFileInfo>) {
        let physical = match self.resolve_or_denied(vpath, caller) {
            Ok(p) => p,
            Err(result) => return (result, Vec::new()),
        };

        let mut reader = match tokio::fs::read_dir(&physical).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return (
                    FileResult::not_found(format!("Directory not found: {}", vpath)),
                    Vec::new(),
                )
            }
            Err(e) => return (FileResult::fail(format!("List failed: {}", e)), Vec::new()),
        };

        let mut entries = Vec::new();
        while let Ok(Some(entry)) = reader.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            entries.push(VirtualFileInfo {
                path: format!("{}/{}", vpath, name),
                is_directory: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
                modified_ticks: modified_ticks(&meta),
                name,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        (FileResult::ok(entries.len() as u64), entries)
    }

    pub async fn delete_directory(
        &self,
        vpath: &VirtualPath,
        caller: &str,
        recursive: bool,
    ) -> FileResult {
        if vpath.zone().is_read_only() {
            return FileResult::read_only_zone();
        }
        let physical = match self.resolve_or_denied(vpath, caller) {
            Ok(p) => p,
            Err(result) => return result,
        };

        let lock = self.locks.lock_for(&physical);
        let _guard = lock.lock().await;

        let freed = if recursive { dir_size(&physical) } else { 0 };
        let outcome = if recursive {
            tokio::fs::remove_dir_all(&physical).await
        } else {
            tokio::fs::remove_dir(&physical).await
        };
        match outcome {
            Ok(()) => FileResult::ok(freed),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                FileResult::not_found(format!("Directory not found: {}", vpath))
            }
            Err(e) => FileResult::fail(format!("Delete failed: {}", e)),
        }
    }

    // ========================================================================
    // SANDBOX LIFECYCLE
    // ========================================================================

    /// Pre-create the app-owned zone directories for a launch.
    pub fn initialize_app_sandbox(&self, app_id: &str) -> EstarterResult<()> {
        let app_id = sanitize_app_id(app_id)?;
        for zone in [Zone::AppData, Zone::Cache, Zone::Temp] {
            let dir = self.zone_dir(zone, app_id);
            std::fs::create_dir_all(&dir).map_err(|e| {
                EstarterError::Storage(format!(
                    "Failed to create sandbox directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        tracing::debug!(app_id = %app_id, "App sandbox initialized");
        Ok(())
    }

    /// Best-effort recursive delete of the cache zone contents. Returns
    /// bytes freed.
    pub fn clear_app_cache(&self, app_id: &str) -> EstarterResult<u64> {
        self.clear_zone(Zone::Cache, app_id)
    }

    /// Best-effort recursive delete of the temp zone contents. Returns
    /// bytes freed.
    pub fn clear_app_temp(&self, app_id: &str) -> EstarterResult<u64> {
        self.clear_zone(Zone::Temp, app_id)
    }

    fn clear_zone(&self, zone: Zone, app_id: &str) -> EstarterResult<u64> {
        let app_id = sanitize_app_id(app_id)?;
        let dir = self.zone_dir(zone, app_id);
        if !dir.exists() {
            return Ok(0);
        }

        let mut freed = 0u64;
        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    freed += dir_size(&path);
                    let _ = std::fs::remove_dir_all(&path);
                } else {
                    freed += entry.metadata().map(|m| m.len()).unwrap_or(0);
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        Ok(freed)
    }

    /// Remove all three app-owned zones. Never touches `shared` or
    /// `system`. Returns aggregated bytes freed.
    pub fn delete_app_data(&self, app_id: &str) -> EstarterResult<u64> {
        let app_id = sanitize_app_id(app_id)?;
        let mut freed = 0u64;
        for zone in [Zone::AppData, Zone::Cache, Zone::Temp] {
            let dir = self.zone_dir(zone, app_id);
            if dir.exists() {
                freed += dir_size(&dir);
                std::fs::remove_dir_all(&dir).map_err(|e| {
                    EstarterError::Storage(format!(
                        "Failed to remove {}: {}",
                        dir.display(),
                        e
                    ))
                })?;
            }
        }
        tracing::info!(app_id = %app_id, bytes = freed, "App data deleted");
        Ok(freed)
    }

    pub fn app_storage_usage(&self, app_id: &str) -> EstarterResult<StorageUsage> {
        let app_id = sanitize_app_id(app_id)?;
        Ok(StorageUsage {
            app_data: dir_size(&self.zone_dir(Zone::AppData, app_id)),
            cache: dir_size(&self.zone_dir(Zone::Cache, app_id)),
            temp: dir_size(&self.zone_dir(Zone::Temp, app_id)),
        })
    }

    fn zone_dir(&self, zone: Zone, app_id: &str) -> PathBuf {
        self.root.join(zone.as_str()).join(app_id)
    }
}

/// App ids become path components; refuse anything that could traverse.
fn sanitize_app_id(app_id: &str) -> EstarterResult<&str> {
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
    Ok(app_id)
}

fn modified_ticks(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Recursive size of a directory tree; 0 for a missing path.
fn dir_size(dir: &Path) -> u64 {
    if !dir.exists() {
        return 0;
    }
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn vfs() -> (VirtualFs, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let vfs = VirtualFs::new(dir.path().join("vfs")).unwrap();
        (vfs, dir)
    }

    fn vpath(raw: &str) -> VirtualPath {
        VirtualPath::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let (vfs, _dir) = vfs();
        let path = vpath("/appdata/app.a/docs/notes.txt");

        let result = vfs.write_file(&path, "app.a", b"hello vfs").await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.bytes_affected, 9);

        let (result, data) = vfs.read_file(&path, "app.a").await;
        assert!(result.success);
        assert_eq!(data.unwrap(), b"hello vfs");
    }

    #[tokio::test]
    async fn test_cross_app_isolation() {
        let (vfs, _dir) = vfs();
        let path = vpath("/appdata/app.d/x.txt");
        vfs.write_file(&path, "app.d", b"secret").await;

        // Foreign read fails identically whether or not the file exists.
        let (result, data) = vfs.read_file(&path, "app.c").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Access denied or invalid path"));
        assert!(data.is_none());

        let (result, _) = vfs.read_file(&vpath("/appdata/app.x/ghost.txt"), "app.c").await;
        assert_eq!(result.error.as_deref(), Some("Access denied or invalid path"));
    }

    #[tokio::test]
    async fn test_shared_zone_is_cross_app() {
        let (vfs, _dir) = vfs();
        let path = vpath("/shared/app.a/board.txt");
        assert!(vfs.write_file(&path, "app.a", b"posted").await.success);

        let (result, data) = vfs.read_file(&path, "app.b").await;
        assert!(result.success);
        assert_eq!(data.unwrap(), b"posted");
    }

    #[tokio::test]
    async fn test_system_zone_read_only() {
        let (vfs, _dir) = vfs();
        let path = vpath("/system/app.a/config.txt");

        let result = vfs.write_file(&path, "app.a", b"nope").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("System zone is read-only"));

        assert!(!vfs.delete_file(&path, "app.a").await.success);
        assert!(!vfs.create_directory(&path, "app.a").await.success);
        assert!(!vfs.delete_directory(&path, "app.a", true).await.success);

        // Reads from system are allowed (file just doesn't exist here).
        let (result, _) = vfs.read_file(&path, "app.a").await;
        assert!(result.is_not_found());
    }

    #[tokio::test]
    async fn test_write_creates_parents() {
        let (vfs, _dir) = vfs();
        let path = vpath("/appdata/app.a/deep/er/still/file.bin");
        assert!(vfs.write_file(&path, "app.a", &[1, 2, 3]).await.success);

        let (_, exists) = vfs.file_exists(&path, "app.a").await;
        assert!(exists);
    }

    #[tokio::test]
    async fn test_delete_file_reports_freed_bytes() {
        let (vfs, _dir) = vfs();
        let path = vpath("/appdata/app.a/x.bin");
        vfs.write_file(&path, "app.a", &[0u8; 128]).await;

        let result = vfs.delete_file(&path, "app.a").await;
        assert!(result.success);
        assert_eq!(result.bytes_affected, 128);

        let result = vfs.delete_file(&path, "app.a").await;
        assert!(result.is_not_found());
    }

    #[tokio::test]
    async fn test_list_directory_and_info() {
        let (vfs, _dir) = vfs();
        vfs.write_file(&vpath("/appdata/app.a/d/a.txt"), "app.a", b"aa")
            .await;
        vfs.write_file(&vpath("/appdata/app.a/d/b.txt"), "app.a", b"bbb")
            .await;
        vfs.create_directory(&vpath("/appdata/app.a/d/sub"), "app.a")
            .await;

        let (result, entries) = vfs.list_directory(&vpath("/appdata/app.a/d"), "app.a").await;
        assert!(result.success);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "a.txt");
        assert!(!entries[0].is_directory);
        assert_eq!(entries[1].size, 3);
        assert!(entries[2].is_directory);

        let (result, info) = vfs
            .get_file_info(&vpath("/appdata/app.a/d/b.txt"), "app.a")
            .await;
        assert!(result.success);
        let info = info.unwrap();
        assert_eq!(info.name, "b.txt");
        assert_eq!(info.size, 3);
        assert!(info.modified_ticks > 0);
    }

    #[tokio::test]
    async fn test_delete_directory_nonrecursive_requires_empty() {
        let (vfs, _dir) = vfs();
        vfs.write_file(&vpath("/appdata/app.a/d/f.txt"), "app.a", b"x")
            .await;

        assert!(!vfs
            .delete_directory(&vpath("/appdata/app.a/d"), "app.a", false)
            .await
            .success);

        let result = vfs
            .delete_directory(&vpath("/appdata/app.a/d"), "app.a", true)
            .await;
        assert!(result.success);
        assert_eq!(result.bytes_affected, 1);
    }

    #[tokio::test]
    async fn test_sandbox_lifecycle_and_usage() {
        let (vfs, _dir) = vfs();
        vfs.initialize_app_sandbox("app.a").unwrap();
        assert!(vfs.root().join("appdata/app.a").is_dir());
        assert!(vfs.root().join("cache/app.a").is_dir());
        assert!(vfs.root().join("temp/app.a").is_dir());

        vfs.write_file(&vpath("/appdata/app.a/f"), "app.a", &[0u8; 10])
            .await;
        vfs.write_file(&vpath("/cache/app.a/c"), "app.a", &[0u8; 20])
            .await;
        vfs.write_file(&vpath("/temp/app.a/t"), "app.a", &[0u8; 30])
            .await;

        let usage = vfs.app_storage_usage("app.a").unwrap();
        assert_eq!(usage.app_data, 10);
        assert_eq!(usage.cache, 20);
        assert_eq!(usage.temp, 30);
        assert_eq!(usage.total(), 60);

        assert_eq!(vfs.clear_app_cache("app.a").unwrap(), 20);
        assert_eq!(vfs.app_storage_usage("app.a").unwrap().cache, 0);

        // Shared data survives app-data deletion.
        vfs.write_file(&vpath("/shared/app.a/s"), "app.a", &[0u8; 5])
            .await;
        let freed = vfs.delete_app_data("app.a").unwrap();
        assert_eq!(freed, 40);
        let (_, exists) = vfs.file_exists(&vpath("/shared/app.a/s"), "app.b").await;
        assert!(exists);
    }

    #[tokio::test]
    async fn test_bad_app_ids_rejected() {
        let (vfs, _dir) = vfs();
        assert!(vfs.initialize_app_sandbox("../evil").is_err());
        assert!(vfs.initialize_app_sandbox(".hidden").is_err());
        assert!(vfs.initialize_app_sandbox("a/b").is_err());
        assert!(vfs.app_storage_usage("").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_is_caught() {
        let (vfs, dir) = vfs();
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("loot.txt"), b"loot").unwrap();

        // Plant a symlink inside the app's sandbox pointing outside.
        let app_dir = vfs.root().join("appdata/app.a");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::os::unix::fs::symlink(&outside, app_dir.join("link")).unwrap();

        let (result, data) = vfs
            .read_file(&vpath("/appdata/app.a/link/loot.txt"), "app.a")
            .await;
        assert!(!result.success);
        assert!(data.is_none());
    }
}
