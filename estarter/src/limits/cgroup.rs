//! Cgroup v2 resource limiting for native app processes (Linux).
//!
//! Limits are enforced by the kernel and cannot be bypassed from
//! userspace. Supports both root and rootless operation: as root the
//! cgroups live under `/sys/fs/cgroup/estarter/`, rootless under the
//! user's systemd service scope.
//!
//! Per-app structure:
//!
//! ```text
//! {cgroup_base}/estarter/{app_id}/
//!     ├── memory.max      # memory ceiling in bytes
//!     ├── pids.max        # max processes
//!     ├── cpu.max         # "quota_us period_us"
//!     └── cgroup.procs    # the app's pid goes here
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use estarter_shared::{EstarterError, EstarterResult};

use crate::manifest::SandboxPolicy;

const CGROUP_ROOT: &str = "/sys/fs/cgroup";
const ESTARTER_CGROUP: &str = "estarter";

/// CPU bandwidth period; the quota is derived from the policy's percent.
const CPU_PERIOD_US: u64 = 100_000;

fn is_root() -> bool {
    unsafe { libc::getuid() == 0 }
}

/// User's systemd cgroup base for rootless operation.
fn get_user_cgroup_base() -> Option<PathBuf> {
    let uid = unsafe { libc::getuid() };
    let path = PathBuf::from(format!(
        "/sys/fs/cgroup/user.slice/user-{}.slice/user@{}.service",
        uid, uid
    ));
    if path.exists() { Some(path) } else { None }
}

fn get_cgroup_base() -> PathBuf {
    if is_root() {
        PathBuf::from(CGROUP_ROOT)
    } else {
        get_user_cgroup_base().unwrap_or_else(|| PathBuf::from(CGROUP_ROOT))
    }
}

/// Check for a mounted cgroup v2 unified hierarchy.
pub fn is_cgroup_v2_available() -> bool {
    Path::new(CGROUP_ROOT).join("cgroup.controllers").exists()
}

pub fn cgroup_path(app_id: &str) -> PathBuf {
    get_cgroup_base().join(ESTARTER_CGROUP).join(app_id)
}

/// Create the app cgroup, apply the policy's limits, and move `pid` into
/// it. Returns the cgroup directory for later removal.
pub fn setup_cgroup(app_id: &str, pid: u32, policy: &SandboxPolicy) -> EstarterResult<PathBuf> {
    if !is_cgroup_v2_available() {
        return Err(EstarterError::Host(
            "cgroup v2 not available".to_string(),
        ));
    }

    let parent = get_cgroup_base().join(ESTARTER_CGROUP);
    if !parent.exists() {
        fs::create_dir(&parent).map_err(|e| {
            EstarterError::Host(format!(
                "failed to create cgroup {}: {}",
                parent.display(),
                e
            ))
        })?;
        // Enable the controllers children will use.
        write_file(&parent.join("cgroup.subtree_control"), "+cpu +memory +pids")?;
    }

    let app_cgroup = parent.join(app_id);
    if !app_cgroup.exists() {
        fs::create_dir(&app_cgroup).map_err(|e| {
            EstarterError::Host(format!(
                "failed to create cgroup {}: {}",
                app_cgroup.display(),
                e
            ))
        })?;
    }

    if policy.memory_limit_bytes > 0 {
        write_file(
            &app_cgroup.join("memory.max"),
            &policy.memory_limit_bytes.to_string(),
        )?;
    }
    if policy.max_processes > 0 {
        write_file(
            &app_cgroup.join("pids.max"),
            &policy.max_processes.to_string(),
        )?;
    }
    if policy.cpu_quota_percent > 0 {
        let quota_us = policy.cpu_quota_percent as u64 * CPU_PERIOD_US / 100;
        write_file(
            &app_cgroup.join("cpu.max"),
            &format!("{} {}", quota_us, CPU_PERIOD_US),
        )?;
    }

    write_file(&app_cgroup.join("cgroup.procs"), &pid.to_string())?;

    tracing::debug!(
        app_id = %app_id,
        pid = pid,
        path = %app_cgroup.display(),
        "Cgroup limits applied"
    );

    Ok(app_cgroup)
}

/// Remove an app cgroup. The kernel refuses while processes remain; that
/// surfaces as an error the caller logs and ignores.
pub fn remove_cgroup(path: &Path) -> EstarterResult<()> {
    if path.exists() {
        fs::remove_dir(path).map_err(|e| {
            EstarterError::Host(format!("failed to remove cgroup {}: {}", path.display(), e))
        })?;
    }
    Ok(())
}

fn write_file(path: &Path, content: &str) -> EstarterResult<()> {
    fs::write(path, content).map_err(|e| {
        EstarterError::Host(format!("failed to write {}: {}", path.display(), e))
    })
}
