//! Best-effort OS-level resource limits for native app processes.
//!
//! [`attach`] returns `None` when the policy requests no limits or the
//! platform cannot enforce them; that is not an error. The returned guard
//! releases the OS resources on [`LimiterGuard::release`] or drop.

#[cfg(target_os = "linux")]
mod cgroup;
#[cfg(windows)]
mod job;

use crate::manifest::SandboxPolicy;

enum Backend {
    #[cfg(target_os = "linux")]
    Cgroup(std::path::PathBuf),
    #[cfg(windows)]
    Job(job::JobObject),
    #[allow(dead_code)]
    None,
}

/// Scoped acquisition of OS resource limits for one child process.
pub struct LimiterGuard {
    app_id: String,
    backend: Backend,
    released: bool,
}

impl LimiterGuard {
    /// Return the OS resources to the system. Idempotent; also runs on
    /// drop.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match std::mem::replace(&mut self.backend, Backend::None) {
            #[cfg(target_os = "linux")]
            Backend::Cgroup(path) => {
                if let Err(e) = cgroup::remove_cgroup(&path) {
                    tracing::debug!(
                        app_id = %self.app_id,
                        error = %e,
                        "Cgroup removal failed"
                    );
                }
            }
            #[cfg(windows)]
            Backend::Job(job) => {
                // Closing the job handle tears the limits down;
                // KILL_ON_JOB_CLOSE reaps any straggler processes.
                drop(job);
            }
            Backend::None => {}
        }
        tracing::debug!(app_id = %self.app_id, "Resource limiter released");
    }
}

impl Drop for LimiterGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Attach OS resource limits to a freshly spawned child process.
///
/// Best-effort: platform support missing or an all-zero policy yields
/// `None`; setup failures are logged by the caller and are not fatal.
pub fn attach(app_id: &str, pid: u32, policy: &SandboxPolicy) -> Option<LimiterGuard> {
    if policy.is_unlimited() {
        return None;
    }

    #[cfg(target_os = "linux")]
    {
        match cgroup::setup_cgroup(app_id, pid, policy) {
            Ok(path) => {
                return Some(LimiterGuard {
                    app_id: app_id.to_string(),
                    backend: Backend::Cgroup(path),
                    released: false,
                });
            }
            Err(e) => {
                tracing::warn!(
                    app_id = %app_id,
                    pid = pid,
                    error = %e,
                    "Cgroup setup failed (continuing without limits)"
                );
                return None;
            }
        }
    }

    #[cfg(windows)]
    {
        match job::JobObject::create_and_assign(pid, policy) {
            Ok(job) => {
                return Some(LimiterGuard {
                    app_id: app_id.to_string(),
                    backend: Backend::Job(job),
                    released: false,
                });
            }
            Err(e) => {
                tracing::warn!(
                    app_id = %app_id,
                    pid = pid,
                    error = %e,
                    "Job object setup failed (continuing without limits)"
                );
                return None;
            }
        }
    }

    #[cfg(not(any(target_os = "linux", windows)))]
    {
        tracing::debug!(
            app_id = %app_id,
            pid = pid,
            "No resource limiter on this platform"
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::AppRuntimeKind;

    fn unlimited_policy() -> SandboxPolicy {
        SandboxPolicy {
            memory_limit_bytes: 0,
            max_processes: 0,
            cpu_quota_percent: 0,
            network_allowed: false,
            max_runtime: None,
            runtime: AppRuntimeKind::Native,
        }
    }

    #[test]
    fn test_unlimited_policy_attaches_nothing() {
        assert!(attach("app.a", std::process::id(), &unlimited_policy()).is_none());
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut guard = LimiterGuard {
            app_id: "app.a".to_string(),
            backend: Backend::None,
            released: false,
        };
        guard.release();
        guard.release();
        assert!(guard.released);
    }
}
