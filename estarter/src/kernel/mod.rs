//! The central coordinator: process registry, permission checks, and the
//! API request router.
//!
//! Every privileged operation a hosted app attempts arrives here as an
//! [`ApiRequest`]; the kernel resolves the caller, gates on the static
//! command permission table, dispatches to the registered handler, and
//! emits an `ApiCalled` event whatever the outcome.

mod events;
mod handlers;
mod process;

pub use events::{EventBus, KernelEvent};
pub use process::{Process, ProcessInfo, ProcessState};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::permissions::{PermissionManager, PolicyCategory, PolicyStore};
use crate::vfs::VirtualFs;
use estarter_shared::{
    ApiCommand, ApiRequest, ApiResponse, EstarterError, EstarterResult, Permission, PermissionSet,
    RequestIdGen,
};

/// Outcome of a permission check: all-or-nothing plus the missing bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionCheck {
    pub allowed: bool,
    pub missing: Permission,
}

/// One registered API handler. Handlers run on the caller's task and must
/// convert their own faults into error values; the router turns any `Err`
/// into an `Error` response so a misbehaving handler cannot take the
/// kernel down.
#[async_trait]
pub trait ApiHandler: Send + Sync {
    async fn handle(
        &self,
        kernel: &Kernel,
        caller: &ProcessInfo,
        request: &ApiRequest,
    ) -> EstarterResult<ApiResponse>;
}

pub struct Kernel {
    processes: parking_lot::RwLock<HashMap<String, Arc<Process>>>,
    handlers: parking_lot::RwLock<HashMap<ApiCommand, Arc<dyn ApiHandler>>>,
    permissions: PermissionManager,
    policies: PolicyStore,
    vfs: Arc<VirtualFs>,
    events: EventBus,
    request_ids: RequestIdGen,
    started_at: Instant,
}

impl Kernel {
    /// Construct the kernel and register the built-in and filesystem
    /// handlers. Handler registration happens only here; runtime reads of
    /// the table are race-free.
    pub fn new(
        permissions: PermissionManager,
        policies: PolicyStore,
        vfs: Arc<VirtualFs>,
    ) -> Arc<Self> {
        let kernel = Arc::new(Self {
            processes: parking_lot::RwLock::new(HashMap::new()),
            handlers: parking_lot::RwLock::new(HashMap::new()),
            permissions,
            policies,
            vfs,
            events: EventBus::new(),
            request_ids: RequestIdGen::new(),
            started_at: Instant::now(),
        });

        handlers::register_builtin_handlers(&kernel)
            .expect("built-in handler registration cannot conflict");
        crate::vfs::register_fs_handlers(&kernel)
            .expect("filesystem handler registration cannot conflict");

        kernel
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn vfs(&self) -> &Arc<VirtualFs> {
        &self.vfs
    }

    pub fn permissions(&self) -> &PermissionManager {
        &self.permissions
    }

    pub fn policies(&self) -> &PolicyStore {
        &self.policies
    }

    pub fn next_request_id(&self) -> u64 {
        self.request_ids.next()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    // ========================================================================
    // PROCESS REGISTRY
    // ========================================================================

    /// Register a process, replacing any previous entry for the app id
    /// (re-launch after crash is legal).
    ///
    /// Admin/Kernel bits are stripped, persisted grants are merged in, and
    /// bits under a disabled policy category never reach the live set.
    pub fn register_process(
        &self,
        app_id: &str,
        os_pid: u32,
        version: &str,
        requested: Permission,
    ) -> ProcessInfo {
        let stored = self.permissions.stored_set(app_id);
        let disallowed = self.policies.current().disallowed_mask();
        let granted = ((requested | stored.granted) & Permission::FULL) - disallowed;
        let set = PermissionSet {
            granted,
            denied: stored.denied,
        };

        let process = Arc::new(Process::new(
            app_id.to_string(),
            os_pid,
            version.to_string(),
            set,
        ));
        process.force_state(ProcessState::Running);

        let replaced = self
            .processes
            .write()
            .insert(app_id.to_string(), process.clone());
        if let Some(old) = replaced {
            old.force_state(ProcessState::Terminated);
            tracing::debug!(app_id = %app_id, "Replaced existing process registration");
        }

        tracing::info!(
            app_id = %app_id,
            pid = os_pid,
            permissions = %granted,
            "Process registered"
        );
        self.events.emit(KernelEvent::ProcessStarted {
            app_id: app_id.to_string(),
        });

        process.snapshot()
    }

    /// Remove a process from the registry. Returns false when the app id
    /// was not registered.
    pub fn unregister_process(&self, app_id: &str) -> bool {
        let removed = self.processes.write().remove(app_id);
        match removed {
            Some(process) => {
                process.force_state(ProcessState::Terminated);
                tracing::info!(app_id = %app_id, "Process unregistered");
                self.events.emit(KernelEvent::ProcessTerminated {
                    app_id: app_id.to_string(),
                });
                true
            }
            None => false,
        }
    }

    pub fn get_process(&self, app_id: &str) -> Option<ProcessInfo> {
        self.processes.read().get(app_id).map(|p| p.snapshot())
    }

    pub fn all_processes(&self) -> Vec<ProcessInfo> {
        let mut infos: Vec<_> = self
            .processes
            .read()
            .values()
            .map(|p| p.snapshot())
            .collect();
        infos.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        infos
    }

    pub fn process_count(&self) -> usize {
        self.processes.read().len()
    }

    /// Validated lifecycle transition for a live process.
    pub fn set_process_state(&self, app_id: &str, state: ProcessState) -> EstarterResult<()> {
        let process = self
            .processes
            .read()
            .get(app_id)
            .cloned()
            .ok_or_else(|| EstarterError::NotFound(format!("process {}", app_id)))?;
        process.transition_to(state)
    }

    // ========================================================================
    // PERMISSIONS
    // ========================================================================

    /// Grant `p` to a live process. Returns false (and changes nothing)
    /// when the process is unknown or any bit of `p` is blocked by a
    /// global policy. The grant is persisted.
    pub fn grant_permission(&self, app_id: &str, p: Permission) -> bool {
        let p = p & Permission::FULL;
        if p.is_empty() {
            return false;
        }
        if !self.policies.is_globally_allowed(p) {
            tracing::debug!(
                app_id = %app_id,
                permission = %p,
                "Grant refused by global policy"
            );
            return false;
        }

        let process = match self.processes.read().get(app_id).cloned() {
            Some(p) => p,
            None => return false,
        };

        process.set_permissions(process.permissions().grant(p));
        self.permissions.store().record_grant(app_id, p);
        tracing::debug!(app_id = %app_id, permission = %p, "Permission granted");
        true
    }

    /// Remove `p` from a live process's granted and denied masks and from
    /// the persisted grant.
    pub fn revoke_permission(&self, app_id: &str, p: Permission) -> bool {
        let process = match self.processes.read().get(app_id).cloned() {
            Some(proc) => proc,
            None => return false,
        };

        process.set_permissions(process.permissions().revoke(p));
        self.permissions.store().record_revoke(app_id, p);
        tracing::debug!(app_id = %app_id, permission = %p, "Permission revoked");
        true
    }

    pub fn check_permission(&self, app_id: &str, required: Permission) -> PermissionCheck {
        match self.processes.read().get(app_id) {
            Some(process) => {
                let set = process.permissions();
                let missing = set.missing(required);
                PermissionCheck {
                    allowed: missing.is_empty(),
                    missing,
                }
            }
            None => PermissionCheck {
                allowed: false,
                missing: required,
            },
        }
    }

    /// Flip a global policy category. Disabling revokes the category's
    /// bits from every live process before the call returns.
    pub fn set_global_permission_policy(&self, category: PolicyCategory, allowed: bool) {
        self.policies.set_allowed(category, allowed);

        if !allowed {
            let mask = category.permission_mask();
            let processes: Vec<_> = self.processes.read().values().cloned().collect();
            for process in processes {
                let current = process.permissions();
                if current.granted.intersects(mask) {
                    process.set_permissions(current.revoke(mask));
                    tracing::info!(
                        app_id = %process.app_id(),
                        permission = %mask,
                        "Revoked by policy change"
                    );
                }
            }
        }

        self.events
            .emit(KernelEvent::PolicyChanged { category, allowed });
    }

    /// UI-layer completion of a pending consent request.
    pub fn complete_permission_request(
        &self,
        app_id: &str,
        permission: Permission,
        allowed: bool,
    ) -> usize {
        self.permissions.consent().complete(app_id, permission, allowed)
    }

    // ========================================================================
    // API ROUTER
    // ========================================================================

    /// Exactly one handler per command code.
    pub fn register_handler(
        &self,
        command: ApiCommand,
        handler: Arc<dyn ApiHandler>,
    ) -> EstarterResult<()> {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&command) {
            return Err(EstarterError::InvalidState(format!(
                "handler for {} already registered",
                command
            )));
        }
        handlers.insert(command, handler);
        Ok(())
    }

    /// Route one API request on behalf of `caller_app_id`.
    ///
    /// 1. Resolve the caller; unknown callers are denied.
    /// 2. Gate on the command's static permission mask.
    /// 3. Dispatch; handler faults become `Error` responses.
    /// 4. Emit `ApiCalled` regardless of outcome.
    pub async fn handle_api(&self, caller_app_id: &str, request: ApiRequest) -> ApiResponse {
        let response = self.route(caller_app_id, &request).await;

        self.events.emit(KernelEvent::ApiCalled {
            app_id: caller_app_id.to_string(),
            command: request.command,
            status: response.status,
        });

        response
    }

    async fn route(&self, caller_app_id: &str, request: &ApiRequest) -> ApiResponse {
        let caller = match self.processes.read().get(caller_app_id) {
            Some(process) => process.snapshot(),
            None => {
                return ApiResponse::failure(
                    request.request_id,
                    estarter_shared::ApiStatus::PermissionDenied,
                    format!("no registered process for app {}", caller_app_id),
                );
            }
        };

        let required = request.command.required_permissions();
        if !required.is_empty() {
            let missing = caller.permissions.missing(required);
            if !missing.is_empty() {
                return ApiResponse::permission_denied(request.request_id, missing);
            }
        }

        let handler = self.handlers.read().get(&request.command).cloned();
        let handler = match handler {
            Some(handler) => handler,
            None => {
                return ApiResponse::not_supported(request.request_id, request.command.as_str())
            }
        };

        match handler.handle(self, &caller, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(
                    app_id = %caller_app_id,
                    command = %request.command,
                    error = %e,
                    "Handler returned an error"
                );
                ApiResponse::error(request.request_id, e.to_string())
            }
        }
    }
}
