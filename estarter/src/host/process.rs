//! Native process host: spawns an OS process with a scrubbed environment
//! and bridges its stdio to the kernel over length-framed JSON-RPC.
//!
//! stdin/stdout carry the `api_call`/`log` channel, stderr is logged
//! verbatim. Cleanup (unregister, release limits, close channel) runs
//! exactly once however the process ends, and the exit event follows the
//! child's real exit rather than the channel dropping.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::Command;
use tokio::sync::watch;

use crate::host::HostState;
use crate::kernel::{Kernel, KernelEvent};
use crate::limits::{self, LimiterGuard};
use crate::manifest::SandboxPolicy;
use estarter_shared::constants::{env as env_vars, rpc_methods, timeouts};
use estarter_shared::rpc::{self, error_codes, RpcRequest, RpcResponse};
use estarter_shared::{
    ApiCommand, ApiRequest, ApiResponse, ApiStatus, EstarterError, EstarterResult, Permission,
};

/// Environment variables copied from the launcher into hosted processes.
/// Everything else is dropped. Keep this list short and auditable.
const PRESERVED_ENV: &[&str] = &[
    // Path and shell resolution
    "PATH",
    "SHELL",
    "ComSpec",
    "PATHEXT",
    // User and home
    "HOME",
    "USER",
    "LOGNAME",
    "USERNAME",
    "USERPROFILE",
    // Temp directories
    "TMPDIR",
    "TMP",
    "TEMP",
    // Platform roots
    "SystemRoot",
    "SystemDrive",
    "windir",
    "ProgramFiles",
    "APPDATA",
    "LOCALAPPDATA",
    // Runtime locators
    "DOTNET_ROOT",
    // Locale and architecture
    "LANG",
    "LC_ALL",
    "LC_CTYPE",
    "TZ",
    "PROCESSOR_ARCHITECTURE",
    "NUMBER_OF_PROCESSORS",
];

fn is_preserved(name: &str) -> bool {
    PRESERVED_ENV
        .iter()
        .any(|keep| keep.eq_ignore_ascii_case(name))
}

pub struct ProcessHost {
    app_id: String,
    version: String,
    app_dir: PathBuf,
    entry: PathBuf,
    arguments: Vec<String>,
    requested: Permission,
    policy: SandboxPolicy,
    kernel: Arc<Kernel>,

    state: parking_lot::RwLock<HostState>,
    pid: AtomicU32,
    limiter: parking_lot::Mutex<Option<LimiterGuard>>,
    cleanup_done: AtomicBool,
    exited_tx: watch::Sender<bool>,
}

impl ProcessHost {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kernel: Arc<Kernel>,
        app_id: String,
        version: String,
        app_dir: PathBuf,
        entry: PathBuf,
        arguments: Vec<String>,
        requested: Permission,
        policy: SandboxPolicy,
    ) -> Self {
        let (exited_tx, _) = watch::channel(false);
        Self {
            app_id,
            version,
            app_dir,
            entry,
            arguments,
            requested,
            policy,
            kernel,
            state: parking_lot::RwLock::new(HostState::Created),
            pid: AtomicU32::new(0),
            limiter: parking_lot::Mutex::new(None),
            cleanup_done: AtomicBool::new(false),
            exited_tx,
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn state(&self) -> HostState {
        *self.state.read()
    }

    pub fn os_pid(&self) -> u32 {
        self.pid.load(Ordering::SeqCst)
    }

    fn set_state(&self, target: HostState) -> EstarterResult<()> {
        let mut state = self.state.write();
        if !state.can_transition_to(target) {
            return Err(EstarterError::InvalidState(format!(
                "host {}: cannot transition from {} to {}",
                self.app_id, *state, target
            )));
        }
        *state = target;
        Ok(())
    }

    /// Launch the child process and wire up the bridge.
    pub async fn start(self: &Arc<Self>) -> EstarterResult<()> {
        self.set_state(HostState::Starting)?;

        let mut command = Command::new(&self.entry);
        command
            .args(&self.arguments)
            .current_dir(&self.app_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Minimal environment: the preserve-list plus our own markers.
        command.env_clear();
        for (name, value) in std::env::vars() {
            if is_preserved(&name) {
                command.env(name, value);
            }
        }
        command.env(env_vars::MODE, env_vars::MODE_HOSTED);
        command.env(env_vars::APP_ID, &self.app_id);

        // Its own process group, so stop() can signal the whole tree.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                *self.state.write() = HostState::Faulted;
                return Err(EstarterError::Host(format!(
                    "failed to launch {}: {}",
                    self.entry.display(),
                    e
                )));
            }
        };

        let pid = child.id().unwrap_or(0);
        self.pid.store(pid, Ordering::SeqCst);

        self.kernel
            .register_process(&self.app_id, pid, &self.version, self.requested);

        // Best-effort OS limits; failure is logged inside attach().
        *self.limiter.lock() = limits::attach(&self.app_id, pid, &self.policy);

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        if let (Some(stdout), Some(stdin)) = (stdout, stdin) {
            let kernel = self.kernel.clone();
            let app_id = self.app_id.clone();
            tokio::spawn(async move {
                serve_channel(kernel, app_id, stdout, stdin).await;
            });
        }

        if let Some(stderr) = stderr {
            let app_id = self.app_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(app_id = %app_id, "[stderr] {}", line);
                }
            });
        }

        // The exit event is driven by the child's actual exit.
        let host = self.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    let code = status.code().unwrap_or(-1);
                    host.cleanup(code, None);
                }
                Err(e) => {
                    host.cleanup(1, Some(format!("wait failed: {}", e)));
                }
            }
        });

        if let Some(max_runtime) = self.policy.max_runtime {
            let host = self.clone();
            let mut exited = self.exited_tx.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(max_runtime) => {
                        tracing::info!(app_id = %host.app_id, "Max runtime reached, stopping");
                        let _ = host.stop().await;
                    }
                    _ = exited.changed() => {}
                }
            });
        }

        // The child may already have exited; leave a terminal state alone.
        {
            let mut state = self.state.write();
            if *state == HostState::Starting {
                *state = HostState::Running;
            }
        }
        tracing::info!(app_id = %self.app_id, pid = pid, "Process host started");
        Ok(())
    }

    /// Request graceful shutdown; kill the process tree after the grace
    /// window.
    pub async fn stop(&self) -> EstarterResult<()> {
        {
            let mut state = self.state.write();
            match *state {
                HostState::Created => {
                    *state = HostState::Stopped;
                    return Ok(());
                }
                HostState::Stopped | HostState::Faulted => return Ok(()),
                HostState::Stopping => {}
                HostState::Starting | HostState::Running => *state = HostState::Stopping,
            }
        }

        let pid = self.os_pid();
        if pid != 0 && !*self.exited_tx.subscribe().borrow() {
            request_graceful_exit(pid);

            if !self.wait_exited_for(timeouts::STOP_GRACE).await {
                tracing::warn!(
                    app_id = %self.app_id,
                    pid = pid,
                    "Graceful window elapsed, killing process tree"
                );
                kill_process_tree(pid);
                if !self.wait_exited_for(timeouts::STOP_GRACE).await {
                    tracing::warn!(app_id = %self.app_id, pid = pid, "Process did not die");
                }
            }
        }
        Ok(())
    }

    /// Idempotent; implies stop.
    pub async fn dispose(&self) {
        let _ = self.stop().await;
    }

    pub async fn wait_exited(&self) {
        let mut rx = self.exited_tx.subscribe();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }

    async fn wait_exited_for(&self, window: std::time::Duration) -> bool {
        tokio::time::timeout(window, self.wait_exited()).await.is_ok()
    }

    /// Single-shot teardown, safe under concurrent exit and stop.
    fn cleanup(&self, exit_code: i32, error: Option<String>) {
        if self.cleanup_done.swap(true, Ordering::SeqCst) {
            return;
        }

        self.kernel.unregister_process(&self.app_id);
        if let Some(mut limiter) = self.limiter.lock().take() {
            limiter.release();
        }

        *self.state.write() = if error.is_some() {
            HostState::Faulted
        } else {
            HostState::Stopped
        };

        tracing::info!(
            app_id = %self.app_id,
            exit_code = exit_code,
            error = ?error,
            "Process host exited"
        );
        self.kernel.events().emit(KernelEvent::HostExited {
            app_id: self.app_id.clone(),
            exit_code,
            error,
        });
        self.exited_tx.send_replace(true);
    }
}

/// Ask the child (and its process group) to exit.
#[cfg(unix)]
fn request_graceful_exit(pid: u32) {
    unsafe {
        if libc::kill(-(pid as i32), libc::SIGTERM) != 0 {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
}

#[cfg(unix)]
fn kill_process_tree(pid: u32) {
    unsafe {
        if libc::kill(-(pid as i32), libc::SIGKILL) != 0 {
            libc::kill(pid as i32, libc::SIGKILL);
        }
    }
}

#[cfg(windows)]
fn request_graceful_exit(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T"])
        .output();
}

#[cfg(windows)]
fn kill_process_tree(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output();
}

#[cfg(not(any(unix, windows)))]
fn request_graceful_exit(_pid: u32) {}

#[cfg(not(any(unix, windows)))]
fn kill_process_tree(_pid: u32) {}

/// Serve the child's JSON-RPC channel until it closes.
///
/// Requests are handled sequentially, so responses go out in the order of
/// their requests on this connection.
async fn serve_channel<R, W>(kernel: Arc<Kernel>, app_id: String, reader: R, writer: W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = reader;
    let mut writer = writer;

    loop {
        let request: Option<RpcRequest> = match rpc::read_message(&mut reader).await {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(app_id = %app_id, error = %e, "RPC channel error");
                break;
            }
        };
        let Some(request) = request else {
            tracing::debug!(app_id = %app_id, "RPC channel closed");
            break;
        };

        match request.method.as_str() {
            rpc_methods::API_CALL => {
                let response = api_call(&kernel, &app_id, request.params.as_ref()).await;
                if let Some(id) = request.id {
                    let reply = match serde_json::to_value(&response) {
                        Ok(value) => RpcResponse::result(id, value),
                        Err(e) => RpcResponse::error(
                            id,
                            error_codes::INTERNAL_ERROR,
                            format!("failed to encode response: {}", e),
                        ),
                    };
                    if rpc::write_message(&mut writer, &reply).await.is_err() {
                        break;
                    }
                }
            }
            rpc_methods::LOG => {
                let level = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("level"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("info");
                let message = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("message"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                match level {
                    "error" => tracing::error!(app_id = %app_id, "[app] {}", message),
                    "warn" => tracing::warn!(app_id = %app_id, "[app] {}", message),
                    "debug" | "trace" => tracing::debug!(app_id = %app_id, "[app] {}", message),
                    _ => tracing::info!(app_id = %app_id, "[app] {}", message),
                }
            }
            other => {
                if let Some(id) = request.id {
                    let reply = RpcResponse::error(
                        id,
                        error_codes::METHOD_NOT_FOUND,
                        format!("unknown method '{}'", other),
                    );
                    if rpc::write_message(&mut writer, &reply).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Map one `api_call` onto the kernel, bounded by the API timeout.
async fn api_call(
    kernel: &Kernel,
    app_id: &str,
    params: Option<&serde_json::Value>,
) -> ApiResponse {
    let request_id = kernel.next_request_id();

    let command_str = match params.and_then(|p| p.get("command")).and_then(|v| v.as_str()) {
        Some(command) => command,
        None => return ApiResponse::invalid(request_id, "missing 'command' field"),
    };
    let command: ApiCommand = match command_str.parse() {
        Ok(command) => command,
        Err(()) => return ApiResponse::not_supported(request_id, command_str),
    };

    let request = ApiRequest {
        command,
        request_id,
        data: params.and_then(|p| p.get("data")).cloned(),
    };

    match tokio::time::timeout(timeouts::API_CALL, kernel.handle_api(app_id, request)).await {
        Ok(response) => response,
        Err(_) => ApiResponse::failure(request_id, ApiStatus::Timeout, "API call timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{PermissionManager, PermissionStore, PolicyStore};
    use crate::vfs::VirtualFs;
    use tempfile::TempDir;

    fn test_kernel() -> (Arc<Kernel>, TempDir) {
        let dir = TempDir::new().unwrap();
        let permissions =
            PermissionManager::new(PermissionStore::load(dir.path().join("permissions.json")));
        let policies = PolicyStore::load(dir.path().join("system-policies.json"));
        let vfs = Arc::new(VirtualFs::new(dir.path().join("vfs")).unwrap());
        (Kernel::new(permissions, policies, vfs), dir)
    }

    #[test]
    fn test_preserve_list_is_case_insensitive() {
        assert!(is_preserved("PATH"));
        assert!(is_preserved("path"));
        assert!(is_preserved("Path"));
        assert!(is_preserved("systemroot"));
        assert!(!is_preserved("LD_PRELOAD"));
        assert!(!is_preserved("SECRET_TOKEN"));
    }

    #[tokio::test]
    async fn test_bridge_round_trip_over_duplex() {
        let (kernel, _dir) = test_kernel();
        kernel.register_process("app.a", 7, "1.0", Permission::BASIC);

        // Host side reads requests from `child_out`, replies on `child_in`.
        let (host_reader, mut child_writer) = tokio::io::duplex(8192);
        let (mut child_reader, host_writer) = tokio::io::duplex(8192);

        let serve = tokio::spawn(serve_channel(
            kernel.clone(),
            "app.a".to_string(),
            host_reader,
            host_writer,
        ));

        let call = RpcRequest::call(
            1,
            rpc_methods::API_CALL,
            serde_json::json!({"command": "ping"}),
        );
        rpc::write_message(&mut child_writer, &call).await.unwrap();

        let reply: RpcResponse = rpc::read_message(&mut child_reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.id, 1);
        let response: ApiResponse = serde_json::from_value(reply.result.unwrap()).unwrap();
        assert_eq!(response.status, ApiStatus::Success);

        // Unknown commands come back NotSupported.
        let call = RpcRequest::call(
            2,
            rpc_methods::API_CALL,
            serde_json::json!({"command": "frobnicate"}),
        );
        rpc::write_message(&mut child_writer, &call).await.unwrap();
        let reply: RpcResponse = rpc::read_message(&mut child_reader)
            .await
            .unwrap()
            .unwrap();
        let response: ApiResponse = serde_json::from_value(reply.result.unwrap()).unwrap();
        assert_eq!(response.status, ApiStatus::NotSupported);

        // Unknown methods get a JSON-RPC error.
        let call = RpcRequest::call(3, "bogus_method", serde_json::json!({}));
        rpc::write_message(&mut child_writer, &call).await.unwrap();
        let reply: RpcResponse = rpc::read_message(&mut child_reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.error.unwrap().code, error_codes::METHOD_NOT_FOUND);

        // Closing the child side ends the serve loop.
        drop(child_writer);
        serve.await.unwrap();
    }

    #[tokio::test]
    async fn test_log_notification_needs_no_reply() {
        let (kernel, _dir) = test_kernel();
        let (host_reader, mut child_writer) = tokio::io::duplex(4096);
        let (mut child_reader, host_writer) = tokio::io::duplex(4096);

        let serve = tokio::spawn(serve_channel(
            kernel.clone(),
            "app.a".to_string(),
            host_reader,
            host_writer,
        ));

        let notification = RpcRequest::notification(
            rpc_methods::LOG,
            serde_json::json!({"level": "info", "message": "hello"}),
        );
        rpc::write_message(&mut child_writer, &notification)
            .await
            .unwrap();
        drop(child_writer);
        serve.await.unwrap();

        // No reply was written for the notification.
        let got: Option<RpcResponse> = rpc::read_message(&mut child_reader).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_responses_preserve_request_order() {
        let (kernel, _dir) = test_kernel();
        kernel.register_process("app.a", 7, "1.0", Permission::BASIC);

        let (host_reader, mut child_writer) = tokio::io::duplex(8192);
        let (mut child_reader, host_writer) = tokio::io::duplex(8192);
        tokio::spawn(serve_channel(
            kernel.clone(),
            "app.a".to_string(),
            host_reader,
            host_writer,
        ));

        for id in 1..=5u64 {
            let call = RpcRequest::call(
                id,
                rpc_methods::API_CALL,
                serde_json::json!({"command": "ping"}),
            );
            rpc::write_message(&mut child_writer, &call).await.unwrap();
        }
        for id in 1..=5u64 {
            let reply: RpcResponse = rpc::read_message(&mut child_reader)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(reply.id, id);
        }
    }
}
