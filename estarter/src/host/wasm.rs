//! WebAssembly host: runs a module under Wasmtime with the kernel exposed
//! through two narrow host imports.
//!
//! The guest links `env.estarter_log` and `env.estarter_api_call`, exports
//! `memory` and `_start`, and runs on a dedicated blocking worker (guest
//! execution is single-threaded). Only the status code of an API response
//! crosses the ABI; the JSON payload stays host-side.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use wasmtime::{Caller, Config, Engine, Extern, Linker, Module, Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::preview1::{add_to_linker_sync, WasiP1Ctx};
use wasmtime_wasi::WasiCtxBuilder;

use crate::host::HostState;
use crate::kernel::{Kernel, KernelEvent};
use crate::manifest::SandboxPolicy;
use estarter_shared::constants::{timeouts, wasm_imports};
use estarter_shared::{
    ApiCommand, ApiRequest, ApiResponse, ApiStatus, EstarterError, EstarterResult, Permission,
};

/// Per-store state available to host imports.
struct GuestState {
    wasi: WasiP1Ctx,
    limits: StoreLimits,
    kernel: Arc<Kernel>,
    app_id: String,
    /// Handle into the async runtime; the guest call is synchronous and
    /// blocks on it for kernel calls.
    handle: tokio::runtime::Handle,
}

pub struct WasmHost {
    app_id: String,
    version: String,
    entry: PathBuf,
    requested: Permission,
    policy: SandboxPolicy,
    kernel: Arc<Kernel>,

    state: parking_lot::RwLock<HostState>,
    engine: parking_lot::Mutex<Option<Engine>>,
    stop_requested: AtomicBool,
    cleanup_done: AtomicBool,
    exited_tx: watch::Sender<bool>,
}

impl WasmHost {
    pub fn new(
        kernel: Arc<Kernel>,
        app_id: String,
        version: String,
        entry: PathBuf,
        requested: Permission,
        policy: SandboxPolicy,
    ) -> Self {
        let (exited_tx, _) = watch::channel(false);
        Self {
            app_id,
            version,
            entry,
            requested,
            policy,
            kernel,
            state: parking_lot::RwLock::new(HostState::Created),
            engine: parking_lot::Mutex::new(None),
            stop_requested: AtomicBool::new(false),
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

    fn fault(&self, message: String) -> EstarterError {
        *self.state.write() = HostState::Faulted;
        EstarterError::Wasm(message)
    }

    /// Compile, instantiate, and launch `_start` on a blocking worker.
    pub async fn start(self: &Arc<Self>) -> EstarterResult<()> {
        self.set_state(HostState::Starting)?;

        let bytes = tokio::fs::read(&self.entry).await.map_err(|e| {
            self.fault(format!(
                "failed to read module {}: {}",
                self.entry.display(),
                e
            ))
        })?;

        let mut config = Config::new();
        // Cooperative cancellation: stop() bumps the epoch and the guest
        // traps out of any compute loop.
        config.epoch_interruption(true);

        let engine = Engine::new(&config)
            .map_err(|e| self.fault(format!("failed to create engine: {}", e)))?;
        let module = Module::new(&engine, &bytes)
            .map_err(|e| self.fault(format!("failed to compile module: {}", e)))?;

        let limits = if self.policy.memory_limit_bytes > 0 {
            StoreLimitsBuilder::new()
                .memory_size(self.policy.memory_limit_bytes as usize)
                .table_elements(100_000)
                .instances(1)
                .tables(8)
                .memories(1)
                .build()
        } else {
            StoreLimits::default()
        };

        // Minimal WASI surface: inherited stderr only.
        let wasi = WasiCtxBuilder::new().inherit_stderr().build_p1();

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| self.fault(format!("wasm host needs a tokio runtime: {}", e)))?;

        let mut store = Store::new(
            &engine,
            GuestState {
                wasi,
                limits,
                kernel: self.kernel.clone(),
                app_id: self.app_id.clone(),
                handle,
            },
        );
        store.limiter(|state| &mut state.limits);
        store.set_epoch_deadline(1);

        let mut linker: Linker<GuestState> = Linker::new(&engine);
        add_to_linker_sync(&mut linker, |state: &mut GuestState| &mut state.wasi)
            .map_err(|e| self.fault(format!("failed to link WASI: {}", e)))?;
        define_host_imports(&mut linker)
            .map_err(|e| self.fault(format!("failed to define host imports: {}", e)))?;

        self.kernel
            .register_process(&self.app_id, 0, &self.version, self.requested);

        let instance = match linker.instantiate(&mut store, &module) {
            Ok(instance) => instance,
            Err(e) => {
                self.kernel.unregister_process(&self.app_id);
                return Err(self.fault(format!("instantiation failed: {}", e)));
            }
        };
        let start_func = match instance
            .get_typed_func::<(), ()>(&mut store, wasm_imports::EXPORT_START)
        {
            Ok(func) => func,
            Err(e) => {
                self.kernel.unregister_process(&self.app_id);
                return Err(self.fault(format!("module has no _start export: {}", e)));
            }
        };

        *self.engine.lock() = Some(engine);

        let host = self.clone();
        tokio::task::spawn_blocking(move || {
            let result = start_func.call(&mut store, ());
            drop(store);

            match result {
                Ok(()) => host.cleanup(0, None),
                Err(e) => match e.downcast_ref::<wasmtime_wasi::I32Exit>() {
                    // proc_exit is a normal exit with a code.
                    Some(exit) => host.cleanup(exit.0, None),
                    None if host.stop_requested.load(Ordering::SeqCst) => {
                        tracing::debug!(app_id = %host.app_id, "Guest interrupted by stop");
                        host.cleanup(0, None);
                    }
                    None => {
                        let message = format!("wasm trap: {}", e.root_cause());
                        host.cleanup(1, Some(message));
                    }
                },
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

        // The guest may already have finished on its worker; leave a
        // terminal state alone.
        {
            let mut state = self.state.write();
            if *state == HostState::Starting {
                *state = HostState::Running;
            }
        }
        tracing::info!(app_id = %self.app_id, module = %self.entry.display(), "Wasm host started");
        Ok(())
    }

    /// Interrupt the guest via epoch bump and wait for it to wind down.
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

        self.stop_requested.store(true, Ordering::SeqCst);
        if let Some(engine) = self.engine.lock().as_ref() {
            engine.increment_epoch();
        }

        let mut rx = self.exited_tx.subscribe();
        let already_exited = *rx.borrow();
        if !already_exited
            && tokio::time::timeout(timeouts::STOP_GRACE, rx.changed())
                .await
                .is_err()
        {
            tracing::warn!(app_id = %self.app_id, "Guest did not stop within the grace window");
        }
        Ok(())
    }

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

    fn cleanup(&self, exit_code: i32, error: Option<String>) {
        if self.cleanup_done.swap(true, Ordering::SeqCst) {
            return;
        }

        self.kernel.unregister_process(&self.app_id);
        *self.state.write() = if error.is_some() {
            HostState::Faulted
        } else {
            HostState::Stopped
        };

        tracing::info!(
            app_id = %self.app_id,
            exit_code = exit_code,
            error = ?error,
            "Wasm host exited"
        );
        self.kernel.events().emit(KernelEvent::HostExited {
            app_id: self.app_id.clone(),
            exit_code,
            error,
        });
        self.exited_tx.send_replace(true);
    }
}

/// Read `len` bytes of guest memory at `ptr`.
fn read_guest_bytes(
    caller: &mut Caller<'_, GuestState>,
    ptr: i32,
    len: i32,
) -> Option<Vec<u8>> {
    if ptr < 0 || len < 0 {
        return None;
    }
    let memory = match caller.get_export(wasm_imports::EXPORT_MEMORY) {
        Some(Extern::Memory(memory)) => memory,
        _ => return None,
    };
    let mut buffer = vec![0u8; len as usize];
    memory.read(caller, ptr as usize, &mut buffer).ok()?;
    Some(buffer)
}

fn read_guest_string(
    caller: &mut Caller<'_, GuestState>,
    ptr: i32,
    len: i32,
) -> Option<String> {
    String::from_utf8(read_guest_bytes(caller, ptr, len)?).ok()
}

/// `env.estarter_log` and `env.estarter_api_call`.
fn define_host_imports(linker: &mut Linker<GuestState>) -> wasmtime::Result<()> {
    linker.func_wrap(
        wasm_imports::MODULE,
        wasm_imports::LOG,
        |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| {
            match read_guest_string(&mut caller, ptr, len) {
                Some(message) => {
                    let app_id = caller.data().app_id.clone();
                    tracing::info!(app_id = %app_id, "[wasm] {}", message);
                }
                None => {
                    tracing::debug!("wasm guest passed an unreadable log buffer");
                }
            }
        },
    )?;

    linker.func_wrap(
        wasm_imports::MODULE,
        wasm_imports::API_CALL,
        |mut caller: Caller<'_, GuestState>,
         cmd_ptr: i32,
         cmd_len: i32,
         data_ptr: i32,
         data_len: i32|
         -> i32 {
            let command_str = match read_guest_string(&mut caller, cmd_ptr, cmd_len) {
                Some(command) => command,
                None => return ApiStatus::InvalidRequest.as_i32(),
            };
            let command: ApiCommand = match command_str.parse() {
                Ok(command) => command,
                Err(()) => return ApiStatus::NotSupported.as_i32(),
            };

            let data = if data_len > 0 {
                match read_guest_bytes(&mut caller, data_ptr, data_len)
                    .and_then(|bytes| serde_json::from_slice(&bytes).ok())
                {
                    Some(value) => Some(value),
                    None => return ApiStatus::InvalidRequest.as_i32(),
                }
            } else {
                None
            };

            let state = caller.data();
            let kernel = state.kernel.clone();
            let app_id = state.app_id.clone();
            let handle = state.handle.clone();
            let request = ApiRequest {
                command,
                request_id: kernel.next_request_id(),
                data,
            };
            let request_id = request.request_id;

            // Synchronous to the guest: block this worker on the async
            // kernel call. Only the status crosses the ABI.
            let response: ApiResponse = handle.block_on(async {
                match tokio::time::timeout(timeouts::API_CALL, kernel.handle_api(&app_id, request))
                    .await
                {
                    Ok(response) => response,
                    Err(_) => {
                        ApiResponse::failure(request_id, ApiStatus::Timeout, "API call timed out")
                    }
                }
            });
            response.status.as_i32()
        },
    )?;

    Ok(())
}
