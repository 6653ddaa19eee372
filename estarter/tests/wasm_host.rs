//! Wasm host lifecycle with real modules (compiled from wat).

use std::time::Duration;

use tempfile::TempDir;

use estarter::{ApiCommand, ApiStatus, AppRuntime, HostState, KernelEvent, RuntimeOptions};

// ============================================================================
// TEST FIXTURES
// ============================================================================

struct TestContext {
    runtime: AppRuntime,
    _temp_dir: TempDir, // Dropped after test
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let runtime = AppRuntime::new(RuntimeOptions {
            home_dir: temp_dir.path().join("home"),
        })
        .expect("Failed to create runtime");
        Self {
            runtime,
            _temp_dir: temp_dir,
        }
    }

    /// Install a wasm app from wat text (wasmtime compiles wat in tests).
    fn install_wat_app(&self, app_id: &str, wat: &str, extra: &str) {
        let app_dir = self.runtime.layout().app_dir(app_id);
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("main.wasm"), wat).unwrap();
        let manifest = format!(
            r#"{{
                "id": "{}",
                "runtime": "Wasm",
                "entry": "main.wasm",
                "permissions": ["basic"]{}
            }}"#,
            app_id, extra
        );
        std::fs::write(app_dir.join("manifest.json"), manifest).unwrap();
    }
}

async fn wait_for_exit(
    rx: &mut tokio::sync::broadcast::Receiver<KernelEvent>,
    app_id: &str,
) -> (i32, Option<String>) {
    loop {
        match tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for exit event")
        {
            Ok(KernelEvent::HostExited {
                app_id: id,
                exit_code,
                error,
            }) if id == app_id => return (exit_code, error),
            Ok(_) => {}
            Err(e) => panic!("event stream broke: {}", e),
        }
    }
}

// ============================================================================
// HAPPY PATH
// ============================================================================

/// Calls `estarter_log("hi")`, then `estarter_api_call("ping")`, then
/// returns cleanly.
const PING_MODULE: &str = r#"
(module
  (import "env" "estarter_log" (func $log (param i32 i32)))
  (import "env" "estarter_api_call" (func $api (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "hi")
  (data (i32.const 8) "ping")
  (func (export "_start")
    (call $log (i32.const 0) (i32.const 2))
    (call $api (i32.const 8) (i32.const 4) (i32.const 0) (i32.const 0))
    drop))
"#;

#[tokio::test(flavor = "multi_thread")]
async fn wasm_guest_calls_the_kernel_and_exits() {
    let ctx = TestContext::new();
    ctx.install_wat_app("app.wasm", PING_MODULE, "");

    let mut rx = ctx.runtime.subscribe_events();
    let host = ctx.runtime.launch("app.wasm").await.unwrap();

    // Wasm hosts register with pid 0.
    let info = ctx.runtime.kernel().get_process("app.wasm");
    if let Some(info) = info {
        assert_eq!(info.os_pid, 0);
    }

    // The guest's ping travels through the kernel router.
    let mut saw_ping = false;
    loop {
        match tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for events")
        {
            Ok(KernelEvent::ApiCalled {
                app_id,
                command,
                status,
            }) if app_id == "app.wasm" => {
                assert_eq!(command, ApiCommand::Ping);
                assert_eq!(status, ApiStatus::Success);
                saw_ping = true;
            }
            Ok(KernelEvent::HostExited {
                app_id,
                exit_code,
                error,
            }) if app_id == "app.wasm" => {
                assert_eq!(exit_code, 0);
                assert!(error.is_none());
                break;
            }
            Ok(_) => {}
            Err(e) => panic!("event stream broke: {}", e),
        }
    }
    assert!(saw_ping, "guest api_call never reached the kernel");

    host.wait_exited().await;
    assert_eq!(host.state(), HostState::Stopped);
    assert!(ctx.runtime.kernel().get_process("app.wasm").is_none());
}

// ============================================================================
// FAULTS
// ============================================================================

const TRAP_MODULE: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "_start")
    unreachable))
"#;

#[tokio::test(flavor = "multi_thread")]
async fn trap_faults_the_host_with_exit_code_one() {
    let ctx = TestContext::new();
    ctx.install_wat_app("app.trap", TRAP_MODULE, "");

    let mut rx = ctx.runtime.subscribe_events();
    let host = ctx.runtime.launch("app.trap").await.unwrap();

    let (exit_code, error) = wait_for_exit(&mut rx, "app.trap").await;
    assert_eq!(exit_code, 1);
    assert!(error.unwrap().contains("trap"));

    host.wait_exited().await;
    assert_eq!(host.state(), HostState::Faulted);
    assert!(ctx.runtime.kernel().get_process("app.trap").is_none());
}

const NO_START_MODULE: &str = r#"
(module
  (memory (export "memory") 1))
"#;

#[tokio::test(flavor = "multi_thread")]
async fn module_without_start_fails_to_launch() {
    let ctx = TestContext::new();
    ctx.install_wat_app("app.nostart", NO_START_MODULE, "");

    assert!(ctx.runtime.launch("app.nostart").await.is_err());
    assert!(ctx.runtime.kernel().get_process("app.nostart").is_none());
}

// ============================================================================
// MEMORY LIMIT
// ============================================================================

/// Declares a 2 MiB minimum memory; instantiation must fail under a 1 MiB
/// policy ceiling.
const BIG_MEMORY_MODULE: &str = r#"
(module
  (memory (export "memory") 32)
  (func (export "_start")))
"#;

#[tokio::test(flavor = "multi_thread")]
async fn memory_limit_blocks_oversized_module() {
    let ctx = TestContext::new();
    ctx.install_wat_app(
        "app.hungry",
        BIG_MEMORY_MODULE,
        r#", "memoryLimitMb": 1"#,
    );

    assert!(ctx.runtime.launch("app.hungry").await.is_err());
    assert!(ctx.runtime.kernel().get_process("app.hungry").is_none());
}

// ============================================================================
// MAX RUNTIME / STOP
// ============================================================================

const SPIN_MODULE: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "_start")
    (loop $forever
      br $forever)))
"#;

#[tokio::test(flavor = "multi_thread")]
async fn max_runtime_interrupts_a_spinning_guest() {
    let ctx = TestContext::new();
    ctx.install_wat_app("app.spin", SPIN_MODULE, r#", "maxRuntimeSeconds": 1"#);

    let mut rx = ctx.runtime.subscribe_events();
    let host = ctx.runtime.launch("app.spin").await.unwrap();
    assert_eq!(host.state(), HostState::Running);

    let (exit_code, error) = wait_for_exit(&mut rx, "app.spin").await;
    assert_eq!(exit_code, 0);
    assert!(error.is_none(), "a requested stop is not a fault");

    host.wait_exited().await;
    assert!(ctx.runtime.kernel().get_process("app.spin").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_interrupts_a_spinning_guest() {
    let ctx = TestContext::new();
    ctx.install_wat_app("app.spin2", SPIN_MODULE, "");

    let host = ctx.runtime.launch("app.spin2").await.unwrap();
    ctx.runtime.stop_app("app.spin2").await.unwrap();

    tokio::time::timeout(Duration::from_secs(10), host.wait_exited())
        .await
        .expect("stop should interrupt the guest");
    assert_eq!(host.state(), HostState::Stopped);
}
