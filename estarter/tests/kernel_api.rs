//! End-to-end scenarios through the kernel API surface.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use estarter::permissions::{PermissionManager, PermissionStore, PolicyCategory, PolicyStore};
use estarter::vfs::VirtualFs;
use estarter::{ApiCommand, ApiRequest, ApiResponse, ApiStatus, Kernel, Permission};

// ============================================================================
// TEST FIXTURES
// ============================================================================

struct TestContext {
    kernel: Arc<Kernel>,
    _temp_dir: TempDir, // Dropped after test
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let permissions = PermissionManager::new(PermissionStore::load(
            temp_dir.path().join("permissions.json"),
        ));
        let policies = PolicyStore::load(temp_dir.path().join("system-policies.json"));
        let vfs =
            Arc::new(VirtualFs::new(temp_dir.path().join("vfs")).expect("Failed to create VFS"));
        Self {
            kernel: Kernel::new(permissions, policies, vfs),
            _temp_dir: temp_dir,
        }
    }

    async fn call(
        &self,
        app_id: &str,
        command: ApiCommand,
        data: Option<serde_json::Value>,
    ) -> ApiResponse {
        let id = self.kernel.next_request_id();
        let request = match data {
            Some(data) => ApiRequest::with_data(command, id, data),
            None => ApiRequest::new(command, id),
        };
        self.kernel.handle_api(app_id, request).await
    }
}

// ============================================================================
// SCENARIO 1: PING ROUND-TRIP
// ============================================================================

#[tokio::test]
async fn ping_round_trip() {
    let ctx = TestContext::new();
    ctx.kernel
        .register_process("app.a", 100, "1.0", Permission::BASIC);

    let response = ctx
        .kernel
        .handle_api("app.a", ApiRequest::new(ApiCommand::Ping, 1))
        .await;

    assert_eq!(response.request_id, 1);
    assert_eq!(response.status, ApiStatus::Success);
    assert!(response.error.is_none());
}

// ============================================================================
// SCENARIO 2: UNAUTHORISED WRITE, THEN GRANT
// ============================================================================

#[tokio::test]
async fn unauthorised_write_then_grant() {
    let ctx = TestContext::new();
    ctx.kernel
        .register_process("app.b", 100, "1.0", Permission::BASIC);

    let payload = json!({"path": "/appdata/app.b/x.txt", "text": "hi"});
    let response = ctx
        .call("app.b", ApiCommand::WriteFile, Some(payload.clone()))
        .await;
    assert_eq!(response.status, ApiStatus::PermissionDenied);
    assert!(response.error.unwrap().contains("FILE_WRITE"));

    assert!(ctx.kernel.grant_permission("app.b", Permission::FILE_WRITE));

    let response = ctx.call("app.b", ApiCommand::WriteFile, Some(payload)).await;
    assert_eq!(response.status, ApiStatus::Success);
    assert_eq!(response.data.unwrap()["written"].as_u64(), Some(2));
}

// ============================================================================
// SCENARIO 3: CROSS-APP ISOLATION
// ============================================================================

#[tokio::test]
async fn cross_app_isolation() {
    let ctx = TestContext::new();
    ctx.kernel
        .register_process("app.c", 100, "1.0", Permission::BASIC);

    // Irrespective of whether the target file exists.
    let response = ctx
        .call(
            "app.c",
            ApiCommand::ReadFile,
            Some(json!({"path": "/appdata/app.d/x.txt"})),
        )
        .await;
    assert_eq!(response.status, ApiStatus::Error);
    assert_eq!(
        response.error.as_deref(),
        Some("Access denied or invalid path")
    );

    // Create the file as its owner; the foreign read still fails the same
    // way.
    ctx.kernel
        .register_process("app.d", 101, "1.0", Permission::STANDARD);
    let response = ctx
        .call(
            "app.d",
            ApiCommand::WriteFile,
            Some(json!({"path": "/appdata/app.d/x.txt", "text": "mine"})),
        )
        .await;
    assert_eq!(response.status, ApiStatus::Success);

    let response = ctx
        .call(
            "app.c",
            ApiCommand::ReadFile,
            Some(json!({"path": "/appdata/app.d/x.txt"})),
        )
        .await;
    assert_eq!(response.status, ApiStatus::Error);
    assert_eq!(
        response.error.as_deref(),
        Some("Access denied or invalid path")
    );
}

// ============================================================================
// SCENARIO 4: CONSENT TIMEOUT
// ============================================================================

#[tokio::test(start_paused = true)]
async fn consent_timeout_counts_as_denial() {
    let ctx = TestContext::new();
    ctx.kernel
        .register_process("app.e", 100, "1.0", Permission::BASIC);

    // Nobody answers the consent event; the paused clock runs the
    // 30-second window out.
    let response = ctx
        .call(
            "app.e",
            ApiCommand::RequestPermission,
            Some(json!({"permission": "Camera"})),
        )
        .await;

    assert_eq!(response.status, ApiStatus::Success);
    assert_eq!(response.data.unwrap()["granted"].as_bool(), Some(false));

    let info = ctx.kernel.get_process("app.e").unwrap();
    assert!(!info.permissions.has(Permission::CAMERA));
    // The denied set is unchanged: a timeout is not a sticky denial.
    assert!(!info.permissions.denied.contains(Permission::CAMERA));
}

// ============================================================================
// SCENARIO 5: GLOBAL POLICY REVOKES LIVE GRANT
// ============================================================================

#[tokio::test]
async fn global_policy_revokes_live_grant() {
    let temp_dir = TempDir::new().unwrap();
    let policies_path = temp_dir.path().join("system-policies.json");
    let permissions = PermissionManager::new(PermissionStore::load(
        temp_dir.path().join("permissions.json"),
    ));
    let policies = PolicyStore::load(policies_path.clone());
    let vfs = Arc::new(VirtualFs::new(temp_dir.path().join("vfs")).unwrap());
    let kernel = Kernel::new(permissions, policies, vfs);

    kernel.register_process("app.f", 100, "1.0", Permission::BASIC);
    assert!(kernel.grant_permission("app.f", Permission::LOCATION));
    assert!(kernel.check_permission("app.f", Permission::LOCATION).allowed);

    kernel.set_global_permission_policy(PolicyCategory::Location, false);

    // Revoked from the live process immediately.
    let check = kernel.check_permission("app.f", Permission::LOCATION);
    assert!(!check.allowed);
    assert_eq!(check.missing, Permission::LOCATION);

    // Subsequent grants are refused.
    assert!(!kernel.grant_permission("app.f", Permission::LOCATION));

    // The persisted policy reflects the change. Writes are async; give
    // the spawned save a moment to land.
    for _ in 0..50 {
        if policies_path.exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let reloaded = PolicyStore::load(policies_path);
    assert!(!reloaded.is_allowed(PolicyCategory::Location));
}

// ============================================================================
// REGISTRY UNIQUENESS
// ============================================================================

#[tokio::test]
async fn at_most_one_live_process_per_app_id() {
    let ctx = TestContext::new();
    for pid in 1..=10u32 {
        ctx.kernel
            .register_process("app.many", pid, "1.0", Permission::BASIC);
    }
    let all = ctx.kernel.all_processes();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].os_pid, 10);
}
