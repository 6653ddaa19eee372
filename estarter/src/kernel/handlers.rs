//! Built-in API handlers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{ApiHandler, Kernel, KernelEvent, ProcessInfo};
use estarter_shared::constants::timeouts;
use estarter_shared::{ApiCommand, ApiRequest, ApiResponse, EstarterResult, Permission};

pub(super) fn register_builtin_handlers(kernel: &Kernel) -> EstarterResult<()> {
    kernel.register_handler(ApiCommand::Ping, Arc::new(PingHandler))?;
    kernel.register_handler(ApiCommand::GetTime, Arc::new(GetTimeHandler))?;
    kernel.register_handler(ApiCommand::GetSystemInfo, Arc::new(SystemInfoHandler))?;
    kernel.register_handler(ApiCommand::GetProcessList, Arc::new(ProcessListHandler))?;
    kernel.register_handler(ApiCommand::CheckPermission, Arc::new(CheckPermissionHandler))?;
    kernel.register_handler(ApiCommand::GetPermissions, Arc::new(GetPermissionsHandler))?;
    kernel.register_handler(
        ApiCommand::RequestPermission,
        Arc::new(RequestPermissionHandler),
    )?;
    kernel.register_handler(
        ApiCommand::ShowNotification,
        Arc::new(ShowNotificationHandler),
    )?;
    Ok(())
}

/// Pull a required string field out of the request payload.
fn data_str<'r>(request: &'r ApiRequest, field: &str) -> Option<&'r str> {
    request.data.as_ref()?.get(field)?.as_str()
}

struct PingHandler;

#[async_trait]
impl ApiHandler for PingHandler {
    async fn handle(
        &self,
        _kernel: &Kernel,
        _caller: &ProcessInfo,
        request: &ApiRequest,
    ) -> EstarterResult<ApiResponse> {
        Ok(ApiResponse::success(request.request_id, None))
    }
}

struct GetTimeHandler;

#[async_trait]
impl ApiHandler for GetTimeHandler {
    async fn handle(
        &self,
        _kernel: &Kernel,
        _caller: &ProcessInfo,
        request: &ApiRequest,
    ) -> EstarterResult<ApiResponse> {
        Ok(ApiResponse::success(
            request.request_id,
            Some(json!({ "time": chrono::Utc::now().timestamp_millis() })),
        ))
    }
}

struct SystemInfoHandler;

#[async_trait]
impl ApiHandler for SystemInfoHandler {
    async fn handle(
        &self,
        kernel: &Kernel,
        _caller: &ProcessInfo,
        request: &ApiRequest,
    ) -> EstarterResult<ApiResponse> {
        Ok(ApiResponse::success(
            request.request_id,
            Some(json!({
                "os": std::env::consts::OS,
                "version": env!("CARGO_PKG_VERSION"),
                "process_count": kernel.process_count(),
                "uptime_seconds": kernel.uptime_seconds(),
            })),
        ))
    }
}

struct ProcessListHandler;

#[async_trait]
impl ApiHandler for ProcessListHandler {
    async fn handle(
        &self,
        kernel: &Kernel,
        _caller: &ProcessInfo,
        request: &ApiRequest,
    ) -> EstarterResult<ApiResponse> {
        let list: Vec<_> = kernel
            .all_processes()
            .into_iter()
            .map(|p| {
                json!({
                    "app_id": p.app_id,
                    "pid": p.os_pid,
                    "version": p.version,
                    "state": p.state,
                })
            })
            .collect();
        Ok(ApiResponse::success(
            request.request_id,
            Some(json!(list)),
        ))
    }
}

struct CheckPermissionHandler;

#[async_trait]
impl ApiHandler for CheckPermissionHandler {
    async fn handle(
        &self,
        _kernel: &Kernel,
        caller: &ProcessInfo,
        request: &ApiRequest,
    ) -> EstarterResult<ApiResponse> {
        let name = match data_str(request, "permission") {
            Some(name) => name,
            None => {
                return Ok(ApiResponse::invalid(
                    request.request_id,
                    "missing 'permission' field",
                ))
            }
        };
        let permission = match Permission::from_name(name) {
            Some(p) => p,
            None => {
                return Ok(ApiResponse::invalid(
                    request.request_id,
                    format!("unknown permission '{}'", name),
                ))
            }
        };

        let missing = caller.permissions.missing(permission);
        Ok(ApiResponse::success(
            request.request_id,
            Some(json!({
                "allowed": missing.is_empty(),
                "missing": missing.names(),
            })),
        ))
    }
}

struct GetPermissionsHandler;

#[async_trait]
impl ApiHandler for GetPermissionsHandler {
    async fn handle(
        &self,
        _kernel: &Kernel,
        caller: &ProcessInfo,
        request: &ApiRequest,
    ) -> EstarterResult<ApiResponse> {
        Ok(ApiResponse::success(
            request.request_id,
            Some(json!({
                "granted": caller.permissions.granted.names(),
                "denied": caller.permissions.denied.names(),
            })),
        ))
    }
}

/// The consent protocol. Each caller waits on its own completion handle;
/// expiry of the 30-second window counts as denial and leaves the
/// persisted denied set untouched.
struct RequestPermissionHandler;

#[async_trait]
impl ApiHandler for RequestPermissionHandler {
    async fn handle(
        &self,
        kernel: &Kernel,
        caller: &ProcessInfo,
        request: &ApiRequest,
    ) -> EstarterResult<ApiResponse> {
        let name = match data_str(request, "permission") {
            Some(name) => name,
            None => {
                return Ok(ApiResponse::invalid(
                    request.request_id,
                    "missing 'permission' field",
                ))
            }
        };
        let permission = match Permission::from_name(name) {
            Some(p) => p,
            None => {
                return Ok(ApiResponse::invalid(
                    request.request_id,
                    format!("unknown permission '{}'", name),
                ))
            }
        };

        let permission = permission & Permission::FULL;
        if permission.is_empty() {
            return Ok(ApiResponse::invalid(
                request.request_id,
                format!("permission '{}' is not grantable", name),
            ));
        }

        let app_id = caller.app_id.as_str();

        // Already held: answer without prompting.
        if caller.permissions.has(permission) {
            return Ok(ApiResponse::success(
                request.request_id,
                Some(json!({ "granted": true, "already": true })),
            ));
        }

        // Sticky denial from an earlier prompt.
        if kernel.permissions().is_denied(app_id, permission) {
            return Ok(ApiResponse::success(
                request.request_id,
                Some(json!({ "granted": false, "reason": "Previously denied" })),
            ));
        }

        if !kernel.policies().is_globally_allowed(permission) {
            return Ok(ApiResponse::success(
                request.request_id,
                Some(json!({ "granted": false, "reason": "Blocked by system policy" })),
            ));
        }

        let ticket = kernel.permissions().consent().begin(app_id, permission);
        let token = ticket.token();
        kernel.events().emit(KernelEvent::PermissionRequested {
            app_id: app_id.to_string(),
            permission,
        });

        match tokio::time::timeout(timeouts::CONSENT, ticket.decided()).await {
            Ok(true) => {
                if kernel.grant_permission(app_id, permission) {
                    Ok(ApiResponse::success(
                        request.request_id,
                        Some(json!({ "granted": true })),
                    ))
                } else {
                    Ok(ApiResponse::success(
                        request.request_id,
                        Some(json!({ "granted": false, "reason": "Blocked by system policy" })),
                    ))
                }
            }
            Ok(false) => {
                kernel
                    .permissions()
                    .store()
                    .record_denial(app_id, permission);
                Ok(ApiResponse::success(
                    request.request_id,
                    Some(json!({ "granted": false })),
                ))
            }
            Err(_) => {
                kernel
                    .permissions()
                    .consent()
                    .abandon(app_id, permission, token);
                tracing::debug!(
                    app_id = %app_id,
                    permission = %permission,
                    "Consent request timed out"
                );
                Ok(ApiResponse::success(
                    request.request_id,
                    Some(json!({ "granted": false, "reason": "Consent timed out" })),
                ))
            }
        }
    }
}

struct ShowNotificationHandler;

#[async_trait]
impl ApiHandler for ShowNotificationHandler {
    async fn handle(
        &self,
        kernel: &Kernel,
        caller: &ProcessInfo,
        request: &ApiRequest,
    ) -> EstarterResult<ApiResponse> {
        let title = data_str(request, "title").unwrap_or_default().to_string();
        let message = match data_str(request, "message") {
            Some(message) => message.to_string(),
            None => {
                return Ok(ApiResponse::invalid(
                    request.request_id,
                    "missing 'message' field",
                ))
            }
        };

        kernel.events().emit(KernelEvent::Notification {
            app_id: caller.app_id.clone(),
            title,
            message,
        });
        Ok(ApiResponse::success(request.request_id, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{PermissionManager, PermissionStore, PolicyStore};
    use crate::vfs::VirtualFs;
    use estarter_shared::ApiStatus;
    use tempfile::TempDir;

    fn test_kernel() -> (Arc<Kernel>, TempDir) {
        let dir = TempDir::new().unwrap();
        let permissions =
            PermissionManager::new(PermissionStore::load(dir.path().join("permissions.json")));
        let policies = PolicyStore::load(dir.path().join("system-policies.json"));
        let vfs = Arc::new(VirtualFs::new(dir.path().join("vfs")).unwrap());
        (Kernel::new(permissions, policies, vfs), dir)
    }

    async fn call(
        kernel: &Kernel,
        app_id: &str,
        command: ApiCommand,
        data: Option<serde_json::Value>,
    ) -> ApiResponse {
        let id = kernel.next_request_id();
        let request = match data {
            Some(data) => ApiRequest::with_data(command, id, data),
            None => ApiRequest::new(command, id),
        };
        kernel.handle_api(app_id, request).await
    }

    #[tokio::test]
    async fn test_ping() {
        let (kernel, _dir) = test_kernel();
        kernel.register_process("app.a", 1, "1.0", Permission::BASIC);

        let response = call(&kernel, "app.a", ApiCommand::Ping, None).await;
        assert_eq!(response.status, ApiStatus::Success);
        assert!(response.data.is_none());
    }

    #[tokio::test]
    async fn test_get_time_returns_unix_millis() {
        let (kernel, _dir) = test_kernel();
        kernel.register_process("app.a", 1, "1.0", Permission::empty());

        let response = call(&kernel, "app.a", ApiCommand::GetTime, None).await;
        assert!(response.is_success());
        let time = response.data.unwrap()["time"].as_i64().unwrap();
        assert!(time > 1_600_000_000_000);
    }

    #[tokio::test]
    async fn test_system_info_requires_permission() {
        let (kernel, _dir) = test_kernel();
        kernel.register_process("app.a", 1, "1.0", Permission::BASIC);

        let response = call(&kernel, "app.a", ApiCommand::GetSystemInfo, None).await;
        assert_eq!(response.status, ApiStatus::PermissionDenied);
        assert!(response.error.unwrap().contains("SYSTEM_INFO"));

        kernel.grant_permission("app.a", Permission::SYSTEM_INFO);
        let response = call(&kernel, "app.a", ApiCommand::GetSystemInfo, None).await;
        assert!(response.is_success());
        let data = response.data.unwrap();
        assert_eq!(data["process_count"].as_u64(), Some(1));
        assert_eq!(data["os"].as_str(), Some(std::env::consts::OS));
    }

    #[tokio::test]
    async fn test_get_permissions_snapshot() {
        let (kernel, _dir) = test_kernel();
        kernel.register_process("app.a", 1, "1.0", Permission::FILE_READ);

        let response = call(&kernel, "app.a", ApiCommand::GetPermissions, None).await;
        let data = response.data.unwrap();
        let granted: Vec<String> =
            serde_json::from_value(data["granted"].clone()).unwrap();
        assert!(granted.contains(&"FILE_READ".to_string()));
    }

    #[tokio::test]
    async fn test_check_permission_reports_missing() {
        let (kernel, _dir) = test_kernel();
        kernel.register_process("app.a", 1, "1.0", Permission::BASIC);

        let response = call(
            &kernel,
            "app.a",
            ApiCommand::CheckPermission,
            Some(json!({"permission": "Camera"})),
        )
        .await;
        let data = response.data.unwrap();
        assert_eq!(data["allowed"].as_bool(), Some(false));

        let response = call(
            &kernel,
            "app.a",
            ApiCommand::CheckPermission,
            Some(json!({"permission": "FileRead"})),
        )
        .await;
        assert_eq!(response.data.unwrap()["allowed"].as_bool(), Some(true));
    }

    #[tokio::test]
    async fn test_request_permission_already_granted() {
        let (kernel, _dir) = test_kernel();
        kernel.register_process("app.a", 1, "1.0", Permission::BASIC);

        let response = call(
            &kernel,
            "app.a",
            ApiCommand::RequestPermission,
            Some(json!({"permission": "FileRead"})),
        )
        .await;
        let data = response.data.unwrap();
        assert_eq!(data["granted"].as_bool(), Some(true));
        assert_eq!(data["already"].as_bool(), Some(true));
    }

    #[tokio::test]
    async fn test_request_permission_approved() {
        let (kernel, _dir) = test_kernel();
        kernel.register_process("app.a", 1, "1.0", Permission::BASIC);

        let mut rx = kernel.events().subscribe();
        let kernel_bg = kernel.clone();
        let approver = tokio::spawn(async move {
            loop {
                if let KernelEvent::PermissionRequested { app_id, permission } =
                    rx.recv().await.unwrap()
                {
                    kernel_bg.complete_permission_request(&app_id, permission, true);
                    break;
                }
            }
        });

        let response = call(
            &kernel,
            "app.a",
            ApiCommand::RequestPermission,
            Some(json!({"permission": "Camera"})),
        )
        .await;
        approver.await.unwrap();

        assert_eq!(response.data.unwrap()["granted"].as_bool(), Some(true));
        assert!(kernel.check_permission("app.a", Permission::CAMERA).allowed);
    }

    #[tokio::test]
    async fn test_request_permission_denied_is_sticky() {
        let (kernel, _dir) = test_kernel();
        kernel.register_process("app.a", 1, "1.0", Permission::BASIC);

        let mut rx = kernel.events().subscribe();
        let kernel_bg = kernel.clone();
        let denier = tokio::spawn(async move {
            loop {
                if let KernelEvent::PermissionRequested { app_id, permission } =
                    rx.recv().await.unwrap()
                {
                    kernel_bg.complete_permission_request(&app_id, permission, false);
                    break;
                }
            }
        });

        let response = call(
            &kernel,
            "app.a",
            ApiCommand::RequestPermission,
            Some(json!({"permission": "Camera"})),
        )
        .await;
        denier.await.unwrap();
        assert_eq!(response.data.unwrap()["granted"].as_bool(), Some(false));

        // A second request answers from the sticky denial without a prompt.
        let response = call(
            &kernel,
            "app.a",
            ApiCommand::RequestPermission,
            Some(json!({"permission": "Camera"})),
        )
        .await;
        let data = response.data.unwrap();
        assert_eq!(data["granted"].as_bool(), Some(false));
        assert_eq!(data["reason"].as_str(), Some("Previously denied"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_permission_timeout_is_denial() {
        let (kernel, _dir) = test_kernel();
        kernel.register_process("app.e", 1, "1.0", Permission::BASIC);

        // Nobody answers the prompt; the paused clock auto-advances past
        // the 30-second window.
        let response = call(
            &kernel,
            "app.e",
            ApiCommand::RequestPermission,
            Some(json!({"permission": "Camera"})),
        )
        .await;
        let data = response.data.unwrap();
        assert_eq!(data["granted"].as_bool(), Some(false));

        let info = kernel.get_process("app.e").unwrap();
        assert!(!info.permissions.has(Permission::CAMERA));
        // Timeout is not a sticky denial.
        assert!(!info.permissions.denied.contains(Permission::CAMERA));
        assert!(!kernel
            .permissions()
            .consent()
            .is_pending("app.e", Permission::CAMERA));
    }

    #[tokio::test]
    async fn test_request_admin_is_rejected() {
        let (kernel, _dir) = test_kernel();
        kernel.register_process("app.a", 1, "1.0", Permission::BASIC);

        let response = call(
            &kernel,
            "app.a",
            ApiCommand::RequestPermission,
            Some(json!({"permission": "Admin"})),
        )
        .await;
        assert_eq!(response.status, ApiStatus::InvalidRequest);
    }

    #[tokio::test]
    async fn test_show_notification_emits_event() {
        let (kernel, _dir) = test_kernel();
        kernel.register_process("app.a", 1, "1.0", Permission::BASIC);
        let mut rx = kernel.events().subscribe();

        let response = call(
            &kernel,
            "app.a",
            ApiCommand::ShowNotification,
            Some(json!({"title": "hi", "message": "there"})),
        )
        .await;
        assert!(response.is_success());

        loop {
            if let KernelEvent::Notification { app_id, message, .. } = rx.recv().await.unwrap() {
                assert_eq!(app_id, "app.a");
                assert_eq!(message, "there");
                break;
            }
        }
    }
}
