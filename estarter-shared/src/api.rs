//! The uniform request/reply unit for every kernel-mediated operation.
//!
//! The status integers are part of the guest-visible ABI and must stay
//! stable; see the command table for the static permission requirements.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::permissions::Permission;

// ============================================================================
// API STATUS
// ============================================================================

/// Outcome of an API request.
///
/// The integer encoding is exposed to guests (it is all a wasm guest ever
/// sees of a response) and is stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ApiStatus {
    Success = 0,
    Error = 1,
    PermissionDenied = 2,
    NotFound = 3,
    InvalidRequest = 4,
    Timeout = 5,
    Busy = 6,
    NotSupported = 7,
}

impl ApiStatus {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ApiStatus::Success),
            1 => Some(ApiStatus::Error),
            2 => Some(ApiStatus::PermissionDenied),
            3 => Some(ApiStatus::NotFound),
            4 => Some(ApiStatus::InvalidRequest),
            5 => Some(ApiStatus::Timeout),
            6 => Some(ApiStatus::Busy),
            7 => Some(ApiStatus::NotSupported),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiStatus::Success => "success",
            ApiStatus::Error => "error",
            ApiStatus::PermissionDenied => "permission_denied",
            ApiStatus::NotFound => "not_found",
            ApiStatus::InvalidRequest => "invalid_request",
            ApiStatus::Timeout => "timeout",
            ApiStatus::Busy => "busy",
            ApiStatus::NotSupported => "not_supported",
        }
    }
}

impl From<ApiStatus> for i32 {
    fn from(status: ApiStatus) -> i32 {
        status.as_i32()
    }
}

impl TryFrom<i32> for ApiStatus {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, String> {
        ApiStatus::from_i32(code).ok_or_else(|| format!("unknown api status code {}", code))
    }
}

impl std::fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// API COMMAND
// ============================================================================

/// Numeric command codes behind the string commands hosted apps send.
///
/// Each command carries a static permission mask checked by the kernel
/// before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum ApiCommand {
    Ping = 1,
    GetTime = 2,
    GetSystemInfo = 3,
    GetProcessList = 4,

    CheckPermission = 10,
    GetPermissions = 11,
    RequestPermission = 12,

    ReadFile = 20,
    ReadText = 21,
    WriteFile = 22,
    WriteText = 23,
    DeleteFile = 24,
    FileExists = 25,
    GetFileInfo = 26,
    CreateDirectory = 27,
    ListDirectory = 28,
    DeleteDirectory = 29,

    ShowNotification = 40,
}

impl ApiCommand {
    pub const ALL: &'static [ApiCommand] = &[
        ApiCommand::Ping,
        ApiCommand::GetTime,
        ApiCommand::GetSystemInfo,
        ApiCommand::GetProcessList,
        ApiCommand::CheckPermission,
        ApiCommand::GetPermissions,
        ApiCommand::RequestPermission,
        ApiCommand::ReadFile,
        ApiCommand::ReadText,
        ApiCommand::WriteFile,
        ApiCommand::WriteText,
        ApiCommand::DeleteFile,
        ApiCommand::FileExists,
        ApiCommand::GetFileInfo,
        ApiCommand::CreateDirectory,
        ApiCommand::ListDirectory,
        ApiCommand::DeleteDirectory,
        ApiCommand::ShowNotification,
    ];

    pub fn code(&self) -> u16 {
        *self as u16
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiCommand::Ping => "ping",
            ApiCommand::GetTime => "get_time",
            ApiCommand::GetSystemInfo => "get_system_info",
            ApiCommand::GetProcessList => "get_process_list",
            ApiCommand::CheckPermission => "check_permission",
            ApiCommand::GetPermissions => "get_permissions",
            ApiCommand::RequestPermission => "request_permission",
            ApiCommand::ReadFile => "read_file",
            ApiCommand::ReadText => "read_text",
            ApiCommand::WriteFile => "write_file",
            ApiCommand::WriteText => "write_text",
            ApiCommand::DeleteFile => "delete_file",
            ApiCommand::FileExists => "file_exists",
            ApiCommand::GetFileInfo => "get_file_info",
            ApiCommand::CreateDirectory => "create_directory",
            ApiCommand::ListDirectory => "list_directory",
            ApiCommand::DeleteDirectory => "delete_directory",
            ApiCommand::ShowNotification => "show_notification",
        }
    }

    /// Permissions the caller must hold before the handler runs.
    pub fn required_permissions(&self) -> Permission {
        match self {
            ApiCommand::Ping
            | ApiCommand::GetTime
            | ApiCommand::CheckPermission
            | ApiCommand::GetPermissions
            | ApiCommand::RequestPermission => Permission::empty(),

            ApiCommand::GetSystemInfo | ApiCommand::GetProcessList => Permission::SYSTEM_INFO,

            ApiCommand::ReadFile
            | ApiCommand::ReadText
            | ApiCommand::FileExists
            | ApiCommand::GetFileInfo
            | ApiCommand::ListDirectory => Permission::FILE_READ,

            ApiCommand::WriteFile | ApiCommand::WriteText | ApiCommand::CreateDirectory => {
                Permission::FILE_WRITE
            }

            ApiCommand::DeleteFile | ApiCommand::DeleteDirectory => Permission::FILE_DELETE,

            ApiCommand::ShowNotification => Permission::NOTIFICATION,
        }
    }
}

impl std::str::FromStr for ApiCommand {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApiCommand::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or(())
    }
}

impl std::fmt::Display for ApiCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// REQUEST / RESPONSE
// ============================================================================

/// A kernel-mediated API request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    pub command: ApiCommand,
    pub request_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(command: ApiCommand, request_id: u64) -> Self {
        Self {
            command,
            request_id,
            data: None,
        }
    }

    pub fn with_data(command: ApiCommand, request_id: u64, data: serde_json::Value) -> Self {
        Self {
            command,
            request_id,
            data: Some(data),
        }
    }
}

/// The reply to an [`ApiRequest`], echoing its `request_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub request_id: u64,
    pub status: ApiStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    pub fn success(request_id: u64, data: Option<serde_json::Value>) -> Self {
        Self {
            request_id,
            status: ApiStatus::Success,
            data,
            error: None,
        }
    }

    pub fn failure(request_id: u64, status: ApiStatus, error: impl Into<String>) -> Self {
        Self {
            request_id,
            status,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn error(request_id: u64, message: impl Into<String>) -> Self {
        Self::failure(request_id, ApiStatus::Error, message)
    }

    pub fn permission_denied(request_id: u64, missing: Permission) -> Self {
        Self::failure(
            request_id,
            ApiStatus::PermissionDenied,
            format!("missing permission: {}", missing),
        )
    }

    pub fn not_supported(request_id: u64, command: &str) -> Self {
        Self::failure(
            request_id,
            ApiStatus::NotSupported,
            format!("unsupported command: {}", command),
        )
    }

    pub fn invalid(request_id: u64, message: impl Into<String>) -> Self {
        Self::failure(request_id, ApiStatus::InvalidRequest, message)
    }

    pub fn is_success(&self) -> bool {
        self.status == ApiStatus::Success
    }
}

/// Process-wide monotonic request id source.
#[derive(Debug, Default)]
pub struct RequestIdGen {
    next: AtomicU64,
}

impl RequestIdGen {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
