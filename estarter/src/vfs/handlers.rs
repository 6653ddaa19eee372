//! Filesystem API handlers registered on the kernel.
//!
//! Payload conventions: binary data travels base64-encoded in a `data`
//! field, text in a `text` field. Writes prefer `data` and fall back to
//! treating the payload as UTF-8 text when base64 decoding fails.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;

use super::{FileResult, VirtualFs, VirtualPath};
use crate::kernel::{ApiHandler, Kernel, ProcessInfo};
use estarter_shared::{ApiCommand, ApiRequest, ApiResponse, ApiStatus, EstarterResult};

pub fn register_fs_handlers(kernel: &Kernel) -> EstarterResult<()> {
    kernel.register_handler(ApiCommand::ReadFile, Arc::new(ReadFileHandler))?;
    kernel.register_handler(ApiCommand::ReadText, Arc::new(ReadTextHandler))?;
    kernel.register_handler(ApiCommand::WriteFile, Arc::new(WriteFileHandler))?;
    kernel.register_handler(ApiCommand::WriteText, Arc::new(WriteTextHandler))?;
    kernel.register_handler(ApiCommand::DeleteFile, Arc::new(DeleteFileHandler))?;
    kernel.register_handler(ApiCommand::FileExists, Arc::new(FileExistsHandler))?;
    kernel.register_handler(ApiCommand::GetFileInfo, Arc::new(GetFileInfoHandler))?;
    kernel.register_handler(ApiCommand::CreateDirectory, Arc::new(CreateDirectoryHandler))?;
    kernel.register_handler(ApiCommand::ListDirectory, Arc::new(ListDirectoryHandler))?;
    kernel.register_handler(ApiCommand::DeleteDirectory, Arc::new(DeleteDirectoryHandler))?;
    Ok(())
}

/// Parse the mandatory `path` field, or explain which request was short.
fn parse_path(request: &ApiRequest) -> Result<VirtualPath, ApiResponse> {
    let raw = request
        .data
        .as_ref()
        .and_then(|d| d.get("path"))
        .and_then(|p| p.as_str())
        .ok_or_else(|| ApiResponse::invalid(request.request_id, "missing 'path' field"))?;

    VirtualPath::parse(raw)
        .map_err(|_| ApiResponse::error(request.request_id, "Access denied or invalid path"))
}

/// Translate a failed [`FileResult`] into the matching response status.
fn fail_response(request_id: u64, result: &FileResult) -> ApiResponse {
    let message = result
        .error
        .clone()
        .unwrap_or_else(|| "unknown filesystem error".to_string());
    let status = if result.is_not_found() {
        ApiStatus::NotFound
    } else {
        ApiStatus::Error
    };
    ApiResponse::failure(request_id, status, message)
}

struct ReadFileHandler;

#[async_trait]
impl ApiHandler for ReadFileHandler {
    async fn handle(
        &self,
        kernel: &Kernel,
        caller: &ProcessInfo,
        request: &ApiRequest,
    ) -> EstarterResult<ApiResponse> {
        let vpath = match parse_path(request) {
            Ok(path) => path,
            Err(response) => return Ok(response),
        };
        let (result, data) = kernel.vfs().read_file(&vpath, &caller.app_id).await;
        if !result.success {
            return Ok(fail_response(request.request_id, &result));
        }
        Ok(ApiResponse::success(
            request.request_id,
            Some(json!({
                "data": BASE64.encode(data.unwrap_or_default()),
                "size": result.bytes_affected,
            })),
        ))
    }
}

struct ReadTextHandler;

#[async_trait]
impl ApiHandler for ReadTextHandler {
    async fn handle(
        &self,
        kernel: &Kernel,
        caller: &ProcessInfo,
        request: &ApiRequest,
    ) -> EstarterResult<ApiResponse> {
        let vpath = match parse_path(request) {
            Ok(path) => path,
            Err(response) => return Ok(response),
        };
        let (result, text) = kernel.vfs().read_text(&vpath, &caller.app_id).await;
        if !result.success {
            return Ok(fail_response(request.request_id, &result));
        }
        Ok(ApiResponse::success(
            request.request_id,
            Some(json!({ "text": text.unwrap_or_default() })),
        ))
    }
}

/// Extract write payload bytes: `data` (base64, with UTF-8 fallback on
/// decode failure), else `text`.
fn write_payload(request: &ApiRequest) -> Result<Vec<u8>, ApiResponse> {
    let data = request.data.as_ref();
    if let Some(encoded) = data.and_then(|d| d.get("data")).and_then(|v| v.as_str()) {
        return Ok(match BASE64.decode(encoded) {
            Ok(bytes) => bytes,
            Err(_) => encoded.as_bytes().to_vec(),
        });
    }
    if let Some(text) = data.and_then(|d| d.get("text")).and_then(|v| v.as_str()) {
        return Ok(text.as_bytes().to_vec());
    }
    Err(ApiResponse::invalid(
        request.request_id,
        "missing 'data' or 'text' field",
    ))
}

struct WriteFileHandler;

#[async_trait]
impl ApiHandler for WriteFileHandler {
    async fn handle(
        &self,
        kernel: &Kernel,
        caller: &ProcessInfo,
        request: &ApiRequest,
    ) -> EstarterResult<ApiResponse> {
        let vpath = match parse_path(request) {
            Ok(path) => path,
            Err(response) => return Ok(response),
        };
        let bytes = match write_payload(request) {
            Ok(bytes) => bytes,
            Err(response) => return Ok(response),
        };
        let result = kernel.vfs().write_file(&vpath, &caller.app_id, &bytes).await;
        if !result.success {
            return Ok(fail_response(request.request_id, &result));
        }
        Ok(ApiResponse::success(
            request.request_id,
            Some(json!({ "written": result.bytes_affected })),
        ))
    }
}

struct WriteTextHandler;

#[async_trait]
impl ApiHandler for WriteTextHandler {
    async fn handle(
        &self,
        kernel: &Kernel,
        caller: &ProcessInfo,
        request: &ApiRequest,
    ) -> EstarterResult<ApiResponse> {
        let vpath = match parse_path(request) {
            Ok(path) => path,
            Err(response) => return Ok(response),
        };
        let text = match request
            .data
            .as_ref()
            .and_then(|d| d.get("text"))
            .and_then(|v| v.as_str())
        {
            Some(text) => text,
            None => {
                return Ok(ApiResponse::invalid(
                    request.request_id,
                    "missing 'text' field",
                ))
            }
        };
        let result = kernel.vfs().write_text(&vpath, &caller.app_id, text).await;
        if !result.success {
            return Ok(fail_response(request.request_id, &result));
        }
        Ok(ApiResponse::success(
            request.request_id,
            Some(json!({ "written": result.bytes_affected })),
        ))
    }
}

struct DeleteFileHandler;

#[async_trait]
impl ApiHandler for DeleteFileHandler {
    async fn handle(
        &self,
        kernel: &Kernel,
        caller: &ProcessInfo,
        request: &ApiRequest,
    ) -> EstarterResult<ApiResponse> {
        let vpath = match parse_path(request) {
            Ok(path) => path,
            Err(response) => return Ok(response),
        };
        let result = kernel.vfs().delete_file(&vpath, &caller.app_id).await;
        if !result.success {
            return Ok(fail_response(request.request_id, &result));
        }
        Ok(ApiResponse::success(
            request.request_id,
            Some(json!({ "freed": result.bytes_affected })),
        ))
    }
}

struct FileExistsHandler;

#[async_trait]
impl ApiHandler for FileExistsHandler {
    async fn handle(
        &self,
        kernel: &Kernel,
        caller: &ProcessInfo,
        request: &ApiRequest,
    ) -> EstarterResult<ApiResponse> {
        let vpath = match parse_path(request) {
            Ok(path) => path,
            Err(response) => return Ok(response),
        };
        let (result, exists) = kernel.vfs().file_exists(&vpath, &caller.app_id).await;
        if !result.success {
            return Ok(fail_response(request.request_id, &result));
        }
        Ok(ApiResponse::success(
            request.request_id,
            Some(json!({ "exists": exists })),
        ))
    }
}

struct GetFileInfoHandler;

#[async_trait]
impl ApiHandler for GetFileInfoHandler {
    async fn handle(
        &self,
        kernel: &Kernel,
        caller: &ProcessInfo,
        request: &ApiRequest,
    ) -> EstarterResult<ApiResponse> {
        let vpath = match parse_path(request) {
            Ok(path) => path,
            Err(response) => return Ok(response),
        };
        let (result, info) = kernel.vfs().get_file_info(&vpath, &caller.app_id).await;
        if !result.success {
            return Ok(fail_response(request.request_id, &result));
        }
        Ok(ApiResponse::success(
            request.request_id,
            Some(serde_json::to_value(info)?),
        ))
    }
}

struct CreateDirectoryHandler;

#[async_trait]
impl ApiHandler for CreateDirectoryHandler {
    async fn handle(
        &self,
        kernel: &Kernel,
        caller: &ProcessInfo,
        request: &ApiRequest,
    ) -> EstarterResult<ApiResponse> {
        let vpath = match parse_path(request) {
            Ok(path) => path,
            Err(response) => return Ok(response),
        };
        let result = kernel.vfs().create_directory(&vpath, &caller.app_id).await;
        if !result.success {
            return Ok(fail_response(request.request_id, &result));
        }
        Ok(ApiResponse::success(request.request_id, None))
    }
}

struct ListDirectoryHandler;

#[async_trait]
impl ApiHandler for ListDirectoryHandler {
    async fn handle(
        &self,
        kernel: &Kernel,
        caller: &ProcessInfo,
        request: &ApiRequest,
    ) -> EstarterResult<ApiResponse> {
        let vpath = match parse_path(request) {
            Ok(path) => path,
            Err(response) => return Ok(response),
        };
        let (result, entries) = kernel.vfs().list_directory(&vpath, &caller.app_id).await;
        if !result.success {
            return Ok(fail_response(request.request_id, &result));
        }
        Ok(ApiResponse::success(
            request.request_id,
            Some(json!({ "entries": entries })),
        ))
    }
}

struct DeleteDirectoryHandler;

#[async_trait]
impl ApiHandler for DeleteDirectoryHandler {
    async fn handle(
        &self,
        kernel: &Kernel,
        caller: &ProcessInfo,
        request: &ApiRequest,
    ) -> EstarterResult<ApiResponse> {
        let vpath = match parse_path(request) {
            Ok(path) => path,
            Err(response) => return Ok(response),
        };
        let recursive = request
            .data
            .as_ref()
            .and_then(|d| d.get("recursive"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let result = kernel
            .vfs()
            .delete_directory(&vpath, &caller.app_id, recursive)
            .await;
        if !result.success {
            return Ok(fail_response(request.request_id, &result));
        }
        Ok(ApiResponse::success(
            request.request_id,
            Some(json!({ "freed": result.bytes_affected })),
        ))
    }
}
