//! Length-framed JSON-RPC 2.0 messages for the child stdio channel.
//!
//! Every frame is a 4-byte big-endian length followed by that many bytes of
//! UTF-8 JSON. The host reads requests from the child's stdout and writes
//! responses to its stdin; `log` notifications carry no id and get no reply.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{EstarterError, EstarterResult};

/// Upper bound on a single frame. Oversized frames indicate a corrupt or
/// hostile peer and abort the connection.
pub const MAX_FRAME_LEN: u32 = 4 * 1024 * 1024;

pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC request or notification (no `id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RpcRequest {
    pub fn call(id: u64, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn notification(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC response carrying either `result` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcResponse {
    pub fn result(id: u64, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Standard JSON-RPC error codes used on the channel.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> EstarterResult<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .map_err(|_| EstarterError::Rpc("frame too large to encode".to_string()))?;
    if len > MAX_FRAME_LEN {
        return Err(EstarterError::Rpc(format!(
            "outgoing frame of {} bytes exceeds limit of {}",
            len, MAX_FRAME_LEN
        )));
    }
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| EstarterError::Rpc(format!("failed to write frame header: {}", e)))?;
    writer
        .write_all(payload)
        .await
        .map_err(|e| EstarterError::Rpc(format!("failed to write frame body: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| EstarterError::Rpc(format!("failed to flush frame: {}", e)))?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` on a clean end-of-stream at a frame boundary (the
/// peer closed its pipe), an error for truncated or oversized frames.
pub async fn read_frame<R>(reader: &mut R) -> EstarterResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => {
            return Err(EstarterError::Rpc(format!(
                "failed to read frame header: {}",
                e
            )))
        }
    }

    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_LEN {
        return Err(EstarterError::Rpc(format!(
            "incoming frame of {} bytes exceeds limit of {}",
            len, MAX_FRAME_LEN
        )));
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| EstarterError::Rpc(format!("truncated frame body: {}", e)))?;
    Ok(Some(payload))
}

/// Serialize and frame one message.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> EstarterResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(message)?;
    write_frame(writer, &payload).await
}

/// Read and deserialize one message; `Ok(None)` on clean end-of-stream.
pub async fn read_message<R, T>(reader: &mut R) -> EstarterResult<Option<T>>
where
    R: AsyncRead + Unpin,
    T: serde::de::DeserializeOwned,
{
    match read_frame(reader).await? {
        None => Ok(None),
        Some(payload) => {
            let message = serde_json::from_slice(&payload)
                .map_err(|e| EstarterError::Rpc(format!("malformed frame: {}", e)))?;
            Ok(Some(message))
        }
    }
}
