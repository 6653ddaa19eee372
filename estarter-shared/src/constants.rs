//! Protocol constants shared between the runtime and hosted apps.

/// Environment variables injected into hosted native processes.
pub mod env {
    /// Always set to [`MODE_HOSTED`] for processes launched by the runtime.
    pub const MODE: &str = "ESTARTER_MODE";
    /// The app id the process was launched as.
    pub const APP_ID: &str = "ESTARTER_APP_ID";

    pub const MODE_HOSTED: &str = "hosted";
}

/// JSON-RPC method names on the child stdio channel.
pub mod rpc_methods {
    /// `api_call(command: string, data?: object) -> ApiResponse`
    pub const API_CALL: &str = "api_call";
    /// `log(level: string, message: string)` fire-and-forget notification.
    pub const LOG: &str = "log";
}

/// Host imports a wasm module may link against.
pub mod wasm_imports {
    pub const MODULE: &str = "env";
    /// `estarter_log(ptr: i32, len: i32)`
    pub const LOG: &str = "estarter_log";
    /// `estarter_api_call(cmd_ptr, cmd_len, data_ptr, data_len) -> i32`
    pub const API_CALL: &str = "estarter_api_call";

    /// Required exports.
    pub const EXPORT_MEMORY: &str = "memory";
    pub const EXPORT_START: &str = "_start";
}

/// Timeouts baked into the protocol.
pub mod timeouts {
    use std::time::Duration;

    /// Default bound on a single API call, applied at the host bridge.
    pub const API_CALL: Duration = Duration::from_secs(30);
    /// User-consent wait; expiry counts as denial.
    pub const CONSENT: Duration = Duration::from_secs(30);
    /// Graceful-shutdown window before the process tree is killed.
    pub const STOP_GRACE: Duration = Duration::from_secs(5);
}
