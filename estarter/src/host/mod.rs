//! App hosts: the in-process supervisors for running apps.
//!
//! Two variants behind one lifecycle contract: a native OS process with a
//! JSON-RPC stdio bridge, and a WebAssembly module under an embedded VM.

mod factory;
mod process;
mod wasm;

pub use factory::create_host;
pub use process::ProcessHost;
pub use wasm::WasmHost;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use estarter_shared::EstarterResult;

/// Host lifecycle.
///
/// `Created → Starting → Running → Stopping → Stopped`; `Faulted` is
/// reachable from any non-terminal state and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Faulted,
}

impl HostState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HostState::Stopped | HostState::Faulted)
    }

    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: HostState) -> bool {
        use HostState::*;
        if target == Faulted {
            return !self.is_terminal();
        }
        matches!(
            (self, target),
            (Created, Starting)
                | (Created, Stopped)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Running, Stopped)
                | (Stopping, Stopped)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostState::Created => "created",
            HostState::Starting => "starting",
            HostState::Running => "running",
            HostState::Stopping => "stopping",
            HostState::Stopped => "stopped",
            HostState::Faulted => "faulted",
        }
    }
}

impl std::fmt::Display for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The unified host handle, a two-arm variant over the runtime kinds.
#[derive(Clone)]
pub enum AppHost {
    Process(Arc<ProcessHost>),
    Wasm(Arc<WasmHost>),
}

impl AppHost {
    pub fn app_id(&self) -> &str {
        match self {
            AppHost::Process(host) => host.app_id(),
            AppHost::Wasm(host) => host.app_id(),
        }
    }

    pub fn state(&self) -> HostState {
        match self {
            AppHost::Process(host) => host.state(),
            AppHost::Wasm(host) => host.state(),
        }
    }

    /// Legal only from `Created`; drives `Starting → Running` (or
    /// `Faulted`).
    pub async fn start(&self) -> EstarterResult<()> {
        match self {
            AppHost::Process(host) => ProcessHost::start(host).await,
            AppHost::Wasm(host) => WasmHost::start(host).await,
        }
    }

    /// Drive toward `Stopped` from `Running`/`Stopping`; no-op in terminal
    /// states.
    pub async fn stop(&self) -> EstarterResult<()> {
        match self {
            AppHost::Process(host) => host.stop().await,
            AppHost::Wasm(host) => host.stop().await,
        }
    }

    /// Idempotent; implies `stop()` first.
    pub async fn dispose(&self) {
        match self {
            AppHost::Process(host) => host.dispose().await,
            AppHost::Wasm(host) => host.dispose().await,
        }
    }

    /// Resolves once the hosted app has exited (immediately if it already
    /// has).
    pub async fn wait_exited(&self) {
        match self {
            AppHost::Process(host) => host.wait_exited().await,
            AppHost::Wasm(host) => host.wait_exited().await,
        }
    }
}
