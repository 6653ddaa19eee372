//! Live process records and their lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use estarter_shared::{EstarterError, EstarterResult, PermissionSet};

/// Lifecycle state of a registered process.
///
/// Transitions are validated; a replaced or crashed entry ends in
/// `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Starting,
    Running,
    Suspended,
    Terminating,
    Terminated,
}

impl ProcessState {
    pub fn is_live(&self) -> bool {
        !matches!(self, ProcessState::Terminated)
    }

    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, target),
            (Starting, Running)
                | (Starting, Terminating)
                | (Starting, Terminated)
                | (Running, Suspended)
                | (Running, Terminating)
                | (Running, Terminated)
                | (Suspended, Running)
                | (Suspended, Terminating)
                | (Suspended, Terminated)
                | (Terminating, Terminated)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Suspended => "suspended",
            ProcessState::Terminating => "terminating",
            ProcessState::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable snapshot of a registered process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub app_id: String,
    /// OS process id; 0 for wasm hosts.
    pub os_pid: u32,
    pub version: String,
    pub start_time: DateTime<Utc>,
    pub permissions: PermissionSet,
    pub state: ProcessState,
}

/// Live registry entry. Mutated only by the kernel.
///
/// The permission set is published as a whole value; readers observe either
/// the previous or the next set, never a partial update.
pub struct Process {
    app_id: String,
    os_pid: u32,
    version: String,
    start_time: DateTime<Utc>,
    permissions: parking_lot::RwLock<PermissionSet>,
    state: parking_lot::RwLock<ProcessState>,
}

impl Process {
    pub fn new(app_id: String, os_pid: u32, version: String, permissions: PermissionSet) -> Self {
        Self {
            app_id,
            os_pid,
            version,
            start_time: Utc::now(),
            permissions: parking_lot::RwLock::new(permissions),
            state: parking_lot::RwLock::new(ProcessState::Starting),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn os_pid(&self) -> u32 {
        self.os_pid
    }

    pub fn permissions(&self) -> PermissionSet {
        *self.permissions.read()
    }

    /// Replace the published permission set wholesale.
    pub fn set_permissions(&self, set: PermissionSet) {
        *self.permissions.write() = set;
    }

    pub fn state(&self) -> ProcessState {
        *self.state.read()
    }

    /// Attempt a validated state transition.
    pub fn transition_to(&self, target: ProcessState) -> EstarterResult<()> {
        let mut state = self.state.write();
        if !state.can_transition_to(target) {
            return Err(EstarterError::InvalidState(format!(
                "process {}: cannot transition from {} to {}",
                self.app_id, *state, target
            )));
        }
        *state = target;
        Ok(())
    }

    /// Force a state without validation (replacement, crash recovery).
    pub fn force_state(&self, target: ProcessState) {
        *self.state.write() = target;
    }

    pub fn snapshot(&self) -> ProcessInfo {
        ProcessInfo {
            app_id: self.app_id.clone(),
            os_pid: self.os_pid,
            version: self.version.clone(),
            start_time: self.start_time,
            permissions: self.permissions(),
            state: self.state(),
        }
    }
}
