//! Kernel event stream.
//!
//! Events are broadcast in emission order to every subscriber; consumers
//! must not assume exclusive delivery, and a lagging receiver may observe
//! a gap (`RecvError::Lagged`).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::permissions::PolicyCategory;
use estarter_shared::{ApiCommand, ApiStatus, Permission};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KernelEvent {
    ProcessStarted {
        app_id: String,
    },
    ProcessTerminated {
        app_id: String,
    },
    /// Emitted for every routed API request, whatever its outcome.
    ApiCalled {
        app_id: String,
        command: ApiCommand,
        status: ApiStatus,
    },
    /// Consent prompt for the UI layer; completion flows back through
    /// `Kernel::complete_permission_request`.
    PermissionRequested {
        app_id: String,
        permission: Permission,
    },
    PolicyChanged {
        category: PolicyCategory,
        allowed: bool,
    },
    /// An app host finished; emitted exactly once per launch.
    HostExited {
        app_id: String,
        exit_code: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Notification {
        app_id: String,
        title: String,
        message: String,
    },
}

/// Broadcast fan-out for [`KernelEvent`]s.
pub struct EventBus {
    tx: broadcast::Sender<KernelEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KernelEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Having no subscribers is not an error.
    pub fn emit(&self, event: KernelEvent) {
        tracing::trace!(?event, "Kernel event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
