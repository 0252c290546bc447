use serde::{Deserialize, Serialize};

use crate::session::SessionSlot;

/// Adapter-level status signal raised while one umu invocation runs.
/// `Exited` is terminal and fires exactly once per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerSignal {
    /// The runner invocation has begun.
    Starting,
    /// A runtime-update step completed inside the runner.
    Updated,
    /// The compatibility layer's main process is live; no further status
    /// classification is performed.
    ProtonStarted,
    /// Teardown was requested through `stop`.
    Stopping,
    /// A requested teardown ended the process.
    Stopped,
    /// The external process was reaped.
    Exited { code: i32 },
}

impl RunnerSignal {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exited { .. })
    }
}

/// Session-level event delivered to observers. The same union as
/// [`RunnerSignal`] with the terminal variant carrying the slot the
/// session was admitted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaunchEvent {
    Starting,
    Updated,
    ProtonStarted,
    Stopping,
    Stopped,
    Exited { slot: SessionSlot, code: i32 },
}

impl LaunchEvent {
    pub fn from_signal(signal: RunnerSignal, slot: SessionSlot) -> Self {
        match signal {
            RunnerSignal::Starting => Self::Starting,
            RunnerSignal::Updated => Self::Updated,
            RunnerSignal::ProtonStarted => Self::ProtonStarted,
            RunnerSignal::Stopping => Self::Stopping,
            RunnerSignal::Stopped => Self::Stopped,
            RunnerSignal::Exited { code } => Self::Exited { slot, code },
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exited { .. })
    }
}
