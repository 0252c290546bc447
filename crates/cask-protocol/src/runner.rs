use async_trait::async_trait;

use crate::error::{LaunchError, LaunchResult};
use crate::event::RunnerSignal;
use crate::session::{InvocationId, LaunchSpec};

/// Handle to one live runner invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunnerHandle {
    pub invocation_id: InvocationId,
}

#[async_trait]
pub trait RunnerSignalSubscription: Send {
    /// Next signal from the invocation. `Ok(None)` means the stream is
    /// closed and no further signals will arrive.
    async fn next_signal(&mut self) -> LaunchResult<Option<RunnerSignal>>;
}

pub type RunnerSignalStream = Box<dyn RunnerSignalSubscription>;

/// Start/stop control over runner invocations.
#[async_trait]
pub trait RunnerControl: Send + Sync {
    /// Starts the invocation, returning its handle together with the
    /// already-attached signal stream. Attachment happens before the
    /// invocation can emit anything, so even a child that exits
    /// immediately is observed with its real code.
    async fn start(&self, spec: LaunchSpec) -> LaunchResult<(RunnerHandle, RunnerSignalStream)>;

    /// Request teardown of the invocation's process tree. Idempotent and
    /// non-blocking: actual teardown continues asynchronously and the
    /// eventual `Exited` signal is the only authoritative confirmation.
    async fn stop(&self, handle: &RunnerHandle) -> LaunchResult<()>;
}

#[async_trait]
pub trait RunnerInfo: Send + Sync {
    /// Name of the external binary this runner invokes.
    fn binary_name(&self) -> String;

    /// Verify the external binary can be located. Failure here is fatal
    /// at application startup.
    async fn health_check(&self) -> LaunchResult<()>;
}

impl RunnerHandle {
    pub fn not_found(&self) -> LaunchError {
        LaunchError::SessionNotFound(self.invocation_id.context().to_string())
    }
}
