use cask_protocol::event::LaunchEvent;
use cask_protocol::ids::ContextIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchEventEnvelope {
    pub context_index: ContextIndex,
    pub sequence: u64,
    pub received_at_monotonic_nanos: u64,
    pub event: LaunchEvent,
}
