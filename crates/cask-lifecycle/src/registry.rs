use std::collections::HashMap;

use cask_protocol::error::{LaunchError, LaunchResult};
use cask_protocol::ids::{ContextIndex, ShortcutHash};
use cask_protocol::runner::RunnerHandle;
use cask_protocol::session::{InvocationId, SessionHandle, SessionSlot};

use crate::state::SessionState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub handle: SessionHandle,
    pub runner_handle: RunnerHandle,
    pub state: SessionState,
}

/// Pure bookkeeping for active launch sessions. Shortcut slots admit at
/// most one session; one-time launches stack without limit. Sessions are
/// keyed by context index, never by slot value.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    next_context: u64,
    sessions: HashMap<ContextIndex, SessionRecord>,
}

impl SessionRegistry {
    pub fn admit(
        &mut self,
        slot: SessionSlot,
        hash: Option<ShortcutHash>,
    ) -> LaunchResult<SessionHandle> {
        if let Some(index) = slot.shortcut_index() {
            if self.slot_is_running(index) {
                return Err(LaunchError::AlreadyRunning(index));
            }
        }

        let context = self.allocate_context()?;
        let handle = SessionHandle {
            slot,
            context_index: context,
            hash,
        };
        self.sessions.insert(
            context,
            SessionRecord {
                handle: handle.clone(),
                runner_handle: RunnerHandle {
                    invocation_id: InvocationId::new(context),
                },
                state: SessionState::Starting,
            },
        );
        Ok(handle)
    }

    pub fn remove(&mut self, context: ContextIndex) -> Option<SessionRecord> {
        let record = self.sessions.remove(&context);
        // Aggregate state resets once the prefix is idle; context indexes
        // are only guaranteed unique while any session is active.
        if self.sessions.is_empty() {
            self.next_context = 0;
        }
        record
    }

    pub fn set_state(&mut self, context: ContextIndex, state: SessionState) -> bool {
        let Some(record) = self.sessions.get_mut(&context) else {
            return false;
        };
        record.state = state;
        true
    }

    pub fn state(&self, context: ContextIndex) -> Option<SessionState> {
        self.sessions.get(&context).map(|record| record.state)
    }

    pub fn runner_handle(&self, context: ContextIndex) -> Option<RunnerHandle> {
        self.sessions.get(&context).map(|record| record.runner_handle)
    }

    pub fn context_for_slot(&self, index: usize) -> Option<ContextIndex> {
        self.sessions
            .values()
            .find(|record| record.handle.slot == SessionSlot::Shortcut(index))
            .map(|record| record.handle.context_index)
    }

    pub fn slot_is_running(&self, index: usize) -> bool {
        self.context_for_slot(index).is_some()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn active_handles(&self) -> Vec<SessionHandle> {
        let mut handles: Vec<SessionHandle> = self
            .sessions
            .values()
            .map(|record| record.handle.clone())
            .collect();
        handles.sort_by_key(|handle| handle.context_index.value());
        handles
    }

    fn allocate_context(&mut self) -> LaunchResult<ContextIndex> {
        let context = ContextIndex::new(self.next_context);
        self.next_context = self
            .next_context
            .checked_add(1)
            .ok_or_else(|| LaunchError::Internal("launch context space exhausted".to_owned()))?;
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use cask_protocol::error::LaunchError;
    use cask_protocol::session::SessionSlot;

    use super::SessionRegistry;
    use crate::state::SessionState;

    #[test]
    fn shortcut_slots_admit_at_most_one_session() {
        let mut registry = SessionRegistry::default();
        registry
            .admit(SessionSlot::Shortcut(0), None)
            .expect("first admission");

        let rejected = registry
            .admit(SessionSlot::Shortcut(0), None)
            .expect_err("duplicate slot must be rejected");
        assert_eq!(rejected, LaunchError::AlreadyRunning(0));

        registry
            .admit(SessionSlot::Shortcut(1), None)
            .expect("other slot admits");
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn one_time_sessions_stack_with_distinct_contexts() {
        let mut registry = SessionRegistry::default();
        let first = registry
            .admit(SessionSlot::OneTime, None)
            .expect("first one-time");
        let second = registry
            .admit(SessionSlot::OneTime, None)
            .expect("second one-time");

        assert_ne!(first.context_index, second.context_index);
        assert_eq!(registry.active_count(), 2);

        registry.remove(first.context_index);
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.state(second.context_index), Some(SessionState::Starting));
    }

    #[test]
    fn contexts_stay_unique_while_sessions_remain_and_reset_on_drain() {
        let mut registry = SessionRegistry::default();
        let first = registry
            .admit(SessionSlot::Shortcut(0), None)
            .expect("admit first");
        let second = registry
            .admit(SessionSlot::OneTime, None)
            .expect("admit second");
        registry.remove(first.context_index);

        let third = registry
            .admit(SessionSlot::Shortcut(0), None)
            .expect("slot free after removal");
        assert!(third.context_index.value() > second.context_index.value());

        registry.remove(second.context_index);
        registry.remove(third.context_index);
        assert!(registry.is_empty());

        let fresh = registry
            .admit(SessionSlot::OneTime, None)
            .expect("admit after drain");
        assert_eq!(fresh.context_index.value(), 0);
    }

    #[test]
    fn state_updates_require_a_live_session() {
        let mut registry = SessionRegistry::default();
        let handle = registry
            .admit(SessionSlot::Shortcut(2), None)
            .expect("admit");

        assert!(registry.set_state(handle.context_index, SessionState::Running));
        assert_eq!(registry.state(handle.context_index), Some(SessionState::Running));

        registry.remove(handle.context_index);
        assert!(!registry.set_state(handle.context_index, SessionState::Exited));
        assert!(registry.is_empty());
    }
}
