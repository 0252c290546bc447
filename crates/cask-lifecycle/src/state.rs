use cask_protocol::event::RunnerSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Admitted and spawned; the runner has not reported Proton live yet.
    #[default]
    Starting,
    Running,
    Stopping,
    Exited,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exited)
    }

    /// State a signal moves the session into, if any. `Updated` and
    /// `Stopped` report progress without changing the tracked state.
    pub fn from_signal(signal: RunnerSignal) -> Option<Self> {
        match signal {
            RunnerSignal::Starting => Some(Self::Starting),
            RunnerSignal::ProtonStarted => Some(Self::Running),
            RunnerSignal::Stopping => Some(Self::Stopping),
            RunnerSignal::Exited { .. } => Some(Self::Exited),
            RunnerSignal::Updated | RunnerSignal::Stopped => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use cask_protocol::event::RunnerSignal;

    use super::SessionState;

    #[test]
    fn only_exited_is_terminal() {
        assert!(SessionState::Exited.is_terminal());
        assert!(!SessionState::Starting.is_terminal());
        assert!(!SessionState::Running.is_terminal());
        assert!(!SessionState::Stopping.is_terminal());
    }

    #[test]
    fn signals_map_to_states() {
        assert_eq!(
            SessionState::from_signal(RunnerSignal::ProtonStarted),
            Some(SessionState::Running)
        );
        assert_eq!(
            SessionState::from_signal(RunnerSignal::Exited { code: 0 }),
            Some(SessionState::Exited)
        );
        assert_eq!(SessionState::from_signal(RunnerSignal::Updated), None);
        assert_eq!(SessionState::from_signal(RunnerSignal::Stopped), None);
    }
}
