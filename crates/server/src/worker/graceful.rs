/// What to do with a termination request that just arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermAction {
    /// Leave the process now.
    ExitNow,
    /// A request is in flight; leave once its response is written.
    Defer,
}

/// Per-worker exit bookkeeping, owned by the worker loop alone.
///
/// `can_exit` is true only between requests. A termination received while it
/// is false is deferred; a second one forces the exit anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GracefulExitState {
    can_exit: bool,
    term_received: u32,
}

impl Default for GracefulExitState {
    fn default() -> Self {
        Self::new()
    }
}

impl GracefulExitState {
    pub fn new() -> Self {
        Self { can_exit: true, term_received: 0 }
    }

    /// Called before waiting for the next connection.
    pub fn enter_idle(&mut self) {
        self.can_exit = true;
    }

    /// Called the instant a connection is accepted.
    pub fn enter_request(&mut self) {
        self.can_exit = false;
    }

    pub fn on_terminate(&mut self) -> TermAction {
        self.term_received = self.term_received.saturating_add(1);
        if self.can_exit || self.term_received > 1 { TermAction::ExitNow } else { TermAction::Defer }
    }

    /// True once any termination has been received.
    pub fn exit_requested(&self) -> bool {
        self.term_received > 0
    }

    #[inline]
    pub fn can_exit(&self) -> bool {
        self.can_exit
    }

    #[inline]
    pub fn term_received(&self) -> u32 {
        self.term_received
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_worker_exits_immediately() {
        let mut state = GracefulExitState::new();
        state.enter_idle();
        assert_eq!(state.on_terminate(), TermAction::ExitNow);
    }

    #[test]
    fn busy_worker_defers_then_exits_after_request() {
        let mut state = GracefulExitState::new();
        state.enter_request();
        assert_eq!(state.on_terminate(), TermAction::Defer);
        assert!(state.exit_requested());
        assert!(!state.can_exit());
    }

    #[test]
    fn second_terminate_forces_exit() {
        let mut state = GracefulExitState::new();
        state.enter_request();
        assert_eq!(state.on_terminate(), TermAction::Defer);
        assert_eq!(state.on_terminate(), TermAction::ExitNow);
        assert_eq!(state.term_received(), 2);
    }

    #[test]
    fn fresh_state_has_no_pending_exit() {
        let state = GracefulExitState::default();
        assert!(state.can_exit());
        assert!(!state.exit_requested());
    }
}
