//! Per-request pipeline state machine.
//!
//! ```text
//! Created → ContextEstablished → InputValidated → [ConnectionAcquired]
//!         → HandlerExecuted → OutputValidated → Sent → Destroyed
//!
//! any non-terminal state → Failed → Destroyed
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    ContextEstablished,
    InputValidated,
    ConnectionAcquired,
    HandlerExecuted,
    OutputValidated,
    Sent,
    Destroyed,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Created => "created",
            PipelineState::ContextEstablished => "context_established",
            PipelineState::InputValidated => "input_validated",
            PipelineState::ConnectionAcquired => "connection_acquired",
            PipelineState::HandlerExecuted => "handler_executed",
            PipelineState::OutputValidated => "output_validated",
            PipelineState::Sent => "sent",
            PipelineState::Destroyed => "destroyed",
            PipelineState::Failed => "failed",
        }
    }

    /// True once the response outcome is decided.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            PipelineState::Sent | PipelineState::Failed | PipelineState::Destroyed
        )
    }

    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;

        match (self, next) {
            (Created, ContextEstablished)
            | (ContextEstablished, InputValidated)
            | (InputValidated, ConnectionAcquired)
            // Routes without persistence skip acquisition.
            | (InputValidated, HandlerExecuted)
            | (ConnectionAcquired, HandlerExecuted)
            | (HandlerExecuted, OutputValidated)
            | (OutputValidated, Sent)
            | (Sent, Destroyed)
            | (Failed, Destroyed) => true,
            (current, Failed) => !current.is_settled(),
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one request through the pipeline.
///
/// Dropped before settling (the request future was cancelled) it records the
/// implicit transition to `Failed`.
#[derive(Debug)]
pub struct Progress {
    state: PipelineState,
}

impl Progress {
    /// Start tracking a request whose context already exists.
    pub fn established() -> Self {
        Self {
            state: PipelineState::ContextEstablished,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal pipeline transition {} -> {}",
            self.state,
            next
        );
        tracing::trace!(from = %self.state, to = %next, "Pipeline transition");
        self.state = next;
    }

    pub fn fail(&mut self) {
        self.advance(PipelineState::Failed);
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        if !self.state.is_settled() {
            tracing::debug!(state = %self.state, "Request abandoned before completion");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineState::*;

    #[test]
    fn happy_path_is_legal() {
        let path = [
            Created,
            ContextEstablished,
            InputValidated,
            ConnectionAcquired,
            HandlerExecuted,
            OutputValidated,
            Sent,
            Destroyed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(InputValidated.can_transition_to(HandlerExecuted));
    }

    #[test]
    fn failure_reachable_only_before_settling() {
        for state in [Created, ContextEstablished, InputValidated, ConnectionAcquired, HandlerExecuted, OutputValidated] {
            assert!(state.can_transition_to(Failed));
        }
        assert!(!Sent.can_transition_to(Failed));
        assert!(!Destroyed.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Destroyed));
    }

    #[test]
    fn stages_cannot_be_skipped() {
        assert!(!ContextEstablished.can_transition_to(ConnectionAcquired));
        assert!(!HandlerExecuted.can_transition_to(Sent));
        assert!(!Sent.can_transition_to(InputValidated));
    }

    #[test]
    fn progress_tracks_state() {
        let mut progress = Progress::established();
        progress.advance(InputValidated);
        progress.fail();
        assert_eq!(progress.state(), Failed);
    }

    #[test]
    fn abandoned_progress_leaves_state_untouched() {
        let mut progress = Progress::established();
        progress.advance(InputValidated);
        progress.advance(ConnectionAcquired);
        assert!(!progress.state().is_settled());
        drop(progress);
    }
}
