//! Pipeline lifecycle
//!
//! `Unconfigured -> Provisioned -> Connected -> Running -> Terminated`.
//! Any state before `Terminated` may also abort straight to
//! `Terminated(Failure)`. `Terminated` is final.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use tracing::{error, info};

use crate::error::{ProcessorError, Result};

/// How a terminated pipeline ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Success,
    Failure,
}

/// Lifecycle state of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Unconfigured,
    Provisioned,
    Connected,
    Running,
    Terminated(Termination),
}

impl PipelineState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, PipelineState::Terminated(_))
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;

        match (self, next) {
            (Terminated(_), _) => false,
            (_, Terminated(Termination::Failure)) => true,
            (Unconfigured, Provisioned) => true,
            (Provisioned, Connected) => true,
            (Connected, Running) => true,
            (Running, Terminated(Termination::Success)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Unconfigured => write!(f, "unconfigured"),
            PipelineState::Provisioned => write!(f, "provisioned"),
            PipelineState::Connected => write!(f, "connected"),
            PipelineState::Running => write!(f, "running"),
            PipelineState::Terminated(Termination::Success) => write!(f, "terminated(success)"),
            PipelineState::Terminated(Termination::Failure) => write!(f, "terminated(failure)"),
        }
    }
}

/// Shared, observable pipeline state
#[derive(Debug, Clone)]
pub struct StateHandle {
    tx: std::sync::Arc<watch::Sender<PipelineState>>,
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StateHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PipelineState::Unconfigured);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    pub fn current(&self) -> PipelineState {
        *self.tx.borrow()
    }

    /// Receiver notified on every transition
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.tx.subscribe()
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(&self, next: PipelineState) -> Result<()> {
        let mut outcome = Ok(());

        self.tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                info!(from = %state, to = %next, "Pipeline state changed");
                *state = next;
                true
            } else {
                outcome = Err(ProcessorError::InvalidTransition {
                    from: state.to_string(),
                    to: next.to_string(),
                });
                false
            }
        });

        outcome
    }

    /// Abort to `Terminated(Failure)`; a no-op once terminated
    pub fn fail(&self, reason: &str) {
        if self.current().is_terminated() {
            return;
        }
        error!(reason, "Pipeline aborted");
        let _ = self.transition(PipelineState::Terminated(Termination::Failure));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = StateHandle::new();
        assert_eq!(state.current(), PipelineState::Unconfigured);

        for next in [
            PipelineState::Provisioned,
            PipelineState::Connected,
            PipelineState::Running,
            PipelineState::Terminated(Termination::Success),
        ] {
            state.transition(next).unwrap();
            assert_eq!(state.current(), next);
        }
    }

    #[test]
    fn test_skipping_a_state_is_rejected() {
        let state = StateHandle::new();
        let err = state.transition(PipelineState::Running).unwrap_err();

        assert!(matches!(err, ProcessorError::InvalidTransition { .. }));
        assert_eq!(state.current(), PipelineState::Unconfigured);
    }

    #[test]
    fn test_terminated_is_final() {
        let state = StateHandle::new();
        state.fail("trust store missing");
        assert_eq!(
            state.current(),
            PipelineState::Terminated(Termination::Failure)
        );

        assert!(state.transition(PipelineState::Provisioned).is_err());
        state.fail("again");
        assert_eq!(
            state.current(),
            PipelineState::Terminated(Termination::Failure)
        );
    }

    #[test]
    fn test_cannot_succeed_before_running() {
        assert!(!PipelineState::Connected
            .can_transition_to(PipelineState::Terminated(Termination::Success)));
        assert!(PipelineState::Connected
            .can_transition_to(PipelineState::Terminated(Termination::Failure)));
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let state = StateHandle::new();
        let mut rx = state.subscribe();

        state.transition(PipelineState::Provisioned).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), PipelineState::Provisioned);
    }
}
