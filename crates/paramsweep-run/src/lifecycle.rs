//! Per-run lifecycle state machine.
//!
//! ```text
//! PENDING -> PROVISIONED -> SETUP_DONE -> COMMAND_DONE -> FINISHED
//!    |            |              |              |
//!    |            +--------------+--------------+--> FAILED(stage)
//!    +--> PROVISION_FAILED
//!    +--> CANCELLED            (and from any state holding compute)
//! ```
//!
//! [`RunState::advance`] is pure, so every transition and the cleanup
//! obligation ([`RunState::holds_resource`]) can be checked without compute.

use paramsweep_core::Stage;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LifecycleError;

/// State of one rendered run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Provisioned,
    SetupDone,
    CommandDone,
    Finished,
    /// A stage failed, timed out, or could not be started.
    Failed { stage: Stage },
    /// Compute could not be acquired; there is nothing to release.
    ProvisionFailed,
    /// Cancelled before `stage` started; `None` means before acquisition.
    Cancelled { stage: Option<Stage> },
}

/// Events that move a run between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Acquired,
    AcquireFailed,
    StageSucceeded(Stage),
    StageFailed(Stage),
    Cancelled,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Acquired => f.write_str("acquired"),
            Transition::AcquireFailed => f.write_str("acquire_failed"),
            Transition::StageSucceeded(s) => write!(f, "{}_succeeded", s),
            Transition::StageFailed(s) => write!(f, "{}_failed", s),
            Transition::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl RunState {
    /// Apply a transition, rejecting moves the lifecycle does not allow.
    pub fn advance(self, transition: Transition) -> Result<RunState, LifecycleError> {
        let next = match (self, transition) {
            (RunState::Pending, Transition::Acquired) => Some(RunState::Provisioned),
            (RunState::Pending, Transition::AcquireFailed) => Some(RunState::ProvisionFailed),
            (RunState::Pending, Transition::Cancelled) => Some(RunState::Cancelled { stage: None }),
            (state, Transition::StageSucceeded(stage)) if state.next_stage() == Some(stage) => {
                Some(match stage {
                    Stage::Setup => RunState::SetupDone,
                    Stage::Command => RunState::CommandDone,
                    Stage::Finish => RunState::Finished,
                })
            }
            (state, Transition::StageFailed(stage)) if state.next_stage() == Some(stage) => {
                Some(RunState::Failed { stage })
            }
            (state, Transition::Cancelled) if state.holds_resource() => {
                Some(RunState::Cancelled {
                    stage: state.next_stage(),
                })
            }
            _ => None,
        };
        next.ok_or_else(|| LifecycleError::InvalidTransition {
            from: self.to_string(),
            transition: transition.to_string(),
        })
    }

    /// The stage that runs next from this state, if any.
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            RunState::Provisioned => Some(Stage::Setup),
            RunState::SetupDone => Some(Stage::Command),
            RunState::CommandDone => Some(Stage::Finish),
            _ => None,
        }
    }

    /// Whether compute is held in this state and must eventually be released.
    pub fn holds_resource(&self) -> bool {
        matches!(
            self,
            RunState::Provisioned | RunState::SetupDone | RunState::CommandDone
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Finished
                | RunState::Failed { .. }
                | RunState::ProvisionFailed
                | RunState::Cancelled { .. }
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunState::Finished)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => f.write_str("PENDING"),
            RunState::Provisioned => f.write_str("PROVISIONED"),
            RunState::SetupDone => f.write_str("SETUP_DONE"),
            RunState::CommandDone => f.write_str("COMMAND_DONE"),
            RunState::Finished => f.write_str("FINISHED"),
            RunState::Failed { stage } => write!(f, "FAILED({})", stage),
            RunState::ProvisionFailed => f.write_str("PROVISION_FAILED"),
            RunState::Cancelled { stage: Some(stage) } => write!(f, "CANCELLED({})", stage),
            RunState::Cancelled { stage: None } => f.write_str("CANCELLED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [RunState; 11] = [
        RunState::Pending,
        RunState::Provisioned,
        RunState::SetupDone,
        RunState::CommandDone,
        RunState::Finished,
        RunState::Failed { stage: Stage::Setup },
        RunState::Failed { stage: Stage::Command },
        RunState::Failed { stage: Stage::Finish },
        RunState::ProvisionFailed,
        RunState::Cancelled { stage: None },
        RunState::Cancelled {
            stage: Some(Stage::Command),
        },
    ];

    fn all_transitions() -> Vec<Transition> {
        let mut t = vec![
            Transition::Acquired,
            Transition::AcquireFailed,
            Transition::Cancelled,
        ];
        for stage in Stage::ALL {
            t.push(Transition::StageSucceeded(stage));
            t.push(Transition::StageFailed(stage));
        }
        t
    }

    #[test]
    fn test_happy_path() {
        let mut state = RunState::Pending;
        state = state.advance(Transition::Acquired).unwrap();
        for stage in Stage::ALL {
            assert_eq!(state.next_stage(), Some(stage));
            state = state.advance(Transition::StageSucceeded(stage)).unwrap();
        }
        assert_eq!(state, RunState::Finished);
        assert!(state.is_terminal());
        assert!(state.is_success());
    }

    #[test]
    fn test_failure_at_each_stage() {
        for failing in Stage::ALL {
            let mut state = RunState::Pending.advance(Transition::Acquired).unwrap();
            for stage in Stage::ALL {
                if stage == failing {
                    state = state.advance(Transition::StageFailed(stage)).unwrap();
                    break;
                }
                state = state.advance(Transition::StageSucceeded(stage)).unwrap();
            }
            assert_eq!(state, RunState::Failed { stage: failing });
            assert_eq!(state.to_string(), format!("FAILED({})", failing));
        }
    }

    #[test]
    fn test_provision_failure_holds_nothing() {
        let state = RunState::Pending.advance(Transition::AcquireFailed).unwrap();
        assert_eq!(state, RunState::ProvisionFailed);
        assert!(!state.holds_resource());
        assert!(state.is_terminal());
    }

    #[test]
    fn test_cancellation_records_pending_stage() {
        let state = RunState::Pending
            .advance(Transition::Acquired)
            .unwrap()
            .advance(Transition::StageSucceeded(Stage::Setup))
            .unwrap()
            .advance(Transition::Cancelled)
            .unwrap();
        assert_eq!(
            state,
            RunState::Cancelled {
                stage: Some(Stage::Command)
            }
        );
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        for state in ALL_STATES.iter().filter(|s| s.is_terminal()) {
            for t in all_transitions() {
                assert!(state.advance(t).is_err(), "{} accepted {}", state, t);
            }
        }
    }

    #[test]
    fn test_stage_order_enforced() {
        let provisioned = RunState::Pending.advance(Transition::Acquired).unwrap();
        assert!(provisioned
            .advance(Transition::StageSucceeded(Stage::Command))
            .is_err());
        assert!(RunState::Pending
            .advance(Transition::StageSucceeded(Stage::Setup))
            .is_err());
    }

    #[test]
    fn test_every_reachable_state_is_either_terminal_or_holding() {
        // Exhaustively walk the transition graph from PENDING: every state
        // is terminal, PENDING itself, or holds a resource, so cleanup
        // obligations are always visible in the state.
        let mut frontier = vec![RunState::Pending];
        let mut seen = std::collections::HashSet::new();
        while let Some(state) = frontier.pop() {
            if !seen.insert(state) {
                continue;
            }
            assert!(
                state == RunState::Pending || state.is_terminal() || state.holds_resource(),
                "{} is neither terminal nor holding",
                state
            );
            for t in all_transitions() {
                if let Ok(next) = state.advance(t) {
                    frontier.push(next);
                }
            }
        }
        // 5 linear states, 3 failures, provision failure, 4 cancellations.
        assert_eq!(seen.len(), 13);
    }

    #[test]
    fn test_state_serde_tagged() {
        let json = serde_json::to_string(&RunState::Failed {
            stage: Stage::Command,
        })
        .unwrap();
        assert_eq!(json, r#"{"state":"failed","stage":"command"}"#);
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RunState::Failed { stage: Stage::Command });
    }
}
