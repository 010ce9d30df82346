//! Error types for compute provisioning and the run lifecycle.
//!
//! These errors are per-run: the orchestrator records them on the affected
//! run's result and the sweep carries on with its siblings.

use paramsweep_core::Stage;

/// Errors produced by a compute provisioner.
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    #[error("{stage} stage timed out after {limit_ms}ms")]
    ExecutionTimeout { stage: Stage, limit_ms: u64 },

    #[error("{stage} stage exited with code {exit_code}")]
    ExecutionFailed {
        stage: Stage,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("sweep deadline reached during {stage} stage")]
    DeadlineExceeded { stage: Stage },

    #[error("release failed: {0}")]
    Release(String),

    #[error("unknown compute handle: {0}")]
    UnknownHandle(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for compute operations.
pub type ComputeResult<T> = std::result::Result<T, ComputeError>;

/// Errors produced by the run lifecycle state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid lifecycle transition: {transition} from {from}")]
    InvalidTransition { from: String, transition: String },
}
