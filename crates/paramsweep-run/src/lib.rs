//! paramsweep run - executing sweeps on ephemeral compute
//!
//! Provides the runtime half of paramsweep:
//! - A compute provisioner interface with a local-process implementation
//! - A per-run lifecycle state machine with guaranteed resource release
//! - A bounded worker pool with cooperative cancellation and whole-run retry
//! - Result collection into an ordered, serialisable sweep summary

pub mod cancel;
pub mod collector;
pub mod error;
pub mod fakes;
pub mod lifecycle;
pub mod local;
pub mod obs;
pub mod orchestrator;
pub mod provisioner;
pub mod retry;

// Re-export key types
pub use cancel::{CancelHandle, CancelSignal};
pub use collector::{ResultCollector, RunResult, StageRecord, SweepCounts, SweepSummary};
pub use error::{ComputeError, ComputeResult, LifecycleError};
pub use lifecycle::{RunState, Transition};
pub use local::{LocalConfig, LocalProvisioner};
pub use orchestrator::{execute_run, execute_with_retry, RunnerConfig, StageLimits, SweepRunner};
pub use provisioner::{ComputeHandle, ComputeProvisioner, ExecutionOutcome};
pub use retry::RetryPolicy;
