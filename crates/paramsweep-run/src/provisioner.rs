//! Compute provisioner interface.
//!
//! A provisioner hands out ephemeral compute matching a [`ComputeSpec`],
//! runs scripts on it, and tears it down. Release consumes the handle, so a
//! handle cannot be used again once its resource is gone.

use async_trait::async_trait;
use paramsweep_core::{ComputeSpec, Script};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ComputeResult;

/// Opaque reference to a provisioned compute resource.
///
/// Valid between a successful `acquire` and the matching `release`.
#[derive(Debug, PartialEq, Eq)]
pub struct ComputeHandle {
    id: String,
    provider: String,
}

impl ComputeHandle {
    /// Mint a handle with a fresh identifier for `provider`.
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            provider: provider.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }
}

/// Captured result of a script run to completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Exit code (0 = success).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Where the provisioner kept this stage's output, if anywhere.
    pub output_location: Option<String>,
}

impl ExecutionOutcome {
    /// Whether the script exited cleanly.
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Acquires, drives, and releases ephemeral compute.
///
/// Guarantees expected of implementations:
/// - `acquire` fails with `ComputeError::Provisioning` when no resource can
///   be obtained (quota, missing image, timeout).
/// - `execute` returns `ComputeError::ExecutionFailed` for a nonzero exit.
///   Dropping the returned future abandons the script; implementations
///   should stop it.
/// - `release` is called exactly once for every successful `acquire`.
#[async_trait]
pub trait ComputeProvisioner: Send + Sync {
    /// Obtain a resource matching `compute`.
    async fn acquire(&self, compute: &ComputeSpec) -> ComputeResult<ComputeHandle>;

    /// Run `script` on the resource to completion.
    async fn execute(&self, handle: &ComputeHandle, script: &Script)
        -> ComputeResult<ExecutionOutcome>;

    /// Tear the resource down.
    async fn release(&self, handle: ComputeHandle) -> ComputeResult<()>;

    /// Where output produced on `handle` is kept, if anywhere.
    fn output_location(&self, _handle: &ComputeHandle) -> Option<String> {
        None
    }
}
