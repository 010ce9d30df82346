//! In-memory fakes for the provisioner trait (testing only)
//!
//! [`ScriptedProvisioner`] satisfies the [`ComputeProvisioner`] contract
//! without touching real compute, and records every call so tests can assert
//! on acquisition and release accounting.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use paramsweep_core::{ComputeSpec, Script, Stage};

use crate::error::{ComputeError, ComputeResult};
use crate::provisioner::{ComputeHandle, ComputeProvisioner, ExecutionOutcome};

type DelayFn = Arc<dyn Fn(&Script) -> Duration + Send + Sync>;

#[derive(Debug, Default)]
struct Ledger {
    acquired: Vec<String>,
    live: HashSet<String>,
    releases: HashMap<String, usize>,
    executed: Vec<(String, Script)>,
}

/// Provisioner whose behaviour is scripted up front.
#[derive(Default)]
pub struct ScriptedProvisioner {
    fail_acquire: bool,
    fail_stage: Option<Stage>,
    delay: Option<DelayFn>,
    ledger: Mutex<Ledger>,
}

impl std::fmt::Debug for ScriptedProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProvisioner")
            .field("fail_acquire", &self.fail_acquire)
            .field("fail_stage", &self.fail_stage)
            .finish_non_exhaustive()
    }
}

impl ScriptedProvisioner {
    /// A provisioner where everything succeeds immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `acquire` fails with `ComputeError::Provisioning`.
    pub fn failing_acquire(mut self) -> Self {
        self.fail_acquire = true;
        self
    }

    /// Every script for `stage` exits with code 1.
    pub fn failing_stage(mut self, stage: Stage) -> Self {
        self.fail_stage = Some(stage);
        self
    }

    /// Sleep for `delay(script)` before completing each script.
    pub fn with_delay(
        mut self,
        delay: impl Fn(&Script) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay = Some(Arc::new(delay));
        self
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Number of successful acquisitions.
    pub fn acquire_count(&self) -> usize {
        self.ledger().acquired.len()
    }

    /// Total number of `release` calls, including invalid ones.
    pub fn release_count(&self) -> usize {
        self.ledger().releases.values().sum()
    }

    /// Handles acquired and not yet released.
    pub fn live_handles(&self) -> usize {
        self.ledger().live.len()
    }

    /// Whether every acquired handle was released exactly once and nothing
    /// else was released.
    pub fn released_exactly_once(&self) -> bool {
        let ledger = self.ledger();
        ledger.live.is_empty()
            && ledger.releases.len() == ledger.acquired.len()
            && ledger
                .acquired
                .iter()
                .all(|id| ledger.releases.get(id) == Some(&1))
    }

    /// Scripts executed so far, in call order.
    pub fn executed(&self) -> Vec<Script> {
        self.ledger()
            .executed
            .iter()
            .map(|(_, s)| s.clone())
            .collect()
    }
}

#[async_trait]
impl ComputeProvisioner for ScriptedProvisioner {
    async fn acquire(&self, compute: &ComputeSpec) -> ComputeResult<ComputeHandle> {
        if self.fail_acquire {
            return Err(ComputeError::Provisioning("quota exceeded".to_string()));
        }
        let handle = ComputeHandle::new(&compute.provider);
        let mut ledger = self.ledger();
        ledger.acquired.push(handle.id().to_string());
        ledger.live.insert(handle.id().to_string());
        Ok(handle)
    }

    async fn execute(
        &self,
        handle: &ComputeHandle,
        script: &Script,
    ) -> ComputeResult<ExecutionOutcome> {
        if !self.ledger().live.contains(handle.id()) {
            return Err(ComputeError::UnknownHandle(handle.id().to_string()));
        }
        let delay = self.delay.as_ref().map(|f| f(script));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.ledger()
            .executed
            .push((handle.id().to_string(), script.clone()));

        if self.fail_stage == Some(script.stage) {
            return Err(ComputeError::ExecutionFailed {
                stage: script.stage,
                exit_code: 1,
                stdout: String::new(),
                stderr: format!("scripted {} failure", script.stage),
            });
        }
        Ok(ExecutionOutcome {
            exit_code: 0,
            stdout: script.body.clone(),
            stderr: String::new(),
            duration_ms: delay.map(|d| d.as_millis() as u64).unwrap_or(0),
            output_location: None,
        })
    }

    async fn release(&self, handle: ComputeHandle) -> ComputeResult<()> {
        let mut ledger = self.ledger();
        *ledger.releases.entry(handle.id().to_string()).or_insert(0) += 1;
        if !ledger.live.remove(handle.id()) {
            return Err(ComputeError::UnknownHandle(handle.id().to_string()));
        }
        Ok(())
    }
}
