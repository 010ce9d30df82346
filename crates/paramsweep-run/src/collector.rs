//! Result collection and sweep summaries.

use chrono::{DateTime, Utc};
use paramsweep_core::{ParameterAssignment, SpecDigest, Stage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{ComputeError, LifecycleError};
use crate::lifecycle::{RunState, Transition};
use crate::provisioner::ExecutionOutcome;

/// Outcome of one stage of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageRecord {
    pub stage: Stage,

    /// Exit code, when the script ran to completion.
    pub exit_code: Option<i32>,

    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,

    /// Error description for failed stages.
    pub error: Option<String>,
}

impl StageRecord {
    pub fn passed(&self) -> bool {
        self.error.is_none() && self.exit_code == Some(0)
    }
}

/// Everything known about one run once its lifecycle ends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub assignment: ParameterAssignment,
    pub state: RunState,
    pub stages: Vec<StageRecord>,

    /// Where the provisioner kept the run's output, if anywhere.
    pub output_location: Option<String>,

    /// Error that ended the run (provisioning, stage failure, cancellation).
    pub error: Option<String>,

    /// Attempts made under the retry policy.
    pub attempts: u32,

    /// Identifier of the compute handle used by the last attempt.
    pub handle_id: Option<String>,

    /// Set when tearing the compute down failed.
    pub release_error: Option<String>,
}

impl RunResult {
    /// A fresh result in the PENDING state.
    pub fn new(assignment: ParameterAssignment) -> Self {
        Self {
            assignment,
            state: RunState::Pending,
            stages: Vec::new(),
            output_location: None,
            error: None,
            attempts: 1,
            handle_id: None,
            release_error: None,
        }
    }

    /// Position in sweep-generation order.
    pub fn index(&self) -> u64 {
        self.assignment.index
    }

    pub fn succeeded(&self) -> bool {
        self.state.is_success()
    }

    /// The stage a FAILED run failed in.
    pub fn failed_stage(&self) -> Option<Stage> {
        match self.state {
            RunState::Failed { stage } => Some(stage),
            _ => None,
        }
    }

    /// Advance the lifecycle state.
    pub fn apply(&mut self, transition: Transition) -> Result<(), LifecycleError> {
        self.state = self.state.advance(transition)?;
        Ok(())
    }

    pub(crate) fn record_success(&mut self, stage: Stage, outcome: ExecutionOutcome) {
        if outcome.output_location.is_some() {
            self.output_location = outcome.output_location;
        }
        self.stages.push(StageRecord {
            stage,
            exit_code: Some(outcome.exit_code),
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            duration_ms: outcome.duration_ms,
            error: None,
        });
    }

    pub(crate) fn record_failure(&mut self, stage: Stage, err: ComputeError, duration_ms: u64) {
        let message = err.to_string();
        let (exit_code, stdout, stderr) = match err {
            ComputeError::ExecutionFailed {
                exit_code,
                stdout,
                stderr,
                ..
            } => (Some(exit_code), stdout, stderr),
            _ => (None, String::new(), String::new()),
        };
        self.stages.push(StageRecord {
            stage,
            exit_code,
            stdout,
            stderr,
            duration_ms,
            error: Some(message.clone()),
        });
        self.error = Some(message);
    }
}

/// Aggregate counts over a sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepCounts {
    pub total: usize,
    pub succeeded: usize,
    pub failed_by_stage: BTreeMap<Stage, usize>,
    pub provision_failed: usize,
    pub cancelled: usize,
}

impl SweepCounts {
    fn from_results(results: &[RunResult]) -> Self {
        let mut counts = SweepCounts {
            total: results.len(),
            ..Default::default()
        };
        for r in results {
            match r.state {
                RunState::Finished => counts.succeeded += 1,
                RunState::Failed { stage } => {
                    *counts.failed_by_stage.entry(stage).or_insert(0) += 1
                }
                RunState::ProvisionFailed => counts.provision_failed += 1,
                RunState::Cancelled { .. } => counts.cancelled += 1,
                _ => {}
            }
        }
        counts
    }

    /// Runs that did not finish, for whatever reason.
    pub fn failed(&self) -> usize {
        self.total - self.succeeded
    }
}

/// Final report of a sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SweepSummary {
    pub sweep_id: Uuid,
    pub tool_name: String,
    pub spec_digest: SpecDigest,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counts: SweepCounts,

    /// One result per run, in sweep-generation order.
    pub results: Vec<RunResult>,
}

impl SweepSummary {
    pub fn all_succeeded(&self) -> bool {
        self.counts.failed() == 0
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// Persist as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }

    /// Load a summary previously written with [`SweepSummary::write_json`].
    pub fn read_json(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Append-only collection of run results shared by concurrent runs.
#[derive(Debug, Default)]
pub struct ResultCollector {
    results: Mutex<Vec<RunResult>>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed run. Safe to call from concurrent tasks.
    pub async fn record(&self, result: RunResult) {
        self.results.lock().await.push(result);
    }

    /// Number of results recorded so far.
    pub async fn len(&self) -> usize {
        self.results.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.results.lock().await.is_empty()
    }

    /// Counts over the results recorded so far.
    pub async fn counts(&self) -> SweepCounts {
        SweepCounts::from_results(&self.results.lock().await)
    }

    /// Results recorded so far, sorted into sweep-generation order.
    pub async fn ordered(&self) -> Vec<RunResult> {
        let mut results = self.results.lock().await.clone();
        results.sort_by_key(RunResult::index);
        results
    }

    /// Close the collection into a summary.
    pub async fn finish(
        &self,
        sweep_id: Uuid,
        tool_name: &str,
        spec_digest: SpecDigest,
        started_at: DateTime<Utc>,
    ) -> SweepSummary {
        let results = self.ordered().await;
        SweepSummary {
            sweep_id,
            tool_name: tool_name.to_string(),
            spec_digest,
            started_at,
            finished_at: Utc::now(),
            counts: SweepCounts::from_results(&results),
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paramsweep_core::{Binding, ParamValue};

    fn result(index: u64, state: RunState) -> RunResult {
        let mut r = RunResult::new(ParameterAssignment {
            index,
            bindings: vec![Binding {
                name: "n".to_string(),
                value: ParamValue::Int(index as i64),
            }],
        });
        r.state = state;
        r
    }

    #[tokio::test]
    async fn test_ordered_regardless_of_completion_order() {
        let c = ResultCollector::new();
        for i in [4u64, 0, 3, 1, 2] {
            c.record(result(i, RunState::Finished)).await;
        }
        let indices: Vec<u64> = c.ordered().await.iter().map(RunResult::index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_counts_by_stage() {
        let c = ResultCollector::new();
        c.record(result(0, RunState::Finished)).await;
        c.record(result(1, RunState::Failed { stage: Stage::Command })).await;
        c.record(result(2, RunState::Failed { stage: Stage::Command })).await;
        c.record(result(3, RunState::Failed { stage: Stage::Setup })).await;
        c.record(result(4, RunState::ProvisionFailed)).await;
        c.record(result(5, RunState::Cancelled { stage: None })).await;

        let counts = c.counts().await;
        assert_eq!(counts.total, 6);
        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.failed_by_stage.get(&Stage::Command), Some(&2));
        assert_eq!(counts.failed_by_stage.get(&Stage::Setup), Some(&1));
        assert_eq!(counts.provision_failed, 1);
        assert_eq!(counts.cancelled, 1);
        assert_eq!(counts.failed(), 5);
    }

    #[test]
    fn test_record_failure_keeps_captured_output() {
        let mut r = result(0, RunState::SetupDone);
        r.record_failure(
            Stage::Command,
            ComputeError::ExecutionFailed {
                stage: Stage::Command,
                exit_code: 7,
                stdout: "partial".to_string(),
                stderr: "boom".to_string(),
            },
            12,
        );
        let rec = &r.stages[0];
        assert_eq!(rec.exit_code, Some(7));
        assert_eq!(rec.stderr, "boom");
        assert!(!rec.passed());
        assert!(r.error.unwrap().contains("code 7"));
    }

    #[tokio::test]
    async fn test_summary_json_roundtrip_on_disk() {
        let c = ResultCollector::new();
        c.record(result(1, RunState::Failed { stage: Stage::Finish })).await;
        c.record(result(0, RunState::Finished)).await;
        let summary = c
            .finish(
                Uuid::new_v4(),
                "tool",
                SpecDigest::from_bytes(b"tool"),
                Utc::now(),
            )
            .await;
        assert!(!summary.all_succeeded());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        summary.write_json(&path).unwrap();
        let back = SweepSummary::read_json(&path).unwrap();
        assert_eq!(back.results.len(), 2);
        assert_eq!(back.results[0].index(), 0);
        assert_eq!(back.counts, summary.counts);
    }
}
