//! Run orchestration.
//!
//! [`execute_run`] drives one rendered run through its lifecycle on one
//! compute resource. [`SweepRunner`] fans a whole sweep out over a bounded
//! worker pool: assignments are rendered lazily and a task is spawned for
//! each run only once a pool permit is held, so in-flight work never exceeds
//! `max_concurrency`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use paramsweep_core::{ComputeSpec, ParameterAssignment, RenderedRun, Stage, SweepError, ToolSpec};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, Instrument};
use uuid::Uuid;

use crate::cancel::{CancelHandle, CancelSignal};
use crate::collector::{ResultCollector, RunResult, SweepSummary};
use crate::error::ComputeError;
use crate::lifecycle::{RunState, Transition};
use crate::obs;
use crate::provisioner::ComputeProvisioner;
use crate::retry::RetryPolicy;

/// Settings for a sweep.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum number of runs holding compute at once.
    pub max_concurrency: usize,

    /// Deadline for each stage's `execute` call.
    pub stage_timeout: Option<Duration>,

    /// Cancel the remaining runs as soon as one run fails.
    pub fail_fast: bool,

    /// Whole-run retry policy.
    pub retry: RetryPolicy,

    /// Overall sweep deadline. Runs not yet started are cancelled and a
    /// stage still executing when it passes is cut short.
    pub deadline: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            stage_timeout: None,
            fail_fast: false,
            retry: RetryPolicy::default(),
            deadline: None,
        }
    }
}

/// Time limits applied to every stage of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageLimits {
    /// Limit for a single `execute` call.
    pub stage_timeout: Option<Duration>,

    /// Instant by which the whole sweep must stop.
    pub sweep_deadline: Option<Instant>,
}

/// Which limit bounds the next stage.
enum Budget {
    Stage(Duration),
    Sweep(Duration),
}

impl Budget {
    fn duration(&self) -> Duration {
        match self {
            Budget::Stage(d) | Budget::Sweep(d) => *d,
        }
    }

    fn expired(&self, stage: Stage) -> ComputeError {
        match self {
            Budget::Stage(limit) => ComputeError::ExecutionTimeout {
                stage,
                limit_ms: limit.as_millis() as u64,
            },
            Budget::Sweep(_) => ComputeError::DeadlineExceeded { stage },
        }
    }
}

impl StageLimits {
    /// Limits with only a per-stage timeout.
    pub fn per_stage(timeout: Duration) -> Self {
        Self {
            stage_timeout: Some(timeout),
            sweep_deadline: None,
        }
    }

    /// The tighter of the stage timeout and the time left in the sweep.
    fn budget(&self) -> Option<Budget> {
        let remaining = self
            .sweep_deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));
        match (self.stage_timeout, remaining) {
            (Some(stage), Some(left)) if left < stage => Some(Budget::Sweep(left)),
            (Some(stage), _) => Some(Budget::Stage(stage)),
            (None, Some(left)) => Some(Budget::Sweep(left)),
            (None, None) => None,
        }
    }
}

fn step(result: &mut RunResult, transition: Transition) {
    if let Err(e) = result.apply(transition) {
        error!(index = result.index(), error = %e, "lifecycle violation");
    }
}

/// Drive one rendered run from PENDING to a terminal state.
///
/// Compute acquired here is released exactly once on every path. A failed
/// release is recorded on the result without changing its terminal state.
/// A stage cut short by the sweep deadline ends the run as cancelled.
pub async fn execute_run(
    provisioner: &dyn ComputeProvisioner,
    compute: &ComputeSpec,
    run: &RenderedRun,
    limits: StageLimits,
    cancel: &CancelSignal,
) -> RunResult {
    let mut result = RunResult::new(run.assignment.clone());

    if cancel.is_cancelled() {
        step(&mut result, Transition::Cancelled);
        result.error = Some("cancelled before provisioning".to_string());
        return result;
    }

    let handle = match provisioner.acquire(compute).await {
        Ok(handle) => handle,
        Err(e) => {
            step(&mut result, Transition::AcquireFailed);
            result.error = Some(e.to_string());
            return result;
        }
    };
    result.handle_id = Some(handle.id().to_string());
    result.output_location = provisioner.output_location(&handle);
    step(&mut result, Transition::Acquired);
    debug!(index = run.index(), handle = %handle.id(), "compute acquired");

    while let Some(stage) = result.state.next_stage() {
        if cancel.is_cancelled() {
            step(&mut result, Transition::Cancelled);
            result.error = Some(format!("cancelled before {} stage", stage));
            break;
        }

        let script = run.script(stage);
        let started = std::time::Instant::now();
        let executed = match limits.budget() {
            Some(budget) => {
                let execution = provisioner.execute(&handle, script);
                match tokio::time::timeout(budget.duration(), execution).await {
                    Ok(executed) => executed,
                    Err(_) => Err(budget.expired(stage)),
                }
            }
            None => provisioner.execute(&handle, script).await,
        };

        // Providers that report a nonzero exit as an outcome still fail the stage.
        let executed = executed.and_then(|outcome| {
            if outcome.passed() {
                Ok(outcome)
            } else {
                Err(ComputeError::ExecutionFailed {
                    stage,
                    exit_code: outcome.exit_code,
                    stdout: outcome.stdout,
                    stderr: outcome.stderr,
                })
            }
        });

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match executed {
            Ok(outcome) => {
                result.record_success(stage, outcome);
                step(&mut result, Transition::StageSucceeded(stage));
            }
            Err(e @ ComputeError::DeadlineExceeded { .. }) => {
                result.record_failure(stage, e, elapsed_ms);
                step(&mut result, Transition::Cancelled);
            }
            Err(e) => {
                result.record_failure(stage, e, elapsed_ms);
                step(&mut result, Transition::StageFailed(stage));
            }
        }
    }

    let handle_id = handle.id().to_string();
    if let Err(e) = provisioner.release(handle).await {
        obs::emit_release_error(run.index(), &handle_id, &e);
        result.release_error = Some(e.to_string());
    }
    result
}

/// [`execute_run`] under a retry policy.
///
/// A failed attempt is re-run from PENDING on fresh compute after an
/// exponential backoff. Cancelled runs are never retried, and cancellation
/// during the backoff ends the run with the last attempt's result.
pub async fn execute_with_retry(
    provisioner: &dyn ComputeProvisioner,
    compute: &ComputeSpec,
    run: &RenderedRun,
    limits: StageLimits,
    retry: &RetryPolicy,
    mut cancel: CancelSignal,
) -> RunResult {
    let mut attempt = 1;
    loop {
        let mut result = execute_run(provisioner, compute, run, limits, &cancel).await;
        result.attempts = attempt;

        let cancelled = matches!(result.state, RunState::Cancelled { .. });
        let exhausted = !retry.allows_another(attempt);
        if result.succeeded() || cancelled || exhausted || cancel.is_cancelled() {
            return result;
        }

        let delay = retry.backoff(attempt);
        obs::emit_run_retrying(
            run.index(),
            attempt,
            delay.as_millis() as u64,
            result.error.as_deref(),
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return result,
        }
        attempt += 1;
    }
}

async fn watch_cancellation(
    mut external: CancelSignal,
    deadline: Option<Instant>,
    internal: CancelHandle,
) {
    let expired = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = external.cancelled() => obs::emit_sweep_cancelled("requested"),
        _ = expired => obs::emit_sweep_cancelled("deadline exceeded"),
    }
    internal.cancel();
}

/// Executes every run of a sweep over a shared provisioner.
pub struct SweepRunner {
    provisioner: Arc<dyn ComputeProvisioner>,
    config: RunnerConfig,
}

impl SweepRunner {
    pub fn new(provisioner: Arc<dyn ComputeProvisioner>, config: RunnerConfig) -> Self {
        Self {
            provisioner,
            config,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run the whole sweep of `spec` and collect one result per assignment.
    ///
    /// Per-run failures are recorded in the summary. An error is returned
    /// only when a script cannot be rendered, after in-flight runs have been
    /// cancelled and drained.
    pub async fn run(
        &self,
        spec: &ToolSpec,
        cancel: CancelSignal,
    ) -> Result<SweepSummary, SweepError> {
        let sweep_id = Uuid::new_v4();
        let span = obs::sweep_span(&sweep_id.to_string(), spec.name());
        self.run_sweep(sweep_id, spec, cancel).instrument(span).await
    }

    async fn run_sweep(
        &self,
        sweep_id: Uuid,
        spec: &ToolSpec,
        cancel: CancelSignal,
    ) -> Result<SweepSummary, SweepError> {
        let started_at = Utc::now();
        let max_concurrency = self.config.max_concurrency.max(1);
        obs::emit_sweep_started(
            &sweep_id.to_string(),
            spec.name(),
            spec.sweep().len(),
            max_concurrency,
        );

        let limits = StageLimits {
            stage_timeout: self.config.stage_timeout,
            // A deadline too far out to represent is no deadline.
            sweep_deadline: self
                .config
                .deadline
                .and_then(|d| Instant::now().checked_add(d)),
        };
        let internal = CancelHandle::new();
        let watcher = tokio::spawn(
            watch_cancellation(cancel, limits.sweep_deadline, internal.clone()).in_current_span(),
        );

        let collector = Arc::new(ResultCollector::new());
        let sem = Arc::new(Semaphore::new(max_concurrency));
        let compute = Arc::new(spec.compute().clone());
        let mut tasks: Vec<(ParameterAssignment, JoinHandle<()>)> = Vec::new();
        let mut render_error = None;

        for rendered in spec.rendered_runs() {
            let run = match rendered {
                Ok(run) => run,
                Err(e) => {
                    internal.cancel();
                    render_error = Some(e);
                    break;
                }
            };

            // The semaphore is never closed.
            let Ok(permit) = Arc::clone(&sem).acquire_owned().await else {
                break;
            };

            let assignment = run.assignment.clone();
            let provisioner = Arc::clone(&self.provisioner);
            let compute = Arc::clone(&compute);
            let collector = Arc::clone(&collector);
            let internal = internal.clone();
            let signal = internal.signal();
            let retry = self.config.retry.clone();
            let fail_fast = self.config.fail_fast;

            let task = tokio::spawn(
                async move {
                    let _permit = permit;
                    let result = execute_with_retry(
                        provisioner.as_ref(),
                        &compute,
                        &run,
                        limits,
                        &retry,
                        signal,
                    )
                    .await;
                    obs::emit_run_completed(&result);

                    let cancelled = matches!(result.state, RunState::Cancelled { .. });
                    if fail_fast && !result.succeeded() && !cancelled {
                        internal.cancel();
                    }
                    collector.record(result).await;
                }
                .in_current_span(),
            );
            tasks.push((assignment, task));
        }

        let (assignments, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let joined = futures::future::join_all(handles).await;
        for (assignment, outcome) in assignments.into_iter().zip(joined) {
            if let Err(e) = outcome {
                // The run never reported; keep it in the summary as unfinished.
                error!(index = assignment.index, error = %e, "run task panicked");
                let mut lost = RunResult::new(assignment);
                lost.error = Some(format!("run task failed: {}", e));
                collector.record(lost).await;
            }
        }
        watcher.abort();

        if let Some(e) = render_error {
            return Err(e);
        }

        let summary = collector
            .finish(sweep_id, spec.name(), spec.digest().clone(), started_at)
            .await;
        obs::emit_sweep_finished(&summary);
        Ok(summary)
    }
}
