//! Integration tests for sweep execution against fake and local provisioners.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paramsweep_core::{ComputeSpec, ParameterSpec, Script, Stage, ToolSpec};
use paramsweep_run::fakes::ScriptedProvisioner;
use paramsweep_run::{
    CancelHandle, CancelSignal, ComputeHandle, ComputeProvisioner, ComputeResult,
    ExecutionOutcome, LocalConfig, LocalProvisioner, RetryPolicy, RunState, RunnerConfig,
    SweepRunner, SweepSummary,
};

fn counting_spec(max: i64) -> ToolSpec {
    ToolSpec::new(
        "counter",
        vec![ParameterSpec::integer("n", 1, max)],
        ComputeSpec::local(),
        "",
        "echo ${n}",
        "",
    )
    .expect("valid spec")
}

fn config(max_concurrency: usize) -> RunnerConfig {
    RunnerConfig {
        max_concurrency,
        ..RunnerConfig::default()
    }
}

async fn run_sweep(
    provisioner: Arc<dyn ComputeProvisioner>,
    config: RunnerConfig,
    spec: &ToolSpec,
) -> SweepSummary {
    SweepRunner::new(provisioner, config)
        .run(spec, CancelSignal::never())
        .await
        .expect("sweep failed")
}

/// Command-stage failure ends in FAILED(command) and releases exactly once.
#[tokio::test]
async fn test_command_failure_releases_once() {
    let spec = counting_spec(1);
    let provisioner = Arc::new(ScriptedProvisioner::new().failing_stage(Stage::Command));

    let summary = run_sweep(provisioner.clone(), config(1), &spec).await;

    assert_eq!(summary.results.len(), 1);
    let result = &summary.results[0];
    assert_eq!(result.state, RunState::Failed { stage: Stage::Command });
    assert_eq!(result.state.to_string(), "FAILED(command)");
    assert_eq!(result.failed_stage(), Some(Stage::Command));
    assert!(result.stages[1].stderr.contains("scripted command failure"));
    assert_eq!(provisioner.release_count(), 1);
    assert!(provisioner.released_exactly_once());
    assert!(!summary.all_succeeded());
}

/// Results come back in sweep order even when later runs finish first.
#[tokio::test]
async fn test_results_ordered_despite_out_of_order_completion() {
    let spec = counting_spec(5);
    let provisioner = Arc::new(ScriptedProvisioner::new().with_delay(|script: &Script| {
        let n: u64 = script
            .body
            .trim()
            .strip_prefix("echo ")
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        // n=5 is fastest, n=1 slowest
        Duration::from_millis(if n == 0 { 0 } else { (6 - n) * 30 })
    }));

    let summary = run_sweep(provisioner.clone(), config(5), &spec).await;

    let commands: Vec<String> = provisioner
        .executed()
        .into_iter()
        .filter(|s| s.stage == Stage::Command)
        .map(|s| s.body)
        .collect();
    assert_eq!(commands.first().map(String::as_str), Some("echo 5"));
    assert_eq!(commands.last().map(String::as_str), Some("echo 1"));

    let indices: Vec<u64> = summary.results.iter().map(|r| r.index()).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    assert_eq!(summary.results[0].stages[1].stdout, "echo 1");
    assert!(summary.all_succeeded());
    assert!(provisioner.released_exactly_once());
}

/// Acquisition failures are terminal and leave nothing to release.
#[tokio::test]
async fn test_provision_failures_release_nothing() {
    let spec = counting_spec(4);
    let provisioner = Arc::new(ScriptedProvisioner::new().failing_acquire());

    let summary = run_sweep(provisioner.clone(), config(2), &spec).await;

    assert_eq!(summary.counts.provision_failed, 4);
    assert!(summary
        .results
        .iter()
        .all(|r| r.state == RunState::ProvisionFailed && r.stages.is_empty()));
    assert_eq!(provisioner.release_count(), 0);
}

/// A stage exceeding its deadline fails that stage and still releases.
#[tokio::test]
async fn test_stage_timeout() {
    let spec = counting_spec(1);
    let provisioner = Arc::new(ScriptedProvisioner::new().with_delay(|script: &Script| {
        if script.stage == Stage::Command {
            Duration::from_secs(30)
        } else {
            Duration::ZERO
        }
    }));
    let config = RunnerConfig {
        stage_timeout: Some(Duration::from_millis(50)),
        ..config(1)
    };

    let summary = run_sweep(provisioner.clone(), config, &spec).await;

    let result = &summary.results[0];
    assert_eq!(result.state, RunState::Failed { stage: Stage::Command });
    assert!(result.error.as_deref().unwrap_or("").contains("timed out"));
    assert!(provisioner.released_exactly_once());
}

/// Cancelling mid-sweep stops the running run between stages and skips the rest.
#[tokio::test]
async fn test_cancellation_after_acquire() {
    let spec = counting_spec(3);
    let provisioner = Arc::new(ScriptedProvisioner::new().with_delay(|script: &Script| {
        if script.stage == Stage::Setup {
            Duration::from_millis(150)
        } else {
            Duration::ZERO
        }
    }));
    let handle = CancelHandle::new();
    let trigger = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let summary = SweepRunner::new(provisioner.clone(), config(1))
        .run(&spec, handle.signal())
        .await
        .unwrap();

    assert_eq!(
        summary.results[0].state,
        RunState::Cancelled {
            stage: Some(Stage::Command)
        }
    );
    assert_eq!(summary.results[0].stages.len(), 1);
    for r in &summary.results[1..] {
        assert_eq!(r.state, RunState::Cancelled { stage: None });
    }
    assert_eq!(summary.counts.cancelled, 3);
    assert_eq!(provisioner.acquire_count(), 1);
    assert!(provisioner.released_exactly_once());
}

/// A sweep cancelled up front acquires nothing.
#[tokio::test]
async fn test_cancellation_before_acquire() {
    let spec = counting_spec(3);
    let provisioner = Arc::new(ScriptedProvisioner::new());
    let handle = CancelHandle::new();
    handle.cancel();

    let summary = SweepRunner::new(provisioner.clone(), config(2))
        .run(&spec, handle.signal())
        .await
        .unwrap();

    assert_eq!(summary.results.len(), 3);
    assert!(summary
        .results
        .iter()
        .all(|r| r.state == RunState::Cancelled { stage: None }));
    assert_eq!(provisioner.acquire_count(), 0);
    assert_eq!(provisioner.release_count(), 0);
}

/// The sweep deadline cancels whatever has not started yet.
#[tokio::test]
async fn test_sweep_deadline() {
    let spec = counting_spec(3);
    let provisioner = Arc::new(ScriptedProvisioner::new().with_delay(|script: &Script| {
        if script.stage == Stage::Setup {
            Duration::from_millis(150)
        } else {
            Duration::ZERO
        }
    }));
    let config = RunnerConfig {
        deadline: Some(Duration::from_millis(30)),
        ..config(1)
    };

    let summary = run_sweep(provisioner.clone(), config, &spec).await;

    assert_eq!(summary.counts.cancelled, 3);
    assert_eq!(summary.counts.succeeded, 0);
    assert!(provisioner.released_exactly_once());
}

/// The deadline cuts short a stage that would otherwise hang, even with no stage timeout.
#[tokio::test]
async fn test_sweep_deadline_bounds_running_stage() {
    let spec = counting_spec(1);
    let provisioner = Arc::new(ScriptedProvisioner::new().with_delay(|script: &Script| {
        if script.stage == Stage::Command {
            Duration::from_secs(30)
        } else {
            Duration::ZERO
        }
    }));
    let config = RunnerConfig {
        stage_timeout: None,
        deadline: Some(Duration::from_millis(100)),
        ..config(1)
    };

    let started = std::time::Instant::now();
    let summary = run_sweep(provisioner.clone(), config, &spec).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    let result = &summary.results[0];
    assert_eq!(
        result.state,
        RunState::Cancelled {
            stage: Some(Stage::Command)
        }
    );
    assert!(result.error.as_deref().unwrap().contains("deadline"));
    assert_eq!(summary.counts.cancelled, 1);
    assert!(provisioner.released_exactly_once());
}

/// With fail_fast, the first failure cancels the runs queued behind it.
#[tokio::test]
async fn test_fail_fast() {
    let spec = counting_spec(3);
    let provisioner = Arc::new(ScriptedProvisioner::new().failing_stage(Stage::Command));
    let config = RunnerConfig {
        fail_fast: true,
        ..config(1)
    };

    let summary = run_sweep(provisioner.clone(), config, &spec).await;

    assert_eq!(
        summary.results[0].state,
        RunState::Failed { stage: Stage::Command }
    );
    assert_eq!(summary.counts.cancelled, 2);
    assert_eq!(provisioner.acquire_count(), 1);
    assert!(provisioner.released_exactly_once());
}

/// Failed runs are retried from scratch up to the attempt limit.
#[tokio::test]
async fn test_retry_reruns_whole_run() {
    let spec = counting_spec(2);
    let provisioner = Arc::new(ScriptedProvisioner::new().failing_stage(Stage::Setup));
    let config = RunnerConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            backoff_base_ms: 1,
        },
        ..config(2)
    };

    let summary = run_sweep(provisioner.clone(), config, &spec).await;

    for r in &summary.results {
        assert_eq!(r.attempts, 3);
        assert_eq!(r.state, RunState::Failed { stage: Stage::Setup });
    }
    assert_eq!(provisioner.acquire_count(), 6);
    assert!(provisioner.released_exactly_once());
}

/// Provisioner that tracks how many resources are held at once.
#[derive(Default)]
struct GaugeProvisioner {
    held: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ComputeProvisioner for GaugeProvisioner {
    async fn acquire(&self, compute: &ComputeSpec) -> ComputeResult<ComputeHandle> {
        let now = self.held.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Ok(ComputeHandle::new(&compute.provider))
    }

    async fn execute(
        &self,
        _handle: &ComputeHandle,
        script: &Script,
    ) -> ComputeResult<ExecutionOutcome> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(ExecutionOutcome {
            exit_code: 0,
            stdout: script.body.clone(),
            stderr: String::new(),
            duration_ms: 10,
            output_location: None,
        })
    }

    async fn release(&self, _handle: ComputeHandle) -> ComputeResult<()> {
        self.held.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Provisioner whose `execute` panics on one chosen script body.
struct PanickingProvisioner {
    body: &'static str,
}

#[async_trait]
impl ComputeProvisioner for PanickingProvisioner {
    async fn acquire(&self, compute: &ComputeSpec) -> ComputeResult<ComputeHandle> {
        Ok(ComputeHandle::new(&compute.provider))
    }

    async fn execute(
        &self,
        _handle: &ComputeHandle,
        script: &Script,
    ) -> ComputeResult<ExecutionOutcome> {
        if script.body == self.body {
            panic!("provider bug on {:?}", script.body);
        }
        Ok(ExecutionOutcome {
            exit_code: 0,
            stdout: script.body.clone(),
            stderr: String::new(),
            duration_ms: 0,
            output_location: None,
        })
    }

    async fn release(&self, _handle: ComputeHandle) -> ComputeResult<()> {
        Ok(())
    }
}

/// A run whose task panics still gets a result and fails the sweep.
#[tokio::test]
async fn test_panicked_run_is_recorded() {
    let spec = counting_spec(3);
    let provisioner = Arc::new(PanickingProvisioner { body: "echo 2" });

    let summary = run_sweep(provisioner, config(2), &spec).await;

    assert_eq!(summary.results.len(), 3);
    let lost = &summary.results[1];
    assert_eq!(lost.index(), 1);
    assert_eq!(lost.state, RunState::Pending);
    assert!(lost.error.as_deref().unwrap().contains("run task failed"));
    assert_eq!(summary.counts.succeeded, 2);
    assert_eq!(summary.counts.failed(), 1);
    assert!(!summary.all_succeeded());
}

/// No more than `max_concurrency` runs hold compute at any time.
#[tokio::test]
async fn test_concurrency_bound() {
    let spec = counting_spec(12);
    let provisioner = Arc::new(GaugeProvisioner::default());

    let summary = run_sweep(provisioner.clone(), config(3), &spec).await;

    assert_eq!(summary.counts.succeeded, 12);
    let peak = provisioner.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {} exceeded bound", peak);
    assert!(peak >= 1);
    assert_eq!(provisioner.held.load(Ordering::SeqCst), 0);
}

/// Zero parameters still produce exactly one run.
#[tokio::test]
async fn test_parameterless_tool_runs_once() {
    let spec = ToolSpec::new("single", Vec::new(), ComputeSpec::local(), "", "true", "").unwrap();
    let provisioner = Arc::new(ScriptedProvisioner::new());

    let summary = run_sweep(provisioner.clone(), config(4), &spec).await;

    assert_eq!(summary.results.len(), 1);
    assert!(summary.results[0].assignment.is_empty());
    assert!(summary.all_succeeded());
}

/// End to end on the local provisioner: real scripts, shared workdir, logs kept.
#[tokio::test]
async fn test_local_sweep_end_to_end() {
    let spec = ToolSpec::new(
        "adder",
        vec![
            ParameterSpec::integer("paramA", 1, 2),
            ParameterSpec::integer("paramB", 1, 2),
        ],
        ComputeSpec::local(),
        "echo ${paramA} > a.txt",
        "echo $(( $(cat a.txt) + ${paramB} ))",
        "test -f a.txt && echo finished",
    )
    .unwrap();

    let outputs = tempfile::tempdir().unwrap();
    let provisioner = Arc::new(LocalProvisioner::new(LocalConfig {
        output_root: Some(outputs.path().to_path_buf()),
        ..LocalConfig::default()
    }));

    let summary = run_sweep(provisioner.clone(), config(2), &spec).await;

    assert!(summary.all_succeeded(), "{:?}", summary.counts);
    let sums: Vec<String> = summary
        .results
        .iter()
        .map(|r| r.stages[1].stdout.trim().to_string())
        .collect();
    assert_eq!(sums, vec!["2", "3", "3", "4"]);
    assert_eq!(provisioner.live_count(), 0);

    let out = summary.results[3].output_location.clone().unwrap();
    let log_path = std::path::Path::new(&out).join("finish.stdout.log");
    let log = std::fs::read_to_string(log_path).unwrap();
    assert!(log.contains("finished"));

    let report = outputs.path().join("summary.json");
    summary.write_json(&report).unwrap();
    let back = SweepSummary::read_json(&report).unwrap();
    assert_eq!(back.sweep_id, summary.sweep_id);
    assert_eq!(back.spec_digest, *spec.digest());
    assert_eq!(back.counts.succeeded, 4);
}

/// A failed run still points at the output directory holding its logs.
#[tokio::test]
async fn test_failed_local_run_keeps_output_location() {
    let spec = ToolSpec::new(
        "breaker",
        vec![ParameterSpec::integer("n", 1, 1)],
        ComputeSpec::local(),
        "echo prepared",
        "echo broke ${n} >&2; exit 3",
        "",
    )
    .unwrap();

    let outputs = tempfile::tempdir().unwrap();
    let provisioner = Arc::new(LocalProvisioner::new(LocalConfig {
        output_root: Some(outputs.path().to_path_buf()),
        ..LocalConfig::default()
    }));

    let summary = run_sweep(provisioner, config(1), &spec).await;

    let result = &summary.results[0];
    assert_eq!(result.state, RunState::Failed { stage: Stage::Command });
    let out = result.output_location.clone().expect("output location recorded");
    let log_path = std::path::Path::new(&out).join("command.stderr.log");
    let log = std::fs::read_to_string(log_path).unwrap();
    assert!(log.contains("broke 1"));
}
