//! Provisioner that runs scripts on the orchestrating host.
//!
//! Each acquired "resource" is a fresh temporary working directory. Scripts
//! run there under the configured shell with `SWEEP_WORKDIR`,
//! `SWEEP_RUN_ID`, `SWEEP_STAGE` and (when an output root is configured)
//! `SWEEP_OUTPUT_DIR` exported. Releasing the handle deletes the directory.
//!
//! On unix every script leads its own process group, and the whole group is
//! killed when the stage ends or its future is dropped, so nothing a script
//! started survives a timed-out stage.

use async_trait::async_trait;
use paramsweep_core::{ComputeSpec, Script};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Instant;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ComputeError, ComputeResult};
use crate::provisioner::{ComputeHandle, ComputeProvisioner, ExecutionOutcome};

/// Configuration for [`LocalProvisioner`].
#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// Interpreter each script is passed to.
    pub shell: PathBuf,

    /// Directory under which per-run stage logs and artifacts are kept.
    /// When `None`, nothing outlives the run's working directory.
    pub output_root: Option<PathBuf>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("bash"),
            output_root: None,
        }
    }
}

#[derive(Debug)]
struct Workspace {
    dir: TempDir,
    output_dir: Option<PathBuf>,
}

/// Runs every stage as a local child process.
#[derive(Debug, Default)]
pub struct LocalProvisioner {
    config: LocalConfig,
    workspaces: Mutex<HashMap<String, Workspace>>,
}

impl LocalProvisioner {
    pub fn new(config: LocalConfig) -> Self {
        Self {
            config,
            workspaces: Mutex::new(HashMap::new()),
        }
    }

    /// Number of workspaces currently held.
    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Workspace>> {
        // A poisoned map still holds valid entries; keep releasing them.
        self.workspaces
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn paths(&self, handle: &ComputeHandle) -> ComputeResult<(PathBuf, Option<PathBuf>)> {
        let map = self.lock();
        let ws = map
            .get(handle.id())
            .ok_or_else(|| ComputeError::UnknownHandle(handle.id().to_string()))?;
        Ok((ws.dir.path().to_path_buf(), ws.output_dir.clone()))
    }
}

#[async_trait]
impl ComputeProvisioner for LocalProvisioner {
    async fn acquire(&self, compute: &ComputeSpec) -> ComputeResult<ComputeHandle> {
        let dir = tempfile::Builder::new()
            .prefix("paramsweep-")
            .tempdir()
            .map_err(|e| ComputeError::Provisioning(format!("cannot create workspace: {}", e)))?;

        let handle = ComputeHandle::new(&compute.provider);
        let output_dir = match &self.config.output_root {
            Some(root) => {
                let out = root.join(handle.id());
                tokio::fs::create_dir_all(&out).await.map_err(|e| {
                    ComputeError::Provisioning(format!(
                        "cannot create output directory {}: {}",
                        out.display(),
                        e
                    ))
                })?;
                Some(out)
            }
            None => None,
        };

        debug!(handle = %handle.id(), workdir = %dir.path().display(), "acquired local workspace");
        self.lock()
            .insert(handle.id().to_string(), Workspace { dir, output_dir });
        Ok(handle)
    }

    async fn execute(
        &self,
        handle: &ComputeHandle,
        script: &Script,
    ) -> ComputeResult<ExecutionOutcome> {
        let start = Instant::now();
        let (workdir, output_dir) = self.paths(handle)?;

        let script_path = workdir.join(format!("{}.sh", script.stage));
        tokio::fs::write(&script_path, &script.body).await?;

        let mut command = Command::new(&self.config.shell);
        command
            .arg(&script_path)
            .current_dir(&workdir)
            .env("SWEEP_WORKDIR", &workdir)
            .env("SWEEP_RUN_ID", handle.id())
            .env("SWEEP_STAGE", script.stage.name())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        if let Some(out) = &output_dir {
            command.env("SWEEP_OUTPUT_DIR", out);
        }

        let child = command.spawn()?;
        let _group = ProcessGroup::new(child.id());
        let output = child.wait_with_output().await?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if let Some(out) = &output_dir {
            persist_logs(out, script, &stdout, &stderr).await?;
        }

        if !output.status.success() {
            return Err(ComputeError::ExecutionFailed {
                stage: script.stage,
                exit_code,
                stdout,
                stderr,
            });
        }

        Ok(ExecutionOutcome {
            exit_code,
            stdout,
            stderr,
            duration_ms,
            output_location: output_dir.map(|p| p.display().to_string()),
        })
    }

    fn output_location(&self, handle: &ComputeHandle) -> Option<String> {
        self.lock()
            .get(handle.id())
            .and_then(|ws| ws.output_dir.as_ref())
            .map(|p| p.display().to_string())
    }

    async fn release(&self, handle: ComputeHandle) -> ComputeResult<()> {
        let ws = self
            .lock()
            .remove(handle.id())
            .ok_or_else(|| ComputeError::UnknownHandle(handle.id().to_string()))?;
        debug!(handle = %handle.id(), "releasing local workspace");
        ws.dir
            .close()
            .map_err(|e| ComputeError::Release(e.to_string()))
    }
}

/// Kills a script's process group when dropped.
struct ProcessGroup {
    #[cfg_attr(not(unix), allow(dead_code))]
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.and_then(|id| libc::pid_t::try_from(id).ok()) {
            // ESRCH just means the group has already exited.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
}

async fn persist_logs(
    out: &Path,
    script: &Script,
    stdout: &str,
    stderr: &str,
) -> ComputeResult<()> {
    tokio::fs::write(out.join(format!("{}.stdout.log", script.stage)), stdout).await?;
    tokio::fs::write(out.join(format!("{}.stderr.log", script.stage)), stderr).await?;
    Ok(())
}
