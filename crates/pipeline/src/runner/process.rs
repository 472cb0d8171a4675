//! External process stage runner

use crate::error::{Error, Result};
use crate::runner::{StageOutput, StageRunner};
use crate::stage::StageSpec;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Launches stage executables, optionally under `mpiexec` for multi-process
/// stages, and captures their output.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    /// Directory searched for stage executables before `PATH`
    pub tool_dir: Option<PathBuf>,
    /// `mpiexec` binary for multi-process stages; resolved from `PATH` when
    /// unset
    pub mpiexec: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tool_dir = Some(dir.into());
        self
    }

    /// Resolve a stage executable, trying the tool directory first.
    fn resolve(&self, executable: &str) -> Result<PathBuf> {
        if let Some(dir) = &self.tool_dir {
            let candidate = dir.join(executable);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        which::which(executable).map_err(|_| Error::ExecutableNotFound(executable.to_string()))
    }

    fn build_command(&self, stage: &StageSpec, exe: &Path, working_dir: &Path) -> Command {
        let mut cmd = if stage.processes > 1 {
            let mpiexec = self
                .mpiexec
                .clone()
                .unwrap_or_else(|| PathBuf::from("mpiexec"));
            let mut cmd = Command::new(mpiexec);
            cmd.arg("-n").arg(stage.processes.to_string()).arg(exe);
            cmd
        } else {
            Command::new(exe)
        };
        cmd.args(stage.command_args())
            .current_dir(working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

async fn read_to_string_opt<R: tokio::io::AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut text = String::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_string(&mut text).await;
    }
    text
}

#[async_trait]
impl StageRunner for ProcessRunner {
    async fn run(
        &self,
        stage: &StageSpec,
        working_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<StageOutput> {
        let exe = self.resolve(&stage.executable)?;
        let mut cmd = self.build_command(stage, &exe, working_dir);

        tracing::debug!(stage = %stage.name, exe = %exe.display(), "launching stage");

        let mut child = cmd.spawn().map_err(|source| Error::Launch {
            stage: stage.name.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(read_to_string_opt(stdout));
        let stderr_task = tokio::spawn(read_to_string_opt(stderr));

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|source| Error::Launch {
                    stage: stage.name.clone(),
                    source,
                })?;
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                Ok(StageOutput {
                    exit_code: status.code().unwrap_or(-1),
                    stdout,
                    stderr,
                })
            }
            _ = cancel.cancelled() => {
                tracing::info!(stage = %stage.name, "cancellation requested, terminating stage process");
                child.kill().await.ok();
                stdout_task.abort();
                stderr_task.abort();
                Err(Error::Cancelled)
            }
        }
    }
}
