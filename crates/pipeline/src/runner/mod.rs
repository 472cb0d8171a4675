//! Stage execution
//!
//! The pipeline talks to external tools only through [`StageRunner`], so the
//! launch mechanics stay in one place and tests substitute a fake. Two
//! implementations ship here: [`ProcessRunner`] spawns the real executables,
//! [`NativeStageRunner`] evaluates the known stages in-process for grids
//! small enough not to need the toolset.

mod native;
mod process;

pub use native::NativeStageRunner;
pub use process::ProcessRunner;

use crate::error::Result;
use crate::stage::StageSpec;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Captured outcome of one stage process.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    /// Process exit code; 0 is success, anything else is stage failure
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl StageOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined log text for failure diagnostics.
    pub fn diagnostics(&self) -> String {
        let mut text = String::new();
        if !self.stdout.is_empty() {
            text.push_str(&self.stdout);
        }
        if !self.stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&self.stderr);
        }
        text
    }
}

/// Executes one stage and reports its exit status.
///
/// Implementations block (asynchronously) until the stage finishes or the
/// cancellation token fires; on cancellation they terminate the underlying
/// work and return [`crate::Error::Cancelled`].
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn run(
        &self,
        stage: &StageSpec,
        working_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<StageOutput>;
}
