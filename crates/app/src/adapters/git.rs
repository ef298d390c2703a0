use anyhow::{Context, Result};
use async_trait::async_trait;
use gitagrip_core::ports::{GitOutput, GitRunner};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::trace;

/// Git adapter that implements [`GitRunner`] by spawning the `git` binary
#[derive(Debug, Clone)]
pub struct GitCommandRunner {
    program: String,
}

impl GitCommandRunner {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    /// Use a specific git executable
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for GitCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitRunner for GitCommandRunner {
    async fn run(&self, dir: &Path, args: &[&str]) -> Result<GitOutput> {
        trace!(dir = %dir.display(), ?args, "running git");
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(dir)
            // Never wait on a credential prompt
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {} in {}", self.program, dir.display()))?;

        Ok(GitOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
