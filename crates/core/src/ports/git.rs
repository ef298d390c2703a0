use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// Captured result of one git invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitOutput {
    /// Exit code, `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout followed by stderr, trimmed
    pub fn combined(&self) -> String {
        let mut out = self.stdout.trim_end().to_string();
        let err = self.stderr.trim_end();
        if !err.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(err);
        }
        out
    }

    /// Short description of a failure, preferring stderr
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.lines().last().unwrap_or(stderr).to_string();
        }
        match self.exit_code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Port for running `git` subprocesses.
///
/// Implementations must not outlive the returned future: dropping it (on
/// timeout or cancellation) has to terminate the child process.
#[async_trait]
pub trait GitRunner: Send + Sync {
    /// Run `git <args>` with `dir` as the working directory
    async fn run(&self, dir: &Path, args: &[&str]) -> Result<GitOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_joins_streams() {
        let out = GitOutput {
            exit_code: Some(0),
            stdout: "Fetching origin\n".into(),
            stderr: "From github.com:x/y\n".into(),
        };
        assert_eq!(out.combined(), "Fetching origin\nFrom github.com:x/y");
    }

    #[test]
    fn test_failure_message_prefers_last_stderr_line() {
        let out = GitOutput {
            exit_code: Some(128),
            stdout: String::new(),
            stderr: "hint: something\nfatal: no upstream\n".into(),
        };
        assert!(!out.success());
        assert_eq!(out.failure_message(), "fatal: no upstream");
        assert_eq!(GitOutput { exit_code: Some(1), ..GitOutput::default() }.failure_message(), "exit status 1");
    }
}
