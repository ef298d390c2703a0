use crate::services::app_service::ServiceSettings;
use crate::services::git_pool::MAX_WORKERS;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, PartialEq)]
#[command(name = "gitagrip")]
#[command(about = "A fast terminal UI for discovering, grouping, and inspecting multiple Git repositories")]
pub struct CliArgs {
    /// Directory to scan for repositories (defaults to the current directory)
    pub path: Option<PathBuf>,

    /// Directory to scan; takes precedence over the positional argument
    #[arg(short = 'd', long = "dir")]
    pub dir: Option<PathBuf>,

    /// Refresh every repository's status every SECS seconds (0 disables)
    #[arg(long, value_name = "SECS")]
    pub refresh_interval: Option<u64>,

    /// Number of git commands allowed to run at once
    #[arg(long, default_value_t = 5)]
    pub workers: usize,
}

impl CliArgs {
    /// The requested base directory as an absolute, canonical path
    pub fn resolve_base_dir(&self) -> Result<PathBuf> {
        let requested = match self.dir.as_ref().or(self.path.as_ref()) {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("Failed to read the current directory")?,
        };
        let resolved = requested
            .canonicalize()
            .with_context(|| format!("Cannot open directory {}", requested.display()))?;
        if !resolved.is_dir() {
            anyhow::bail!("{} is not a directory", resolved.display());
        }
        Ok(resolved)
    }

    pub fn settings(&self) -> ServiceSettings {
        ServiceSettings {
            workers: self.workers.clamp(1, MAX_WORKERS),
            refresh_interval: self
                .refresh_interval
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use tempfile::TempDir;

    #[test]
    fn test_cli_parse_no_args() {
        let args = CliArgs::parse_from(["gitagrip"]);
        assert_eq!(args.path, None);
        assert_eq!(args.dir, None);
        assert_eq!(args.workers, 5);
        assert_eq!(args.settings().refresh_interval, None);
    }

    #[test]
    fn test_dir_flag_wins_over_positional() -> Result<()> {
        let flagged = TempDir::new()?;
        let positional = TempDir::new()?;
        let args = CliArgs::parse_from([
            OsString::from("gitagrip"),
            positional.path().into(),
            OsString::from("-d"),
            flagged.path().into(),
        ]);

        assert_eq!(args.resolve_base_dir()?, flagged.path().canonicalize()?);
        Ok(())
    }

    #[test]
    fn test_positional_dir_is_made_absolute() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let args = CliArgs::parse_from([OsString::from("gitagrip"), temp_dir.path().into()]);
        let resolved = args.resolve_base_dir()?;
        assert!(resolved.is_absolute());
        assert_eq!(resolved, temp_dir.path().canonicalize()?);
        Ok(())
    }

    #[test]
    fn test_missing_dir_is_an_error() {
        let args = CliArgs::parse_from(["gitagrip", "--dir", "/definitely/not/here"]);
        assert!(args.resolve_base_dir().is_err());
    }

    #[test]
    fn test_workers_are_clamped_and_zero_interval_disables() {
        let args = CliArgs::parse_from(["gitagrip", "--workers", "100", "--refresh-interval", "0"]);
        let settings = args.settings();
        assert_eq!(settings.workers, MAX_WORKERS);
        assert_eq!(settings.refresh_interval, None);

        let args = CliArgs::parse_from(["gitagrip", "--workers", "0", "--refresh-interval", "30"]);
        let settings = args.settings();
        assert_eq!(settings.workers, 1);
        assert_eq!(settings.refresh_interval, Some(Duration::from_secs(30)));
    }
}
