use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Branch placeholder shown until the first status probe completes
pub const PENDING_BRANCH: &str = "⋯";

/// Maximum number of command log entries kept per repository
pub const COMMAND_LOG_CAPACITY: usize = 50;

/// Git status information for one working copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoStatus {
    pub branch: String,
    pub is_dirty: bool,
    pub has_untracked: bool,
    pub ahead_count: u32,
    pub behind_count: u32,
    /// Short human readable error, empty when the probe succeeded
    pub error: String,
}

impl RepoStatus {
    /// Status of a repository that has not been probed yet
    pub fn pending() -> Self {
        Self {
            branch: PENDING_BRANCH.to_string(),
            ..Self::default()
        }
    }

    pub fn is_pending(&self) -> bool {
        self.branch == PENDING_BRANCH
    }

    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// Clean means no local modifications and no untracked files
    pub fn is_clean(&self) -> bool {
        !self.is_dirty && !self.has_untracked
    }

    pub fn is_diverged(&self) -> bool {
        self.ahead_count > 0 && self.behind_count > 0
    }
}

impl Default for RepoStatus {
    fn default() -> Self {
        Self {
            branch: String::new(),
            is_dirty: false,
            has_untracked: false,
            ahead_count: 0,
            behind_count: 0,
            error: String::new(),
        }
    }
}

/// Kind of git command recorded in a repository's command log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Status,
    Fetch,
    Pull,
    Log,
    Diff,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Status => "status",
            CommandKind::Fetch => "fetch",
            CommandKind::Pull => "pull",
            CommandKind::Log => "log",
            CommandKind::Diff => "diff",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single git command run against a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLog {
    pub timestamp: SystemTime,
    pub command: CommandKind,
    pub success: bool,
    pub output: String,
    pub error: String,
    pub duration_ms: u64,
}

/// A discovered Git working copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    /// Absolute path; the unique key of the repository
    pub path: PathBuf,
    pub name: String,
    pub display_name: String,
    /// Group name mirrored from the group store, empty when ungrouped
    pub group: String,
    pub status: RepoStatus,
    pub last_error: String,
    pub has_error: bool,
    pub command_logs: VecDeque<CommandLog>,
}

impl Repository {
    /// Create a freshly discovered repository with a pending status
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = repo_name(&path);
        Self {
            display_name: name.clone(),
            name,
            path,
            group: String::new(),
            status: RepoStatus::pending(),
            last_error: String::new(),
            has_error: false,
            command_logs: VecDeque::new(),
        }
    }

    /// Append a command log entry, evicting the oldest one when full
    pub fn push_log(&mut self, log: CommandLog) {
        while self.command_logs.len() >= COMMAND_LOG_CAPACITY {
            self.command_logs.pop_front();
        }
        self.command_logs.push_back(log);
    }

    /// Error shown for the row: the last command failure or the status probe error
    pub fn visible_error(&self) -> Option<&str> {
        if self.has_error && !self.last_error.is_empty() {
            Some(&self.last_error)
        } else if self.status.has_error() {
            Some(&self.status.error)
        } else {
            None
        }
    }
}

/// Basename of a repository path
pub fn repo_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Name of the reserved group that stashes repositories out of the main flow
pub const HIDDEN_GROUP: &str = "_Hidden";

/// Whether `name` is the reserved hidden group
pub fn is_hidden_group(name: &str) -> bool {
    name == HIDDEN_GROUP
}

/// Repository group configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub repos: Vec<PathBuf>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repos: Vec::new(),
        }
    }

    pub fn with_repos(name: impl Into<String>, repos: Vec<PathBuf>) -> Self {
        let mut group = Self::new(name);
        for repo in repos {
            group.add_repo(repo);
        }
        group
    }

    pub fn add_repo(&mut self, path: PathBuf) {
        if !self.repos.contains(&path) {
            self.repos.push(path);
        }
    }

    pub fn remove_repo(&mut self, path: &Path) -> bool {
        let before = self.repos.len();
        self.repos.retain(|p| p != path);
        before != self.repos.len()
    }

    pub fn contains_repo(&self, path: &Path) -> bool {
        self.repos.iter().any(|p| p == path)
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }

    /// The hidden group is collapsed by default and always sorted last
    pub fn is_hidden(&self) -> bool {
        is_hidden_group(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(n: u64) -> CommandLog {
        CommandLog {
            timestamp: SystemTime::UNIX_EPOCH,
            command: CommandKind::Fetch,
            success: true,
            output: format!("run {}", n),
            error: String::new(),
            duration_ms: n,
        }
    }

    #[test]
    fn test_new_repository_is_pending() {
        let repo = Repository::new("/work/api");
        assert_eq!(repo.name, "api");
        assert_eq!(repo.display_name, "api");
        assert!(repo.status.is_pending());
        assert!(repo.group.is_empty());
    }

    #[test]
    fn test_command_log_evicts_oldest() {
        let mut repo = Repository::new("/work/api");
        for n in 0..(COMMAND_LOG_CAPACITY as u64 + 5) {
            repo.push_log(log(n));
        }
        assert_eq!(repo.command_logs.len(), COMMAND_LOG_CAPACITY);
        assert_eq!(repo.command_logs.front().map(|l| l.duration_ms), Some(5));
    }

    #[test]
    fn test_group_rejects_duplicate_paths() {
        let mut group = Group::new("work");
        group.add_repo(PathBuf::from("/a"));
        group.add_repo(PathBuf::from("/a"));
        assert_eq!(group.repos.len(), 1);
        assert!(group.remove_repo(Path::new("/a")));
        assert!(group.is_empty());
    }

    #[test]
    fn test_status_predicates() {
        let status = RepoStatus {
            branch: "main".into(),
            ahead_count: 1,
            behind_count: 2,
            ..RepoStatus::default()
        };
        assert!(status.is_clean());
        assert!(status.is_diverged());
        assert!(!status.is_pending());
    }
}
