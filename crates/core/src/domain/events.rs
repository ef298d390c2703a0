use super::repo::{CommandKind, Group, RepoStatus, Repository};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Domain events carried by the event bus
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // Discovery
    ScanRequested { paths: Vec<PathBuf> },
    ScanStarted { paths: Vec<PathBuf> },
    RepoDiscovered { repo: Repository },
    ReposDiscoveredBatch { repos: Vec<Repository> },
    ScanCompleted { count: usize },

    // Git
    StatusRefreshRequested { paths: Vec<PathBuf> },
    FetchRequested { paths: Vec<PathBuf> },
    PullRequested { paths: Vec<PathBuf> },
    StatusUpdated { path: PathBuf, status: RepoStatus },
    FetchCompleted { path: PathBuf, ok: bool, err: String },
    PullCompleted { path: PathBuf, ok: bool, err: String },
    CommandExecuted {
        path: PathBuf,
        cmd: CommandKind,
        ok: bool,
        out: String,
        err: String,
        ms: u64,
    },
    LogRequested { path: PathBuf },
    DiffRequested { path: PathBuf },
    LogLoaded { path: PathBuf, text: String },
    DiffLoaded { path: PathBuf, text: String },

    // Grouping
    GroupAdded { name: String },
    GroupRemoved { name: String },
    GroupRenamed { from: String, to: String },
    RepoMoved { path: PathBuf, from: String, to: String },

    // Config
    ConfigLoaded {
        base_dir: PathBuf,
        groups: BTreeMap<String, Group>,
    },
    ConfigChanged {
        groups: BTreeMap<String, Vec<PathBuf>>,
        group_order: Vec<String>,
    },
    ConfigSaved,

    // Errors
    Error { message: String, cause: Option<String> },
}

/// Discriminant of an [`Event`], used as the subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    ScanRequested,
    ScanStarted,
    RepoDiscovered,
    ReposDiscoveredBatch,
    ScanCompleted,
    StatusRefreshRequested,
    FetchRequested,
    PullRequested,
    StatusUpdated,
    FetchCompleted,
    PullCompleted,
    CommandExecuted,
    LogRequested,
    DiffRequested,
    LogLoaded,
    DiffLoaded,
    GroupAdded,
    GroupRemoved,
    GroupRenamed,
    RepoMoved,
    ConfigLoaded,
    ConfigChanged,
    ConfigSaved,
    Error,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ScanRequested { .. } => EventKind::ScanRequested,
            Event::ScanStarted { .. } => EventKind::ScanStarted,
            Event::RepoDiscovered { .. } => EventKind::RepoDiscovered,
            Event::ReposDiscoveredBatch { .. } => EventKind::ReposDiscoveredBatch,
            Event::ScanCompleted { .. } => EventKind::ScanCompleted,
            Event::StatusRefreshRequested { .. } => EventKind::StatusRefreshRequested,
            Event::FetchRequested { .. } => EventKind::FetchRequested,
            Event::PullRequested { .. } => EventKind::PullRequested,
            Event::StatusUpdated { .. } => EventKind::StatusUpdated,
            Event::FetchCompleted { .. } => EventKind::FetchCompleted,
            Event::PullCompleted { .. } => EventKind::PullCompleted,
            Event::CommandExecuted { .. } => EventKind::CommandExecuted,
            Event::LogRequested { .. } => EventKind::LogRequested,
            Event::DiffRequested { .. } => EventKind::DiffRequested,
            Event::LogLoaded { .. } => EventKind::LogLoaded,
            Event::DiffLoaded { .. } => EventKind::DiffLoaded,
            Event::GroupAdded { .. } => EventKind::GroupAdded,
            Event::GroupRemoved { .. } => EventKind::GroupRemoved,
            Event::GroupRenamed { .. } => EventKind::GroupRenamed,
            Event::RepoMoved { .. } => EventKind::RepoMoved,
            Event::ConfigLoaded { .. } => EventKind::ConfigLoaded,
            Event::ConfigChanged { .. } => EventKind::ConfigChanged,
            Event::ConfigSaved => EventKind::ConfigSaved,
            Event::Error { .. } => EventKind::Error,
        }
    }

    /// Repositories carried by a single or batched discovery event
    pub fn discovered_repos(&self) -> Option<&[Repository]> {
        match self {
            Event::RepoDiscovered { repo } => Some(std::slice::from_ref(repo)),
            Event::ReposDiscoveredBatch { repos } => Some(repos),
            _ => None,
        }
    }

    /// Convenience constructor for user visible errors
    pub fn error(message: impl Into<String>, cause: Option<String>) -> Self {
        Event::Error {
            message: message.into(),
            cause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovered_repos_covers_single_and_batch() {
        let single = Event::RepoDiscovered {
            repo: Repository::new("/a"),
        };
        let batch = Event::ReposDiscoveredBatch {
            repos: vec![Repository::new("/a"), Repository::new("/b")],
        };
        assert_eq!(single.discovered_repos().map(|r| r.len()), Some(1));
        assert_eq!(batch.discovered_repos().map(|r| r.len()), Some(2));
        assert!(Event::ConfigSaved.discovered_repos().is_none());
    }

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(Event::ScanCompleted { count: 3 }.kind(), EventKind::ScanCompleted);
        assert_eq!(Event::error("boom", None).kind(), EventKind::Error);
    }
}
