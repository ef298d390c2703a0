use crate::domain::{CommandLog, Event, RepoStatus, Repository};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Authoritative mapping of repository path to [`Repository`].
///
/// Every accessor returns owned copies so callers can never mutate the store
/// behind its lock.
#[derive(Debug, Default)]
pub struct RepoStore {
    inner: Mutex<RepoState>,
}

#[derive(Debug, Default)]
struct RepoState {
    base_dir: Option<PathBuf>,
    repos: HashMap<PathBuf, Repository>,
}

impl RepoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose duplicate names are disambiguated relative to `base_dir`
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let store = Self::default();
        store.lock().base_dir = Some(base_dir.into());
        store
    }

    fn lock(&self) -> MutexGuard<'_, RepoState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a repository. A known path is updated in place and keeps its
    /// status and command history. Returns true when the path was new.
    pub fn add(&self, repo: Repository) -> bool {
        let mut state = self.lock();
        let inserted = state.insert(repo);
        if inserted {
            state.refresh_display_names();
        }
        inserted
    }

    /// Insert many repositories, returning how many were new
    pub fn add_all(&self, repos: impl IntoIterator<Item = Repository>) -> usize {
        let mut state = self.lock();
        let mut added = 0;
        for repo in repos {
            if state.insert(repo) {
                added += 1;
            }
        }
        if added > 0 {
            state.refresh_display_names();
        }
        added
    }

    pub fn get(&self, path: &Path) -> Option<Repository> {
        self.lock().repos.get(path).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().repos.contains_key(path)
    }

    /// Copy of every repository, in no particular order
    pub fn get_all(&self) -> Vec<Repository> {
        self.lock().repos.values().cloned().collect()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().repos.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().repos.is_empty()
    }

    pub fn remove(&self, path: &Path) -> Option<Repository> {
        let mut state = self.lock();
        let removed = state.repos.remove(path);
        if removed.is_some() {
            state.refresh_display_names();
        }
        removed
    }

    /// Drop every repository ahead of a superseding rescan
    pub fn clear(&self) {
        self.lock().repos.clear();
    }

    /// Replace the status of a known repository; unknown paths are ignored
    pub fn update_status(&self, path: &Path, status: RepoStatus) -> bool {
        let mut state = self.lock();
        match state.repos.get_mut(path) {
            Some(repo) => {
                if status.has_error() {
                    repo.has_error = true;
                    repo.last_error = status.error.clone();
                } else if repo.has_error && repo.last_error == repo.status.error {
                    // The previous probe error is resolved
                    repo.has_error = false;
                    repo.last_error.clear();
                }
                repo.status = status;
                true
            }
            None => {
                debug!(path = %path.display(), "status for unknown repository ignored");
                false
            }
        }
    }

    /// Append to the repository's command log and track its error flag
    pub fn record_command(&self, path: &Path, log: CommandLog) -> bool {
        let mut state = self.lock();
        let Some(repo) = state.repos.get_mut(path) else {
            return false;
        };
        if log.success {
            repo.has_error = false;
            repo.last_error.clear();
        } else {
            repo.has_error = true;
            repo.last_error = if log.error.is_empty() {
                format!("{} failed", log.command)
            } else {
                log.error.clone()
            };
        }
        repo.push_log(log);
        true
    }

    /// Mark a repository as failed without a command log entry
    pub fn set_error(&self, path: &Path, message: &str) -> bool {
        let mut state = self.lock();
        let Some(repo) = state.repos.get_mut(path) else {
            return false;
        };
        repo.has_error = true;
        repo.last_error = message.to_string();
        true
    }

    /// Apply a bus event. Returns true when the stored data changed.
    pub fn apply(&self, event: &Event) -> bool {
        match event {
            Event::RepoDiscovered { .. } | Event::ReposDiscoveredBatch { .. } => {
                let repos = event.discovered_repos().unwrap_or_default();
                self.add_all(repos.iter().cloned()) > 0
            }
            Event::StatusUpdated { path, status } => self.update_status(path, status.clone()),
            Event::CommandExecuted {
                path,
                cmd,
                ok,
                out,
                err,
                ms,
            } => self.record_command(
                path,
                CommandLog {
                    timestamp: std::time::SystemTime::now(),
                    command: *cmd,
                    success: *ok,
                    output: out.clone(),
                    error: err.clone(),
                    duration_ms: *ms,
                },
            ),
            Event::FetchCompleted { path, ok: false, err }
            | Event::PullCompleted { path, ok: false, err } => self.set_error(path, err),
            _ => false,
        }
    }
}

impl RepoState {
    fn insert(&mut self, repo: Repository) -> bool {
        match self.repos.get_mut(&repo.path) {
            Some(existing) => {
                existing.name = repo.name;
                false
            }
            None => {
                self.repos.insert(repo.path.clone(), repo);
                true
            }
        }
    }

    /// Repositories sharing a basename are labelled with their path relative
    /// to the base directory
    fn refresh_display_names(&mut self) {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for repo in self.repos.values() {
            *counts.entry(repo.name.clone()).or_default() += 1;
        }

        for repo in self.repos.values_mut() {
            let duplicated = counts.get(&repo.name).copied().unwrap_or(0) > 1;
            repo.display_name = match (&self.base_dir, duplicated) {
                (Some(base), true) => repo
                    .path
                    .strip_prefix(base)
                    .map(|rel| rel.to_string_lossy().to_string())
                    .unwrap_or_else(|_| repo.path.to_string_lossy().to_string()),
                (None, true) => repo.path.to_string_lossy().to_string(),
                (_, false) => repo.name.clone(),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CommandKind;
    use std::time::SystemTime;

    fn failed(cmd: CommandKind, error: &str) -> CommandLog {
        CommandLog {
            timestamp: SystemTime::now(),
            command: cmd,
            success: false,
            output: String::new(),
            error: error.to_string(),
            duration_ms: 3,
        }
    }

    #[test]
    fn test_duplicate_path_updates_in_place() {
        let store = RepoStore::new();
        assert!(store.add(Repository::new("/base/api")));

        let status = RepoStatus {
            branch: "main".into(),
            ..RepoStatus::default()
        };
        store.update_status(Path::new("/base/api"), status.clone());

        assert!(!store.add(Repository::new("/base/api")));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(Path::new("/base/api")).map(|r| r.status), Some(status));
    }

    #[test]
    fn test_duplicate_names_use_relative_paths() {
        let store = RepoStore::with_base_dir("/base");
        store.add_all([
            Repository::new("/base/a/api"),
            Repository::new("/base/b/api"),
            Repository::new("/base/web"),
        ]);

        let name_of = |p: &str| store.get(Path::new(p)).map(|r| r.display_name);
        assert_eq!(name_of("/base/a/api").as_deref(), Some("a/api"));
        assert_eq!(name_of("/base/b/api").as_deref(), Some("b/api"));
        assert_eq!(name_of("/base/web").as_deref(), Some("web"));

        store.remove(Path::new("/base/b/api"));
        assert_eq!(name_of("/base/a/api").as_deref(), Some("api"));
    }

    #[test]
    fn test_get_all_returns_copies() {
        let store = RepoStore::new();
        store.add(Repository::new("/base/api"));

        let mut copies = store.get_all();
        copies[0].name = "mutated".into();

        assert_eq!(store.get(Path::new("/base/api")).map(|r| r.name).as_deref(), Some("api"));
    }

    #[test]
    fn test_command_failure_sets_and_success_clears_error() {
        let store = RepoStore::new();
        let path = Path::new("/base/api");
        store.add(Repository::new(path));

        store.record_command(path, failed(CommandKind::Fetch, "network unreachable"));
        let repo = store.get(path).unwrap();
        assert!(repo.has_error);
        assert_eq!(repo.last_error, "network unreachable");
        assert_eq!(repo.command_logs.len(), 1);

        store.record_command(
            path,
            CommandLog {
                success: true,
                error: String::new(),
                ..failed(CommandKind::Fetch, "")
            },
        );
        let repo = store.get(path).unwrap();
        assert!(!repo.has_error);
        assert_eq!(repo.command_logs.len(), 2);
    }

    #[test]
    fn test_status_for_unknown_repo_is_ignored() {
        let store = RepoStore::new();
        assert!(!store.update_status(Path::new("/nope"), RepoStatus::default()));
        assert!(store.is_empty());
    }

    #[test]
    fn test_apply_batch_discovery() {
        let store = RepoStore::new();
        let changed = store.apply(&Event::ReposDiscoveredBatch {
            repos: vec![Repository::new("/a"), Repository::new("/b"), Repository::new("/a")],
        });
        assert!(changed);
        assert_eq!(store.len(), 2);
        assert!(!store.apply(&Event::RepoDiscovered {
            repo: Repository::new("/b")
        }));
    }
}
