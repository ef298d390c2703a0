use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Deepest entry examined below a root; a `.git` deeper than this is ignored
pub const MAX_DEPTH: usize = 5;

/// Directory names never descended into
pub const PRUNED_DIRS: &[&str] = &[
    "node_modules",
    ".npm",
    "vendor",
    ".cache",
    "dist",
    "build",
    "target",
    ".gradle",
    "__pycache__",
    ".pytest_cache",
    ".tox",
    "venv",
    ".venv",
    "env",
];

/// Parent directories deeper than this do not become automatic groups
const AUTO_GROUP_MAX_DEPTH: usize = 3;

/// Receives repositories found by [`walk_repositories`]
pub trait WalkVisitor {
    fn found(&mut self, repo: PathBuf);

    /// Called for every directory entry visited, found or not
    fn visited(&mut self) {}
}

impl WalkVisitor for Vec<PathBuf> {
    fn found(&mut self, repo: PathBuf) {
        self.push(repo);
    }
}

/// Whether a directory is skipped without descending
pub fn is_pruned(name: &str) -> bool {
    name != ".git" && (name.starts_with('.') || PRUNED_DIRS.contains(&name))
}

/// Walk `root` and report every directory holding a `.git` entry.
///
/// Unreadable directories are logged and skipped. The cancellation token is
/// checked before every entry. Fails only when `root` is not a directory.
pub fn walk_repositories(
    root: &Path,
    cancel: &CancellationToken,
    visitor: &mut dyn WalkVisitor,
) -> Result<usize> {
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }

    let mut found = 0;
    let mut entries = WalkDir::new(root)
        .min_depth(1)
        .max_depth(MAX_DEPTH)
        .follow_links(false)
        .into_iter();

    loop {
        if cancel.is_cancelled() {
            debug!(root = %root.display(), found, "walk cancelled");
            break;
        }
        let entry = match entries.next() {
            None => break,
            Some(Ok(entry)) => entry,
            Some(Err(err)) => {
                warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        visitor.visited();

        let name = entry.file_name().to_string_lossy();
        if name == ".git" {
            if let Some(repo) = entry.path().parent() {
                visitor.found(repo.to_path_buf());
                found += 1;
            }
            if entry.file_type().is_dir() {
                entries.skip_current_dir();
            }
            continue;
        }
        if entry.file_type().is_dir() && is_pruned(&name) {
            entries.skip_current_dir();
        }
    }
    Ok(found)
}

/// Group repositories by their parent directory relative to `base`.
///
/// Repositories directly under `base` stay ungrouped, parents deeper than
/// three levels are ignored and groups of a single repository are dropped.
pub fn auto_groups(base: &Path, repos: &[PathBuf]) -> BTreeMap<String, Vec<PathBuf>> {
    let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for repo in repos {
        let Ok(relative) = repo.strip_prefix(base) else {
            continue;
        };
        let Some(parent) = relative.parent() else {
            continue;
        };
        let depth = parent.components().count();
        if depth == 0 || depth > AUTO_GROUP_MAX_DEPTH {
            continue;
        }
        groups
            .entry(parent.to_string_lossy().to_string())
            .or_default()
            .push(repo.clone());
    }

    groups.retain(|_, members| members.len() >= 2);
    for members in groups.values_mut() {
        members.sort();
    }
    groups
}
