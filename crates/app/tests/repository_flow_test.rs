//! End-to-end tests against real repositories built with git2 and probed
//! through the `git` command line

use anyhow::Result;
use git2::{Repository as GitRepo, RepositoryInitOptions, Signature};
use gitagrip::adapters::git::GitCommandRunner;
use gitagrip::adapters::persistence::FileConfigStore;
use gitagrip::services::app_service::{AppService, ServiceSettings};
use gitagrip::services::git_pool::probe_status;
use gitagrip_core::app::{Coordinator, Intent, Row};
use gitagrip_core::ports::{AppConfig, ConfigStore};
use gitagrip_core::store::GroupStore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(15);

fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn init_repo(path: &Path) -> Result<GitRepo> {
    fs::create_dir_all(path)?;
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = GitRepo::init_opts(path, &opts)?;
    commit_file(&repo, "README.md", "# test\n", "Initial commit")?;
    Ok(repo)
}

fn commit_file(repo: &GitRepo, name: &str, contents: &str, message: &str) -> Result<()> {
    let workdir = repo.workdir().ok_or_else(|| anyhow::anyhow!("bare repository"))?;
    fs::write(workdir.join(name), contents)?;

    let mut index = repo.index()?;
    index.add_path(Path::new(name))?;
    index.write()?;
    let tree = repo.find_tree(index.write_tree()?)?;
    let signature = Signature::now("Test User", "test@example.com")?;

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(_) => None,
    };
    let parents: Vec<_> = parent.iter().collect();
    repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
    Ok(())
}

/// Pump the coordinator until `done` holds or the wait runs out
async fn pump_until(coordinator: &mut Coordinator, done: impl Fn(&Coordinator) -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    loop {
        coordinator.pump(Instant::now());
        if done(coordinator) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn repo_paths(coordinator: &Coordinator) -> Vec<PathBuf> {
    coordinator.rows().iter().filter_map(Row::repo).map(|r| r.path.clone()).collect()
}

fn all_probed(coordinator: &Coordinator) -> bool {
    let repos: Vec<_> = coordinator.rows().iter().filter_map(Row::repo).collect();
    !repos.is_empty() && repos.iter().all(|r| !r.status.is_pending())
}

#[tokio::test]
async fn test_status_of_clone_with_divergent_upstream() -> Result<()> {
    if !git_available() {
        eprintln!("git not found, skipping");
        return Ok(());
    }
    let temp_dir = TempDir::new()?;
    let origin_path = temp_dir.path().join("origin");
    let clone_path = temp_dir.path().join("work");

    let origin = init_repo(&origin_path)?;
    let clone = GitRepo::clone(origin_path.to_str().unwrap_or_default(), &clone_path)?;

    commit_file(&origin, "a.txt", "a\n", "Upstream one")?;
    commit_file(&origin, "b.txt", "b\n", "Upstream two")?;
    commit_file(&clone, "local.txt", "local\n", "Local work")?;
    clone.find_remote("origin")?.fetch(&[] as &[&str], None, None)?;
    fs::write(clone_path.join("README.md"), "# changed\n")?;

    let status = probe_status(&GitCommandRunner::new(), &clone_path).await;

    assert_eq!(status.error, "");
    assert_eq!(status.branch, "main");
    assert_eq!(status.ahead_count, 1);
    assert_eq!(status.behind_count, 2);
    assert!(status.is_dirty);
    assert!(!status.has_untracked);
    Ok(())
}

#[tokio::test]
async fn test_status_of_repo_without_upstream() -> Result<()> {
    if !git_available() {
        return Ok(());
    }
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("solo");
    init_repo(&path)?;
    fs::write(path.join("new.txt"), "untracked\n")?;

    let status = probe_status(&GitCommandRunner::new(), &path).await;

    assert_eq!(status.error, "");
    assert_eq!(status.branch, "main");
    assert_eq!((status.ahead_count, status.behind_count), (0, 0));
    assert!(!status.is_dirty);
    assert!(status.has_untracked);
    Ok(())
}

#[tokio::test]
async fn test_status_of_plain_directory_reports_error() -> Result<()> {
    if !git_available() {
        return Ok(());
    }
    let temp_dir = TempDir::new()?;
    let status = probe_status(&GitCommandRunner::new(), temp_dir.path()).await;
    assert!(status.error.starts_with("Failed to get branch"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scan_probe_and_group_persist() -> Result<()> {
    if !git_available() {
        return Ok(());
    }
    let temp_dir = TempDir::new()?;
    let base = temp_dir.path().canonicalize()?;
    init_repo(&base.join("api"))?;
    init_repo(&base.join("web"))?;
    init_repo(&base.join("libs/util"))?;

    let store = Arc::new(FileConfigStore::for_base_dir(&base));
    let mut service = AppService::new(
        AppConfig::for_base_dir(&base),
        ServiceSettings::default(),
        Arc::new(GitCommandRunner::new()),
        store.clone(),
        CancellationToken::new(),
    )?;
    let mut coordinator = Coordinator::new(
        service.bus(),
        service.repos(),
        service.groups(),
        service.coordinator_options(),
    );
    service.start(None)?;

    let found = pump_until(&mut coordinator, |c| {
        !c.is_scanning() && repo_paths(c).len() == 3 && all_probed(c)
    })
    .await;
    assert!(found, "repositories were not discovered and probed in time");
    let mut paths = repo_paths(&coordinator);
    paths.sort();
    assert_eq!(paths, vec![base.join("api"), base.join("libs/util"), base.join("web")]);

    // Select `web` and put it in a new group
    while coordinator.current_repo().map(|r| r.path.clone()) != Some(base.join("web")) {
        let before = coordinator.cursor();
        coordinator.handle(Intent::MoveDown);
        assert_ne!(coordinator.cursor(), before, "web row not reachable");
    }
    coordinator.handle(Intent::ToggleSelect);
    coordinator.apply(Intent::CreateGroup("Frontend".into()))?;

    assert_eq!(
        coordinator.rows().first(),
        Some(&Row::GroupHeader {
            name: "Frontend".into(),
            repo_count: 1,
            expanded: true,
        })
    );

    let deadline = Instant::now() + WAIT;
    let saved = loop {
        let saved = store.load().ok().and_then(|config| config.groups.get("Frontend").cloned());
        if saved.is_some() || Instant::now() >= deadline {
            break saved;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(saved, Some(vec![base.join("web")]));

    drop(coordinator);
    service.shutdown().await;

    // A fresh start picks the group back up from disk
    let reloaded = FileConfigStore::for_base_dir(&base).load_or_init(&base);
    assert!(!reloaded.created);
    assert_eq!(reloaded.config.group_order, vec!["Frontend".to_string()]);

    let groups = GroupStore::new();
    groups.replace_all(reloaded.config.domain_groups(), &reloaded.config.group_order);
    assert_eq!(groups.group_of(&base.join("web")), Some("Frontend".to_string()));
    assert_eq!(groups.group_of(&base.join("api")), None);
    Ok(())
}
