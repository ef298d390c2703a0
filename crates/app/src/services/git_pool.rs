//! Bounded pool running per-repository git operations.
//!
//! Every operation takes one semaphore permit before it starts a subprocess
//! and gives it back when it finishes, so at most `workers` git processes run
//! at once. Results only ever leave the pool as bus events.

use anyhow::{Context, Result};
use gitagrip_core::bus::{EventBus, Subscription};
use gitagrip_core::domain::probe::{detached_branch, parse_left_right, parse_porcelain};
use gitagrip_core::domain::{repo_name, CommandKind, Event, EventKind, RepoStatus};
use gitagrip_core::ports::{GitOutput, GitRunner};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

pub const DEFAULT_WORKERS: usize = 5;
pub const MAX_WORKERS: usize = 32;
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(30);
pub const NETWORK_TIMEOUT: Duration = Duration::from_secs(120);

const LOG_ARGS: &[&str] = &["log", "--oneline", "-20", "--decorate"];

const HANDLED: &[EventKind] = &[
    EventKind::ScanStarted,
    EventKind::RepoDiscovered,
    EventKind::ReposDiscoveredBatch,
    EventKind::StatusRefreshRequested,
    EventKind::FetchRequested,
    EventKind::PullRequested,
    EventKind::LogRequested,
    EventKind::DiffRequested,
];

#[derive(Debug, Clone)]
pub struct GitPoolConfig {
    pub workers: usize,
    pub status_timeout: Duration,
    pub network_timeout: Duration,
}

impl Default for GitPoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            status_timeout: STATUS_TIMEOUT,
            network_timeout: NETWORK_TIMEOUT,
        }
    }
}

impl GitPoolConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: workers.clamp(1, MAX_WORKERS),
            ..Self::default()
        }
    }
}

/// Why an operation produced no git output
#[derive(Debug)]
enum Interrupted {
    Cancelled,
    TimedOut(Duration),
    Spawn(anyhow::Error),
}

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupted::Cancelled => f.write_str("cancelled"),
            Interrupted::TimedOut(limit) => write!(f, "timed out after {:?}", limit),
            Interrupted::Spawn(err) => write!(f, "{:#}", err),
        }
    }
}

/// Cheaply cloneable handle to the worker pool
#[derive(Clone)]
pub struct GitPool {
    inner: Arc<Inner>,
}

struct Inner {
    bus: Arc<EventBus>,
    runner: Arc<dyn GitRunner>,
    permits: Semaphore,
    known: Mutex<BTreeSet<PathBuf>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    runtime: Handle,
    config: GitPoolConfig,
}

impl GitPool {
    /// Create a pool bound to the current tokio runtime
    pub fn new(
        bus: Arc<EventBus>,
        runner: Arc<dyn GitRunner>,
        config: GitPoolConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let runtime = Handle::try_current().context("git pool must be created inside a tokio runtime")?;
        let workers = config.workers.clamp(1, MAX_WORKERS);
        info!(workers, "starting git worker pool");
        Ok(Self {
            inner: Arc::new(Inner {
                bus,
                runner,
                permits: Semaphore::new(workers),
                known: Mutex::new(BTreeSet::new()),
                cancel,
                tracker: TaskTracker::new(),
                runtime,
                config: GitPoolConfig { workers, ..config },
            }),
        })
    }

    /// Route the pool's events from the bus into it
    pub fn subscribe(&self) -> Subscription {
        let pool = self.clone();
        self.inner
            .bus
            .subscribe_many(HANDLED, move |event| pool.handle_event(event))
    }

    fn known(&self) -> MutexGuard<'_, BTreeSet<PathBuf>> {
        self.inner.known.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add repositories to the known set, returning the ones not seen before
    pub fn register(&self, paths: impl IntoIterator<Item = PathBuf>) -> Vec<PathBuf> {
        let mut known = self.known();
        paths.into_iter().filter(|path| known.insert(path.clone())).collect()
    }

    pub fn known_repos(&self) -> Vec<PathBuf> {
        self.known().iter().cloned().collect()
    }

    /// Drop every known repository below one of `roots`, so the next
    /// sighting of each is probed again
    pub fn forget_under(&self, roots: &[PathBuf]) -> usize {
        let mut known = self.known();
        let before = known.len();
        known.retain(|path| !roots.iter().any(|root| path.starts_with(root)));
        before - known.len()
    }

    fn handle_event(&self, event: &Event) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        match event {
            // A scan rebuilds the repository store from scratch
            Event::ScanStarted { paths } => {
                let forgotten = self.forget_under(paths);
                if forgotten > 0 {
                    debug!(forgotten, "rescan started, repositories will be probed again");
                }
            }
            Event::RepoDiscovered { .. } | Event::ReposDiscoveredBatch { .. } => {
                let found = event.discovered_repos().unwrap_or_default();
                let fresh = self.register(found.iter().map(|repo| repo.path.clone()));
                if !fresh.is_empty() {
                    debug!(count = fresh.len(), "probing newly discovered repositories");
                    let pool = self.clone();
                    self.spawn(async move { pool.refresh_all(fresh).await });
                }
            }
            Event::StatusRefreshRequested { paths } => {
                let paths = self.resolve(paths);
                let pool = self.clone();
                self.spawn(async move { pool.refresh_all(paths).await });
            }
            Event::FetchRequested { paths } => {
                for path in self.resolve(paths) {
                    let pool = self.clone();
                    self.spawn(async move {
                        pool.fetch(&path).await;
                    });
                }
            }
            Event::PullRequested { paths } => {
                for path in self.resolve(paths) {
                    let pool = self.clone();
                    self.spawn(async move {
                        pool.pull(&path).await;
                    });
                }
            }
            Event::LogRequested { path } => {
                let (pool, path) = (self.clone(), path.clone());
                self.spawn(async move { pool.load_log(&path).await });
            }
            Event::DiffRequested { path } => {
                let (pool, path) = (self.clone(), path.clone());
                self.spawn(async move { pool.load_diff(&path).await });
            }
            _ => {}
        }
    }

    /// Empty means every known repository
    fn resolve(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        if paths.is_empty() {
            self.known_repos()
        } else {
            self.register(paths.iter().cloned());
            paths.to_vec()
        }
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.tracker.spawn_on(task, &self.inner.runtime);
    }

    /// Wait for a permit, then run `work` under `limit`. Cancellation wins
    /// over both; dropping `work` kills any subprocess it started.
    async fn limited<T>(
        &self,
        limit: Duration,
        work: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, Interrupted> {
        let cancel = &self.inner.cancel;
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(Interrupted::Cancelled),
            permit = self.inner.permits.acquire() => permit.map_err(|_| Interrupted::Cancelled)?,
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(Interrupted::Cancelled),
            result = tokio::time::timeout(limit, work) => match result {
                Err(_) => Err(Interrupted::TimedOut(limit)),
                Ok(Err(err)) => Err(Interrupted::Spawn(err)),
                Ok(Ok(value)) => Ok(value),
            },
        }
    }

    /// Probe one repository and publish `StatusUpdated`
    pub async fn refresh_repo(&self, path: &Path) -> RepoStatus {
        let runner = self.inner.runner.clone();
        let result = self
            .limited(self.inner.config.status_timeout, async {
                Ok::<_, anyhow::Error>(probe_status(runner.as_ref(), path).await)
            })
            .await;

        let status = match result {
            Ok(status) => status,
            Err(Interrupted::Cancelled) => {
                return RepoStatus {
                    error: "cancelled".to_string(),
                    ..RepoStatus::pending()
                };
            }
            Err(reason) => RepoStatus {
                error: format!("Status {}", reason),
                ..RepoStatus::default()
            },
        };

        if status.has_error() {
            warn!(path = %path.display(), error = %status.error, "status probe failed");
        } else {
            debug!(path = %path.display(), branch = %status.branch, "status probed");
        }
        self.inner.bus.publish(Event::StatusUpdated {
            path: path.to_path_buf(),
            status: status.clone(),
        });
        status
    }

    /// Probe every path and return once all finished or the pool is cancelled
    pub async fn refresh_all(&self, paths: Vec<PathBuf>) {
        let mut set = JoinSet::new();
        for path in paths {
            let pool = self.clone();
            set.spawn(async move {
                pool.refresh_repo(&path).await;
            });
        }

        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => {
                    set.abort_all();
                    break;
                }
                next = set.join_next() => match next {
                    None => break,
                    Some(Ok(())) => {}
                    Some(Err(err)) if err.is_panic() => error!("status probe panicked: {}", err),
                    Some(Err(_)) => {}
                },
            }
        }
    }

    /// Refresh every known repository on a fixed interval until cancelled
    pub fn start_background_refresh(&self, every: Duration) -> JoinHandle<()> {
        let pool = self.clone();
        info!(interval_secs = every.as_secs(), "starting background refresh");
        self.inner.tracker.spawn_on(
            async move {
                let mut ticker = tokio::time::interval(every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                // The first tick completes immediately
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = pool.inner.cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            let paths = pool.known_repos();
                            debug!(count = paths.len(), "background refresh");
                            pool.refresh_all(paths).await;
                        }
                    }
                }
            },
            &self.inner.runtime,
        )
    }

    /// `git fetch --all --prune`; re-probes status on success
    pub async fn fetch(&self, path: &Path) -> bool {
        self.network(path, CommandKind::Fetch, &["fetch", "--all", "--prune"])
            .await
    }

    /// `git pull --rebase`; re-probes status on success
    pub async fn pull(&self, path: &Path) -> bool {
        self.network(path, CommandKind::Pull, &["pull", "--rebase"]).await
    }

    async fn network(&self, path: &Path, kind: CommandKind, args: &[&str]) -> bool {
        let started = Instant::now();
        let result = self
            .limited(self.inner.config.network_timeout, self.inner.runner.run(path, args))
            .await;
        let ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (ok, out, err) = match result {
            Err(Interrupted::Cancelled) => return false,
            Ok(output) if output.success() => (true, output.combined(), String::new()),
            Ok(output) => (false, output.combined(), output.failure_message()),
            Err(reason) => (false, String::new(), reason.to_string()),
        };

        self.inner.bus.publish(Event::CommandExecuted {
            path: path.to_path_buf(),
            cmd: kind,
            ok,
            out,
            err: err.clone(),
            ms,
        });
        let completed = match kind {
            CommandKind::Pull => Event::PullCompleted {
                path: path.to_path_buf(),
                ok,
                err: err.clone(),
            },
            _ => Event::FetchCompleted {
                path: path.to_path_buf(),
                ok,
                err: err.clone(),
            },
        };
        self.inner.bus.publish(completed);

        if ok {
            debug!(path = %path.display(), command = %kind, ms, "git command succeeded");
            self.refresh_repo(path).await;
        } else {
            warn!(path = %path.display(), command = %kind, error = %err, "git command failed");
            let verb = match kind {
                CommandKind::Pull => "Pull",
                _ => "Fetch",
            };
            self.inner.bus.publish(Event::error(
                format!("{} failed for {}: {}", verb, repo_name(path), err),
                Some(err),
            ));
        }
        ok
    }

    /// Last 20 commits, published as `LogLoaded`
    pub async fn load_log(&self, path: &Path) {
        let result = self
            .limited(self.inner.config.status_timeout, self.inner.runner.run(path, LOG_ARGS))
            .await;
        let text = match result {
            Err(Interrupted::Cancelled) => return,
            Ok(output) if output.success() => output.stdout,
            Ok(output) => format!("Failed to load log: {}", output.failure_message()),
            Err(reason) => format!("Failed to load log: {}", reason),
        };
        self.inner.bus.publish(Event::LogLoaded {
            path: path.to_path_buf(),
            text,
        });
    }

    /// Working tree diff, published as `DiffLoaded`
    pub async fn load_diff(&self, path: &Path) {
        let result = self
            .limited(self.inner.config.status_timeout, self.inner.runner.run(path, &["diff"]))
            .await;
        let text = match result {
            Err(Interrupted::Cancelled) => return,
            // `git diff` exits with 1 when it was asked for --exit-code style output
            Ok(output) if matches!(output.exit_code, Some(0) | Some(1)) => {
                if output.stdout.trim().is_empty() {
                    "No changes".to_string()
                } else {
                    output.stdout
                }
            }
            Ok(output) => format!("Failed to load diff: {}", output.failure_message()),
            Err(reason) => format!("Failed to load diff: {}", reason),
        };
        self.inner.bus.publish(Event::DiffLoaded {
            path: path.to_path_buf(),
            text,
        });
    }

    /// Cancel in-flight work and wait for every spawned task to finish
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("git worker pool stopped");
    }
}

async fn run_checked(runner: &dyn GitRunner, path: &Path, args: &[&str]) -> std::result::Result<GitOutput, String> {
    match runner.run(path, args).await {
        Ok(output) if output.success() => Ok(output),
        Ok(output) => Err(output.failure_message()),
        Err(err) => Err(format!("{:#}", err)),
    }
}

/// Branch, worktree flags and upstream divergence of one repository
pub async fn probe_status(runner: &dyn GitRunner, path: &Path) -> RepoStatus {
    let mut status = RepoStatus::default();

    let head = match run_checked(runner, path, &["rev-parse", "--abbrev-ref", "HEAD"]).await {
        Ok(output) => output.stdout.trim().to_string(),
        Err(err) => {
            status.error = format!("Failed to get branch: {}", err);
            return status;
        }
    };
    let detached = head == "HEAD";
    status.branch = if detached {
        let sha = run_checked(runner, path, &["rev-parse", "--short", "HEAD"]).await.ok();
        detached_branch(sha.as_ref().map(|o| o.stdout.as_str()))
    } else {
        head
    };

    match run_checked(runner, path, &["status", "--porcelain"]).await {
        Ok(output) => {
            let flags = parse_porcelain(&output.stdout);
            status.is_dirty = flags.is_dirty;
            status.has_untracked = flags.has_untracked;
        }
        Err(err) => {
            status.error = format!("Failed to get status: {}", err);
            return status;
        }
    }

    if detached {
        return status;
    }
    let upstream_spec = format!("{}@{{u}}", status.branch);
    let Ok(upstream) = run_checked(runner, path, &["rev-parse", "--abbrev-ref", &upstream_spec]).await else {
        // No upstream configured
        return status;
    };
    let range = format!("{}...{}", upstream.stdout.trim(), status.branch);
    match run_checked(runner, path, &["rev-list", "--left-right", "--count", &range]).await {
        Ok(output) => match parse_left_right(&output.stdout) {
            Ok((ahead, behind)) => {
                status.ahead_count = ahead;
                status.behind_count = behind;
            }
            Err(err) => status.error = err.to_string(),
        },
        Err(err) => status.error = format!("Failed to count commits: {}", err),
    }
    status
}
