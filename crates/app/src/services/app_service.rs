use crate::services::discovery::DiscoveryService;
use crate::services::git_pool::{GitPool, GitPoolConfig};
use crate::services::persistence::PersistenceService;
use anyhow::Result;
use gitagrip_core::app::CoordinatorOptions;
use gitagrip_core::bus::{EventBus, Subscription};
use gitagrip_core::domain::Event;
use gitagrip_core::ports::{AppConfig, ConfigStore, GitRunner};
use gitagrip_core::store::{GroupStore, RepoStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long shutdown waits for queued events, such as a final save, to be handled
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Runtime settings chosen on the command line
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub workers: usize,
    /// Periodic background status refresh; None disables it
    pub refresh_interval: Option<Duration>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            workers: GitPoolConfig::default().workers,
            refresh_interval: None,
        }
    }
}

/// Owns the bus, the stores and the background services, and wires them
/// together. The coordinator is created from its stores by the UI.
pub struct AppService {
    bus: Arc<EventBus>,
    repos: Arc<RepoStore>,
    groups: Arc<GroupStore>,
    pool: GitPool,
    discovery: DiscoveryService,
    persistence: PersistenceService,
    config: AppConfig,
    settings: ServiceSettings,
    cancel: CancellationToken,
    subscriptions: Vec<Subscription>,
    background: Option<JoinHandle<()>>,
}

impl AppService {
    /// Build every service on the current tokio runtime and load the
    /// configured groups into the group store. Nothing runs until
    /// [`AppService::start`].
    pub fn new(
        config: AppConfig,
        settings: ServiceSettings,
        runner: Arc<dyn GitRunner>,
        config_store: Arc<dyn ConfigStore>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let bus = Arc::new(EventBus::new());
        let repos = Arc::new(RepoStore::with_base_dir(config.base_dir.clone()));
        let groups = Arc::new(GroupStore::new());
        groups.replace_all(config.domain_groups(), &config.group_order);

        let pool = GitPool::new(
            bus.clone(),
            runner,
            GitPoolConfig::with_workers(settings.workers),
            cancel.child_token(),
        )?;
        let discovery = DiscoveryService::new(bus.clone(), cancel.child_token())?;
        let persistence = PersistenceService::new(bus.clone(), config_store, config.clone());

        let subscriptions = vec![pool.subscribe(), discovery.subscribe(), persistence.subscribe()];

        Ok(Self {
            bus,
            repos,
            groups,
            pool,
            discovery,
            persistence,
            config,
            settings,
            cancel,
            subscriptions,
            background: None,
        })
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn repos(&self) -> Arc<RepoStore> {
        self.repos.clone()
    }

    pub fn groups(&self) -> Arc<GroupStore> {
        self.groups.clone()
    }

    pub fn base_dir(&self) -> &Path {
        &self.config.base_dir
    }

    pub fn pool(&self) -> &GitPool {
        &self.pool
    }

    pub fn discovery(&self) -> &DiscoveryService {
        &self.discovery
    }

    /// Last configuration written to disk
    pub fn saved_config(&self) -> AppConfig {
        self.persistence.config()
    }

    /// Options for the coordinator, taken from the loaded configuration
    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            base_dir: self.config.base_dir.clone(),
            autosave_on_exit: self.config.ui.autosave_on_exit,
            show_ahead_behind: self.config.ui.show_ahead_behind,
        }
    }

    /// Announce the loaded groups, report a config problem, and start the
    /// initial scan plus the optional background refresh
    pub fn start(&mut self, config_problem: Option<String>) -> Result<()> {
        info!(base = %self.config.base_dir.display(), "starting services");

        // The store already holds these groups, so replaying them is a no-op
        self.bus.publish(Event::ConfigLoaded {
            base_dir: self.config.base_dir.clone(),
            groups: self.config.domain_groups(),
        });

        if let Some(problem) = config_problem {
            self.bus
                .publish(Event::error("Could not read .gitagrip.toml, using defaults", Some(problem)));
        }

        self.discovery.start_scan(vec![self.config.base_dir.clone()])?;

        if let Some(every) = self.settings.refresh_interval.filter(|d| !d.is_zero()) {
            self.background = Some(self.pool.start_background_refresh(every));
        }
        Ok(())
    }

    /// Deliver pending events, stop the scan and the git workers, and stop the bus
    pub async fn shutdown(mut self) {
        info!("shutting down services");

        let bus = self.bus.clone();
        let drained = tokio::task::spawn_blocking(move || bus.wait_idle(DRAIN_TIMEOUT))
            .await
            .unwrap_or(false);
        if !drained {
            warn!("event bus still busy at shutdown");
        }

        self.cancel.cancel();
        self.discovery.stop_scan().await;
        self.pool.shutdown().await;
        if let Some(background) = self.background.take() {
            background.abort();
        }

        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        let bus = self.bus.clone();
        if let Err(err) = tokio::task::spawn_blocking(move || bus.shutdown()).await {
            error!("event bus shutdown failed: {}", err);
        }
        info!(dropped_events = self.bus.dropped_count(), "services stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::FileConfigStore;
    use async_trait::async_trait;
    use gitagrip_core::app::{Coordinator, Intent, Row};
    use gitagrip_core::ports::GitOutput;
    use std::fs;
    use tempfile::TempDir;

    /// Answers every probe as a clean `main` without upstream
    struct CleanRunner;

    #[async_trait]
    impl GitRunner for CleanRunner {
        async fn run(&self, _dir: &Path, args: &[&str]) -> Result<GitOutput> {
            let stdout = match args {
                ["rev-parse", "--abbrev-ref", "HEAD"] => "main\n",
                ["rev-parse", "--abbrev-ref", _] => {
                    return Ok(GitOutput {
                        exit_code: Some(128),
                        stdout: String::new(),
                        stderr: "fatal: no upstream configured".into(),
                    })
                }
                _ => "",
            };
            Ok(GitOutput {
                exit_code: Some(0),
                stdout: stdout.into(),
                stderr: String::new(),
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_applies_groups_and_scans() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path().to_path_buf();
        fs::create_dir_all(base.join("api/.git"))?;

        let mut config = AppConfig::for_base_dir(&base);
        config.groups.insert("B".into(), vec![base.join("api")]);
        config.groups.insert("A".into(), Vec::new());
        config.group_order = vec!["B".into(), "A".into()];

        let mut service = AppService::new(
            config,
            ServiceSettings::default(),
            Arc::new(CleanRunner),
            Arc::new(FileConfigStore::for_base_dir(&base)),
            CancellationToken::new(),
        )?;
        service.start(None)?;

        assert_eq!(service.groups().ordered_names(), vec!["B".to_string(), "A".to_string()]);

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while service.pool().known_repos().is_empty() && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(service.pool().known_repos(), vec![base.join("api")]);

        service.shutdown().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rescan_probes_every_repo_again() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path().to_path_buf();
        fs::create_dir_all(base.join("api/.git"))?;
        fs::create_dir_all(base.join("web/.git"))?;

        let mut service = AppService::new(
            AppConfig::for_base_dir(&base),
            ServiceSettings::default(),
            Arc::new(CleanRunner),
            Arc::new(FileConfigStore::for_base_dir(&base)),
            CancellationToken::new(),
        )?;
        let mut coordinator = Coordinator::new(
            service.bus(),
            service.repos(),
            service.groups(),
            service.coordinator_options(),
        );
        service.start(None)?;

        let probed = |c: &Coordinator| {
            let branches: Vec<_> = c.rows().iter().filter_map(Row::repo).map(|r| r.status.branch.clone()).collect();
            !c.is_scanning() && branches == vec!["main".to_string(), "main".to_string()]
        };
        assert!(pump_until(&mut coordinator, probed).await, "first scan was not probed");

        coordinator.handle(Intent::Rescan);
        assert!(coordinator.rows().iter().all(|row| row.repo().is_none()));
        assert!(pump_until(&mut coordinator, probed).await, "rescan left repositories pending");

        drop(coordinator);
        service.shutdown().await;
        Ok(())
    }

    async fn pump_until(coordinator: &mut Coordinator, done: impl Fn(&Coordinator) -> bool) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            coordinator.pump(std::time::Instant::now());
            if done(coordinator) {
                return true;
            }
            if std::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
