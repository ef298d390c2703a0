//! Background repository discovery publishing batched results on the bus

use crate::adapters::discovery::{walk_repositories, WalkVisitor};
use gitagrip_core::bus::{EventBus, Subscription};
use gitagrip_core::domain::{Event, EventKind, Repository};
use gitagrip_core::error::{CoreError, Result};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Largest number of repositories carried by one batch event
pub const BATCH_SIZE: usize = 100;

/// A partial batch is flushed once it is this old
pub const BATCH_INTERVAL: Duration = Duration::from_millis(50);

/// Discovery engine; at most one scan runs at a time
#[derive(Clone)]
pub struct DiscoveryService {
    inner: Arc<Inner>,
}

struct Inner {
    bus: Arc<EventBus>,
    cancel: CancellationToken,
    runtime: Handle,
    running: Mutex<Option<RunningScan>>,
}

struct RunningScan {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DiscoveryService {
    /// Create the service on the current tokio runtime. Scans are cancelled
    /// along with `cancel`.
    pub fn new(bus: Arc<EventBus>, cancel: CancellationToken) -> anyhow::Result<Self> {
        use anyhow::Context;
        let runtime = Handle::try_current().context("discovery must be created inside a tokio runtime")?;
        Ok(Self {
            inner: Arc::new(Inner {
                bus,
                cancel,
                runtime,
                running: Mutex::new(None),
            }),
        })
    }

    fn running(&self) -> MutexGuard<'_, Option<RunningScan>> {
        self.inner.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rescan on every `ScanRequested`, superseding a scan still running
    pub fn subscribe(&self) -> Subscription {
        let service = self.clone();
        self.inner
            .bus
            .subscribe(EventKind::ScanRequested, move |event| {
                if let Event::ScanRequested { paths } = event {
                    let (service, paths) = (service.clone(), paths.clone());
                    service.inner.runtime.clone().spawn(async move {
                        service.stop_scan().await;
                        if let Err(err) = service.start_scan(paths) {
                            warn!(error = %err, "scan request ignored");
                        }
                    });
                }
            })
    }

    pub fn is_scanning(&self) -> bool {
        self.running().as_ref().is_some_and(|scan| !scan.task.is_finished())
    }

    /// Start walking `roots` in the background
    pub fn start_scan(&self, roots: Vec<PathBuf>) -> Result<()> {
        let mut running = self.running();
        if running.as_ref().is_some_and(|scan| !scan.task.is_finished()) {
            return Err(CoreError::ScanInProgress);
        }
        let cancel = self.inner.cancel.child_token();
        let task = self
            .inner
            .runtime
            .spawn(run_scan(self.inner.bus.clone(), roots, cancel.clone()));
        *running = Some(RunningScan { cancel, task });
        Ok(())
    }

    /// Cancel the current scan and wait for it to finish
    pub async fn stop_scan(&self) {
        let scan = self.running().take();
        if let Some(scan) = scan {
            scan.cancel.cancel();
            if let Err(err) = scan.task.await {
                error!("scan task failed: {}", err);
            }
        }
    }
}

/// Collects findings and publishes them in batches
struct Batcher {
    bus: Arc<EventBus>,
    pending: Vec<Repository>,
    oldest: Option<Instant>,
}

impl Batcher {
    fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            pending: Vec::with_capacity(BATCH_SIZE),
            oldest: None,
        }
    }

    fn flush(&mut self) {
        self.oldest = None;
        if self.pending.is_empty() {
            return;
        }
        let repos = std::mem::replace(&mut self.pending, Vec::with_capacity(BATCH_SIZE));
        self.bus.publish(Event::ReposDiscoveredBatch { repos });
    }

    fn flush_if_stale(&mut self) {
        if self.oldest.is_some_and(|t| t.elapsed() >= BATCH_INTERVAL) {
            self.flush();
        }
    }
}

impl WalkVisitor for Batcher {
    fn found(&mut self, repo: PathBuf) {
        self.pending.push(Repository::new(repo));
        self.oldest.get_or_insert_with(Instant::now);
        if self.pending.len() >= BATCH_SIZE {
            self.flush();
        } else {
            self.flush_if_stale();
        }
    }

    fn visited(&mut self) {
        self.flush_if_stale();
    }
}

async fn run_scan(bus: Arc<EventBus>, roots: Vec<PathBuf>, cancel: CancellationToken) {
    info!(roots = ?roots, "scan started");
    bus.publish(Event::ScanStarted { paths: roots.clone() });

    let walk = {
        let (bus, cancel) = (bus.clone(), cancel.clone());
        tokio::task::spawn_blocking(move || {
            let mut batcher = Batcher::new(bus.clone());
            let mut total = 0;
            for root in &roots {
                if cancel.is_cancelled() {
                    break;
                }
                match walk_repositories(root, &cancel, &mut batcher) {
                    Ok(found) => total += found,
                    Err(err) => {
                        error!(root = %root.display(), error = %err, "cannot scan root");
                        bus.publish(Event::error(
                            format!("Cannot scan {}", root.display()),
                            Some(format!("{:#}", err)),
                        ));
                    }
                }
            }
            // Partial batch goes out even when cancelled
            batcher.flush();
            total
        })
    };

    let count = match walk.await {
        Ok(count) => count,
        Err(err) => {
            error!("discovery task panicked: {}", err);
            bus.publish(Event::error("Discovery failed", Some(err.to_string())));
            0
        }
    };
    info!(count, cancelled = cancel.is_cancelled(), "scan completed");
    bus.publish(Event::ScanCompleted { count });
}
