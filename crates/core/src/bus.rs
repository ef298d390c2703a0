//! Typed publish/subscribe event bus.
//!
//! Producers enqueue onto one bounded ingress queue and never block: when the
//! queue is full the event is dropped and counted. A dedicated dispatcher
//! thread dequeues events and hands them to subscriber lanes. Each lane is
//! drained by a short-lived rayon task, so a slow handler only delays its own
//! lane while every handler still sees events in publish order.

use crate::domain::{Event, EventKind};
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Default ingress queue capacity
pub const DEFAULT_CAPACITY: usize = 1000;

/// Event handler invoked on a worker thread
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// The event bus shared by every component
pub struct EventBus {
    tx: Sender<Event>,
    stop_tx: Sender<()>,
    registry: Arc<Registry>,
    dropped: AtomicU64,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    /// Create a bus with the default capacity and start its dispatcher
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        let (stop_tx, stop_rx) = bounded(1);
        let registry = Arc::new(Registry::default());

        let dispatcher = {
            let registry = registry.clone();
            std::thread::spawn(move || run_dispatcher(rx, stop_rx, registry))
        };

        Self {
            tx,
            stop_tx,
            registry,
            dropped: AtomicU64::new(0),
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Enqueue an event without blocking. Full queue drops the event.
    pub fn publish(&self, event: Event) {
        self.registry.in_flight.fetch_add(1, Ordering::SeqCst);
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.registry.in_flight.fetch_sub(1, Ordering::SeqCst);
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(kind = ?event.kind(), dropped_total = total, "event bus full, dropping event");
            }
            Err(TrySendError::Disconnected(event)) => {
                self.registry.in_flight.fetch_sub(1, Ordering::SeqCst);
                debug!(kind = ?event.kind(), "event bus stopped, discarding event");
            }
        }
    }

    /// Register a handler for one event kind
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe_many(&[kind], handler)
    }

    /// Register one handler for several kinds. The handler receives all of
    /// them through a single lane, so their relative order is preserved.
    pub fn subscribe_many<F>(&self, kinds: &[EventKind], handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let lane = Arc::new(Lane {
            id,
            handler: Arc::new(handler),
            state: Mutex::new(LaneState::default()),
        });

        let mut lanes = self.registry.lanes.write().unwrap_or_else(PoisonError::into_inner);
        for kind in kinds {
            lanes.entry(*kind).or_default().push(lane.clone());
        }

        Subscription {
            id,
            kinds: kinds.to_vec(),
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Number of events dropped because the queue was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait until the queue is empty and every handler has returned.
    /// Returns false if the timeout elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.registry.in_flight.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Stop the dispatcher after delivering everything already queued
    pub fn shutdown(&self) {
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = self.stop_tx.try_send(());
            if handle.join().is_err() {
                error!("event bus dispatcher panicked");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Token returned by `subscribe`; `unsubscribe` removes the handler
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    kinds: Vec<EventKind>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut lanes = registry.lanes.write().unwrap_or_else(PoisonError::into_inner);
        for kind in &self.kinds {
            if let Some(list) = lanes.get_mut(kind) {
                list.retain(|lane| lane.id != self.id);
                if list.is_empty() {
                    lanes.remove(kind);
                }
            }
        }
    }
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    in_flight: AtomicUsize,
    lanes: RwLock<HashMap<EventKind, Vec<Arc<Lane>>>>,
}

impl Registry {
    fn dispatch(self: &Arc<Self>, event: Event) {
        // Copy the subscriber list so registration never races with delivery
        let targets: Vec<Arc<Lane>> = {
            let lanes = self.lanes.read().unwrap_or_else(PoisonError::into_inner);
            lanes.get(&event.kind()).cloned().unwrap_or_default()
        };

        if let Some((last, rest)) = targets.split_last() {
            for lane in rest {
                self.deliver(lane.clone(), event.clone());
            }
            self.deliver(last.clone(), event);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn deliver(self: &Arc<Self>, lane: Arc<Lane>, event: Event) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let mut state = lane.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.pending.push_back(event);
        if state.draining {
            return;
        }
        state.draining = true;
        drop(state);

        let registry = self.clone();
        rayon::spawn(move || lane.drain(&registry));
    }
}

#[derive(Default)]
struct LaneState {
    pending: VecDeque<Event>,
    draining: bool,
}

struct Lane {
    id: u64,
    handler: Handler,
    state: Mutex<LaneState>,
}

impl Lane {
    fn drain(&self, registry: &Registry) {
        loop {
            let event = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                match state.pending.pop_front() {
                    Some(event) => event,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };

            let kind = event.kind();
            let handler = self.handler.clone();
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                error!(?kind, subscriber = self.id, "event handler panicked: {}", panic_message(&*panic));
            }
            registry.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

fn run_dispatcher(rx: Receiver<Event>, stop_rx: Receiver<()>, registry: Arc<Registry>) {
    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(event) => registry.dispatch(event),
                Err(_) => break,
            },
            recv(stop_rx) -> _ => {
                while let Ok(event) = rx.try_recv() {
                    registry.dispatch(event);
                }
                break;
            }
        }
    }
    debug!("event bus dispatcher stopped");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_publish_reaches_subscriber() {
        let bus = EventBus::new();
        let (tx, rx) = mpsc::channel();
        bus.subscribe(EventKind::ScanCompleted, move |event| {
            let _ = tx.send(event.clone());
        });

        bus.publish(Event::ScanCompleted { count: 7 });
        assert_eq!(rx.recv_timeout(WAIT).ok(), Some(Event::ScanCompleted { count: 7 }));
    }

    #[test]
    fn test_handler_only_sees_subscribed_kinds() {
        let bus = EventBus::new();
        let (tx, rx) = mpsc::channel();
        bus.subscribe(EventKind::ConfigSaved, move |event| {
            let _ = tx.send(event.kind());
        });

        bus.publish(Event::ScanCompleted { count: 1 });
        bus.publish(Event::ConfigSaved);
        assert!(bus.wait_idle(WAIT));
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![EventKind::ConfigSaved]);
    }

    #[test]
    fn test_unsubscribe_removes_handler() {
        let bus = EventBus::new();
        let (tx, rx) = mpsc::channel();
        let sub = bus.subscribe(EventKind::ConfigSaved, move |_| {
            let _ = tx.send(());
        });

        bus.publish(Event::ConfigSaved);
        assert!(bus.wait_idle(WAIT));
        sub.unsubscribe();
        bus.publish(Event::ConfigSaved);
        assert!(bus.wait_idle(WAIT));

        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_events_arrive_in_publish_order() {
        let bus = EventBus::new();
        let (tx, rx) = mpsc::channel();
        bus.subscribe_many(&[EventKind::ScanStarted, EventKind::ScanCompleted], move |event| {
            let _ = tx.send(event.clone());
        });

        for count in 0..200 {
            bus.publish(Event::ScanStarted { paths: vec![] });
            bus.publish(Event::ScanCompleted { count });
        }
        assert!(bus.wait_idle(WAIT));

        let counts: Vec<usize> = rx
            .try_iter()
            .filter_map(|e| match e {
                Event::ScanCompleted { count } => Some(count),
                _ => None,
            })
            .collect();
        assert_eq!(counts, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_handler_does_not_stop_others() {
        let bus = EventBus::new();
        let (tx, rx) = mpsc::channel();
        bus.subscribe(EventKind::ConfigSaved, |_| panic!("handler failure"));
        bus.subscribe(EventKind::ConfigSaved, move |_| {
            let _ = tx.send(());
        });

        bus.publish(Event::ConfigSaved);
        bus.publish(Event::ConfigSaved);
        assert!(bus.wait_idle(WAIT));
        assert_eq!(rx.try_iter().count(), 2);
    }

    /// A bus whose queue is never drained
    fn stalled_bus(capacity: usize) -> (EventBus, Receiver<Event>) {
        let (tx, rx) = bounded(capacity);
        let (stop_tx, _) = bounded(1);
        let bus = EventBus {
            tx,
            stop_tx,
            registry: Arc::new(Registry::default()),
            dropped: AtomicU64::new(0),
            dispatcher: Mutex::new(None),
        };
        (bus, rx)
    }

    #[test]
    fn test_overflow_drops_instead_of_blocking() {
        let (bus, rx) = stalled_bus(4);

        for count in 0..10 {
            bus.publish(Event::ScanCompleted { count });
        }

        assert_eq!(bus.dropped_count(), 6);
        let kept: Vec<Event> = rx.try_iter().collect();
        assert_eq!(kept.first(), Some(&Event::ScanCompleted { count: 0 }));
        assert_eq!(kept.len(), 4);
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let bus = EventBus::new();
        let (tx, rx) = mpsc::channel();
        bus.subscribe(EventKind::ScanCompleted, move |_| {
            let _ = tx.send(());
        });

        for count in 0..50 {
            bus.publish(Event::ScanCompleted { count });
        }
        bus.shutdown();
        assert!(bus.wait_idle(WAIT));
        assert_eq!(rx.try_iter().count(), 50);

        // Publishing after shutdown is a no-op
        bus.publish(Event::ScanCompleted { count: 99 });
        assert!(bus.wait_idle(WAIT));
    }
}
