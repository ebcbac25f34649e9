//! Priority event queue with scheduled delivery, retry with
//! exponential backoff, a dead-letter queue, middleware, and
//! statistics. Used by the pipeline orchestrator and batch operations
//! for background coordination.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Event kinds flowing through the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    FileDiscovered,
    FileModified,
    FileDeleted,
    IndexStarted,
    IndexProgress,
    IndexCompleted,
    IndexFailed,
    OptimizationRequested,
    BackupRequested,
    CleanupRequested,
}

/// Lower value = more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Critical = 1,
    High = 2,
    Normal = 3,
    Low = 4,
    Cleanup = 5,
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub event_type: EventType,
    pub priority: Priority,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub retries: u32,
    pub max_retries: u32,
    pub correlation_id: Option<String>,
}

impl Event {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.scheduled_at {
            Some(at) => at <= now,
            None => true,
        }
    }
}

/// Ordering wrapper: earlier scheduled time first (unscheduled ranks
/// as due now), then lower priority value, then earlier creation.
#[derive(Debug)]
struct QueuedEvent(Event);

impl QueuedEvent {
    fn sort_key(&self) -> (DateTime<Utc>, Priority, DateTime<Utc>) {
        (
            self.0.scheduled_at.unwrap_or(self.0.created_at),
            self.0.priority,
            self.0.created_at,
        )
    }
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}
impl Eq for QueuedEvent {}
impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; reverse for min-first ordering.
        other.sort_key().cmp(&self.sort_key())
    }
}

/// A registered handler. Returning an error re-schedules the event
/// with exponential backoff until `max_retries` is exhausted.
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    fn handle<'a>(
        &'a self,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}

/// Middleware runs before dispatch; returning false drops the event.
pub type Middleware = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub total_processed: u64,
    pub total_failed: u64,
    pub queue_size: usize,
    pub scheduled_events: usize,
    pub dead_letter_size: usize,
    pub active_workers: usize,
    pub max_workers: usize,
    pub average_processing_ms: f64,
    pub is_running: bool,
}

#[derive(Default)]
struct Registry {
    handlers: HashMap<EventType, Vec<Arc<dyn EventHandler>>>,
    middleware: Vec<Middleware>,
}

#[derive(Default)]
struct Queues {
    ready: BinaryHeap<QueuedEvent>,
    scheduled: Vec<Event>,
    dead_letter: VecDeque<Event>,
}

#[derive(Default)]
struct StatsInner {
    total_processed: u64,
    total_failed: u64,
    /// Rolling window of the last 1000 processing times (ms).
    processing_times: VecDeque<f64>,
}

pub struct EventQueue {
    max_workers: usize,
    registry: Mutex<Registry>,
    queues: Mutex<Queues>,
    stats: Mutex<StatsInner>,
    active_workers: AtomicUsize,
    running: AtomicBool,
    notify: Arc<Notify>,
}

impl EventQueue {
    pub fn new(max_workers: usize) -> Arc<Self> {
        Arc::new(Self {
            max_workers: max_workers.max(1),
            registry: Mutex::new(Registry::default()),
            queues: Mutex::new(Queues::default()),
            stats: Mutex::new(StatsInner::default()),
            active_workers: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            notify: Arc::new(Notify::new()),
        })
    }

    pub fn add_handler(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        let name = handler.name().to_string();
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .handlers
            .entry(event_type)
            .or_default()
            .push(handler);
        tracing::info!(handler = %name, event_type = ?event_type, "Registered event handler");
    }

    pub fn add_middleware(&self, middleware: Middleware) {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .middleware
            .push(middleware);
    }

    /// Publish an event, optionally delayed. Returns the event id.
    pub fn publish(
        &self,
        event_type: EventType,
        data: serde_json::Value,
        priority: Priority,
        delay: Option<Duration>,
        correlation_id: Option<String>,
    ) -> String {
        let now = Utc::now();
        let event = Event {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            priority,
            data,
            created_at: now,
            scheduled_at: delay.map(|d| now + d),
            retries: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            correlation_id,
        };
        let id = event.id.clone();
        self.enqueue(event);
        id
    }

    fn enqueue(&self, event: Event) {
        let now = Utc::now();
        {
            let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
            if event.is_due(now) {
                queues.ready.push(QueuedEvent(event));
            } else {
                queues.scheduled.push(event);
            }
        }
        self.notify.notify_waiters();
    }

    /// Start the 1-second scheduler loop and the worker pool.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            while scheduler.running.load(Ordering::SeqCst) {
                scheduler.promote_due_events();
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        });

        for worker_id in 0..self.max_workers {
            let worker = Arc::clone(self);
            tokio::spawn(async move {
                worker.worker_loop(worker_id).await;
            });
        }

        tracing::info!(workers = self.max_workers, "Event queue started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn promote_due_events(&self) {
        let now = Utc::now();
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let (due, pending): (Vec<Event>, Vec<Event>) = std::mem::take(&mut queues.scheduled)
            .into_iter()
            .partition(|e| e.is_due(now));
        queues.scheduled = pending;
        let promoted = !due.is_empty();
        for event in due {
            queues.ready.push(QueuedEvent(event));
        }
        drop(queues);
        if promoted {
            self.notify.notify_waiters();
        }
    }

    fn pop_ready(&self) -> Option<Event> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.ready.pop().map(|q| q.0)
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        while self.running.load(Ordering::SeqCst) {
            let Some(event) = self.pop_ready() else {
                // Nothing ready; wait for a publish or the scheduler tick.
                let notified = self.notify.notified();
                tokio::select! {
                    _ = notified => {}
                    _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {}
                }
                continue;
            };

            self.active_workers.fetch_add(1, Ordering::SeqCst);
            self.process_event(event, worker_id).await;
            self.active_workers.fetch_sub(1, Ordering::SeqCst);

            // Yield so one busy worker cannot starve the runtime.
            tokio::task::yield_now().await;
        }
    }

    async fn process_event(&self, event: Event, worker_id: usize) {
        let started = std::time::Instant::now();

        let (handlers, middleware) = {
            let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            (
                registry
                    .handlers
                    .get(&event.event_type)
                    .cloned()
                    .unwrap_or_default(),
                registry.middleware.clone(),
            )
        };

        for check in &middleware {
            if !check(&event) {
                tracing::debug!(event = %event.id, "Middleware blocked event");
                return;
            }
        }

        if handlers.is_empty() {
            tracing::warn!(event_type = ?event.event_type, "No handlers for event type");
            return;
        }

        let mut success = true;
        for handler in &handlers {
            if let Err(e) = handler.handle(&event).await {
                tracing::warn!(
                    event = %event.id,
                    handler = %handler.name(),
                    worker = worker_id,
                    error = %e,
                    "Event handler failed"
                );
                success = false;
                break;
            }
        }

        if success {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats.total_processed += 1;
            stats.processing_times.push_back(elapsed_ms);
            if stats.processing_times.len() > 1000 {
                stats.processing_times.pop_front();
            }
        } else {
            self.handle_failed_event(event);
        }
    }

    /// Retry with `scheduled_at = now + 2^retries` seconds, then dead-letter.
    fn handle_failed_event(&self, mut event: Event) {
        event.retries += 1;

        if event.retries <= event.max_retries {
            let backoff = Duration::seconds(2i64.pow(event.retries));
            event.scheduled_at = Some(Utc::now() + backoff);
            tracing::warn!(
                event = %event.id,
                attempt = event.retries,
                max = event.max_retries,
                backoff_secs = backoff.num_seconds(),
                "Event failed, retrying"
            );
            self.enqueue(event);
        } else {
            tracing::error!(event = %event.id, "Event failed permanently, dead-lettered");
            let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
            queues.dead_letter.push_back(event);
            drop(queues);
            self.stats
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .total_failed += 1;
        }
    }

    pub fn drain_dead_letters(&self) -> Vec<Event> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.dead_letter.drain(..).collect()
    }

    pub fn stats(&self) -> QueueStats {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());

        let average_processing_ms = if stats.processing_times.is_empty() {
            0.0
        } else {
            stats.processing_times.iter().sum::<f64>() / stats.processing_times.len() as f64
        };

        QueueStats {
            total_processed: stats.total_processed,
            total_failed: stats.total_failed,
            queue_size: queues.ready.len(),
            scheduled_events: queues.scheduled.len(),
            dead_letter_size: queues.dead_letter.len(),
            active_workers: self.active_workers.load(Ordering::SeqCst),
            max_workers: self.max_workers,
            average_processing_ms,
            is_running: self.running.load(Ordering::SeqCst),
        }
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
