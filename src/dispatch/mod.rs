//! Request dispatcher: priority lanes, admission budget, dispatch loop.
//!
//! Submitted work waits in one of two FIFO lanes. A single loop admits
//! items while fewer than `max_concurrent` are processing, always taking
//! the synthesis lane first. Each admitted item runs its handler in its
//! own task, so `max_concurrent` bounds real handler parallelism; the loop
//! itself only does admission.
//!
//! Terminal items stay queryable for `result_retention` and are then
//! purged. Lock order is lanes, then in-flight; both are held only for
//! structural updates, never across a handler call.

mod lanes;

use crate::error::{Error, Result};
use crate::event::{Event, EventKind, EventStream};
use crate::handler::{HandlerRegistry, WorkHandler};
use crate::model::{Outcome, State, StatusSnapshot, WorkId, WorkItem, WorkKind, WorkRequest};
use crate::telemetry::metrics;
use crate::telemetry::work::{record_state_transition, start_work_span};
use lanes::Lanes;
use opentelemetry::KeyValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, broadcast};
use tracing::{Instrument, Span, error, info, warn};

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Admission budget: items allowed in `processing` at once.
    pub max_concurrent: usize,
    /// How long terminal items stay queryable.
    pub result_retention: Duration,
    /// Loop re-check interval when nothing wakes it.
    pub poll_interval: Duration,
    /// Pause after a loop-level fault.
    pub fault_backoff: Duration,
    /// Buffered events per subscriber.
    pub event_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            result_retention: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            fault_backoff: Duration::from_secs(1),
            event_capacity: 256,
        }
    }
}

struct Shared {
    config: DispatchConfig,
    lanes: Mutex<Lanes>,
    /// Processing items plus terminal items awaiting purge.
    in_flight: Mutex<HashMap<WorkId, WorkItem>>,
    handlers: RwLock<HandlerRegistry>,
    active: AtomicUsize,
    wake: Notify,
    shutdown: Notify,
    events: EventStream,
}

/// The dispatcher. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new(mut config: DispatchConfig, handlers: HandlerRegistry) -> Self {
        config.max_concurrent = config.max_concurrent.max(1);
        let events = EventStream::new(config.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                lanes: Mutex::new(Lanes::default()),
                in_flight: Mutex::new(HashMap::new()),
                handlers: RwLock::new(handlers),
                active: AtomicUsize::new(0),
                wake: Notify::new(),
                shutdown: Notify::new(),
                events,
            }),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.shared.config
    }

    /// Queue new work. Never blocks on I/O.
    ///
    /// # Errors
    /// `InvalidRequest` if the payload fails validation.
    pub fn submit(&self, owner_id: impl Into<String>, request: WorkRequest) -> Result<WorkId> {
        request.validate()?;
        let item = WorkItem::new(owner_id, request);
        let (id, kind, owner_id) = (item.id, item.kind, item.owner_id.clone());

        let position = self.shared.lock_lanes().push(item);

        info!(%id, %kind, owner = %owner_id, position, "work queued");
        metrics::work_submitted().add(1, &[KeyValue::new("kind", kind.as_str())]);
        self.shared.events.emit(EventKind::WorkQueued {
            id,
            kind,
            owner_id,
            position,
        });
        self.shared.wake.notify_one();
        Ok(id)
    }

    /// Point-in-time status. `None` if unknown or already purged.
    pub fn status(&self, id: WorkId) -> Option<StatusSnapshot> {
        // Both locks held so an item moving from a lane to in-flight is
        // seen in one place or the other.
        let lanes = self.shared.lock_lanes();
        let in_flight = self.shared.lock_in_flight();
        if let Some(item) = in_flight.get(&id) {
            return Some(item.snapshot());
        }
        lanes.find(id).map(WorkItem::snapshot)
    }

    /// Install the handler for `kind`, replacing any previous one.
    pub fn register_handler(&self, kind: WorkKind, handler: impl WorkHandler) {
        let replaced = self
            .shared
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .register(kind, handler);
        if replaced.is_some() {
            warn!(%kind, "handler replaced");
        }
        self.shared.wake.notify_one();
    }

    /// Subscribe to state-transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    /// Items waiting in the lane for `kind`.
    pub fn queued(&self, kind: WorkKind) -> usize {
        self.shared.lock_lanes().len(kind)
    }

    /// Items currently in `processing`.
    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Signal the loop to stop. Handlers already running finish on their own.
    pub fn shutdown(&self) {
        self.shared.shutdown.notify_one();
    }

    /// Run the dispatch loop on a background task.
    pub fn spawn(&self) -> tokio::task::JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.run().await })
    }

    /// Run the dispatch loop until [`shutdown`](Self::shutdown).
    pub async fn run(&self) {
        let config = &self.shared.config;
        info!(
            max_concurrent = config.max_concurrent,
            retention_secs = config.result_retention.as_secs(),
            "dispatcher started"
        );

        loop {
            let pause = match self.shared.dispatch_ready() {
                Ok(_) => config.poll_interval,
                Err(e) => {
                    error!(error = %e, "dispatch loop fault, backing off");
                    config.fault_backoff
                }
            };

            tokio::select! {
                _ = self.shared.shutdown.notified() => {
                    info!("dispatcher shutting down");
                    return;
                }
                _ = self.shared.wake.notified() => {}
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Admit everything that fits right now. Returns how many items left
    /// the lanes. The loop calls this; it is public for callers that
    /// drive dispatch themselves.
    pub fn dispatch_ready(&self) -> Result<usize> {
        self.shared.dispatch_ready()
    }
}

impl Shared {
    fn lock_lanes(&self) -> MutexGuard<'_, Lanes> {
        // Lane and map updates are single statements; a poisoned lock
        // still holds consistent data.
        self.lanes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<WorkId, WorkItem>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handler_for(&self, kind: WorkKind) -> Option<Arc<dyn WorkHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(kind)
    }

    fn dispatch_ready(self: &Arc<Self>) -> Result<usize> {
        let mut dequeued = 0;
        while self.active.load(Ordering::Acquire) < self.config.max_concurrent {
            let mut lanes = self.lock_lanes();
            let Some(mut item) = lanes.pop_next() else {
                break;
            };
            dequeued += 1;

            let (id, kind) = (item.id, item.kind);
            let span = start_work_span(kind, id);
            let handler = self.handler_for(kind);
            let mut in_flight = self.lock_in_flight();

            let Some(handler) = handler else {
                let missing = Error::HandlerMissing(kind);
                item.transition(State::Error)
                    .map_err(|e| Error::DispatchLoopFault(e.to_string()))?;
                item.outcome = Some(Outcome::failure(missing.to_string(), 0));
                in_flight.insert(id, item);
                drop(in_flight);
                drop(lanes);

                record_state_transition(&span, State::Queued, State::Error);
                warn!(%id, %kind, "no handler for work kind");
                metrics::work_unroutable().add(1, &[KeyValue::new("kind", kind.as_str())]);
                self.events.emit(EventKind::WorkFailed {
                    id,
                    error: missing.to_string(),
                });
                self.schedule_purge(id);
                continue;
            };

            item.transition(State::Processing)
                .map_err(|e| Error::DispatchLoopFault(e.to_string()))?;
            let request = item.request.clone();
            in_flight.insert(id, item);
            self.active.fetch_add(1, Ordering::AcqRel);
            drop(in_flight);
            drop(lanes);

            record_state_transition(&span, State::Queued, State::Processing);
            self.events.emit(EventKind::WorkProcessing { id });
            self.spawn_handler(id, kind, handler, request, span);
        }
        Ok(dequeued)
    }

    fn spawn_handler(
        self: &Arc<Self>,
        id: WorkId,
        kind: WorkKind,
        handler: Arc<dyn WorkHandler>,
        request: WorkRequest,
        span: Span,
    ) {
        let shared = Arc::clone(self);
        let task_span = span.clone();
        tokio::spawn(
            async move {
                let start = Instant::now();
                // Inner task so a handler panic surfaces as a JoinError.
                let joined =
                    tokio::spawn(async move { handler.handle(request).await }.in_current_span())
                        .await;
                let duration_ms = start.elapsed().as_millis() as u64;

                let outcome = match joined {
                    Ok(Ok(data)) => Outcome::success(data, duration_ms),
                    Ok(Err(e)) => Outcome::failure(classify(e).to_string(), duration_ms),
                    Err(e) => Outcome::failure(
                        Error::Handler(format!("handler aborted: {e}")).to_string(),
                        duration_ms,
                    ),
                };
                let result = if outcome.success { "ok" } else { "error" };
                metrics::handler_duration_ms().record(
                    duration_ms as f64,
                    &[
                        KeyValue::new("kind", kind.as_str()),
                        KeyValue::new("result", result),
                    ],
                );

                shared.finish(id, outcome, &span);
                shared.active.fetch_sub(1, Ordering::AcqRel);
                shared.wake.notify_one();
            }
            .instrument(task_span),
        );
    }

    fn finish(self: &Arc<Self>, id: WorkId, outcome: Outcome, span: &Span) {
        let to = if outcome.success {
            State::Complete
        } else {
            State::Error
        };
        let event = match outcome.error {
            Some(ref error) => EventKind::WorkFailed {
                id,
                error: error.clone(),
            },
            None => EventKind::WorkCompleted {
                id,
                duration_ms: outcome.duration_ms,
            },
        };

        {
            let mut in_flight = self.lock_in_flight();
            let Some(item) = in_flight.get_mut(&id) else {
                error!(%id, "finished work missing from in-flight set");
                return;
            };
            if let Err(e) = item.transition(to) {
                error!(%id, error = %e, "cannot record work outcome");
                return;
            }
            match outcome.error {
                Some(ref error) => warn!(%id, error = %error, duration_ms = outcome.duration_ms, "work failed"),
                None => info!(%id, duration_ms = outcome.duration_ms, "work complete"),
            }
            item.outcome = Some(outcome);
        }

        record_state_transition(span, State::Processing, to);
        self.events.emit(event);
        self.schedule_purge(id);
    }

    fn schedule_purge(self: &Arc<Self>, id: WorkId) {
        let weak: Weak<Shared> = Arc::downgrade(self);
        let retention = self.config.result_retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if shared.lock_in_flight().remove(&id).is_some() {
                shared.events.emit(EventKind::WorkPurged { id });
            }
        });
    }
}

/// Handler failures reach pollers as `Handler` errors.
fn classify(e: Error) -> Error {
    match e {
        Error::Handler(_) => e,
        other => Error::Handler(other.to_string()),
    }
}
