//! Workspace: one tenant's isolated task queue plus its live subscribers.
//!
//! The broadcast loop runs only while there is somebody to push to. It is
//! started by a subscription and stops itself after a push finds the
//! subscriber set empty. Start and stop are both decided under the
//! subscriber lock, so there is never more than one loop per workspace.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, Span, debug, error, info, warn};

use super::EngineConfig;
use super::scheduler::{SchedulerStats, TaskScheduler};
use super::subscriber::{Subscriber, SubscriberId};
use crate::error::{DeliveryError, Error, Result};
use crate::model::{Frame, Task, TaskId, TaskKind, WorkspaceId};
use crate::telemetry::metrics;

#[derive(Default)]
struct Subscribers {
    conns: HashMap<SubscriberId, Box<dyn Subscriber>>,
    broadcasting: bool,
}

pub struct Workspace {
    id: WorkspaceId,
    scheduler: Arc<TaskScheduler>,
    subscribers: Mutex<Subscribers>,
    /// Mirror of `subscribers.conns.len()`, readable without the lock.
    subscriber_count: AtomicUsize,
    max_connections: usize,
    broadcast_period: Duration,
    created: Instant,
    /// Milliseconds after `created` of the last resolve, subscribe or add.
    last_active_ms: AtomicU64,
    span: Span,
}

impl Workspace {
    /// Create the workspace and start its dispatch loop. Must be called from
    /// within a Tokio runtime.
    pub fn new(id: WorkspaceId, tenant: &str, config: &EngineConfig) -> Arc<Self> {
        let span = tracing::info_span!("workspace", tenant = tenant, workspace = %id);
        let scheduler = TaskScheduler::new(config.scheduler.clone());
        scheduler.start(span.clone());

        Arc::new(Self {
            id,
            scheduler,
            subscribers: Mutex::new(Subscribers::default()),
            subscriber_count: AtomicUsize::new(0),
            max_connections: config.limits.max_workspace_connections,
            broadcast_period: config.broadcast_period,
            created: Instant::now(),
            last_active_ms: AtomicU64::new(0),
            span,
        })
    }

    pub fn id(&self) -> &WorkspaceId {
        &self.id
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    // -----------------------------------------------------------------------
    // Subscribers
    // -----------------------------------------------------------------------

    /// Register a subscriber whose transport handshake is already done.
    ///
    /// Re-checks the connection limit under the lock, so concurrent
    /// handshakes cannot overshoot it.
    pub fn subscribe(self: &Arc<Self>, subscriber: Box<dyn Subscriber>) -> Result<SubscriberId> {
        let id = SubscriberId::new();
        let mut subs = self.subscribers.lock();
        if subs.conns.len() >= self.max_connections {
            drop(subs);
            subscriber.close();
            metrics::admission_rejections()
                .add(1, &[KeyValue::new("reason", "connection_limit")]);
            return Err(Error::TooManyRequests(
                "too many connections in workspace".to_string(),
            ));
        }
        subs.conns.insert(id, subscriber);
        self.subscriber_count.store(subs.conns.len(), Ordering::Release);
        self.start_broadcast_locked(&mut subs);
        drop(subs);

        self.touch();
        self.span.in_scope(|| info!(subscriber = %id, "subscriber registered"));
        Ok(id)
    }

    /// Remove one subscriber and close its handle. Returns false if unknown.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = {
            let mut subs = self.subscribers.lock();
            let removed = subs.conns.remove(&id);
            self.subscriber_count.store(subs.conns.len(), Ordering::Release);
            removed
        };
        match removed {
            Some(sub) => {
                sub.close();
                self.span.in_scope(|| debug!(subscriber = %id, "subscriber removed"));
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::Acquire)
    }

    pub fn is_broadcasting(&self) -> bool {
        self.subscribers.lock().broadcasting
    }

    /// Start the broadcast loop unless one is already running.
    pub fn ensure_broadcasting(self: &Arc<Self>) -> bool {
        let mut subs = self.subscribers.lock();
        self.start_broadcast_locked(&mut subs)
    }

    fn start_broadcast_locked(self: &Arc<Self>, subs: &mut Subscribers) -> bool {
        if subs.broadcasting {
            return false;
        }
        subs.broadcasting = true;
        let workspace = Arc::clone(self);
        tokio::spawn(workspace.broadcast_loop().instrument(self.span.clone()));
        true
    }

    /// Push one frame to every subscriber.
    ///
    /// Closed subscribers are removed; transient failures are logged and the
    /// subscriber is kept. Fails with `NoConnections` if the set is empty
    /// before or after the pass. Returns how many subscribers took the frame.
    pub fn write_to_all(&self, frame: &Frame) -> Result<usize> {
        let mut subs = self.subscribers.lock();
        if subs.conns.is_empty() {
            return Err(Error::NoConnections);
        }

        let mut delivered = 0;
        let mut gone = Vec::new();
        for (id, sub) in &subs.conns {
            match sub.send(frame) {
                Ok(()) => {
                    delivered += 1;
                    record_delivery("ok");
                }
                Err(DeliveryError::Closed) => {
                    gone.push(*id);
                    record_delivery("closed");
                }
                Err(DeliveryError::Transient(reason)) => {
                    warn!(subscriber = %id, %reason, "push failed, will retry");
                    record_delivery("transient");
                }
            }
        }

        let removed: Vec<_> = gone
            .into_iter()
            .filter_map(|id| subs.conns.remove(&id).map(|sub| (id, sub)))
            .collect();
        let remaining = subs.conns.len();
        self.subscriber_count.store(remaining, Ordering::Release);
        drop(subs);

        for (id, sub) in removed {
            sub.close();
            debug!(subscriber = %id, "subscriber closed by remote");
        }

        if remaining == 0 {
            return Err(Error::NoConnections);
        }
        Ok(delivered)
    }

    /// Clear the running flag if nobody is left. Returns true if the loop
    /// should exit. This is the loop's whole teardown: once the guard drops,
    /// a `subscribe` may already own the set and a fresh loop.
    fn stop_broadcast_if_empty(&self) -> bool {
        let mut subs = self.subscribers.lock();
        if subs.conns.is_empty() {
            subs.broadcasting = false;
            true
        } else {
            false
        }
    }

    async fn broadcast_loop(self: Arc<Self>) {
        info!("broadcast loop started");
        let mut ticker = tokio::time::interval(self.broadcast_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let frame = match serde_json::to_string(&self.scheduler.get_tasks()) {
                Ok(json) => Some(Frame::text(json)),
                Err(e) => {
                    error!(error = %e, "failed to serialize task snapshot");
                    None
                }
            };

            let result = match &frame {
                Some(frame) => self.write_to_all(frame),
                None if self.subscriber_count() == 0 => Err(Error::NoConnections),
                None => continue,
            };

            match result {
                Ok(_) => {}
                Err(Error::NoConnections) => {
                    if self.stop_broadcast_if_empty() {
                        debug!("no connections in workspace");
                        break;
                    }
                }
                Err(e) => error!(error = %e, "broadcast failed"),
            }
        }

        info!("broadcast loop stopped");
    }

    /// Remove and close every subscriber. Idempotent.
    pub fn close(&self) {
        let drained: Vec<_> = {
            let mut subs = self.subscribers.lock();
            let drained = subs.conns.drain().collect();
            self.subscriber_count.store(0, Ordering::Release);
            drained
        };
        for (_, sub) in drained {
            sub.close();
        }
    }

    /// Close every subscriber and stop the dispatch loop.
    pub fn shutdown(&self) {
        self.close();
        self.scheduler.close();
        self.span.in_scope(|| debug!("workspace shut down"));
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    pub fn add_task(&self, name: impl Into<String>, kind: TaskKind) -> Task {
        self.touch();
        self.scheduler.add_task(name, kind)
    }

    pub fn get_tasks(&self) -> Vec<Task> {
        self.scheduler.get_tasks()
    }

    pub fn delete_task(&self, id: TaskId) -> Result<Task> {
        self.scheduler.delete_task(id)
    }

    pub fn flush_tasks(&self) -> Result<usize> {
        self.scheduler.flush_tasks()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    // -----------------------------------------------------------------------
    // Activity
    // -----------------------------------------------------------------------

    pub fn touch(&self) {
        let ms = self.created.elapsed().as_millis() as u64;
        self.last_active_ms.fetch_max(ms, Ordering::AcqRel);
    }

    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_active_ms.load(Ordering::Acquire));
        self.created.elapsed().saturating_sub(last)
    }

    /// No subscribers, nothing queued or running, and quiet for `max_idle`.
    /// Reads only atomics, so callers may hold their own locks.
    pub fn is_evictable(&self, max_idle: Duration) -> bool {
        self.subscriber_count() == 0 && self.scheduler.is_idle() && self.idle_for() >= max_idle
    }
}

fn record_delivery(result: &'static str) {
    metrics::broadcast_deliveries().add(1, &[KeyValue::new("result", result)]);
}
