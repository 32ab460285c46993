//! Per-workspace task scheduler: FIFO pending queue, bounded-concurrency
//! dispatch loop, and the task lifecycle.
//!
//! Tasks live in exactly one of two sequences. `pending` holds queued tasks
//! in insertion order; `dispatched` holds everything that has left the queue,
//! in dispatch order, and only ever grows. A task is moved between them under
//! the write lock, which is the single point guaranteeing it is dispatched at
//! most once.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use opentelemetry::KeyValue;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{Task, TaskId, TaskKind, TaskStatus};
use crate::telemetry::metrics;
use crate::telemetry::task::{record_state_transition, start_task_span};

/// Tunables for one scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum tasks in `running` at once.
    pub max_running: usize,
    /// Sleep when a scan finds nothing queued.
    pub idle_backoff: Duration,
    /// Pause after each dispatch before scanning again.
    pub dispatch_throttle: Duration,
    /// Probability in `[0, 1]` that a simulated task ends `failed`.
    pub failure_rate: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_running: 2,
            idle_backoff: Duration::from_secs(1),
            dispatch_throttle: Duration::from_millis(100),
            failure_rate: 0.0,
        }
    }
}

/// Point-in-time task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl SchedulerStats {
    pub fn merge(&mut self, other: SchedulerStats) {
        self.queued += other.queued;
        self.running += other.running;
        self.completed += other.completed;
        self.failed += other.failed;
    }
}

#[derive(Default)]
struct Queues {
    pending: VecDeque<Task>,
    dispatched: Vec<Task>,
}

pub struct TaskScheduler {
    queues: RwLock<Queues>,
    next_id: AtomicU64,
    /// Queued plus running. Readable without the lock.
    outstanding: AtomicUsize,
    gate: Arc<Semaphore>,
    config: SchedulerConfig,
    started: AtomicBool,
    closed: AtomicBool,
    shutdown: Notify,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            queues: RwLock::new(Queues::default()),
            next_id: AtomicU64::new(0),
            outstanding: AtomicUsize::new(0),
            gate: Arc::new(Semaphore::new(config.max_running.max(1))),
            config,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    /// Spawn the dispatch loop. Only the first call spawns; later calls
    /// return `None`.
    pub fn start(self: &Arc<Self>, span: Span) -> Option<JoinHandle<()>> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let scheduler = Arc::clone(self);
        Some(tokio::spawn(scheduler.dispatch_loop().instrument(span)))
    }

    /// Stop the dispatch loop. Tasks already running finish on their own.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shutdown.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn max_running(&self) -> usize {
        self.config.max_running.max(1)
    }

    /// Queue a new task at the back of the pending sequence.
    pub fn add_task(&self, name: impl Into<String>, kind: TaskKind) -> Task {
        let mut queues = self.queues.write();
        // Allocated under the lock so pending stays in id order.
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let task = Task::new(id, name, kind);
        queues.pending.push_back(task.clone());
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        drop(queues);

        metrics::tasks_submitted().add(1, &[KeyValue::new("task_type", kind.as_str())]);
        debug!(task_id = %id, task_type = %kind, "task queued");
        task
    }

    /// Withdraw a task that is still queued. Anything already dispatched, or
    /// never created, is `TaskNotFound`.
    pub fn delete_task(&self, id: TaskId) -> Result<Task> {
        let mut queues = self.queues.write();
        let Some(pos) = queues.pending.iter().position(|t| t.id == id) else {
            return Err(Error::TaskNotFound(id));
        };
        let Some(mut task) = queues.pending.remove(pos) else {
            return Err(Error::TaskNotFound(id));
        };
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        drop(queues);

        task.transition(TaskStatus::Cancelled)?;
        record_transition(TaskStatus::Queued, TaskStatus::Cancelled);
        debug!(task_id = %id, "task cancelled");
        Ok(task)
    }

    /// Drop every queued task. Dispatched tasks are untouched.
    pub fn flush_tasks(&self) -> Result<usize> {
        let mut queues = self.queues.write();
        let flushed = queues.pending.len();
        queues.pending.clear();
        self.outstanding.fetch_sub(flushed, Ordering::AcqRel);
        drop(queues);

        if flushed > 0 {
            metrics::task_state_transitions().add(
                flushed as u64,
                &[KeyValue::new("from", "queued"), KeyValue::new("to", "cancelled")],
            );
            debug!(flushed, "pending tasks flushed");
        }
        Ok(flushed)
    }

    /// Snapshot of every task: dispatched first, then still-queued.
    pub fn get_tasks(&self) -> Vec<Task> {
        let queues = self.queues.read();
        queues
            .dispatched
            .iter()
            .chain(queues.pending.iter())
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> SchedulerStats {
        let queues = self.queues.read();
        let mut stats = SchedulerStats {
            queued: queues.pending.len(),
            ..SchedulerStats::default()
        };
        for task in &queues.dispatched {
            match task.status {
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Queued | TaskStatus::Cancelled => {}
            }
        }
        stats
    }

    pub fn running_count(&self) -> usize {
        self.stats().running
    }

    /// True when nothing is queued or running.
    pub fn is_idle(&self) -> bool {
        self.outstanding.load(Ordering::Acquire) == 0
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    async fn dispatch_loop(self: Arc<Self>) {
        debug!(max_running = self.max_running(), "dispatch loop started");

        while !self.is_closed() {
            if !self.has_queued() {
                if self.pause(self.config.idle_backoff).await {
                    break;
                }
                continue;
            }

            // Blocks the loop itself while the gate is full.
            let permit = tokio::select! {
                _ = self.shutdown.notified() => break,
                permit = Arc::clone(&self.gate).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // The head may have been deleted or flushed while we waited.
            let Some((slot, task)) = self.take_next() else {
                continue;
            };
            self.launch(slot, task, permit);

            if self.pause(self.config.dispatch_throttle).await {
                break;
            }
        }

        debug!("dispatch loop stopped");
    }

    fn has_queued(&self) -> bool {
        self.queues
            .read()
            .pending
            .iter()
            .any(|t| t.status == TaskStatus::Queued)
    }

    /// Move the oldest queued task to `dispatched` and mark it running.
    /// Returns its index in `dispatched`, which never shrinks.
    fn take_next(&self) -> Option<(usize, Task)> {
        let mut queues = self.queues.write();
        let pos = queues
            .pending
            .iter()
            .position(|t| t.status == TaskStatus::Queued)?;
        let mut task = queues.pending.remove(pos)?;
        if let Err(e) = task.transition(TaskStatus::Running) {
            warn!(task_id = %task.id, error = %e, "refusing to dispatch task");
            return None;
        }
        queues.dispatched.push(task.clone());
        Some((queues.dispatched.len() - 1, task))
    }

    fn launch(self: &Arc<Self>, slot: usize, task: Task, permit: OwnedSemaphorePermit) {
        let span = start_task_span(task.kind, task.id);
        record_state_transition(&span, TaskStatus::Queued, TaskStatus::Running);
        record_transition(TaskStatus::Queued, TaskStatus::Running);

        let scheduler = Arc::clone(self);
        let duration = task.kind.random_duration();
        let fail = self.config.failure_rate > 0.0 && rand::random::<f64>() < self.config.failure_rate;

        let run_span = span.clone();
        tokio::spawn(
            async move {
                info!(duration_ms = duration.as_millis() as u64, "task running");

                // Separate task so a panic in the work surfaces as a failure.
                let status = match tokio::spawn(simulate(duration, fail)).await {
                    Ok(Ok(())) => TaskStatus::Completed,
                    Ok(Err(e)) => {
                        warn!(error = %e, "task failed");
                        TaskStatus::Failed
                    }
                    Err(e) => {
                        warn!(error = %e, "task aborted");
                        TaskStatus::Failed
                    }
                };

                scheduler.finish(slot, task.id, status);
                record_state_transition(&span, TaskStatus::Running, status);
                // Slot is returned only after the task left `running`.
                drop(permit);
            }
            .instrument(run_span),
        );
    }

    fn finish(&self, slot: usize, id: TaskId, status: TaskStatus) {
        let mut queues = self.queues.write();
        let Some(task) = queues.dispatched.get_mut(slot).filter(|t| t.id == id) else {
            warn!(task_id = %id, "finished task is no longer tracked");
            return;
        };
        match task.transition(status) {
            Ok(from) => {
                self.outstanding.fetch_sub(1, Ordering::AcqRel);
                drop(queues);
                record_transition(from, status);
                info!(task_id = %id, status = %status, "task finished");
            }
            Err(e) => warn!(task_id = %id, error = %e, "dropping task outcome"),
        }
    }

    /// Sleep for `d` unless closed first. Returns true when the loop should stop.
    async fn pause(&self, d: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.notified() => true,
            _ = tokio::time::sleep(d) => self.is_closed(),
        }
    }
}

async fn simulate(duration: Duration, fail: bool) -> Result<()> {
    tokio::time::sleep(duration).await;
    if fail {
        return Err(Error::Internal("simulated failure".to_string()));
    }
    Ok(())
}

fn record_transition(from: TaskStatus, to: TaskStatus) {
    metrics::task_state_transitions().add(
        1,
        &[
            KeyValue::new("from", from.as_str()),
            KeyValue::new("to", to.as_str()),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_increase_from_one() {
        let scheduler = TaskScheduler::new(SchedulerConfig::default());
        let a = scheduler.add_task("a", TaskKind::Tiny);
        let b = scheduler.add_task("b", TaskKind::Heavy);
        assert_eq!(a.id, TaskId(1));
        assert_eq!(b.id, TaskId(2));
        assert_eq!(a.status, TaskStatus::Queued);
    }

    #[test]
    fn take_next_is_fifo_and_moves_to_dispatched() {
        let scheduler = TaskScheduler::new(SchedulerConfig::default());
        scheduler.add_task("first", TaskKind::Tiny);
        scheduler.add_task("second", TaskKind::Tiny);

        let (slot, task) = scheduler.take_next().unwrap();
        assert_eq!(slot, 0);
        assert_eq!(task.name, "first");
        assert_eq!(task.status, TaskStatus::Running);

        let tasks = scheduler.get_tasks();
        assert_eq!(tasks[0].id, TaskId(1));
        assert_eq!(tasks[0].status, TaskStatus::Running);
        assert_eq!(tasks[1].status, TaskStatus::Queued);

        // running tasks are no longer deletable
        assert!(matches!(
            scheduler.delete_task(TaskId(1)),
            Err(Error::TaskNotFound(TaskId(1)))
        ));
    }

    #[test]
    fn finish_rejects_stale_slot() {
        let scheduler = TaskScheduler::new(SchedulerConfig::default());
        scheduler.add_task("a", TaskKind::Tiny);
        let (slot, task) = scheduler.take_next().unwrap();

        scheduler.finish(slot, TaskId(99), TaskStatus::Completed);
        assert_eq!(scheduler.running_count(), 1);

        scheduler.finish(slot, task.id, TaskStatus::Completed);
        assert_eq!(scheduler.stats().completed, 1);
        assert!(scheduler.is_idle());

        // a second outcome for the same task is ignored
        scheduler.finish(slot, task.id, TaskStatus::Failed);
        assert_eq!(scheduler.stats().failed, 0);
    }

    #[test]
    fn outstanding_tracks_queue_and_cancellations() {
        let scheduler = TaskScheduler::new(SchedulerConfig::default());
        assert!(scheduler.is_idle());
        let a = scheduler.add_task("a", TaskKind::Tiny);
        scheduler.add_task("b", TaskKind::Tiny);
        assert!(!scheduler.is_idle());

        let cancelled = scheduler.delete_task(a.id).unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert_eq!(scheduler.flush_tasks().unwrap(), 1);
        assert!(scheduler.is_idle());
    }
}
