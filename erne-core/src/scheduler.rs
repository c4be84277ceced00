//! Periodic task scheduling.
//!
//! The engine never spawns timers on its own. Decay, consolidation and
//! flush loops are registered on an injected [`Scheduler`]:
//!
//! - [`TokioScheduler`] runs each loop as a `tokio` task driven by
//!   `tokio::time::interval`.
//! - [`ManualScheduler`] fires tasks only when [`ManualScheduler::advance`]
//!   is called, optionally moving a [`ManualClock`] in lockstep.
//!
//! Every registration returns a [`TaskHandle`]. Cancelling or dropping the
//! handle stops the loop before its next run.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::clock::ManualClock;
use crate::error::{ErneError, Result};

/// Work run on every tick. Tasks registered with [`Scheduler::schedule`] run
/// on the scheduler's thread and must be short.
pub type PeriodicTask = Box<dyn FnMut() + Send + 'static>;

/// Registers periodic tasks.
pub trait Scheduler: Send + Sync {
    /// Run `task` every `period`, first run one period from now.
    ///
    /// # Errors
    /// Returns [`ErneError::Scheduler`] if the task cannot be registered
    /// (zero period, no async runtime).
    fn schedule(&self, name: &'static str, period: Duration, task: PeriodicTask)
    -> Result<TaskHandle>;

    /// Like [`Self::schedule`] for tasks that block on I/O. Schedulers with
    /// a thread pool run these off the tick thread.
    ///
    /// # Errors
    /// Same as [`Self::schedule`].
    fn schedule_blocking(
        &self,
        name: &'static str,
        period: Duration,
        task: PeriodicTask,
    ) -> Result<TaskHandle> {
        self.schedule(name, period, task)
    }
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    /// A fresh, un-cancelled signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Owner of one scheduled loop. Dropping it cancels the loop.
pub struct TaskHandle {
    name: &'static str,
    signal: CancelSignal,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    fn new(name: &'static str, signal: CancelSignal, join: Option<JoinHandle<()>>) -> Self {
        Self { name, signal, join }
    }

    /// Task name given at registration.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the loop. Idempotent.
    pub fn cancel(&self) {
        self.signal.cancel();
        if let Some(join) = &self.join {
            join.abort();
        }
    }

    /// Whether the loop was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.name)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn check_period(name: &'static str, period: Duration) -> Result<()> {
    if period.is_zero() {
        return Err(ErneError::Scheduler(format!("task {name} has a zero period")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tokio
// ---------------------------------------------------------------------------

/// Runs each loop as a task on a tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct TokioScheduler {
    handle: Option<Handle>,
}

impl TokioScheduler {
    /// Use the runtime that is current when [`Scheduler::schedule`] is called.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn onto a specific runtime.
    #[must_use]
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl TokioScheduler {
    fn runtime(&self) -> Result<Handle> {
        match &self.handle {
            Some(handle) => Ok(handle.clone()),
            None => Handle::try_current().map_err(|e| ErneError::Scheduler(e.to_string())),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(
        &self,
        name: &'static str,
        period: Duration,
        mut task: PeriodicTask,
    ) -> Result<TaskHandle> {
        check_period(name, period)?;
        let runtime = self.runtime()?;

        let signal = CancelSignal::new();
        let flag = signal.clone();
        let join = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if flag.is_cancelled() {
                    break;
                }
                task();
            }
            debug!(task = name, "Periodic task stopped");
        });
        debug!(task = name, period_ms = period.as_millis(), "Periodic task scheduled");
        Ok(TaskHandle::new(name, signal, Some(join)))
    }

    /// Each run goes to tokio's blocking pool. The loop waits for a run to
    /// finish before the next tick, so runs never overlap.
    fn schedule_blocking(
        &self,
        name: &'static str,
        period: Duration,
        task: PeriodicTask,
    ) -> Result<TaskHandle> {
        check_period(name, period)?;
        let runtime = self.runtime()?;

        let task = Arc::new(Mutex::new(task));
        let signal = CancelSignal::new();
        let flag = signal.clone();
        let join = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if flag.is_cancelled() {
                    break;
                }
                let run = Arc::clone(&task);
                let outcome = tokio::task::spawn_blocking(move || {
                    let mut task = run.lock();
                    (&mut **task)();
                })
                .await;
                if let Err(e) = outcome {
                    warn!(task = name, error = %e, "Blocking periodic task failed");
                }
            }
            debug!(task = name, "Periodic task stopped");
        });
        debug!(
            task = name,
            period_ms = period.as_millis(),
            blocking = true,
            "Periodic task scheduled"
        );
        Ok(TaskHandle::new(name, signal, Some(join)))
    }
}

// ---------------------------------------------------------------------------
// Manual
// ---------------------------------------------------------------------------

struct ManualEntry {
    key: u64,
    name: &'static str,
    period: Duration,
    next_due: Duration,
    signal: CancelSignal,
    task: Option<PeriodicTask>,
}

#[derive(Default)]
struct ManualState {
    elapsed: Duration,
    next_key: u64,
    entries: Vec<ManualEntry>,
}

/// Deterministic scheduler for tests: time only moves via [`Self::advance`].
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
    clock: Option<Arc<ManualClock>>,
}

impl ManualScheduler {
    /// A scheduler at elapsed time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A scheduler that moves `clock` forward as it advances, so each task
    /// observes its own due time.
    #[must_use]
    pub fn with_clock(clock: Arc<ManualClock>) -> Self {
        Self {
            state: Mutex::new(ManualState::default()),
            clock: Some(clock),
        }
    }

    /// Time advanced so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.state.lock().elapsed
    }

    /// Live (not cancelled) tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|e| !e.signal.is_cancelled())
            .count()
    }

    /// Move time forward by `by`, running every task that falls due, in due
    /// order (registration order among equals). Returns the number of runs.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.state.lock().elapsed + by;
        let mut runs = 0;
        loop {
            let (key, mut task) = {
                let mut state = self.state.lock();
                state.entries.retain(|e| !e.signal.is_cancelled());
                let due = state
                    .entries
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.next_due <= target && e.task.is_some())
                    .min_by_key(|(_, e)| (e.next_due, e.key))
                    .map(|(i, _)| i);
                let Some(index) = due else { break };

                let step = state.entries[index].next_due.saturating_sub(state.elapsed);
                state.elapsed = state.entries[index].next_due;
                if let Some(clock) = &self.clock {
                    clock.advance(step);
                }
                let entry = &mut state.entries[index];
                entry.next_due += entry.period;
                let Some(task) = entry.task.take() else { break };
                debug!(task = entry.name, "Manual tick");
                (entry.key, task)
            };

            task();
            runs += 1;

            let mut state = self.state.lock();
            if let Some(entry) = state.entries.iter_mut().find(|e| e.key == key) {
                entry.task = Some(task);
            }
        }

        let mut state = self.state.lock();
        let step = target.saturating_sub(state.elapsed);
        state.elapsed = target;
        if let Some(clock) = &self.clock {
            clock.advance(step);
        }
        runs
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("elapsed", &self.elapsed())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, name: &'static str, period: Duration, task: PeriodicTask) -> Result<TaskHandle> {
        check_period(name, period)?;
        let signal = CancelSignal::new();
        let mut state = self.state.lock();
        let key = state.next_key;
        state.next_key += 1;
        let next_due = state.elapsed + period;
        state.entries.push(ManualEntry {
            key,
            name,
            period,
            next_due,
            signal: signal.clone(),
            task: Some(task),
        });
        Ok(TaskHandle::new(name, signal, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, PeriodicTask) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (
            count,
            Box::new(move || {
                inner.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn manual_fires_each_period() {
        let scheduler = ManualScheduler::new();
        let (count, task) = counter();
        let _handle = scheduler
            .schedule("count", Duration::from_secs(10), task)
            .expect("schedule");
        assert_eq!(scheduler.advance(Duration::from_secs(9)), 0);
        assert_eq!(scheduler.advance(Duration::from_secs(1)), 1);
        assert_eq!(scheduler.advance(Duration::from_secs(25)), 2);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.elapsed(), Duration::from_secs(35));
    }

    #[test]
    fn manual_runs_in_due_order() {
        let scheduler = ManualScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&order), Arc::clone(&order));
        let _slow = scheduler
            .schedule("slow", Duration::from_secs(3), Box::new(move || a.lock().push("slow")))
            .expect("schedule");
        let _fast = scheduler
            .schedule("fast", Duration::from_secs(2), Box::new(move || b.lock().push("fast")))
            .expect("schedule");
        scheduler.advance(Duration::from_secs(6));
        assert_eq!(*order.lock(), vec!["fast", "slow", "fast", "slow", "fast"]);
    }

    #[test]
    fn cancelled_or_dropped_handles_stop() {
        let scheduler = ManualScheduler::new();
        let (count, task) = counter();
        let handle = scheduler
            .schedule("count", Duration::from_secs(1), task)
            .expect("schedule");
        scheduler.advance(Duration::from_secs(2));
        handle.cancel();
        assert!(handle.is_cancelled());
        scheduler.advance(Duration::from_secs(5));
        assert_eq!(count.load(Ordering::SeqCst), 2);

        let (dropped, task) = counter();
        drop(
            scheduler
                .schedule("dropped", Duration::from_secs(1), task)
                .expect("schedule"),
        );
        scheduler.advance(Duration::from_secs(5));
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn manual_clock_moves_in_lockstep() {
        let start = chrono::Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let scheduler = ManualScheduler::with_clock(Arc::clone(&clock));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (observer, sink) = (Arc::clone(&clock), Arc::clone(&seen));
        let _handle = scheduler
            .schedule(
                "observe",
                Duration::from_secs(60),
                Box::new(move || sink.lock().push(observer.now())),
            )
            .expect("schedule");
        scheduler.advance(Duration::from_secs(150));
        assert_eq!(
            *seen.lock(),
            vec![start + chrono::Duration::seconds(60), start + chrono::Duration::seconds(120)]
        );
        assert_eq!(clock.now(), start + chrono::Duration::seconds(150));
    }

    #[test]
    fn zero_period_is_rejected() {
        let (_, task) = counter();
        assert!(matches!(
            ManualScheduler::new().schedule("bad", Duration::ZERO, task),
            Err(ErneError::Scheduler(_))
        ));
    }

    #[test]
    fn tokio_without_runtime_is_an_error() {
        let (_, task) = counter();
        assert!(matches!(
            TokioScheduler::new().schedule("orphan", Duration::from_secs(1), task),
            Err(ErneError::Scheduler(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_ticks_until_cancelled() {
        let (count, task) = counter();
        let handle = TokioScheduler::new()
            .schedule("count", Duration::from_secs(10), task)
            .expect("schedule");
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        handle.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn blocking_tasks_leave_the_tick_thread_free() {
        let scheduler = TokioScheduler::new();
        let (fast, task) = counter();
        let _fast = scheduler
            .schedule("fast", Duration::from_millis(10), task)
            .expect("schedule");
        let started = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&started);
        let slow = scheduler
            .schedule_blocking(
                "slow",
                Duration::from_millis(10),
                Box::new(move || {
                    flag.store(true, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(400));
                }),
            )
            .expect("schedule");

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(started.load(Ordering::SeqCst));
        assert!(fast.load(Ordering::SeqCst) >= 5);
        slow.cancel();
    }

    #[test]
    fn manual_runs_blocking_tasks_inline() {
        let scheduler = ManualScheduler::new();
        let (count, task) = counter();
        let _handle = scheduler
            .schedule_blocking("flush", Duration::from_secs(5), task)
            .expect("schedule");
        assert_eq!(scheduler.advance(Duration::from_secs(10)), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
