//! Retrying run scheduler.
//!
//! A fixed number of worker slots pull run ids from a FIFO list. Each run
//! id is held by at most one of: the pending list, a worker slot, or the
//! retry delay queue, so enqueueing is idempotent and a run never executes
//! twice at once. Transient failures come back through the delay queue
//! with exponential backoff; waiting runs hold no slot.

pub mod delay_queue;

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::executor::RunError;
use delay_queue::DelayQueue;

pub const DEFAULT_CONCURRENCY: usize = 2;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(2_000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(60_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl SchedulerConfig {
    /// `min(base * 2^(attempt-1), max)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// What the scheduler runs. Every method is called on a blocking thread.
pub trait RunProcessor: Send + Sync + 'static {
    fn process(&self, run_id: &Uuid) -> Result<(), RunError>;

    /// A retryable failure was queued to run again as `next_attempt`
    /// after `delay`.
    fn on_retry_scheduled(
        &self,
        _run_id: &Uuid,
        _next_attempt: u32,
        _delay: Duration,
        _reason: &str,
    ) {
    }

    fn on_attempts_exhausted(&self, _run_id: &Uuid, _attempts: u32, _reason: &str) {}

    /// The worker panicked.
    fn on_crash(&self, _run_id: &Uuid, _message: &str) {}
}

#[derive(Debug, Clone, Copy)]
struct Job {
    run_id: Uuid,
    attempt: u32,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Job>,
    running: HashSet<Uuid>,
    delayed: DelayQueue<Job>,
    closed: bool,
}

impl QueueState {
    fn holds(&self, run_id: &Uuid) -> bool {
        self.running.contains(run_id)
            || self.pending.iter().any(|j| j.run_id == *run_id)
            || self.delayed.any(|j| j.run_id == *run_id)
    }
}

/// Counts for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSnapshot {
    pub queued: usize,
    pub running: usize,
    pub scheduled: usize,
}

impl SchedulerSnapshot {
    pub fn is_idle(&self) -> bool {
        self.queued == 0 && self.running == 0 && self.scheduled == 0
    }
}

struct Inner {
    config: SchedulerConfig,
    processor: Arc<dyn RunProcessor>,
    state: Mutex<QueueState>,
    timer_wake: Notify,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Scheduler {
    inner: Arc<Inner>,
    timer: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
}

impl Scheduler {
    /// Start the retry timer. Must be called from within a Tokio runtime.
    pub fn start(config: SchedulerConfig, processor: Arc<dyn RunProcessor>) -> Self {
        let config = SchedulerConfig {
            concurrency: config.concurrency.max(1),
            max_attempts: config.max_attempts.max(1),
            ..config
        };
        let inner = Arc::new(Inner {
            config,
            processor,
            state: Mutex::new(QueueState::default()),
            timer_wake: Notify::new(),
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let timer = tokio::spawn(timer_loop(inner.clone(), shutdown_rx));

        tracing::info!(
            concurrency = config.concurrency,
            max_attempts = config.max_attempts,
            base_delay_ms = config.base_delay.as_millis() as u64,
            max_delay_ms = config.max_delay.as_millis() as u64,
            "Run scheduler started"
        );

        Self {
            inner,
            timer: Mutex::new(Some((shutdown_tx, timer))),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Queue a run for its first attempt.
    ///
    /// Returns `false` without doing anything when the run is already
    /// queued, executing, or waiting for a retry, or after shutdown.
    pub fn enqueue(&self, run_id: Uuid) -> bool {
        {
            let mut state = self.inner.lock_state();
            if state.closed {
                tracing::warn!(run_id = %run_id, "Scheduler is shut down; run not queued");
                return false;
            }
            if state.holds(&run_id) {
                tracing::debug!(run_id = %run_id, "Run already scheduled");
                return false;
            }
            state.pending.push_back(Job { run_id, attempt: 1 });
        }
        tracing::debug!(run_id = %run_id, "Run queued");
        pump(&self.inner);
        true
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let state = self.inner.lock_state();
        SchedulerSnapshot {
            queued: state.pending.len(),
            running: state.running.len(),
            scheduled: state.delayed.len(),
        }
    }

    /// Stop admitting work and stop the retry timer. Executions already in
    /// progress run to completion.
    pub async fn shutdown(&self) {
        self.inner.lock_state().closed = true;
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((tx, handle)) = timer {
            let _ = tx.send(());
            if let Err(e) = handle.await {
                tracing::warn!("Retry timer ended abnormally: {e}");
            }
            tracing::info!("Run scheduler stopped");
        }
    }
}

/// Fill free worker slots from the pending list.
fn pump(inner: &Arc<Inner>) {
    let mut admitted = Vec::new();
    {
        let mut state = inner.lock_state();
        if state.closed {
            return;
        }
        while state.running.len() < inner.config.concurrency {
            let Some(job) = state.pending.pop_front() else {
                break;
            };
            state.running.insert(job.run_id);
            admitted.push(job);
        }
    }
    for job in admitted {
        tokio::spawn(run_job(inner.clone(), job));
    }
}

async fn run_job(inner: Arc<Inner>, job: Job) {
    let processor = inner.processor.clone();
    let config = inner.config;
    let outcome =
        tokio::task::spawn_blocking(move || attempt_job(processor.as_ref(), &config, job)).await;

    let retry = match outcome {
        Ok(retry) => retry,
        Err(e) => {
            tracing::error!(run_id = %job.run_id, error = %e, "Processing worker crashed");
            let processor = inner.processor.clone();
            let crashed = tokio::task::spawn_blocking(move || {
                processor.on_crash(
                    &job.run_id,
                    "Unexpected error while executing the processing run",
                )
            })
            .await;
            if let Err(e) = crashed {
                tracing::error!(run_id = %job.run_id, error = %e, "Failed to record worker crash");
            }
            None
        }
    };

    {
        let mut state = inner.lock_state();
        state.running.remove(&job.run_id);
        if let Some((next, delay)) = retry {
            state.delayed.push(Instant::now() + delay, next);
        }
    }
    inner.timer_wake.notify_one();
    pump(&inner);
}

/// Run one attempt and decide what follows. `Some` means retry later.
fn attempt_job(
    processor: &dyn RunProcessor,
    config: &SchedulerConfig,
    job: Job,
) -> Option<(Job, Duration)> {
    match processor.process(&job.run_id) {
        Ok(()) => None,
        Err(RunError::Fatal(reason)) => {
            tracing::debug!(run_id = %job.run_id, reason = %reason, "Run failed permanently");
            None
        }
        Err(RunError::Retryable(reason)) if job.attempt >= config.max_attempts => {
            processor.on_attempts_exhausted(&job.run_id, job.attempt, &reason);
            None
        }
        Err(RunError::Retryable(reason)) => {
            let delay = config.backoff_delay(job.attempt);
            tracing::info!(
                run_id = %job.run_id,
                attempt = job.attempt,
                delay_ms = delay.as_millis() as u64,
                "Retry scheduled"
            );
            let next = Job {
                run_id: job.run_id,
                attempt: job.attempt + 1,
            };
            processor.on_retry_scheduled(&next.run_id, next.attempt, delay, &reason);
            Some((next, delay))
        }
    }
}

/// Move due retries back to the pending list.
async fn timer_loop(inner: Arc<Inner>, mut shutdown: oneshot::Receiver<()>) {
    loop {
        let next_deadline = {
            let mut state = inner.lock_state();
            let due = state.delayed.pop_due(Instant::now());
            state.pending.extend(due);
            state.delayed.next_deadline()
        };
        pump(&inner);

        let sleep = async move {
            match next_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = &mut shutdown => break,
            _ = inner.timer_wake.notified() => {}
            _ = sleep => {}
        }
    }
    tracing::debug!("Retry timer stopped");
}
