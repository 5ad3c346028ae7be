//! In-process Task Queue
//!
//! Named units of work executed on tokio with bounded retry and a
//! per-attempt max duration. Every pipeline stage and fan-out subscriber
//! goes through [`TaskQueue::dispatch`], so retry discipline lives in one
//! place: attempts are retried only for recoverable errors, backoff is
//! exponential with jitter, and a timed-out attempt counts as a transient
//! failure.

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::constants::retry;
use crate::types::{Result, UpshotError};

// =============================================================================
// Timeout
// =============================================================================

/// Run a future with a hard deadline, converting elapse into a retryable
/// timeout error.
pub async fn with_timeout<T, F>(duration: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(UpshotError::timeout(operation, duration)),
    }
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Bounded exponential backoff shared by all pipeline tasks
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts (first try plus retries)
    pub max_attempts: u32,
    pub factor: f32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// The shared policy used in production
    pub fn standard() -> Self {
        Self {
            max_attempts: retry::MAX_ATTEMPTS,
            factor: retry::BACKOFF_FACTOR,
            min_delay: Duration::from_millis(retry::MIN_DELAY_MS),
            max_delay: Duration::from_secs(retry::MAX_DELAY_SECS),
        }
    }

    /// Same attempt count, near-zero delays. Test use only.
    pub fn fast() -> Self {
        Self {
            max_attempts: retry::MAX_ATTEMPTS,
            factor: retry::BACKOFF_FACTOR,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            factor: 1.0,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        // backon counts retries, not attempts
        ExponentialBuilder::default()
            .with_factor(self.factor)
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
            .with_jitter()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

// =============================================================================
// Task Spec / Run
// =============================================================================

/// Description of one unit of work handed to the queue
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Dotted task name, e.g. `interview.extract-evidence-and-people`
    pub name: String,
    /// JSON payload recorded with the dispatch
    pub payload: Value,
    pub retry: RetryPolicy,
    /// Per-attempt max duration
    pub max_duration: Duration,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            retry: RetryPolicy::standard(),
            max_duration: Duration::from_secs(crate::constants::pipeline::STAGE_TIMEOUT_SECS),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }
}

/// Bookkeeping row kept per dispatch
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    pub run_id: String,
    pub task_name: String,
    pub payload: Value,
    pub dispatched_at: String,
}

/// Handle on a dispatched task
pub struct RunHandle<T> {
    pub run_id: String,
    pub task_name: String,
    attempts: Arc<AtomicU32>,
    handle: JoinHandle<Result<T>>,
}

/// Final report of a finished task
pub struct TaskRun<T> {
    pub run_id: String,
    pub task_name: String,
    /// Attempts actually made (1 when the first try succeeded)
    pub attempts: u32,
    pub result: Result<T>,
}

impl<T> RunHandle<T> {
    /// Wait for the task and collect its outcome
    pub async fn join(self) -> TaskRun<T> {
        let RunHandle {
            run_id,
            task_name,
            attempts,
            handle,
        } = self;
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(UpshotError::Queue(format!(
                "Task '{}' panicked or was aborted: {}",
                task_name, e
            ))),
        };
        TaskRun {
            run_id,
            task_name,
            attempts: attempts.load(Ordering::SeqCst),
            result,
        }
    }

    /// Wait for the task, discarding attempt bookkeeping
    pub async fn outcome(self) -> Result<T> {
        self.join().await.result
    }
}

// =============================================================================
// Task Queue
// =============================================================================

/// In-process task queue on tokio.
///
/// Dispatch spawns a detached task; the caller decides whether to await the
/// returned handle (primary chain) or drop it (fan-out).
pub struct TaskQueue {
    records: DashMap<String, DispatchRecord>,
    dispatch_log: Mutex<Vec<String>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            dispatch_log: Mutex::new(Vec::new()),
        }
    }

    /// Dispatch an operation under the spec's retry policy and per-attempt
    /// deadline. `op` is invoked once per attempt.
    pub fn dispatch<T, F, Fut>(&self, spec: TaskSpec, op: F) -> RunHandle<T>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let run_id = uuid::Uuid::new_v4().to_string();
        let record = DispatchRecord {
            run_id: run_id.clone(),
            task_name: spec.name.clone(),
            payload: spec.payload.clone(),
            dispatched_at: chrono::Utc::now().to_rfc3339(),
        };
        self.records.insert(run_id.clone(), record);
        if let Ok(mut log) = self.dispatch_log.lock() {
            log.push(spec.name.clone());
        }

        let attempts = Arc::new(AtomicU32::new(0));
        let task_name = spec.name.clone();
        let backoff = spec.retry.backoff();
        let max_duration = spec.max_duration;

        let handle = tokio::spawn({
            let attempts = attempts.clone();
            let name = spec.name.clone();
            async move {
                let attempt = {
                    let attempts = attempts.clone();
                    let name = name.clone();
                    move || {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        let fut = op();
                        let name = name.clone();
                        async move { with_timeout(max_duration, &name, fut).await }
                    }
                };
                let notify_name = name.clone();
                attempt
                    .retry(backoff)
                    .when(|err: &UpshotError| err.is_recoverable())
                    .notify(move |err, delay| {
                        warn!(
                            task = %notify_name,
                            error = %err,
                            delay_ms = delay.as_millis() as u64,
                            "Task attempt failed, backing off"
                        );
                    })
                    .await
            }
        });

        RunHandle {
            run_id,
            task_name,
            attempts,
            handle,
        }
    }

    /// Dispatch record for a run id
    pub fn record(&self, run_id: &str) -> Option<DispatchRecord> {
        self.records.get(run_id).map(|r| r.clone())
    }

    /// Task names in dispatch order
    pub fn dispatched_task_names(&self) -> Vec<String> {
        self.dispatch_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
