//! Extraction Fan-out
//!
//! When extraction commits, an [`ExtractionCompleted`] event goes to every
//! registered subscriber. Each subscriber runs as its own queue task with
//! its own retry policy; its failure or success never touches the primary
//! chain or `interviews.status`. Subscribers write their own domain tables
//! only.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::queue::{RetryPolicy, TaskQueue, TaskSpec};
use crate::storage::SharedDatabase;
use crate::types::Result;

/// Fan-out task name for the shipped lens subscriber
pub const LENS_TASK_NAME: &str = "lens.apply-conversation-lens";

/// Emitted exactly once per committed extraction
#[derive(Debug, Clone)]
pub struct ExtractionCompleted {
    pub interview_id: String,
    pub initiated_by: Option<String>,
    pub evidence_ids: Vec<String>,
}

/// A follow-on analysis triggered by extraction
#[async_trait]
pub trait ExtractionSubscriber: Send + Sync {
    fn task_name(&self) -> &'static str;

    async fn handle(&self, store: SharedDatabase, event: ExtractionCompleted) -> Result<()>;
}

/// Event bus dispatching subscribers as detached queue tasks
pub struct ExtractionEvents {
    store: SharedDatabase,
    queue: Arc<TaskQueue>,
    subscribers: Vec<Arc<dyn ExtractionSubscriber>>,
    retry: RetryPolicy,
    task_timeout: Duration,
}

impl ExtractionEvents {
    pub fn new(store: SharedDatabase, queue: Arc<TaskQueue>) -> Self {
        Self {
            store,
            queue,
            subscribers: Vec::new(),
            retry: RetryPolicy::standard(),
            task_timeout: Duration::from_secs(crate::constants::pipeline::STAGE_TIMEOUT_SECS),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn subscribe(mut self, subscriber: Arc<dyn ExtractionSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Dispatch every subscriber as its own detached task.
    ///
    /// Each dispatch is recorded in `fanout_runs` keyed by interview and
    /// initiator. Bookkeeping or dispatch trouble is logged, never
    /// propagated; the primary chain has already committed by the time
    /// this runs.
    pub fn emit(&self, event: ExtractionCompleted) {
        for subscriber in &self.subscribers {
            let task_name = subscriber.task_name();
            let spec = TaskSpec::new(
                task_name,
                json!({
                    "interview_id": event.interview_id,
                    "initiated_by": event.initiated_by,
                }),
            )
            .with_retry(self.retry)
            .with_max_duration(self.task_timeout);

            let handle = {
                let subscriber = subscriber.clone();
                let store = self.store.clone();
                let event = event.clone();
                self.queue.dispatch(spec, move || {
                    let subscriber = subscriber.clone();
                    let store = store.clone();
                    let event = event.clone();
                    async move { subscriber.handle(store, event).await }
                })
            };

            if let Err(e) = self.store.record_fanout_run(
                &event.interview_id,
                task_name,
                event.initiated_by.as_deref(),
                &handle.run_id,
            ) {
                warn!(
                    interview_id = %event.interview_id,
                    task = task_name,
                    error = %e,
                    "Failed to record fan-out run"
                );
            }

            // Detach; subscriber outcome is isolated from the primary chain
            let interview_id = event.interview_id.clone();
            tokio::spawn(async move {
                match handle.join().await.result {
                    Ok(()) => info!(
                        interview_id = %interview_id,
                        task = task_name,
                        "Fan-out analysis completed"
                    ),
                    Err(e) => warn!(
                        interview_id = %interview_id,
                        task = task_name,
                        error = %e,
                        "Fan-out analysis failed"
                    ),
                }
            });
        }
    }
}

// =============================================================================
// Conversation Lens Subscriber
// =============================================================================

/// Shipped example subscriber: summarizes the committed evidence mix into
/// the `lens_analyses` table.
pub struct ConversationLensSubscriber;

#[async_trait]
impl ExtractionSubscriber for ConversationLensSubscriber {
    fn task_name(&self) -> &'static str {
        LENS_TASK_NAME
    }

    async fn handle(&self, store: SharedDatabase, event: ExtractionCompleted) -> Result<()> {
        let evidence = store.evidence_for_interview(&event.interview_id)?;

        let mut supports = 0usize;
        let mut refutes = 0usize;
        let mut neutral = 0usize;
        for unit in &evidence {
            match unit.support {
                crate::types::Support::Supports => supports += 1,
                crate::types::Support::Refutes => refutes += 1,
                crate::types::Support::Neutral => neutral += 1,
            }
        }

        let summary = format!(
            "{} evidence units: {} supporting, {} refuting, {} neutral",
            evidence.len(),
            supports,
            refutes,
            neutral
        );

        store.upsert_lens_analysis(
            &event.interview_id,
            &summary,
            evidence.len() as u32,
            event.initiated_by.as_deref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use crate::types::RecordScope;

    #[tokio::test]
    async fn test_lens_subscriber_writes_summary() {
        let store: SharedDatabase = Arc::new(Database::open_in_memory().unwrap());
        store.initialize().unwrap();
        let interview = store
            .create_interview(&RecordScope::account("a"), None, None)
            .unwrap();

        let subscriber = ConversationLensSubscriber;
        subscriber
            .handle(
                store.clone(),
                ExtractionCompleted {
                    interview_id: interview.id.clone(),
                    initiated_by: Some("user-1".into()),
                    evidence_ids: vec![],
                },
            )
            .await
            .unwrap();

        let analysis = store.lens_analysis_for(&interview.id).unwrap().unwrap();
        assert_eq!(analysis.evidence_count, 0);
        assert_eq!(analysis.computed_by.as_deref(), Some("user-1"));
    }
}
