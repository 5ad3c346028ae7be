//! Batch Processing Pipeline
//!
//! Ingestion → Extraction → Attribution → Insight Synthesis, expressed as an
//! ordered list of stage descriptors executed by one generic runner. Each
//! stage runs as a queue task under the shared retry policy; the runner
//! dispatches a stage only after the previous stage's writes committed, so
//! per-interview causal ordering holds without any cross-interview ordering.
//!
//! ## Failure discipline
//!
//! A fatal stage failure (after retries) appends a failure record, marks the
//! interview `error`, and halts the chain; committed evidence is never
//! rolled back. Insight synthesis is non-fatal: the interview stays `ready`
//! with evidence but no insights.

pub mod attribute;
pub mod events;
pub mod extract;
pub mod ingest;
pub mod insights;
pub mod stage;

pub use attribute::{
    AnswerAttributor, AttributionStage, AttributionSummary, NoopAttributor,
    ResearchAnswerAttributor,
};
pub use events::{
    ConversationLensSubscriber, ExtractionCompleted, ExtractionEvents, ExtractionSubscriber,
    LENS_TASK_NAME,
};
pub use extract::ExtractionStage;
pub use ingest::IngestionStage;
pub use insights::InsightSynthesisStage;
pub use stage::{PipelineStage, StageContext, StageState};

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::provider::{SharedAnalysisProvider, SharedTranscriptionProvider};
use crate::queue::{RetryPolicy, TaskQueue, TaskSpec};
use crate::storage::SharedDatabase;
use crate::types::{
    Chapter, RecordScope, ResearchQuestion, Result, StageKind, StageOutcome, StageRecord,
    TranscriptBundle, UpshotError,
};

// =============================================================================
// Options / Request / Summary
// =============================================================================

/// Runner tuning, usually derived from [`Config`]
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub retry: RetryPolicy,
    /// Per-attempt max duration for each stage
    pub stage_timeout: Duration,
    /// Attribution feature flag
    pub persona_analysis: bool,
    /// Forwarded to insight synthesis
    pub custom_instructions: Option<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::standard(),
            stage_timeout: Duration::from_secs(crate::constants::pipeline::STAGE_TIMEOUT_SECS),
            persona_analysis: false,
            custom_instructions: None,
        }
    }
}

impl From<&Config> for PipelineOptions {
    fn from(config: &Config) -> Self {
        Self {
            retry: config.retry_policy(),
            stage_timeout: config.stage_timeout(),
            persona_analysis: config.pipeline.persona_analysis,
            custom_instructions: config.pipeline.custom_instructions.clone(),
        }
    }
}

/// Per-run inputs supplied by the caller
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub scope: RecordScope,
    /// Pre-supplied transcript; skips the transcription provider
    pub transcript: Option<TranscriptBundle>,
    /// Chapter context forwarded to batch extraction; never set on the
    /// realtime path
    pub chapters: Vec<Chapter>,
    /// Planned questions for project-scoped interviews
    pub research_questions: Vec<ResearchQuestion>,
    /// User who triggered the run, carried into fan-out events.
    /// Defaults to the scope's user id.
    pub initiated_by: Option<String>,
}

impl RunRequest {
    pub fn new(scope: RecordScope) -> Self {
        let initiated_by = scope.user_id.clone();
        Self {
            scope,
            transcript: None,
            chapters: Vec::new(),
            research_questions: Vec::new(),
            initiated_by,
        }
    }

    pub fn with_transcript(mut self, transcript: TranscriptBundle) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn with_chapters(mut self, chapters: Vec<Chapter>) -> Self {
        self.chapters = chapters;
        self
    }

    pub fn with_questions(mut self, questions: Vec<ResearchQuestion>) -> Self {
        self.research_questions = questions;
        self
    }

    pub fn with_initiator(mut self, user_id: impl Into<String>) -> Self {
        self.initiated_by = Some(user_id.into());
        self
    }
}

/// What one full run produced
#[derive(Debug, Clone)]
pub struct PipelineRunSummary {
    pub interview_id: String,
    pub completed_stages: Vec<StageKind>,
    pub evidence_ids: Vec<String>,
    pub person_ids: Vec<String>,
    pub insight_ids: Vec<String>,
    /// True when a non-fatal stage failed (ready, but without insights)
    pub degraded: bool,
}

// =============================================================================
// Pipeline
// =============================================================================

/// Build the standard event bus with the shipped lens subscriber.
pub fn standard_events(store: SharedDatabase, queue: Arc<TaskQueue>) -> ExtractionEvents {
    ExtractionEvents::new(store, queue).subscribe(Arc::new(ConversationLensSubscriber))
}

/// The batch pipeline runner
pub struct InterviewPipeline {
    store: SharedDatabase,
    analysis: SharedAnalysisProvider,
    transcription: Option<SharedTranscriptionProvider>,
    queue: Arc<TaskQueue>,
    events: Arc<ExtractionEvents>,
    stages: Vec<Arc<dyn PipelineStage>>,
    options: PipelineOptions,
    active_runs: Arc<DashMap<String, ()>>,
}

/// Releases the per-interview run slot on scope exit
struct RunGuard {
    runs: Arc<DashMap<String, ()>>,
    interview_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.runs.remove(&self.interview_id);
    }
}

impl InterviewPipeline {
    pub fn new(
        store: SharedDatabase,
        analysis: SharedAnalysisProvider,
        transcription: Option<SharedTranscriptionProvider>,
        queue: Arc<TaskQueue>,
        events: Arc<ExtractionEvents>,
        options: PipelineOptions,
    ) -> Self {
        // Capability selection happens here, not inside the stage
        let attributor: Arc<dyn AnswerAttributor> = if options.persona_analysis {
            Arc::new(ResearchAnswerAttributor)
        } else {
            Arc::new(NoopAttributor)
        };
        Self::with_attributor(store, analysis, transcription, queue, events, options, attributor)
    }

    /// Build with an explicit attribution strategy instead of the
    /// flag-selected one.
    pub fn with_attributor(
        store: SharedDatabase,
        analysis: SharedAnalysisProvider,
        transcription: Option<SharedTranscriptionProvider>,
        queue: Arc<TaskQueue>,
        events: Arc<ExtractionEvents>,
        options: PipelineOptions,
        attributor: Arc<dyn AnswerAttributor>,
    ) -> Self {
        let stages: Vec<Arc<dyn PipelineStage>> = vec![
            Arc::new(IngestionStage),
            Arc::new(ExtractionStage),
            Arc::new(AttributionStage::new(attributor)),
            Arc::new(InsightSynthesisStage),
        ];

        Self {
            store,
            analysis,
            transcription,
            queue,
            events,
            stages,
            options,
            active_runs: Arc::new(DashMap::new()),
        }
    }

    /// Claim the single run slot for an interview id.
    fn acquire(&self, interview_id: &str) -> Result<RunGuard> {
        use dashmap::mapref::entry::Entry;
        match self.active_runs.entry(interview_id.to_string()) {
            Entry::Occupied(_) => Err(UpshotError::RunInProgress(interview_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(RunGuard {
                    runs: self.active_runs.clone(),
                    interview_id: interview_id.to_string(),
                })
            }
        }
    }

    /// Run the full batch chain for one interview.
    #[instrument(skip(self, request), fields(interview_id = %interview_id))]
    pub async fn run(
        &self,
        interview_id: &str,
        request: RunRequest,
    ) -> Result<PipelineRunSummary> {
        let _guard = self.acquire(interview_id)?;

        let ctx = Arc::new(StageContext {
            store: self.store.clone(),
            analysis: self.analysis.clone(),
            transcription: self.transcription.clone(),
            events: self.events.clone(),
            interview_id: interview_id.to_string(),
            scope: request.scope,
            chapters: request.chapters,
            research_questions: request.research_questions,
            custom_instructions: self.options.custom_instructions.clone(),
            initiated_by: request.initiated_by,
            state: Mutex::new(StageState {
                bundle: request.transcript,
                ..Default::default()
            }),
        });

        let mut completed = Vec::with_capacity(self.stages.len());
        let mut degraded = false;

        for stage in &self.stages {
            let kind = stage.kind();
            let started_at = chrono::Utc::now().to_rfc3339();

            let spec = TaskSpec::new(kind.task_name(), json!({ "interview_id": interview_id }))
                .with_retry(self.options.retry)
                .with_max_duration(self.options.stage_timeout);

            let run = {
                let stage = stage.clone();
                let ctx = ctx.clone();
                self.queue.dispatch(spec, move || {
                    let stage = stage.clone();
                    let ctx = ctx.clone();
                    async move { stage.run(&ctx).await }
                })
            }
            .join()
            .await;

            let finished_at = chrono::Utc::now().to_rfc3339();
            let outcome = match &run.result {
                Ok(()) => StageOutcome::Success,
                Err(e) => StageOutcome::Failure {
                    error: e.to_string(),
                },
            };
            self.store.append_stage_record(
                interview_id,
                StageRecord {
                    stage: kind,
                    outcome,
                    attempts: run.attempts,
                    started_at,
                    finished_at,
                },
            )?;

            match run.result {
                Ok(()) => {
                    info!(stage = %kind, attempts = run.attempts, "Stage completed");
                    completed.push(kind);
                }
                Err(e) if stage.fatal_on_failure() => {
                    error!(stage = %kind, attempts = run.attempts, error = %e, "Stage failed, halting chain");
                    // The error write only lands from the in-flight states.
                    // A failure before the row left `uploaded`, or after
                    // extraction reached `ready` (attribution), leaves the
                    // status as-is; the stage log still carries the failure.
                    if let Err(status_err) = self.store.mark_error(interview_id) {
                        debug!(error = %status_err, "Status not moved to error");
                    }
                    return Err(e);
                }
                Err(e) => {
                    warn!(stage = %kind, error = %e, "Non-fatal stage failed, continuing");
                    degraded = true;
                }
            }
        }

        let mut state = ctx.state.lock().await;
        Ok(PipelineRunSummary {
            interview_id: interview_id.to_string(),
            completed_stages: completed,
            evidence_ids: std::mem::take(&mut state.evidence_ids),
            person_ids: std::mem::take(&mut state.person_ids),
            insight_ids: std::mem::take(&mut state.insight_ids),
            degraded,
        })
    }
}
