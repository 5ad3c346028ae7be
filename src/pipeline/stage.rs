//! Stage Trait and Shared Run Context
//!
//! Every batch stage implements [`PipelineStage`] and runs against a shared
//! [`StageContext`]. The runner dispatches stages strictly in order, so a
//! stage may rely on the previous stage's writes being committed before it
//! starts. Cross-stage scratch state (the transcript bundle, inserted ids)
//! travels in [`StageState`] behind a mutex; the store stays the source of
//! truth, the state is only a same-run shortcut.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::events::ExtractionEvents;
use crate::provider::{SharedAnalysisProvider, SharedTranscriptionProvider};
use crate::storage::SharedDatabase;
use crate::types::{Chapter, RecordScope, ResearchQuestion, Result, StageKind, TranscriptBundle};

/// Scratch state shared across stages within one run
#[derive(Debug, Default)]
pub struct StageState {
    /// Normalized transcript produced by ingestion
    pub bundle: Option<TranscriptBundle>,
    /// Evidence ids committed by extraction
    pub evidence_ids: Vec<String>,
    /// Person ids committed by extraction
    pub person_ids: Vec<String>,
    /// Insight ids committed by synthesis
    pub insight_ids: Vec<String>,
}

/// Everything a stage needs to run
pub struct StageContext {
    pub store: SharedDatabase,
    pub analysis: SharedAnalysisProvider,
    pub transcription: Option<SharedTranscriptionProvider>,
    pub events: Arc<ExtractionEvents>,
    pub interview_id: String,
    pub scope: RecordScope,
    /// Caller-supplied chapter context for batch extraction
    pub chapters: Vec<Chapter>,
    /// Planned questions for project-scoped interviews
    pub research_questions: Vec<ResearchQuestion>,
    /// Forwarded to insight synthesis
    pub custom_instructions: Option<String>,
    /// User who triggered the run, carried into fan-out events
    pub initiated_by: Option<String>,
    pub state: Mutex<StageState>,
}

impl StageContext {
    /// Transcript for this run: same-run scratch state first, then the store.
    /// A retried or resumed run finds the committed transcript either way.
    pub async fn transcript(&self) -> Result<Option<TranscriptBundle>> {
        if let Some(bundle) = self.state.lock().await.bundle.clone() {
            return Ok(Some(bundle));
        }
        self.store.transcript(&self.interview_id)
    }
}

/// One batch pipeline stage.
///
/// `run` must be idempotent per interview id: the queue may re-invoke it
/// after a transient failure, and a completed stage re-run must not
/// duplicate writes.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Whether failure (after retries) halts the chain and marks the
    /// interview `error`. Insight synthesis is the one non-fatal stage.
    fn fatal_on_failure(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &StageContext) -> Result<()>;
}
