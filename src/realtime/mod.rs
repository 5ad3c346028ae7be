//! Real-time Incremental Extraction
//!
//! Per-batch evidence extraction for live sessions. Same provider call as
//! the batch path but with no chapter context and a hard deadline a live
//! session can tolerate. Each batch is self-contained: no cross-batch
//! merging, no participation in the interview status machine, and batch
//! indices arriving out of order are processed as-is.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::constants::realtime;
use crate::provider::{EvidenceExtractionRequest, SharedAnalysisProvider};
use crate::queue::with_timeout;
use crate::types::{
    EvidenceDraft, InteractionContext, PersonDraft, Result, Scene, TranscriptBundle, UpshotError,
    Utterance, sanitize_verbatim,
};

/// Queue task name for the realtime path
pub const TASK_NAME: &str = "realtime.extract-evidence";

/// One incoming live batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeBatch {
    pub utterances: Vec<Utterance>,
    pub language: String,
    /// Monotonically increasing on the sender side; not enforced here
    pub batch_index: u32,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Extraction output for one batch, echoing the batch identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeBatchResult {
    pub batch_index: u32,
    pub session_id: Option<String>,
    pub evidence: Vec<EvidenceDraft>,
    pub people: Vec<PersonDraft>,
    pub scenes: Vec<Scene>,
    pub interaction_context: Option<InteractionContext>,
    pub context_confidence: Option<f32>,
    pub context_reasoning: Option<String>,
}

/// Stateless per-batch extractor
pub struct RealtimeExtractor {
    provider: SharedAnalysisProvider,
    timeout: Duration,
}

impl RealtimeExtractor {
    pub fn new(provider: SharedAnalysisProvider) -> Self {
        Self {
            provider,
            timeout: Duration::from_secs(realtime::BATCH_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extract evidence from one batch under the hard deadline.
    ///
    /// Idempotent at batch level: the same input yields the same sanitized
    /// drafts, and nothing is persisted here.
    #[instrument(skip(self, batch), fields(batch_index = batch.batch_index))]
    pub async fn extract_batch(&self, batch: &RealtimeBatch) -> Result<RealtimeBatchResult> {
        if batch.utterances.is_empty() {
            return Err(UpshotError::validation("Realtime batch has no utterances"));
        }
        if batch.language.trim().is_empty() {
            return Err(UpshotError::validation("Realtime batch has no language"));
        }

        let request = EvidenceExtractionRequest {
            transcript: TranscriptBundle::new(batch.utterances.clone(), batch.language.clone()),
            // Never chapter context on the live path
            chapters: Vec::new(),
            language: batch.language.clone(),
        };

        let extraction = with_timeout(
            self.timeout,
            TASK_NAME,
            self.provider.extract_evidence(&request),
        )
        .await?;

        let evidence: Vec<EvidenceDraft> = extraction
            .evidence
            .into_iter()
            .filter_map(|mut draft| {
                let verbatim = sanitize_verbatim(&draft.verbatim)?;
                draft.verbatim = verbatim;
                Some(draft)
            })
            .collect();

        debug!(
            batch_index = batch.batch_index,
            evidence = evidence.len(),
            people = extraction.people.len(),
            "Realtime batch extracted"
        );

        Ok(RealtimeBatchResult {
            batch_index: batch.batch_index,
            session_id: batch.session_id.clone(),
            evidence,
            people: extraction.people,
            scenes: extraction.scenes,
            interaction_context: extraction.interaction_context,
            context_confidence: extraction.context_confidence,
            context_reasoning: extraction.context_reasoning,
        })
    }
}
