//! Evidence & People Extraction Stage
//!
//! One provider call over the full transcript, then a transactional commit
//! of sanitized evidence units and candidate people. The stage is the only
//! writer that moves an interview to `ready`, and the only emitter of the
//! extraction fan-out event.
//!
//! Idempotency: committed evidence for the interview id short-circuits the
//! provider call entirely; a re-trigger can never duplicate rows, and the
//! fan-out event is not re-emitted for an already-committed extraction.

use async_trait::async_trait;
use tracing::{debug, info};

use super::events::ExtractionCompleted;
use super::stage::{PipelineStage, StageContext};
use crate::provider::EvidenceExtractionRequest;
use crate::types::{
    Confidence, EvidenceDraft, EvidenceUnit, InterviewStatus, KindTag, Person, PersonDraft, Result,
    StageKind, Support, UpshotError, independence_key, sanitize_verbatim,
};

pub struct ExtractionStage;

impl ExtractionStage {
    /// Sanitize and normalize one draft; None when the verbatim is unusable.
    fn commit_draft(
        draft: &EvidenceDraft,
        ctx: &StageContext,
        created_at: &str,
    ) -> Option<EvidenceUnit> {
        let verbatim = sanitize_verbatim(&draft.verbatim)?;
        let kind_tags: Vec<KindTag> = draft
            .kind_tags
            .iter()
            .filter_map(|t| KindTag::parse(t))
            .collect();

        Some(EvidenceUnit {
            id: uuid::Uuid::new_v4().to_string(),
            interview_id: ctx.interview_id.clone(),
            account_id: ctx.scope.account_id.clone(),
            project_id: ctx.scope.project_id.clone(),
            independence_key: independence_key(&verbatim, &kind_tags),
            verbatim,
            support: Support::normalize(draft.support.as_deref()),
            kind_tags,
            personas: draft.personas.clone(),
            segments: draft.segments.clone(),
            journey_stage: draft.journey_stage.clone(),
            anchors: draft.anchors.clone(),
            confidence: Confidence::normalize(draft.confidence.as_deref()),
            created_at: created_at.to_string(),
        })
    }

    fn commit_person(draft: &PersonDraft, ctx: &StageContext, created_at: &str) -> Option<Person> {
        let name = draft.name.trim();
        if name.is_empty() {
            return None;
        }
        Some(Person {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: ctx.scope.account_id.clone(),
            project_id: ctx.scope.project_id.clone(),
            name: name.to_string(),
            role: draft.role.clone(),
            organization: draft.organization.clone(),
            description: draft.description.clone(),
            created_at: created_at.to_string(),
        })
    }
}

#[async_trait]
impl PipelineStage for ExtractionStage {
    fn kind(&self) -> StageKind {
        StageKind::Extraction
    }

    async fn run(&self, ctx: &StageContext) -> Result<()> {
        ctx.store
            .advance_status(&ctx.interview_id, InterviewStatus::Analyzing)?;

        // Idempotency gate: committed evidence means a previous run already
        // did the work. Finish the status move but call no provider and
        // emit no event.
        if ctx.store.evidence_exists_for(&ctx.interview_id)? {
            let existing = ctx.store.evidence_for_interview(&ctx.interview_id)?;
            info!(
                interview_id = %ctx.interview_id,
                evidence = existing.len(),
                "Evidence already committed, skipping extraction"
            );
            ctx.state.lock().await.evidence_ids = existing.into_iter().map(|e| e.id).collect();
            ctx.store
                .advance_status(&ctx.interview_id, InterviewStatus::Ready)?;
            return Ok(());
        }

        let bundle = ctx.transcript().await?.ok_or_else(|| {
            UpshotError::validation(format!(
                "Interview {} has no transcript; ingestion must run first",
                ctx.interview_id
            ))
        })?;

        let request = EvidenceExtractionRequest {
            language: bundle.language.clone(),
            transcript: bundle,
            chapters: ctx.chapters.clone(),
        };
        let extraction = ctx.analysis.extract_evidence(&request).await?;

        if let Some(context) = extraction.interaction_context {
            debug!(
                interview_id = %ctx.interview_id,
                interaction_context = context.as_str(),
                confidence = extraction.context_confidence,
                "Interaction context detected"
            );
        }

        let created_at = chrono::Utc::now().to_rfc3339();
        let units: Vec<EvidenceUnit> = extraction
            .evidence
            .iter()
            .filter_map(|draft| Self::commit_draft(draft, ctx, &created_at))
            .collect();
        let people: Vec<Person> = extraction
            .people
            .iter()
            .filter_map(|draft| Self::commit_person(draft, ctx, &created_at))
            .collect();

        let evidence_ids = ctx.store.insert_evidence_batch(&units)?;
        let person_ids = ctx.store.insert_people(&ctx.interview_id, &people)?;

        info!(
            interview_id = %ctx.interview_id,
            evidence = evidence_ids.len(),
            people = person_ids.len(),
            "Extraction committed"
        );

        ctx.store
            .advance_status(&ctx.interview_id, InterviewStatus::Ready)?;

        ctx.events.emit(ExtractionCompleted {
            interview_id: ctx.interview_id.clone(),
            initiated_by: ctx.initiated_by.clone(),
            evidence_ids: evidence_ids.clone(),
        });

        let mut state = ctx.state.lock().await;
        state.evidence_ids = evidence_ids;
        state.person_ids = person_ids;
        Ok(())
    }
}
