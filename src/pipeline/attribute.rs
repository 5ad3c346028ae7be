//! Answer Attribution Stage
//!
//! Links committed evidence to the planned research answers by kind-tag
//! category and runs per-interview finalization bookkeeping. The strategy
//! is picked once at pipeline construction from the `persona_analysis`
//! flag: off wires in [`NoopAttributor`], which returns a well-formed
//! result with no side effects.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info};

use super::stage::{PipelineStage, StageContext};
use crate::types::{Result, StageKind};

/// Transcription placeholders like "Speaker A" that never got a real name
static PLACEHOLDER_SPEAKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Speaker [A-Z]$").expect("valid placeholder pattern"));

/// What one attribution pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributionSummary {
    pub answers_linked: usize,
    pub placeholder_speakers: usize,
}

/// Strategy seam for answer attribution
#[async_trait]
pub trait AnswerAttributor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attribute(&self, ctx: &StageContext) -> Result<AttributionSummary>;
}

// =============================================================================
// Strategies
// =============================================================================

/// Flag-off strategy: no reads, no writes
pub struct NoopAttributor;

#[async_trait]
impl AnswerAttributor for NoopAttributor {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn attribute(&self, _ctx: &StageContext) -> Result<AttributionSummary> {
        Ok(AttributionSummary::default())
    }
}

/// Flag-on strategy: evidence-to-answer linking plus speaker hygiene
pub struct ResearchAnswerAttributor;

impl ResearchAnswerAttributor {
    pub fn is_placeholder_speaker(name: &str) -> bool {
        PLACEHOLDER_SPEAKER.is_match(name)
    }
}

#[async_trait]
impl AnswerAttributor for ResearchAnswerAttributor {
    fn name(&self) -> &'static str {
        "research-answers"
    }

    async fn attribute(&self, ctx: &StageContext) -> Result<AttributionSummary> {
        let evidence = ctx.store.evidence_for_interview(&ctx.interview_id)?;
        let answers = ctx.store.planned_answers_for(&ctx.interview_id)?;
        let mut summary = AttributionSummary::default();

        for answer in answers.iter().filter(|a| !a.is_answered()) {
            // Match on the main kind tag, same as the independence key
            let matching: Vec<String> = evidence
                .iter()
                .filter(|unit| {
                    unit.main_kind_tag()
                        .is_some_and(|tag| tag.as_str() == answer.question_category)
                })
                .map(|unit| unit.id.clone())
                .collect();

            if !matching.is_empty() {
                debug!(
                    interview_id = %ctx.interview_id,
                    question_id = %answer.question_id,
                    evidence = matching.len(),
                    "Answer attributed"
                );
                ctx.store.mark_answer_answered(&answer.id, &matching)?;
                summary.answers_linked += 1;
            }
        }

        // Finalization hygiene: flag unresolved transcription placeholders
        let people = ctx.store.people_for_interview(&ctx.interview_id)?;
        summary.placeholder_speakers = people
            .iter()
            .filter(|p| Self::is_placeholder_speaker(&p.name))
            .count();
        if summary.placeholder_speakers > 0 {
            info!(
                interview_id = %ctx.interview_id,
                placeholders = summary.placeholder_speakers,
                "Placeholder speakers found, flagging for review"
            );
            ctx.store
                .set_speaker_review_needed(&ctx.interview_id, true)?;
        }

        Ok(summary)
    }
}

// =============================================================================
// Stage
// =============================================================================

pub struct AttributionStage {
    attributor: std::sync::Arc<dyn AnswerAttributor>,
}

impl AttributionStage {
    pub fn new(attributor: std::sync::Arc<dyn AnswerAttributor>) -> Self {
        Self { attributor }
    }
}

#[async_trait]
impl PipelineStage for AttributionStage {
    fn kind(&self) -> StageKind {
        StageKind::Attribution
    }

    async fn run(&self, ctx: &StageContext) -> Result<()> {
        let summary = self.attributor.attribute(ctx).await?;
        info!(
            interview_id = %ctx.interview_id,
            attributor = self.attributor.name(),
            answers_linked = summary.answers_linked,
            "Attribution finished"
        );
        Ok(())
    }
}
