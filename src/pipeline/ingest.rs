//! Ingestion Stage
//!
//! Turns a raw media reference (or a caller-supplied transcript) into a
//! normalized [`TranscriptBundle`] and moves the interview into
//! `transcribing`. For project-scoped interviews it also plants the planned
//! research answers that attribution fills in later.

use async_trait::async_trait;
use tracing::info;

use super::stage::{PipelineStage, StageContext};
use crate::types::{InterviewStatus, Result, StageKind, TranscriptBundle, UpshotError};

const DEFAULT_LANGUAGE: &str = "en";

pub struct IngestionStage;

impl IngestionStage {
    /// Drop empty utterances and default the language.
    fn normalize(bundle: TranscriptBundle) -> TranscriptBundle {
        let utterances = bundle
            .utterances
            .into_iter()
            .filter(|u| !u.text.trim().is_empty())
            .collect();
        let language = if bundle.language.trim().is_empty() {
            DEFAULT_LANGUAGE.to_string()
        } else {
            bundle.language
        };
        TranscriptBundle {
            utterances,
            language,
        }
    }
}

#[async_trait]
impl PipelineStage for IngestionStage {
    fn kind(&self) -> StageKind {
        StageKind::Ingestion
    }

    async fn run(&self, ctx: &StageContext) -> Result<()> {
        if ctx.scope.account_id.trim().is_empty() {
            return Err(UpshotError::validation("account_id must be set"));
        }

        let interview = ctx.store.interview(&ctx.interview_id)?;
        ctx.store
            .advance_status(&ctx.interview_id, InterviewStatus::Transcribing)?;

        // Re-runs reuse whatever transcript is already committed
        let raw = match ctx.transcript().await? {
            Some(bundle) => bundle,
            None => {
                let media_ref = interview.media_ref.as_deref().ok_or_else(|| {
                    UpshotError::validation(format!(
                        "Interview {} has neither a transcript nor a media_ref",
                        ctx.interview_id
                    ))
                })?;
                let provider = ctx.transcription.as_ref().ok_or_else(|| {
                    UpshotError::validation("No transcription provider configured")
                })?;
                provider.transcribe(media_ref).await?
            }
        };

        let bundle = Self::normalize(raw);
        if bundle.is_empty() {
            return Err(UpshotError::validation(format!(
                "Transcript for interview {} contains no usable utterances",
                ctx.interview_id
            )));
        }

        ctx.store.set_transcript(&ctx.interview_id, &bundle)?;

        if let Some(project_id) = &interview.project_id
            && !ctx.research_questions.is_empty()
        {
            let created = ctx.store.create_planned_answers(
                &ctx.interview_id,
                project_id,
                &ctx.research_questions,
            )?;
            if created > 0 {
                info!(
                    interview_id = %ctx.interview_id,
                    planned = created,
                    "Created planned research answers"
                );
            }
        }

        info!(
            interview_id = %ctx.interview_id,
            utterances = bundle.utterances.len(),
            language = %bundle.language,
            "Transcript committed"
        );

        ctx.state.lock().await.bundle = Some(bundle);
        Ok(())
    }
}
