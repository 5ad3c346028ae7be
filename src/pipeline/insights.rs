//! Insight Synthesis Stage
//!
//! Reads the committed evidence set (read-only), asks the provider for
//! synthesized insights, and inserts them with their evidence citations.
//! Runs after the interview is already `ready` and never touches status:
//! a failure here leaves evidence without insights, an accepted partial
//! success.

use async_trait::async_trait;
use tracing::{info, warn};

use super::stage::{PipelineStage, StageContext};
use crate::provider::InsightSynthesisRequest;
use crate::types::{Confidence, Insight, InsightDraft, Result, StageKind};

pub struct InsightSynthesisStage;

impl InsightSynthesisStage {
    /// Map a draft onto a persistable insight plus cited evidence ids.
    /// Citations index into the evidence list the provider was given;
    /// out-of-range indices are dropped.
    fn commit_draft(
        draft: &InsightDraft,
        interview_id: &str,
        evidence_ids: &[String],
        created_at: &str,
    ) -> Option<(Insight, Vec<String>)> {
        let name = draft.name.trim();
        if name.is_empty() {
            return None;
        }

        let citations: Vec<String> = draft
            .evidence_indices
            .iter()
            .filter_map(|&i| evidence_ids.get(i).cloned())
            .collect();

        Some((
            Insight {
                id: uuid::Uuid::new_v4().to_string(),
                interview_id: interview_id.to_string(),
                name: name.to_string(),
                details: draft.details.clone(),
                category: draft.category.clone(),
                confidence: Confidence::normalize(draft.confidence.as_deref()),
                created_at: created_at.to_string(),
            },
            citations,
        ))
    }
}

#[async_trait]
impl PipelineStage for InsightSynthesisStage {
    fn kind(&self) -> StageKind {
        StageKind::InsightSynthesis
    }

    fn fatal_on_failure(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &StageContext) -> Result<()> {
        let evidence = ctx.store.evidence_for_interview(&ctx.interview_id)?;
        if evidence.is_empty() {
            warn!(
                interview_id = %ctx.interview_id,
                "No committed evidence, skipping insight synthesis"
            );
            return Ok(());
        }
        let evidence_ids: Vec<String> = evidence.iter().map(|e| e.id.clone()).collect();

        let request = InsightSynthesisRequest {
            evidence,
            custom_instructions: ctx.custom_instructions.clone(),
        };
        let synthesis = ctx.analysis.synthesize_insights(&request).await?;

        let created_at = chrono::Utc::now().to_rfc3339();
        let insights: Vec<(Insight, Vec<String>)> = synthesis
            .insights
            .iter()
            .filter_map(|draft| {
                Self::commit_draft(draft, &ctx.interview_id, &evidence_ids, &created_at)
            })
            .collect();

        let insight_ids = ctx.store.insert_insights(&insights)?;
        info!(
            interview_id = %ctx.interview_id,
            insights = insight_ids.len(),
            "Insights committed"
        );

        ctx.state.lock().await.insight_ids = insight_ids;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_draft_maps_citations() {
        let evidence_ids = vec!["ev-a".to_string(), "ev-b".to_string()];
        let draft = InsightDraft {
            name: "Export friction".into(),
            details: Some("Users lose hours to manual exports".into()),
            category: Some("pain".into()),
            confidence: Some("high".into()),
            evidence_indices: vec![0, 1, 9],
        };

        let (insight, citations) =
            InsightSynthesisStage::commit_draft(&draft, "i-1", &evidence_ids, "t").unwrap();
        assert_eq!(insight.confidence, Confidence::High);
        // Index 9 is out of range and silently dropped
        assert_eq!(citations, vec!["ev-a".to_string(), "ev-b".to_string()]);
    }

    #[test]
    fn test_commit_draft_rejects_unnamed() {
        let draft = InsightDraft {
            name: "   ".into(),
            ..Default::default()
        };
        assert!(InsightSynthesisStage::commit_draft(&draft, "i-1", &[], "t").is_none());
    }
}
