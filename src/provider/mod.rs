//! Provider Abstraction
//!
//! The concrete transcription and analysis vendors live behind these traits;
//! the pipeline only sees the input/output contracts. The shipped
//! implementation is HTTP-based; tests plug in mocks.

pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{
    Chapter, EvidenceDraft, InsightDraft, InteractionContext, PersonDraft, Result, Scene,
    TranscriptBundle, UpshotError,
};

pub use http::{HttpAnalysisProvider, HttpTranscriptionProvider};

// =============================================================================
// Requests / Responses
// =============================================================================

/// Input to one evidence-extraction call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceExtractionRequest {
    pub transcript: TranscriptBundle,
    /// Chapter context; always empty on the realtime path
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    pub language: String,
}

/// Output of one evidence-extraction call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceExtraction {
    #[serde(default)]
    pub evidence: Vec<EvidenceDraft>,
    #[serde(default)]
    pub people: Vec<PersonDraft>,
    #[serde(default)]
    pub scenes: Vec<Scene>,
    #[serde(default)]
    pub interaction_context: Option<InteractionContext>,
    #[serde(default)]
    pub context_confidence: Option<f32>,
    #[serde(default)]
    pub context_reasoning: Option<String>,
}

/// Input to one insight-synthesis call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightSynthesisRequest {
    /// Committed evidence, in storage order; drafts cite it by index
    pub evidence: Vec<crate::types::EvidenceUnit>,
    #[serde(default)]
    pub custom_instructions: Option<String>,
}

/// Output of one insight-synthesis call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsightSynthesis {
    #[serde(default)]
    pub insights: Vec<InsightDraft>,
}

// =============================================================================
// Traits
// =============================================================================

/// Evidence extraction and insight synthesis
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    async fn extract_evidence(
        &self,
        request: &EvidenceExtractionRequest,
    ) -> Result<EvidenceExtraction>;

    async fn synthesize_insights(
        &self,
        request: &InsightSynthesisRequest,
    ) -> Result<InsightSynthesis>;

    fn name(&self) -> &str;

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Media-reference to transcript
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    async fn transcribe(&self, media_ref: &str) -> Result<TranscriptBundle>;

    fn name(&self) -> &str;
}

pub type SharedAnalysisProvider = Arc<dyn AnalysisProvider>;
pub type SharedTranscriptionProvider = Arc<dyn TranscriptionProvider>;

// =============================================================================
// Configuration / Factory
// =============================================================================

/// Provider connection settings
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider kind; only "http" ships
    pub kind: String,
    pub api_base: Option<String>,
    /// API key; prefer the UPSHOT_PROVIDER_API_KEY env var over config files
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_base", &self.api_base)
            .field("api_key", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: "http".to_string(),
            api_base: None,
            api_key: None,
            timeout_secs: crate::constants::network::REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Build the analysis provider named by config.
pub fn create_analysis_provider(config: &ProviderConfig) -> Result<SharedAnalysisProvider> {
    match config.kind.as_str() {
        "http" => Ok(Arc::new(HttpAnalysisProvider::new(config.clone())?)),
        other => Err(UpshotError::Config(format!(
            "Unknown analysis provider '{}'. Valid values: http",
            other
        ))),
    }
}

/// Build the transcription provider named by config.
pub fn create_transcription_provider(
    config: &ProviderConfig,
) -> Result<SharedTranscriptionProvider> {
    match config.kind.as_str() {
        "http" => Ok(Arc::new(HttpTranscriptionProvider::new(config.clone())?)),
        other => Err(UpshotError::Config(format!(
            "Unknown transcription provider '{}'. Valid values: http",
            other
        ))),
    }
}
