//! Interview Record Types
//!
//! The interview row is the idempotency anchor for the whole pipeline: its
//! `status` is a forward-only state machine and its `conversation_analysis`
//! log is an append-only record of stage attempts.
//!
//! ## Status machine
//!
//! ```text
//! uploaded -> transcribing -> analyzing -> ready
//!                  |               |
//!                  +----> error <--+
//! ```
//!
//! `error` is terminal until an explicit external reset; the pipeline never
//! moves a row backwards on its own.

use serde::{Deserialize, Serialize};

use super::error::{Result, UpshotError};

// =============================================================================
// Status State Machine
// =============================================================================

/// Processing status of an interview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterviewStatus {
    Uploaded,
    Transcribing,
    Analyzing,
    Ready,
    Error,
}

impl InterviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Transcribing => "transcribing",
            Self::Analyzing => "analyzing",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "uploaded" => Ok(Self::Uploaded),
            "transcribing" => Ok(Self::Transcribing),
            "analyzing" => Ok(Self::Analyzing),
            "ready" => Ok(Self::Ready),
            "error" => Ok(Self::Error),
            other => Err(UpshotError::Storage(format!(
                "Unknown interview status '{}'",
                other
            ))),
        }
    }

    /// Position in the forward chain; `error` sits outside it
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Uploaded => Some(0),
            Self::Transcribing => Some(1),
            Self::Analyzing => Some(2),
            Self::Ready => Some(3),
            Self::Error => None,
        }
    }

    /// Whether a write from `self` to `target` is a legal forward transition.
    ///
    /// Forward moves may skip intermediate states (extraction goes straight
    /// from `analyzing` to `ready`). `error` is only reachable from
    /// `transcribing` or `analyzing`. Regressions are never legal here;
    /// reprocessing resets go through the store's explicit reset path.
    pub fn can_transition(&self, target: Self) -> bool {
        match (self.rank(), target.rank()) {
            (Some(from), Some(to)) => to > from,
            (Some(_), None) => matches!(self, Self::Transcribing | Self::Analyzing),
            (None, _) => false,
        }
    }

    /// Terminal states accept no further pipeline writes
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Error)
    }
}

impl std::fmt::Display for InterviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Pipeline Stages
// =============================================================================

/// Identifier for a batch-pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Ingestion,
    Extraction,
    Attribution,
    InsightSynthesis,
}

impl StageKind {
    /// Queue task name for this stage
    pub fn task_name(&self) -> &'static str {
        match self {
            Self::Ingestion => "interview.upload-media-and-transcribe",
            Self::Extraction => "interview.extract-evidence-and-people",
            Self::Attribution => "interview.attribute-answers",
            Self::InsightSynthesis => "interview.generate-key-takeaways",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Ingestion => "ingestion",
            Self::Extraction => "extraction",
            Self::Attribution => "attribution",
            Self::InsightSynthesis => "insight_synthesis",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Outcome of one stage run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StageOutcome {
    Success,
    Failure { error: String },
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// One entry in the interview's stage log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: StageKind,
    #[serde(flatten)]
    pub outcome: StageOutcome,
    pub attempts: u32,
    pub started_at: String,
    pub finished_at: String,
}

/// Append-only log of stage runs, stored as JSON on the interview row.
///
/// Each run appends a tagged record; nothing is ever mutated in place, so
/// the full attempt history survives re-triggers and reprocessing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationAnalysis {
    pub records: Vec<StageRecord>,
}

impl ConversationAnalysis {
    pub fn push(&mut self, record: StageRecord) {
        self.records.push(record);
    }

    /// Most recent record for a given stage, if any
    pub fn last_for(&self, stage: StageKind) -> Option<&StageRecord> {
        self.records.iter().rev().find(|r| r.stage == stage)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// =============================================================================
// Interview Record
// =============================================================================

/// Account/project scoping attached to every derived row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordScope {
    pub account_id: String,
    pub project_id: Option<String>,
    pub user_id: Option<String>,
}

impl RecordScope {
    pub fn account(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            project_id: None,
            user_id: None,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// An interview row as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interview {
    pub id: String,
    pub account_id: String,
    pub project_id: Option<String>,
    pub title: Option<String>,
    pub media_ref: Option<String>,
    pub transcript_ref: Option<String>,
    pub language: Option<String>,
    pub status: InterviewStatus,
    pub conversation_analysis: ConversationAnalysis,
    pub speaker_review_needed: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A planned research question attached to a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchQuestion {
    pub id: String,
    pub text: String,
    /// Category matched against evidence kind tags during attribution
    pub category: String,
}

// =============================================================================
// Tests
// =============================================================================
