//! Core Domain Types
//!
//! Shared types used across the pipeline: the unified error system, the
//! interview record with its status state machine, and the derived
//! evidence/person/insight artifacts.

pub mod error;
pub mod evidence;
pub mod interview;

pub use error::{
    ErrorCategory, ErrorClassifier, ProviderError, Result, ResultExt, UpshotError,
};
pub use evidence::{
    Anchor, Chapter, Confidence, EvidenceDraft, EvidenceUnit, Insight, InsightDraft,
    InteractionContext, KindTag, Person, PersonDraft, Scene, Support, TranscriptBundle, Utterance,
    independence_key, sanitize_verbatim,
};
pub use interview::{
    ConversationAnalysis, Interview, InterviewStatus, RecordScope, ResearchQuestion, StageKind,
    StageOutcome, StageRecord,
};
