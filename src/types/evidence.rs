//! Evidence, People, and Insight Types
//!
//! Derived artifacts produced by the extraction and synthesis stages.
//! Evidence rows are append-only: the extraction stage sanitizes verbatims,
//! normalizes enum fields, and fingerprints each unit with an independence
//! key so a re-run never commits a duplicate.

use serde::{Deserialize, Serialize};

// =============================================================================
// Transcript
// =============================================================================

/// One speaker turn in a transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub speaker: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<u64>,
}

/// Normalized per-utterance transcript, immutable after ingestion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptBundle {
    pub utterances: Vec<Utterance>,
    pub language: String,
}

impl TranscriptBundle {
    pub fn new(utterances: Vec<Utterance>, language: impl Into<String>) -> Self {
        Self {
            utterances,
            language: language.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    /// Flatten to "speaker: text" lines for provider prompts
    pub fn full_text(&self) -> String {
        self.utterances
            .iter()
            .map(|u| format!("{}: {}", u.speaker, u.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Optional chapter context passed to batch extraction (never to realtime)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub start_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

// =============================================================================
// Evidence Enums
// =============================================================================

/// Stance of an evidence unit toward the research topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Support {
    Supports,
    Refutes,
    Neutral,
}

impl Support {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supports => "supports",
            Self::Refutes => "refutes",
            Self::Neutral => "neutral",
        }
    }

    /// Lenient parse of provider output; anything unrecognized is `supports`
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("refutes") => Self::Refutes,
            Some("neutral") => Self::Neutral,
            _ => Self::Supports,
        }
    }
}

/// Provider confidence in an extracted unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("low") => Self::Low,
            Some("high") => Self::High,
            _ => Self::Medium,
        }
    }
}

/// What kind of signal an evidence unit carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindTag {
    Problem,
    Goal,
    Behavior,
    Emotion,
    Context,
    Artifact,
}

impl KindTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Problem => "problem",
            Self::Goal => "goal",
            Self::Behavior => "behavior",
            Self::Emotion => "emotion",
            Self::Context => "context",
            Self::Artifact => "artifact",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "problem" => Some(Self::Problem),
            "goal" => Some(Self::Goal),
            "behavior" => Some(Self::Behavior),
            "emotion" => Some(Self::Emotion),
            "context" => Some(Self::Context),
            "artifact" => Some(Self::Artifact),
            _ => None,
        }
    }
}

/// Session type signal carried through extraction output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionContext {
    Research,
    Sales,
    Support,
    Internal,
    Debrief,
}

impl InteractionContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Sales => "sales",
            Self::Support => "support",
            Self::Internal => "internal",
            Self::Debrief => "debrief",
        }
    }
}

// =============================================================================
// Evidence
// =============================================================================

/// Position of an evidence unit within the source transcript
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utterance_index: Option<usize>,
}

/// Raw evidence unit as returned by the extraction provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceDraft {
    pub verbatim: String,
    #[serde(default)]
    pub support: Option<String>,
    #[serde(default)]
    pub kind_tags: Vec<String>,
    #[serde(default)]
    pub personas: Vec<String>,
    #[serde(default)]
    pub segments: Vec<String>,
    #[serde(default)]
    pub journey_stage: Option<String>,
    #[serde(default)]
    pub anchors: Vec<Anchor>,
    #[serde(default)]
    pub confidence: Option<String>,
}

/// A persisted evidence unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceUnit {
    pub id: String,
    pub interview_id: String,
    pub account_id: String,
    pub project_id: Option<String>,
    pub verbatim: String,
    pub support: Support,
    pub kind_tags: Vec<KindTag>,
    pub personas: Vec<String>,
    pub segments: Vec<String>,
    pub journey_stage: Option<String>,
    pub anchors: Vec<Anchor>,
    pub confidence: Confidence,
    pub independence_key: String,
    pub created_at: String,
}

impl EvidenceUnit {
    /// Primary kind tag used for answer attribution
    pub fn main_kind_tag(&self) -> Option<KindTag> {
        self.kind_tags.first().copied()
    }
}

// =============================================================================
// Verbatim Hygiene
// =============================================================================

/// Quote prefix length used for independence-key fingerprinting
const INDEPENDENCE_KEY_PREFIX: usize = 160;

/// Clean a raw provider verbatim: smart quotes to ASCII, control characters
/// stripped, whitespace collapsed. Returns None when nothing usable remains.
pub fn sanitize_verbatim(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '\u{201C}' | '\u{201D}' => out.push('"'),
            c if (c as u32) < 32 || c as u32 == 127 => out.push(' '),
            c => out.push(c),
        }
    }
    let collapsed = out.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Fingerprint an evidence unit for duplicate suppression.
///
/// Key material is the lowercased quote prefix plus the main kind tag, so
/// the same statement re-extracted with cosmetic differences collapses to
/// one key.
pub fn independence_key(verbatim: &str, kind_tags: &[KindTag]) -> String {
    let normalized = verbatim.to_lowercase();
    let prefix: String = normalized.chars().take(INDEPENDENCE_KEY_PREFIX).collect();
    let main_tag = kind_tags.first().map(|t| t.as_str()).unwrap_or("untagged");

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(prefix.as_bytes());
    hasher.update(b"|");
    hasher.update(main_tag.as_bytes());
    format!("{:08x}", hasher.finalize())
}

// =============================================================================
// People
// =============================================================================

/// Candidate person as returned by the extraction provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonDraft {
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub segment: Option<String>,
}

/// A persisted candidate person. Final identity resolution is out of scope;
/// these rows only record who was mentioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub account_id: String,
    pub project_id: Option<String>,
    pub name: String,
    pub role: Option<String>,
    pub organization: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
}

/// Scene/chapter summary emitted alongside extraction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub start_ms: Option<u64>,
    #[serde(default)]
    pub end_ms: Option<u64>,
}

// =============================================================================
// Insights
// =============================================================================

/// Raw insight as returned by the synthesis provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsightDraft {
    pub name: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub confidence: Option<String>,
    /// Indices into the evidence list the synthesis call was given
    #[serde(default)]
    pub evidence_indices: Vec<usize>,
}

/// A persisted insight citing committed evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub interview_id: String,
    pub name: String,
    pub details: Option<String>,
    pub category: Option<String>,
    pub confidence: Confidence,
    pub created_at: String,
}

// =============================================================================
// Tests
// =============================================================================
