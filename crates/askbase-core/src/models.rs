//! Core data models used throughout askbase.
//!
//! These types represent the users, content fragments, citations, and
//! telemetry records that flow through the query pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of source a fragment was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Document,
    Video,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Document => "document",
            SourceKind::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(SourceKind::Document),
            "video" => Some(SourceKind::Video),
            _ => None,
        }
    }
}

/// How the synthesizer should shape an answer. A closed enumeration,
/// never free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnswerStyle {
    Concise,
    #[default]
    Detailed,
    StepByStep,
}

impl AnswerStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerStyle::Concise => "concise",
            AnswerStyle::Detailed => "detailed",
            AnswerStyle::StepByStep => "step-by-step",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "concise" => Some(AnswerStyle::Concise),
            "detailed" => Some(AnswerStyle::Detailed),
            "step-by-step" => Some(AnswerStyle::StepByStep),
            _ => None,
        }
    }
}

/// Which of the user's sources a retrieval may draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFilter {
    #[default]
    All,
    Documents,
    Videos,
    Favorites,
}

impl ContentFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentFilter::All => "all",
            ContentFilter::Documents => "documents",
            ContentFilter::Videos => "videos",
            ContentFilter::Favorites => "favorites",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(ContentFilter::All),
            "documents" => Some(ContentFilter::Documents),
            "videos" => Some(ContentFilter::Videos),
            "favorites" => Some(ContentFilter::Favorites),
            _ => None,
        }
    }

    /// Whether a source with the given kind/favorite flag passes this filter.
    pub fn matches(&self, kind: SourceKind, favorite: bool) -> bool {
        match self {
            ContentFilter::All => true,
            ContentFilter::Documents => kind == SourceKind::Document,
            ContentFilter::Videos => kind == SourceKind::Video,
            ContentFilter::Favorites => favorite,
        }
    }
}

/// An already-authenticated user identity plus their answer preferences.
///
/// Preferences are validated once at load time and consumed as plain data
/// by the retriever, assembler, and synthesizer.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub id: String,
    pub style: AnswerStyle,
    pub filter: ContentFilter,
    /// Maximum fragments per retrieval (3 / 5 / 10 in the product UI).
    pub search_limit: usize,
}

impl UserProfile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            style: AnswerStyle::default(),
            filter: ContentFilter::default(),
            search_limit: 5,
        }
    }
}

/// A registered content source (one document or one video transcript).
///
/// The favorite flag lives here and is joined onto fragments at query
/// time, so toggling it never rewrites the fragment set.
#[derive(Debug, Clone)]
pub struct SourceMeta {
    pub source_id: String,
    pub kind: SourceKind,
    pub favorite: bool,
    /// Unix timestamp; used as the retrieval recency tie-break.
    pub created_at: i64,
}

/// A bounded slice of ingested text, the unit of retrieval.
///
/// Fragments are created in batch when a source is (re-)indexed and are
/// immutable thereafter; re-indexing replaces the whole set for a source.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub id: String,
    pub user_id: String,
    pub source_id: String,
    /// Position within the source, contiguous from 0.
    pub ordinal: i64,
    pub text: String,
    /// SHA-256 of the text, for idempotence checks.
    pub hash: String,
}

/// A fragment paired with its stored vector and parent-source metadata,
/// as returned by a store scan.
#[derive(Debug, Clone)]
pub struct FragmentHit {
    pub fragment: Fragment,
    pub vector: Vec<f32>,
    pub kind: SourceKind,
    pub favorite: bool,
    pub source_created_at: i64,
}

/// A fragment that passed the similarity threshold, with its score.
#[derive(Debug, Clone)]
pub struct ScoredFragment {
    pub fragment: Fragment,
    pub kind: SourceKind,
    pub source_created_at: i64,
    pub similarity: f32,
}

/// A reference from an answer back to the fragment that grounded it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub source_id: String,
    pub kind: SourceKind,
    pub ordinal: i64,
    /// Short excerpt of the cited fragment for display.
    pub excerpt: String,
    pub similarity: f32,
    /// True when the fragment was cut at a sentence boundary to fit the
    /// token budget (single-fragment fallback only).
    pub truncated: bool,
}

/// A synthesized answer paired with the citations that grounded it.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// The result of one answered question, persisted as history.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub question: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub style: AnswerStyle,
}

/// Exactly one of these is produced per question.
///
/// Quota rejection and insufficient context are defined outcomes, not
/// errors; provider failures surface as [`crate::error::QueryError`].
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Answered(QueryResult),
    /// Free limit reached and no active subscription. No model calls
    /// were made and no telemetry was written.
    QuotaExceeded,
    /// No fragment passed the similarity threshold. The question still
    /// consumed a quota slot (an embedding call was made).
    InsufficientContext,
}

/// The ledger's decision on whether a question may proceed to paid
/// model calls.
#[derive(Debug, Clone)]
pub struct Admission {
    pub allowed: bool,
    /// True when admission came from an active subscription window
    /// rather than a free-tier slot.
    pub via_subscription: bool,
    /// Free requests left after this admission (free-tier admissions only).
    pub remaining_free: Option<i64>,
}

impl Admission {
    pub fn subscription() -> Self {
        Self {
            allowed: true,
            via_subscription: true,
            remaining_free: None,
        }
    }

    pub fn free(remaining: i64) -> Self {
        Self {
            allowed: true,
            via_subscription: false,
            remaining_free: Some(remaining),
        }
    }

    pub fn rejected() -> Self {
        Self {
            allowed: false,
            via_subscription: false,
            remaining_free: Some(0),
        }
    }
}

/// The kind of external-model invocation a call-log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Embedding,
    Generation,
    Transcription,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Embedding => "embedding",
            CallKind::Generation => "generation",
            CallKind::Transcription => "transcription",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "embedding" => Some(CallKind::Embedding),
            "generation" => Some(CallKind::Generation),
            "transcription" => Some(CallKind::Transcription),
            _ => None,
        }
    }
}

/// Token counts reported by a provider. All fields optional: not every
/// provider reports every count.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: Option<i64>,
    pub completion: Option<i64>,
    pub total: Option<i64>,
}

impl TokenUsage {
    pub fn total_only(total: i64) -> Self {
        Self {
            prompt: None,
            completion: None,
            total: Some(total),
        }
    }
}

/// Immutable record of one external-model invocation.
///
/// Written on success and failure alike, and never mutated afterwards.
/// Retained independently of the user lifecycle for accounting.
#[derive(Debug, Clone, Serialize)]
pub struct CallLogEntry {
    pub id: String,
    pub kind: CallKind,
    pub model: String,
    /// Opaque id linking this call to the originating query or index run.
    pub correlation_id: String,
    pub input_chars: i64,
    pub output_chars: i64,
    pub usage: TokenUsage,
    pub latency_ms: i64,
    /// USD cost from the static rate table; `None` for unknown models.
    pub cost_usd: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
