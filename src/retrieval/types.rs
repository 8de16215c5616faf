use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunking::TextChunk;

use super::filter::QueryFilters;

/// Typed metadata value carried on MMR candidates.
///
/// Untagged so JSON stays flat; RFC 3339 strings deserialize as
/// [`MetadataValue::Timestamp`] before falling back to text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
    TextList(Vec<String>),
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// An item under consideration by the MMR selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmrCandidate {
    pub id: String,
    /// Cosine similarity to the current query. Recomputed on every selection.
    pub relevance: f32,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A stored chunk offered to the orchestrator, with its embedding if one exists.
#[derive(Debug, Clone)]
pub struct CandidateChunk {
    pub chunk: TextChunk,
    pub occurred_at: DateTime<Utc>,
    pub vector: Option<Vec<f32>>,
}

impl CandidateChunk {
    pub(crate) fn to_mmr_candidate(&self) -> MmrCandidate {
        let mut metadata = Metadata::new();
        metadata.insert(
            "entry_id".into(),
            MetadataValue::Text(self.chunk.entry_id.clone()),
        );
        metadata.insert(
            "tags".into(),
            MetadataValue::TextList(self.chunk.tags.clone()),
        );
        metadata.insert(
            "importance".into(),
            MetadataValue::Float(f64::from(self.chunk.importance)),
        );
        metadata.insert(
            "occurred_at".into(),
            MetadataValue::Timestamp(self.occurred_at),
        );
        MmrCandidate {
            id: self.chunk.id.clone(),
            relevance: 0.0,
            text: self.chunk.text.clone(),
            metadata,
        }
    }
}

/// A selected chunk with its query relevance and final ranking score.
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub chunk: TextChunk,
    pub occurred_at: DateTime<Utc>,
    pub relevance: f32,
    pub score: f32,
}

/// A retrieval query.
#[derive(Debug, Clone, Default)]
pub struct RetrievalRequest {
    pub query: String,
    pub filters: QueryFilters,
    /// Overrides `retrieval.max_results`.
    pub max_results: Option<usize>,
    /// Overrides `retrieval.lambda`.
    pub lambda: Option<f32>,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

/// One numbered block of context handed to the synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextBlock {
    /// 1-based position in the prompt.
    pub index: usize,
    pub chunk_id: String,
    pub entry_id: String,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub score: f32,
    pub truncated: bool,
}

/// Pointer from retrieved context back to an entry span.
///
/// `start`/`end` are character offsets into the decrypted entry text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub chunk_id: String,
    pub entry_id: String,
    pub start: usize,
    pub end: usize,
    pub score: f32,
}

/// Result of [`Orchestrator::query`](super::Orchestrator::query).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalOutcome {
    pub question: String,
    pub blocks: Vec<ContextBlock>,
    pub citations: Vec<Citation>,
    pub confidence: f32,
    pub system_prompt: String,
    pub user_prompt: String,
}

impl RetrievalOutcome {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Citation as it appears in a synthesizer reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CitedSpan {
    pub entry_id: String,
    pub start: usize,
    pub end: usize,
}

/// A validated synthesized answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub citations: Vec<CitedSpan>,
    pub confidence: f32,
}
