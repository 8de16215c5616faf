use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::chunking::TextChunk;
use crate::error::CairnError;

/// Lifecycle of an embedding job.
///
/// `Queued → Processing → {Succeeded | Retrying → Queued | Failed}`.
/// `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Succeeded,
    Retrying,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Chunk-then-embed work for one entry. Holds plaintext, which is zeroized
/// when the job is dropped.
#[derive(Clone)]
pub struct EmbeddingJob {
    pub id: Uuid,
    pub entry_id: String,
    pub text: Zeroizing<String>,
    pub tags: Vec<String>,
    pub importance: f32,
    /// Higher runs first.
    pub priority: i32,
    pub retries: u32,
    pub status: JobStatus,
}

impl EmbeddingJob {
    pub fn new(entry_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            entry_id: entry_id.into(),
            text: Zeroizing::new(text.into()),
            tags: Vec::new(),
            importance: 0.5,
            priority: 0,
            retries: 0,
            status: JobStatus::Queued,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance;
        self
    }
}

impl std::fmt::Debug for EmbeddingJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingJob")
            .field("id", &self.id)
            .field("entry_id", &self.entry_id)
            .field("text", &format_args!("[{} chars]", self.text.chars().count()))
            .field("priority", &self.priority)
            .field("retries", &self.retries)
            .field("status", &self.status)
            .finish()
    }
}

/// Notifications emitted by the worker. Every job ends in exactly one
/// `Succeeded` or `Failed`.
#[derive(Debug)]
pub enum JobEvent {
    /// Chunks and their vectors, index-aligned, ready to persist.
    Succeeded {
        job_id: Uuid,
        entry_id: String,
        model: String,
        chunks: Vec<TextChunk>,
        vectors: Vec<Vec<f32>>,
    },
    Retrying {
        job_id: Uuid,
        retries: u32,
        delay: Duration,
        error: String,
    },
    /// Carries a [`CairnError::QueueTerminal`].
    Failed {
        job_id: Uuid,
        entry_id: String,
        error: CairnError,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            Self::Succeeded { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Failed { job_id, .. } => *job_id,
        }
    }
}
