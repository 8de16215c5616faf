//! Query-time retrieval: filtering, MMR selection, budget packing, and
//! citation-annotated context for answer synthesis.
//!
//! Candidates come from the caller (decrypted chunks plus stored vectors);
//! nothing here touches the database.

pub mod budget;
pub mod filter;
pub mod mmr;
pub mod orchestrator;
pub mod prompt;
pub mod types;

pub use budget::{pack_to_budget, truncate_to_budget, PackOptions, PackedSnippet};
pub use filter::{apply_filters, QueryFilters};
pub use mmr::{cosine_similarity, select, time_decay_rerank, MmrOptions, MmrSelection};
pub use orchestrator::{answer, AnswerSynthesizer, Orchestrator};
pub use prompt::{build_user_prompt, parse_reply, NOT_ENOUGH_CONTEXT, SYSTEM_PROMPT};
pub use types::{
    Answer, CandidateChunk, Citation, CitedSpan, ContextBlock, Metadata, MetadataValue,
    MmrCandidate, RankedChunk, RetrievalOutcome, RetrievalRequest,
};
