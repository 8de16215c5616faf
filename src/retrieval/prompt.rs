//! Prompt assembly for the answer synthesizer and validation of its reply.

use std::fmt::Write as _;

use serde::Deserialize;

use crate::error::{CairnError, Result};

use super::types::{Answer, CitedSpan, ContextBlock};

/// Answer returned without calling the synthesizer when nothing was retrieved.
pub const NOT_ENOUGH_CONTEXT: &str =
    "I don't have enough context in your notes to answer that.";

pub const SYSTEM_PROMPT: &str = "\
You answer questions using only the numbered context blocks taken from the user's private notes.

Rules:
- Use only facts stated in the context blocks. If they do not contain the answer, say so.
- Cite every claim with the entryId and the start/end character offsets shown on the block it came from.
- Never invent entry ids or offsets.

Reply with a single JSON object and nothing else:
{\"answer\": string, \"citations\": [{\"entryId\": string, \"start\": number, \"end\": number}], \"confidence\": number between 0 and 1}";

/// Numbered context blocks followed by the question.
pub fn build_user_prompt(question: &str, blocks: &[ContextBlock]) -> String {
    let mut prompt = String::from("Context:\n");
    for block in blocks {
        // Writing to a String cannot fail.
        let _ = writeln!(
            prompt,
            "\n[{}] entryId={} start={} end={}\n{}",
            block.index, block.entry_id, block.start, block.end, block.text
        );
    }
    let _ = write!(prompt, "\nQuestion: {}", question.trim());
    prompt
}

#[derive(Deserialize)]
struct RawReply {
    answer: String,
    #[serde(default)]
    citations: Vec<CitedSpan>,
    #[serde(default)]
    confidence: f32,
}

/// Parse a synthesizer reply and keep only what the context supports.
///
/// Accepts the JSON object bare or inside a code fence. Citations must fall
/// within a context block of the same entry; others are dropped. Confidence
/// is clamped to `[0, 1]`.
///
/// # Errors
///
/// [`CairnError::Processing`] if no JSON object with an `answer` string can
/// be parsed.
pub fn parse_reply(raw: &str, blocks: &[ContextBlock]) -> Result<Answer> {
    let json = extract_json_object(raw)
        .ok_or_else(|| CairnError::Processing("synthesizer reply contains no JSON object".into()))?;
    let reply: RawReply = serde_json::from_str(json)
        .map_err(|e| CairnError::Processing(format!("malformed synthesizer reply: {e}")))?;

    let total = reply.citations.len();
    let citations: Vec<CitedSpan> = reply
        .citations
        .into_iter()
        .filter(|span| is_supported(span, blocks))
        .collect();
    if citations.len() < total {
        tracing::warn!(
            dropped = total - citations.len(),
            "synthesizer cited spans outside the retrieved context"
        );
    }

    let confidence = if reply.confidence.is_finite() {
        reply.confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };

    Ok(Answer {
        answer: reply.answer,
        citations,
        confidence,
    })
}

fn is_supported(span: &CitedSpan, blocks: &[ContextBlock]) -> bool {
    span.start < span.end
        && blocks.iter().any(|block| {
            block.entry_id == span.entry_id && block.start <= span.start && span.end <= block.end
        })
}

fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}
