//! Token-budget packing of selected chunks.

use crate::chunking::TokenEstimator;

use super::types::RankedChunk;

#[derive(Debug, Clone, Copy)]
pub struct PackOptions {
    pub max_tokens: usize,
    /// Truncated snippets smaller than this are dropped instead of packed.
    pub min_snippet_tokens: usize,
}

/// A chunk (or a prefix of one) admitted into the context.
#[derive(Debug, Clone)]
pub struct PackedSnippet {
    pub item: RankedChunk,
    pub text: String,
    /// Entry-relative character offsets of `text`.
    pub start: usize,
    pub end: usize,
    pub tokens: usize,
    pub truncated: bool,
}

/// Greedily pack `items` by score (descending) into `max_tokens`.
///
/// An item that does not fit is cut back to the nearest sentence boundary,
/// else word boundary, else hard character cut, as long as the remainder
/// reaches `min_snippet_tokens`. The total never exceeds `max_tokens` unless
/// the very first item cannot be cut small enough; it is then packed alone
/// as its first word.
pub fn pack_to_budget(
    mut items: Vec<RankedChunk>,
    options: &PackOptions,
    estimator: &dyn TokenEstimator,
) -> Vec<PackedSnippet> {
    items.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut used = 0;
    let mut packed: Vec<PackedSnippet> = Vec::new();

    for item in items {
        let remaining = options.max_tokens.saturating_sub(used);
        let first = packed.is_empty();
        if remaining == 0 && !first {
            break;
        }

        let tokens = estimator.count(&item.chunk.text);
        if tokens <= remaining {
            used += tokens;
            packed.push(snippet(item, None, tokens));
            continue;
        }

        // The size floor only protects later snippets; the best match is
        // always worth keeping.
        let floor = if first { 0 } else { options.min_snippet_tokens };
        let prefix = truncate_to_budget(&item.chunk.text, remaining, floor, estimator)
            .or_else(|| first.then(|| first_word(&item.chunk.text)))
            .map(str::to_string);

        match prefix {
            Some(prefix) => {
                let prefix_tokens = estimator.count(&prefix);
                used += prefix_tokens;
                tracing::debug!(
                    chunk_id = %item.chunk.id,
                    from = tokens,
                    to = prefix_tokens,
                    "snippet truncated to fit budget"
                );
                packed.push(snippet(item, Some(prefix), prefix_tokens));
            }
            None => {
                tracing::debug!(chunk_id = %item.chunk.id, remaining, "snippet dropped, too small after truncation");
            }
        }
    }

    packed
}

fn snippet(item: RankedChunk, prefix: Option<String>, tokens: usize) -> PackedSnippet {
    let truncated = prefix.is_some();
    let text = prefix.unwrap_or_else(|| item.chunk.text.clone());
    let start = item.chunk.start_off;
    let end = start + text.chars().count();
    PackedSnippet {
        item,
        text,
        start,
        end,
        tokens,
        truncated,
    }
}

/// Cut `text` to at most `max_tokens`, preferring a sentence boundary, then
/// a word boundary, then a hard cut. `None` if every option is empty or
/// below `min_tokens`.
pub fn truncate_to_budget<'a>(
    text: &'a str,
    max_tokens: usize,
    min_tokens: usize,
    estimator: &dyn TokenEstimator,
) -> Option<&'a str> {
    let limit = longest_fitting_prefix(text, max_tokens, estimator);
    if limit == text.len() {
        return Some(text);
    }

    let window = &text[..limit];
    let continues_with_space =
        |at: usize| text[at..].chars().next().map_or(true, char::is_whitespace);

    let sentence_cut = window
        .char_indices()
        .filter(|&(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .filter(|&end| continues_with_space(end))
        .last();
    let word_cut = if continues_with_space(limit) {
        Some(limit)
    } else {
        window.rfind(char::is_whitespace)
    };

    [sentence_cut, word_cut, Some(limit)]
        .into_iter()
        .flatten()
        .map(|cut| text[..cut].trim_end())
        .find(|prefix| !prefix.is_empty() && estimator.count(prefix) >= min_tokens)
}

/// Byte length of the longest prefix (on a char boundary) within `max_tokens`.
fn longest_fitting_prefix(text: &str, max_tokens: usize, estimator: &dyn TokenEstimator) -> usize {
    let ends: Vec<usize> = text
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .collect();
    let fitting = ends.partition_point(|&end| estimator.count(&text[..end]) <= max_tokens);
    if fitting == 0 {
        0
    } else {
        ends[fitting - 1]
    }
}

fn first_word(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or(text)
}
