//! Sentence-aware splitting with word overlap.
//!
//! All scanning happens on byte spans so slicing stays cheap; offsets are
//! converted to character positions only when chunks are emitted.

use super::tokens::TokenEstimator;

/// A chunk of source text, addressed by character offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Half-open byte range into the source text.
type Span = (usize, usize);

/// Split `text` into chunks of at most `target_tokens` (as counted by
/// `estimator`), each seeded with up to `overlap_tokens` of trailing words
/// from its predecessor.
///
/// The only chunks that can exceed the target are single characters that
/// the estimator already counts above it.
pub fn chunk_text_with(
    text: &str,
    target_tokens: usize,
    overlap_tokens: usize,
    estimator: &dyn TokenEstimator,
) -> Vec<Chunk> {
    let target = target_tokens.max(1);
    let fits = |span: Span| estimator.count(&text[span.0..span.1]) <= target;

    let mut units = Vec::new();
    for sentence in sentence_spans(text) {
        if fits(sentence) {
            units.push(sentence);
        } else {
            units.extend(word_pieces(text, sentence, target, estimator));
        }
    }

    let mut spans: Vec<Span> = Vec::new();
    let mut current: Option<Span> = None;
    for unit in units {
        current = Some(match current {
            None => unit,
            Some((start, _)) if fits((start, unit.1)) => (start, unit.1),
            Some(closed) => {
                spans.push(closed);
                let seed = overlap_start(text, closed, unit, target, overlap_tokens, estimator);
                (seed.unwrap_or(unit.0), unit.1)
            }
        });
    }
    spans.extend(current);

    let index = CharIndex::new(text);
    spans
        .into_iter()
        .map(|(start, end)| Chunk {
            start: index.char_offset(start),
            end: index.char_offset(end),
            text: text[start..end].to_string(),
        })
        .collect()
}

/// Sentence spans, tight (no surrounding whitespace).
///
/// A sentence ends after a run of `.`, `!` or `?` that is followed by
/// whitespace or the end of the text. Text with no terminator is a single
/// sentence.
pub(crate) fn sentence_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !is_terminator(c) {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if !is_terminator(next) {
                break;
            }
            end = j + next.len_utf8();
            chars.next();
        }
        let at_boundary = chars.peek().map_or(true, |&(_, next)| next.is_whitespace());
        if at_boundary {
            spans.extend(tighten(text, (start, end)));
            start = end;
        }
    }
    spans.extend(tighten(text, (start, text.len())));
    spans
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Shrink a span to exclude leading and trailing whitespace. `None` when
/// nothing but whitespace remains.
fn tighten(text: &str, (start, end): Span) -> Option<Span> {
    let slice = &text[start..end];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lead = slice.len() - slice.trim_start().len();
    Some((start + lead, start + lead + trimmed.len()))
}

/// Whitespace-delimited words inside `span`.
fn word_spans(text: &str, (start, end): Span) -> Vec<Span> {
    let mut words = Vec::new();
    let mut word_start: Option<usize> = None;
    for (off, c) in text[start..end].char_indices() {
        let i = start + off;
        match (c.is_whitespace(), word_start) {
            (true, Some(ws)) => {
                words.push((ws, i));
                word_start = None;
            }
            (false, None) => word_start = Some(i),
            _ => {}
        }
    }
    if let Some(ws) = word_start {
        words.push((ws, end));
    }
    words
}

/// Break an oversized sentence into word groups that each fit the target.
fn word_pieces(text: &str, sentence: Span, target: usize, estimator: &dyn TokenEstimator) -> Vec<Span> {
    let mut pieces = Vec::new();
    let mut current: Option<Span> = None;

    for word in word_spans(text, sentence) {
        if estimator.count(&text[word.0..word.1]) > target {
            pieces.extend(current.take());
            pieces.extend(hard_cut(text, word, target, estimator));
            continue;
        }
        current = Some(match current {
            None => word,
            Some((start, _)) if estimator.count(&text[start..word.1]) <= target => (start, word.1),
            Some(closed) => {
                pieces.push(closed);
                word
            }
        });
    }
    pieces.extend(current);
    pieces
}

/// Cut a single oversized word at character boundaries. Every piece holds at
/// least one character.
fn hard_cut(text: &str, (start, end): Span, target: usize, estimator: &dyn TokenEstimator) -> Vec<Span> {
    let mut pieces = Vec::new();
    let mut piece_start = start;
    for (off, c) in text[start..end].char_indices() {
        let i = start + off;
        let next = i + c.len_utf8();
        if i > piece_start && estimator.count(&text[piece_start..next]) > target {
            pieces.push((piece_start, i));
            piece_start = i;
        }
    }
    if piece_start < end {
        pieces.push((piece_start, end));
    }
    pieces
}

/// Where the chunk following `closed` should begin so that it repeats up to
/// `overlap` tokens of trailing words without pushing `next` over the target.
fn overlap_start(
    text: &str,
    closed: Span,
    next: Span,
    target: usize,
    overlap: usize,
    estimator: &dyn TokenEstimator,
) -> Option<usize> {
    if overlap == 0 {
        return None;
    }
    let mut seed = None;
    for (word_start, _) in word_spans(text, closed).into_iter().rev() {
        if estimator.count(&text[word_start..closed.1]) > overlap
            || estimator.count(&text[word_start..next.1]) > target
        {
            break;
        }
        seed = Some(word_start);
    }
    seed
}

/// Byte-to-character offset lookup.
pub(crate) struct CharIndex {
    boundaries: Vec<usize>,
    len: usize,
}

impl CharIndex {
    pub(crate) fn new(text: &str) -> Self {
        Self {
            boundaries: text.char_indices().map(|(i, _)| i).collect(),
            len: text.len(),
        }
    }

    /// Character position of a byte offset that lies on a char boundary.
    pub(crate) fn char_offset(&self, byte: usize) -> usize {
        if byte >= self.len {
            return self.boundaries.len();
        }
        self.boundaries.partition_point(|&b| b < byte)
    }
}
