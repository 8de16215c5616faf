//! Candidate filters applied before MMR selection.

use chrono::{DateTime, Utc};

use super::types::CandidateChunk;

/// Optional constraints on candidates. Unset filters are skipped; the rest
/// compose with AND.
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    /// Keep chunks carrying any of these tags (case-insensitive). Empty means no tag filter.
    pub tags: Vec<String>,
    /// Inclusive lower bound on the entry's occurrence time.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the entry's occurrence time.
    pub to: Option<DateTime<Utc>>,
    pub min_importance: Option<f32>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.from.is_none() && self.to.is_none() && self.min_importance.is_none()
    }

    pub fn matches(&self, candidate: &CandidateChunk) -> bool {
        self.matches_tags(&candidate.chunk.tags)
            && self.from.map_or(true, |from| candidate.occurred_at >= from)
            && self.to.map_or(true, |to| candidate.occurred_at <= to)
            && self
                .min_importance
                .map_or(true, |floor| candidate.chunk.importance >= floor)
    }

    fn matches_tags(&self, tags: &[String]) -> bool {
        if self.tags.is_empty() {
            return true;
        }
        tags.iter().any(|tag| {
            self.tags
                .iter()
                .any(|wanted| wanted.to_lowercase() == tag.to_lowercase())
        })
    }
}

/// Keep the candidates that pass every configured filter, in input order.
pub fn apply_filters(candidates: Vec<CandidateChunk>, filters: &QueryFilters) -> Vec<CandidateChunk> {
    if filters.is_empty() {
        return candidates;
    }
    let before = candidates.len();
    let kept: Vec<CandidateChunk> = candidates.into_iter().filter(|c| filters.matches(c)).collect();
    tracing::debug!(before, after = kept.len(), "candidates filtered");
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::TextChunk;
    use chrono::TimeZone;

    fn candidate(id: &str, tags: &[&str], day: u32, importance: f32) -> CandidateChunk {
        CandidateChunk {
            chunk: TextChunk {
                id: id.into(),
                entry_id: format!("entry-{id}"),
                start_off: 0,
                end_off: 4,
                text: "text".into(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                importance,
            },
            occurred_at: Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap(),
            vector: None,
        }
    }

    fn ids(candidates: &[CandidateChunk]) -> Vec<&str> {
        candidates.iter().map(|c| c.chunk.id.as_str()).collect()
    }

    fn sample() -> Vec<CandidateChunk> {
        vec![
            candidate("a", &["Work"], 1, 0.2),
            candidate("b", &["family", "travel"], 5, 0.9),
            candidate("c", &[], 10, 0.6),
        ]
    }

    #[test]
    fn no_filters_keeps_everything() {
        assert_eq!(ids(&apply_filters(sample(), &QueryFilters::default())), vec!["a", "b", "c"]);
    }

    #[test]
    fn tag_filter_is_any_match_and_case_insensitive() {
        let filters = QueryFilters {
            tags: vec!["work".into(), "TRAVEL".into()],
            ..Default::default()
        };
        assert_eq!(ids(&apply_filters(sample(), &filters)), vec!["a", "b"]);
    }

    #[test]
    fn time_range_is_inclusive() {
        let filters = QueryFilters {
            from: Some(Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap()),
            to: Some(Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()),
            ..Default::default()
        };
        assert_eq!(ids(&apply_filters(sample(), &filters)), vec!["b", "c"]);
    }

    #[test]
    fn filters_compose_with_and() {
        let filters = QueryFilters {
            from: Some(Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()),
            min_importance: Some(0.7),
            ..Default::default()
        };
        assert_eq!(ids(&apply_filters(sample(), &filters)), vec!["b"]);
    }

    #[test]
    fn everything_filtered_is_empty_not_error() {
        let filters = QueryFilters {
            tags: vec!["nonexistent".into()],
            ..Default::default()
        };
        assert!(apply_filters(sample(), &filters).is_empty());
    }
}
