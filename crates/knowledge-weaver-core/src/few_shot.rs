//! Few-shot example selection for active learning.
//!
//! Given prior corrections already scored against new input, keep the ones
//! similar enough to be useful and return the closest first.

use std::cmp::Ordering;

use crate::models::CorrectionEvent;

/// A correction paired with its similarity to the text being analyzed.
#[derive(Debug, Clone)]
pub struct ScoredCorrection {
    pub event: CorrectionEvent,
    pub score: f32,
}

/// Keep corrections scoring strictly above `floor`, most similar first,
/// at most `max_examples`. Ties go to the more recent correction.
pub fn select_examples(
    mut scored: Vec<ScoredCorrection>,
    floor: f32,
    max_examples: usize,
) -> Vec<CorrectionEvent> {
    scored.retain(|s| s.score > floor);
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(b.event.timestamp.cmp(&a.event.timestamp))
    });
    scored
        .into_iter()
        .take(max_examples)
        .map(|s| s.event)
        .collect()
}
