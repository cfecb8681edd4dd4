use crate::models::{Criterion, EvaluationScore};

/// Weighted final score: each rubric criterion contributes `score * weight / 100`,
/// missing scores contribute nothing and stray scores are ignored. No clamping.
pub fn compute_final_score(scores: &[EvaluationScore], criteria: &[Criterion]) -> f64 {
    criteria
        .iter()
        .map(|criterion| {
            scores
                .iter()
                .find(|s| s.criterion_id == criterion.id)
                .map_or(0.0, |s| s.score * (criterion.weight / 100.0))
        })
        .sum()
}

/// A draft is complete once every rubric criterion has a positive score.
pub fn is_complete(scores: &[EvaluationScore], criteria: &[Criterion]) -> bool {
    !criteria.is_empty()
        && criteria.iter().all(|criterion| {
            scores
                .iter()
                .any(|s| s.criterion_id == criterion.id && s.score > 0.0)
        })
}

/// Arithmetic mean of `values`, or 0.0 when there are none.
pub fn average(values: impl IntoIterator<Item = f64>) -> f64 {
    let (total, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(total, count), v| (total + v, count + 1));
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}
