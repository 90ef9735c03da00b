//! Confidence scoring for synthesized queries.

use crate::error::{Result, RetrievalError};

/// Weighted confidence: `clamp(w · similarity + agree · bonus, floor, 1)`.
///
/// With non-negative weights the score never decreases as similarity rises or
/// when the intent starts agreeing. A positive floor keeps any matched result
/// strictly above the zero reserved for "no matches".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidencePolicy {
    similarity_weight: f32,
    intent_bonus: f32,
    floor: f32,
}

impl ConfidencePolicy {
    pub fn new(similarity_weight: f32, intent_bonus: f32, floor: f32) -> Result<Self> {
        let finite_non_negative = |v: f32| v.is_finite() && v >= 0.0;
        if !finite_non_negative(similarity_weight) || !finite_non_negative(intent_bonus) {
            return Err(RetrievalError::Config(format!(
                "confidence weights must be finite and non-negative \
                 (similarity_weight={similarity_weight}, intent_bonus={intent_bonus})"
            )));
        }
        if floor.is_nan() || floor <= 0.0 || floor > 1.0 {
            return Err(RetrievalError::Config(format!(
                "confidence floor must be in (0, 1], got {floor}"
            )));
        }
        Ok(Self {
            similarity_weight,
            intent_bonus,
            floor,
        })
    }

    /// Score for a chosen candidate.
    pub fn score(&self, similarity: f32, intent_agrees: bool) -> f32 {
        let similarity = if similarity.is_nan() {
            0.0
        } else {
            similarity.clamp(0.0, 1.0)
        };
        let bonus = if intent_agrees { self.intent_bonus } else { 0.0 };
        (self.similarity_weight * similarity + bonus).clamp(self.floor, 1.0)
    }

    /// Score when retrieval found nothing.
    pub fn no_match(&self) -> f32 {
        0.0
    }
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            similarity_weight: 0.7,
            intent_bonus: 0.3,
            floor: 0.05,
        }
    }
}
