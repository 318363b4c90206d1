//! Mastery delta computation.
//!
//! Per (user, concept) there is exactly one mastery state, transitioned by
//! each interaction. This module is the pure half: it folds interaction
//! signals into a bounded delta plus an independently-computed confidence.
//! Persistence lives in [`crate::store`].

use crate::config::MasteryConfig;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Signal codes
// ---------------------------------------------------------------------------

pub const CODE_ENGAGED: &str = "engaged";
pub const CODE_CONFUSED: &str = "confused";
pub const CODE_FRUSTRATED: &str = "frustrated";
pub const CODE_CORRECT_ANSWER: &str = "correct_answer";
pub const CODE_INCORRECT_ANSWER: &str = "incorrect_answer";
pub const CODE_QUALITY_EXPLANATION: &str = "quality_explanation";
pub const CODE_NO_SIGNAL: &str = "no_signal";

/// True when the comma-joined reason string carries the given code.
///
/// Exact code membership, not substring search: `incorrect_answer`
/// must not match `correct_answer`.
pub fn reason_has_code(reason: &str, code: &str) -> bool {
    reason.split(',').any(|entry| entry.trim() == code)
}

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// Interaction signals extracted from one turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasterySignals {
    /// Affect label from the classifier ("engaged", "confused", "frustrated",
    /// anything else is treated as neutral).
    pub affect: Option<String>,
    /// Intent label from the classifier.
    pub intent: Option<String>,
    /// Explicit correctness signal, present only when the turn contained a
    /// gradable answer.
    pub answer_correct: Option<bool>,
    /// Quality score of a student explanation, when the intent was
    /// "explanation".
    pub explanation_quality: Option<f64>,
    /// Classifier confidence, used only for the confidence computation.
    pub classifier_confidence: Option<f64>,
}

/// One bounded mastery transition, ready to apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasteryUpdate {
    pub concept: String,
    /// Bounded delta; exactly 0.0 means "no effective update".
    pub delta: f64,
    /// Comma-joined signal codes, or `no_signal`.
    pub reason: String,
    /// Confidence in the update, in [0, 1].
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl MasteryUpdate {
    /// Whether applying this update should write to the store at all.
    pub fn is_effective(&self) -> bool {
        self.delta != 0.0
    }
}

// ---------------------------------------------------------------------------
// Transition function
// ---------------------------------------------------------------------------

/// Fold one turn's signals into a bounded mastery delta.
///
/// Transition order: affect, answer correctness, explanation quality, then
/// high-mastery decay, learning rate, clamp, and the dead-zone snap to zero.
pub fn compute_mastery_delta(
    concept: &str,
    signals: &MasterySignals,
    current_mastery: f64,
    config: &MasteryConfig,
) -> MasteryUpdate {
    let mut delta: f64 = 0.0;
    let mut reasons: Vec<&str> = Vec::new();

    match signals.affect.as_deref() {
        Some(CODE_ENGAGED) => {
            delta += 0.1;
            reasons.push(CODE_ENGAGED);
        }
        Some(CODE_CONFUSED) => {
            delta -= 0.05;
            reasons.push(CODE_CONFUSED);
        }
        Some(CODE_FRUSTRATED) => {
            delta -= 0.05;
            reasons.push(CODE_FRUSTRATED);
        }
        _ => {}
    }

    if signals.intent.as_deref() == Some("answer") {
        match signals.answer_correct {
            Some(true) => {
                delta += 0.15;
                reasons.push(CODE_CORRECT_ANSWER);
            }
            Some(false) => {
                delta -= 0.10;
                reasons.push(CODE_INCORRECT_ANSWER);
            }
            None => {}
        }
    }

    if signals.intent.as_deref() == Some("explanation") {
        if let Some(quality) = signals.explanation_quality {
            if quality > 0.7 {
                delta += 0.20;
                reasons.push(CODE_QUALITY_EXPLANATION);
            }
        }
    }

    // Gains get harder near ceiling.
    if current_mastery > config.decay_above {
        delta *= config.decay_factor;
    }

    delta *= config.learning_rate;
    delta = delta.clamp(-config.max_update, config.max_update);

    // Dead zone: tiny nudges are treated as no update at all.
    if delta.abs() < config.min_update {
        delta = 0.0;
    }

    let reason = if reasons.is_empty() {
        CODE_NO_SIGNAL.to_string()
    } else {
        reasons.join(",")
    };

    MasteryUpdate {
        concept: concept.to_owned(),
        delta,
        reason,
        confidence: compute_confidence(signals),
        timestamp: Utc::now(),
    }
}

/// Confidence in the update, independent of the delta itself.
fn compute_confidence(signals: &MasterySignals) -> f64 {
    let mut confidence: f64 = 0.5;

    if signals.answer_correct.is_some() {
        confidence += 0.3;
    }
    if matches!(
        signals.affect.as_deref(),
        Some(CODE_ENGAGED) | Some(CODE_CONFUSED) | Some(CODE_FRUSTRATED)
    ) {
        confidence += 0.1;
    }
    if signals.classifier_confidence.unwrap_or(0.0) > 0.8 {
        confidence += 0.1;
    }

    confidence.min(1.0)
}
