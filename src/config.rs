//! Scoring system configuration.
//!
//! One `ScoringConfig` is constructed at process start and passed down into
//! every component. Scoring functions never read ambient environment state;
//! every tunable (axis weights, thresholds, marker vocabularies, learning
//! rate constants) is enumerated here with a sensible default.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the scoring engine.
///
/// Serde-derived so the host can load it from its own config file; all
/// fields default to the values the system ships with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ScoringConfig {
    pub snapshot: SnapshotConfig,
    pub validator: ValidatorConfig,
    pub critic: CriticConfig,
    pub critique: CritiqueConfig,
    pub preference: PreferenceConfig,
    pub mastery: MasteryConfig,
}

// ---------------------------------------------------------------------------
// Snapshot builder
// ---------------------------------------------------------------------------

/// Controls for the observation snapshot builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct SnapshotConfig {
    /// Whether chunk snippet text is carried into the observation.
    pub include_snippets: bool,
    /// Character budget for a single snippet when snippets are enabled.
    pub snippet_char_budget: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            include_snippets: false,
            snippet_char_budget: 320,
        }
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Per-axis weights used when aggregating the deterministic reward.
///
/// Weights are renormalized to sum to 1 over the enabled axes at aggregation
/// time, so these values only need to be proportional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct AxisWeights {
    pub stepwise_rubric: f64,
    pub rubric: f64,
    pub intent: f64,
    pub gating: f64,
    pub grounding: f64,
    pub style: f64,
}

impl Default for AxisWeights {
    fn default() -> Self {
        Self {
            stepwise_rubric: 0.0,
            rubric: 0.4,
            intent: 0.2,
            gating: 0.2,
            grounding: 0.15,
            style: 0.05,
        }
    }
}

/// Per-axis thresholds.
///
/// A threshold only decides whether the axis raises its
/// `<axis>_below_threshold` flag; it never alters the score itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct AxisThresholds {
    pub stepwise_rubric: f64,
    pub rubric: f64,
    pub intent: f64,
    pub gating: f64,
    pub grounding: f64,
    pub style: f64,
}

impl Default for AxisThresholds {
    fn default() -> Self {
        Self {
            stepwise_rubric: 0.6,
            rubric: 0.6,
            intent: 0.6,
            gating: 0.7,
            grounding: 0.65,
            style: 0.5,
        }
    }
}

/// Configuration for the deterministic validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ValidatorConfig {
    pub weights: AxisWeights,
    pub thresholds: AxisThresholds,
    /// Whether the stepwise rubric contributes to the weighted total.
    pub stepwise_enabled: bool,
    /// Emit stepwise step scores for offline collection even when the axis
    /// does not feed the total.
    pub stepwise_export_only: bool,
    /// Lower bound of the acceptable response word count.
    pub min_words: usize,
    /// Upper bound of the acceptable response word count.
    pub max_words: usize,
    /// Phrases that immediately degrade the style score (meta-commentary
    /// about being an AI, refusal boilerplate).
    pub banned_phrases: Vec<String>,
    /// Vocabulary of advanced concept terms the gating axis screens for.
    /// A term is out of reach when it has not yet been passed on the
    /// student's learning path.
    pub advanced_terms: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            weights: AxisWeights::default(),
            thresholds: AxisThresholds::default(),
            stepwise_enabled: false,
            stepwise_export_only: false,
            min_words: 30,
            max_words: 220,
            banned_phrases: vec![
                "as an ai".into(),
                "as a language model".into(),
                "i am just a".into(),
                "i cannot help".into(),
                "my training data".into(),
            ],
            advanced_terms: vec![
                "eigenvalue".into(),
                "fourier transform".into(),
                "backpropagation".into(),
                "stochastic gradient".into(),
                "convolution".into(),
                "regularization".into(),
                "tensor".into(),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Judges
// ---------------------------------------------------------------------------

/// Configuration for the LLM critic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct CriticConfig {
    /// Millisecond budget for the judge call before the neutral default
    /// is used instead.
    pub budget_ms: u64,
}

impl Default for CriticConfig {
    fn default() -> Self {
        Self { budget_ms: 8000 }
    }
}

/// Configuration for the pre-emission self-critique pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct CritiqueConfig {
    /// Millisecond budget for the judge call before the safe default is used.
    pub budget_ms: u64,
}

impl Default for CritiqueConfig {
    fn default() -> Self {
        Self { budget_ms: 8000 }
    }
}

// ---------------------------------------------------------------------------
// Preference selection
// ---------------------------------------------------------------------------

/// Configuration for multi-candidate preference selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct PreferenceConfig {
    /// Weight of the deterministic reward total in the effective score.
    pub reward_weight: f64,
    /// Weight of the critic confidence in the effective score.
    pub critic_weight: f64,
    /// Candidates within this distance of each other are treated as tied,
    /// and the earlier index wins.
    pub epsilon: f64,
}

impl Default for PreferenceConfig {
    fn default() -> Self {
        Self {
            reward_weight: 0.7,
            critic_weight: 0.3,
            epsilon: 1e-6,
        }
    }
}

// ---------------------------------------------------------------------------
// Mastery
// ---------------------------------------------------------------------------

/// Constants for the mastery delta state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct MasteryConfig {
    /// Multiplier applied to the accumulated raw delta.
    pub learning_rate: f64,
    /// Multiplier applied before the learning rate when current mastery is
    /// above `decay_above`; gains get harder near ceiling.
    pub decay_factor: f64,
    /// Mastery level above which the decay factor kicks in.
    pub decay_above: f64,
    /// Hard bound on a single update's magnitude.
    pub max_update: f64,
    /// Deltas below this magnitude snap to exactly zero and skip the write.
    pub min_update: f64,
}

impl Default for MasteryConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            decay_factor: 0.95,
            decay_above: 0.7,
            max_update: 0.3,
            min_update: 0.05,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_match_shipped_values() {
        let config = ScoringConfig::default();
        assert_eq!(config.validator.weights.rubric, 0.4);
        assert_eq!(config.validator.weights.stepwise_rubric, 0.0);
        assert_eq!(config.validator.thresholds.gating, 0.7);
        assert_eq!(config.mastery.max_update, 0.3);
    }

    #[test]
    fn config_round_trips_through_serde() {
        let config = ScoringConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: ScoringConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.validator.min_words, config.validator.min_words);
        assert_eq!(restored.preference.reward_weight, 0.7);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let parsed: ScoringConfig =
            serde_json::from_str(r#"{"mastery": {"learning_rate": 0.2}}"#).unwrap();
        assert_eq!(parsed.mastery.learning_rate, 0.2);
        assert_eq!(parsed.mastery.decay_factor, 0.95);
        assert_eq!(parsed.validator.max_words, 220);
    }
}
