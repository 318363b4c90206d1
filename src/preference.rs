//! Multi-candidate preference selection.
//!
//! Given N (action, response) candidates that already carry a deterministic
//! reward and a critic assessment, pick the preferred index and report a
//! margin-derived confidence. Deterministic: ties inside epsilon always
//! resolve to the earlier index.

use crate::config::PreferenceConfig;
use crate::critic::CriticAssessment;
use crate::reward::RewardResult;
use crate::ScoringError;

use serde::{Deserialize, Serialize};

/// One candidate entering the comparison.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub reward: RewardResult,
    pub critic: CriticAssessment,
}

/// Outcome of a preference comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceDecision {
    /// Index into the candidate list. Always in range.
    pub chosen_index: usize,
    /// Effective score per candidate, in candidate order.
    pub scores: Vec<f64>,
    /// Margin-derived confidence in [0, 1].
    pub confidence: f64,
    pub reason: String,
}

/// Pick the preferred candidate.
///
/// The effective score combines the reward total and the critic confidence
/// under the configured weights. Confidence grows with the margin between
/// the top two effective scores (0.5 at a dead heat, capped at 1.0). An
/// empty candidate list is a caller bug and the one input error this
/// module reports.
pub fn prefer(
    candidates: &[ScoredCandidate],
    config: &PreferenceConfig,
) -> Result<PreferenceDecision, ScoringError> {
    if candidates.is_empty() {
        return Err(ScoringError::Engine(
            "preference selection requires at least one candidate".into(),
        ));
    }

    let scores: Vec<f64> = candidates
        .iter()
        .map(|candidate| {
            config.reward_weight * candidate.reward.total
                + config.critic_weight * candidate.critic.confidence
        })
        .collect();

    if scores.len() == 1 {
        return Ok(PreferenceDecision {
            chosen_index: 0,
            scores,
            confidence: 1.0,
            reason: "single candidate".into(),
        });
    }

    // Arg-max with earlier-index preference: a later candidate must beat the
    // incumbent by more than epsilon to take over.
    let mut chosen_index = 0;
    for (index, score) in scores.iter().enumerate().skip(1) {
        if *score > scores[chosen_index] + config.epsilon {
            chosen_index = index;
        }
    }

    let runner_up = scores
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != chosen_index)
        .map(|(_, score)| *score)
        .fold(f64::NEG_INFINITY, f64::max);
    let margin = (scores[chosen_index] - runner_up).max(0.0);
    let confidence = (0.5 + 2.0 * margin).min(1.0);

    Ok(PreferenceDecision {
        chosen_index,
        scores,
        confidence,
        reason: format!(
            "candidate {chosen_index} leads by {margin:.3} effective score"
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reward::{aggregate, RewardComponent};

    use std::collections::{BTreeMap, BTreeSet};

    fn candidate(total: f64, critic_confidence: f64) -> ScoredCandidate {
        let components =
            BTreeMap::from([("rubric".to_string(), RewardComponent::new(total))]);
        let weights = BTreeMap::from([("rubric".to_string(), 1.0)]);
        let mut critic = CriticAssessment::neutral_default("test");
        critic.confidence = critic_confidence;
        ScoredCandidate {
            reward: aggregate(components, &weights, BTreeSet::new()),
            critic,
        }
    }

    #[test]
    fn picks_stronger_candidate_with_confident_margin() {
        let candidates = [candidate(0.62, 0.5), candidate(0.78, 0.7)];

        let decision = prefer(&candidates, &PreferenceConfig::default()).unwrap();

        assert_eq!(decision.chosen_index, 1);
        assert!(decision.confidence >= 0.6, "confidence {}", decision.confidence);
        assert_eq!(decision.scores.len(), 2);
    }

    #[test]
    fn ties_resolve_to_earlier_index() {
        let candidates = [candidate(0.7, 0.6), candidate(0.7, 0.6), candidate(0.7, 0.6)];

        let decision = prefer(&candidates, &PreferenceConfig::default()).unwrap();

        assert_eq!(decision.chosen_index, 0);
        assert!((decision.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn single_candidate_is_trivially_chosen() {
        let decision =
            prefer(&[candidate(0.3, 0.2)], &PreferenceConfig::default()).unwrap();

        assert_eq!(decision.chosen_index, 0);
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn empty_list_is_an_error() {
        assert!(prefer(&[], &PreferenceConfig::default()).is_err());
    }

    #[test]
    fn confidence_caps_at_one() {
        let candidates = [candidate(0.0, 0.0), candidate(1.0, 1.0)];

        let decision = prefer(&candidates, &PreferenceConfig::default()).unwrap();

        assert_eq!(decision.chosen_index, 1);
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn chosen_index_always_in_range() {
        let candidates: Vec<ScoredCandidate> = (0..7)
            .map(|step| candidate(0.1 * step as f64, 0.5))
            .collect();

        let decision = prefer(&candidates, &PreferenceConfig::default()).unwrap();

        assert!(decision.chosen_index < candidates.len());
        assert_eq!(decision.chosen_index, 6);
    }
}
