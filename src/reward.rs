//! Reward artifacts: per-axis components and the aggregated result.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use std::collections::{BTreeMap, BTreeSet};

/// One axis's verdict over a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardComponent {
    /// Axis score, always clamped to [0, 1].
    pub score: f64,
    /// Flag codes raised by this axis.
    pub flags: BTreeSet<String>,
    /// Axis-specific structured evidence (e.g. per-step sub-scores).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl RewardComponent {
    pub fn new(score: f64) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
            flags: BTreeSet::new(),
            details: None,
        }
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into());
        self
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }

    /// Raise a flag on an already-built component.
    pub fn flag(&mut self, flag: impl Into<String>) {
        self.flags.insert(flag.into());
    }
}

/// Aggregate reward over all scored axes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardResult {
    /// Axis name → component verdict.
    pub components: BTreeMap<String, RewardComponent>,
    /// Weighted sum of component scores under the renormalized weights.
    pub total: f64,
    /// Union of all component flags plus any threshold-crossing flags
    /// raised at aggregation time.
    pub flags: BTreeSet<String>,
    /// The renormalized weights that produced `total`. Axes with zero
    /// weight do not appear here even when their component does.
    pub weights_used: BTreeMap<String, f64>,
}

/// Combine per-axis components into a [`RewardResult`].
///
/// `weights` maps axis name → raw weight. Only axes that are present in
/// `components` with a positive weight contribute; their weights are
/// renormalized to sum to 1 so `total` is a convex combination of the
/// contributing scores. The total is always recomputed here from the
/// weights passed in; it is never cached apart from its components.
pub fn aggregate(
    components: BTreeMap<String, RewardComponent>,
    weights: &BTreeMap<String, f64>,
    extra_flags: BTreeSet<String>,
) -> RewardResult {
    let weight_sum: f64 = components
        .keys()
        .filter_map(|axis| weights.get(axis))
        .filter(|weight| **weight > 0.0)
        .sum();

    let mut total = 0.0;
    let mut weights_used = BTreeMap::new();
    if weight_sum > f64::EPSILON {
        for (axis, component) in &components {
            let Some(weight) = weights.get(axis).copied().filter(|w| *w > 0.0) else {
                continue;
            };
            let normalized = weight / weight_sum;
            total += normalized * component.score;
            weights_used.insert(axis.clone(), normalized);
        }
    }

    let mut flags = extra_flags;
    for component in components.values() {
        flags.extend(component.flags.iter().cloned());
    }

    RewardResult {
        components,
        total: total.clamp(0.0, 1.0),
        flags,
        weights_used,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn components_of(pairs: &[(&str, f64)]) -> BTreeMap<String, RewardComponent> {
        pairs
            .iter()
            .map(|(axis, score)| (axis.to_string(), RewardComponent::new(*score)))
            .collect()
    }

    #[test]
    fn component_score_is_clamped() {
        assert_eq!(RewardComponent::new(1.7).score, 1.0);
        assert_eq!(RewardComponent::new(-0.3).score, 0.0);
    }

    #[test]
    fn weights_renormalize_to_one() {
        let components = components_of(&[("rubric", 0.5), ("style", 1.0)]);
        let weights = BTreeMap::from([("rubric".to_string(), 0.4), ("style".to_string(), 0.1)]);

        let result = aggregate(components, &weights, BTreeSet::new());

        let used_sum: f64 = result.weights_used.values().sum();
        assert!((used_sum - 1.0).abs() < 1e-9);
        // 0.8 * 0.5 + 0.2 * 1.0
        assert!((result.total - 0.6).abs() < 1e-9);
    }

    #[test]
    fn total_is_convex_combination() {
        let components = components_of(&[("a", 0.2), ("b", 0.9), ("c", 0.55)]);
        let weights = BTreeMap::from([
            ("a".to_string(), 1.0),
            ("b".to_string(), 2.0),
            ("c".to_string(), 3.0),
        ]);

        let result = aggregate(components, &weights, BTreeSet::new());

        assert!(result.total >= 0.2 && result.total <= 0.9);
    }

    #[test]
    fn zero_weight_axis_is_kept_but_excluded_from_total() {
        let components = components_of(&[("rubric", 1.0), ("stepwise_rubric", 0.0)]);
        let weights = BTreeMap::from([
            ("rubric".to_string(), 0.4),
            ("stepwise_rubric".to_string(), 0.0),
        ]);

        let result = aggregate(components, &weights, BTreeSet::new());

        assert!(result.components.contains_key("stepwise_rubric"));
        assert!(!result.weights_used.contains_key("stepwise_rubric"));
        assert!((result.total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn flags_union_components_and_extras() {
        let mut components = components_of(&[("gating", 0.5)]);
        components
            .get_mut("gating")
            .unwrap()
            .flag("advanced_concept_drift");
        let weights = BTreeMap::from([("gating".to_string(), 1.0)]);
        let extra = BTreeSet::from(["gating_below_threshold".to_string()]);

        let result = aggregate(components, &weights, extra);

        assert!(result.flags.contains("advanced_concept_drift"));
        assert!(result.flags.contains("gating_below_threshold"));
    }

    #[test]
    fn empty_weight_sum_yields_zero_total() {
        let components = components_of(&[("rubric", 0.9)]);
        let weights = BTreeMap::new();

        let result = aggregate(components, &weights, BTreeSet::new());

        assert_eq!(result.total, 0.0);
        assert!(result.weights_used.is_empty());
    }
}
