//! Deterministic rule-based validator.
//!
//! Turns an [`Observation`] plus a generated response into a [`RewardResult`]
//! without any network call. Six independent axes: structural rubric, intent
//! register match, prerequisite gating, citation grounding, style, and an
//! optional stepwise rubric. Each axis scores in [0, 1] and raises its own
//! flag codes; aggregation renormalizes the configured weights over the
//! enabled axes. Fully deterministic, so every behavior is testable with
//! fixed inputs.

use crate::config::ValidatorConfig;
use crate::observation::Observation;
use crate::reward::{self, RewardComponent, RewardResult};

use regex::Regex;
use serde_json::json;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

// ---------------------------------------------------------------------------
// Marker vocabularies
// ---------------------------------------------------------------------------

/// Definitional phrasing that signals factual content.
const FACTUAL_MARKERS: &[&str] = &[" is ", " are ", " means ", " refers to ", " defined as "];

/// Phrases that introduce a worked example.
const EXAMPLE_MARKERS: &[&str] = &[
    "for example",
    "for instance",
    "e.g.",
    "consider ",
    "suppose ",
    "imagine ",
    "let's say",
];

/// Reasoning-connective language.
const REASONING_MARKERS: &[&str] = &[
    "because",
    "therefore",
    "since ",
    "so that",
    "which means",
    "as a result",
    "that's why",
];

/// Mechanism / process phrasing for the stepwise rubric.
const MECHANISM_MARKERS: &[&str] = &[
    "works by",
    "happens when",
    "first",
    "then",
    "next",
    "step",
    "process",
];

/// Softening phrases expected when the student is confused or frustrated.
const GENTLE_MARKERS: &[&str] = &[
    "let's",
    "step by step",
    "no worries",
    "don't worry",
    "it's okay",
    "that's okay",
    "together",
    "take it slow",
];

/// Feedback phrasing expected when responding to a student answer.
const FEEDBACK_MARKERS: &[&str] = &[
    "correct",
    "right",
    "well done",
    "exactly",
    "not quite",
    "almost",
    "close",
    "good try",
];

/// A closing check-for-understanding question.
static CHECK_QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(does (that|this) make sense|can you try|what do you think|your turn|how about you)",
    )
    .expect("check question regex is valid")
});

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Score a response against an observation across all enabled axes.
pub fn score_response(
    observation: &Observation,
    response: &str,
    config: &ValidatorConfig,
) -> RewardResult {
    let mut components: BTreeMap<String, RewardComponent> = BTreeMap::new();
    components.insert("rubric".into(), score_rubric(response));
    components.insert("intent".into(), score_intent(observation, response));
    components.insert("gating".into(), score_gating(observation, response, config));
    components.insert("grounding".into(), score_grounding(observation, config));
    components.insert("style".into(), score_style(response, config));

    if config.stepwise_enabled || config.stepwise_export_only {
        components.insert("stepwise_rubric".into(), score_stepwise(response));
    }

    // Threshold checks raise flags only; scores are never altered here.
    let thresholds: [(&str, f64); 6] = [
        ("rubric", config.thresholds.rubric),
        ("intent", config.thresholds.intent),
        ("gating", config.thresholds.gating),
        ("grounding", config.thresholds.grounding),
        ("style", config.thresholds.style),
        ("stepwise_rubric", config.thresholds.stepwise_rubric),
    ];
    let mut extra_flags = BTreeSet::new();
    for (axis, threshold) in thresholds {
        let Some(component) = components.get_mut(axis) else {
            continue;
        };
        if component.score < threshold {
            component.flag(format!("{axis}_below_threshold"));
            // Gating crossings surface on the top-level result regardless of
            // whether gating contributes to the weighted total.
            if axis == "gating" {
                extra_flags.insert("gating_below_threshold".to_string());
            }
        }
    }

    let mut weights = BTreeMap::from([
        ("rubric".to_string(), config.weights.rubric),
        ("intent".to_string(), config.weights.intent),
        ("gating".to_string(), config.weights.gating),
        ("grounding".to_string(), config.weights.grounding),
        ("style".to_string(), config.weights.style),
    ]);
    // Export-only stepwise emits step scores without feeding the total.
    let stepwise_weight = if config.stepwise_enabled {
        config.weights.stepwise_rubric
    } else {
        0.0
    };
    weights.insert("stepwise_rubric".to_string(), stepwise_weight);

    reward::aggregate(components, &weights, extra_flags)
}

// ---------------------------------------------------------------------------
// Rubric axis
// ---------------------------------------------------------------------------

/// Structural completeness: factual content, a worked example, a closing
/// check question, and reasoning-connective language. Full marks only when
/// all four are present; degraded proportionally otherwise.
fn score_rubric(response: &str) -> RewardComponent {
    let lowercased = format!(" {} ", response.to_lowercase());

    let has_factual = contains_any(&lowercased, FACTUAL_MARKERS);
    let has_example = contains_any(&lowercased, EXAMPLE_MARKERS);
    let has_reasoning = contains_any(&lowercased, REASONING_MARKERS);
    let has_check = has_check_question(response);

    let elements = [has_factual, has_example, has_check, has_reasoning];
    let present = elements.iter().filter(|flag| **flag).count();
    let score = present as f64 / elements.len() as f64;

    let mut component = RewardComponent::new(score).with_details(json!({
        "factual": has_factual,
        "example": has_example,
        "check_question": has_check,
        "reasoning": has_reasoning,
    }));
    if !has_example {
        component.flag("rubric_missing_example");
    }
    if !has_check {
        component.flag("rubric_missing_check");
    }
    component
}

/// A closing check question: either a recognized check phrase, or the final
/// sentence ends with a question mark.
fn has_check_question(response: &str) -> bool {
    if CHECK_QUESTION.is_match(response) {
        return true;
    }
    response
        .trim()
        .trim_end_matches(|character: char| character.is_whitespace())
        .ends_with('?')
}

// ---------------------------------------------------------------------------
// Intent axis
// ---------------------------------------------------------------------------

/// Register match against the classified intent and affect.
///
/// Expected markers depend on the dominant intent: questions and explanation
/// requests expect explanatory language, answers expect feedback phrasing.
/// A confused or frustrated affect additionally expects a gentler,
/// example-led tone; under those affects the gentle markers count as part
/// of the expected set.
fn score_intent(observation: &Observation, response: &str) -> RewardComponent {
    let lowercased = format!(" {} ", response.to_lowercase());

    let intent_markers_present = match observation.classifier.intent.as_str() {
        "answer" => contains_any(&lowercased, FEEDBACK_MARKERS),
        // question / explanation / anything else: explanatory register.
        _ => {
            contains_any(&lowercased, FACTUAL_MARKERS)
                || contains_any(&lowercased, REASONING_MARKERS)
        }
    };

    let needs_gentle = matches!(
        observation.classifier.affect.as_str(),
        "confused" | "frustrated"
    );
    let gentle_present = contains_any(&lowercased, GENTLE_MARKERS)
        || contains_any(&lowercased, EXAMPLE_MARKERS);

    let (score, mismatch) = if needs_gentle {
        match (intent_markers_present, gentle_present) {
            (true, true) => (0.9, false),
            (true, false) | (false, true) => (0.65, true),
            (false, false) => (0.4, true),
        }
    } else if intent_markers_present {
        (0.9, false)
    } else {
        (0.5, true)
    };

    let mut component = RewardComponent::new(score);
    if mismatch {
        component.flag("register_mismatch");
    }
    component
}

// ---------------------------------------------------------------------------
// Gating axis
// ---------------------------------------------------------------------------

/// Prerequisite safety: penalize concept terms beyond the student's current
/// position on the learning path.
fn score_gating(
    observation: &Observation,
    response: &str,
    config: &ValidatorConfig,
) -> RewardComponent {
    let lowercased = response.to_lowercase();

    // Everything up to and including the focus concept counts as reached.
    // When the focus concept is not on the path, fall back to the concept
    // level as a position.
    let path = &observation.tutor.learning_path;
    let focus_position = path
        .iter()
        .position(|concept| concept.eq_ignore_ascii_case(&observation.tutor.focus_concept))
        .unwrap_or_else(|| (observation.tutor.concept_level as usize).min(path.len()));
    let reached: BTreeSet<String> = path
        .iter()
        .take(focus_position + 1)
        .map(|concept| concept.to_lowercase())
        .collect();

    // Out-of-reach terms: the configured advanced vocabulary minus anything
    // already reached, plus path entries beyond the focus position.
    let mut drifted: Vec<String> = Vec::new();
    for term in &config.advanced_terms {
        let term_lower = term.to_lowercase();
        if !reached.contains(&term_lower) && lowercased.contains(&term_lower) {
            drifted.push(term_lower);
        }
    }
    for concept in path.iter().skip(focus_position + 1) {
        let concept_lower = concept.to_lowercase();
        if lowercased.contains(&concept_lower) && !drifted.contains(&concept_lower) {
            drifted.push(concept_lower);
        }
    }

    if drifted.is_empty() {
        return RewardComponent::new(1.0);
    }

    // One drifted term already lands below the 0.7 gating threshold.
    let score = (1.0 - 0.35 * drifted.len() as f64).max(0.15);
    RewardComponent::new(score)
        .with_flag("advanced_concept_drift")
        .with_details(json!({ "drifted_terms": drifted }))
}

// ---------------------------------------------------------------------------
// Grounding axis
// ---------------------------------------------------------------------------

/// Citation grounding: every id the action claims as a source must resolve
/// in the session's known chunk universe.
fn score_grounding(observation: &Observation, config: &ValidatorConfig) -> RewardComponent {
    let cited = &observation.action.source_chunk_ids;
    if cited.is_empty() {
        // Citing nothing is weaker than citing correctly, but nothing
        // failed to resolve, so it scores above the grounding threshold.
        return RewardComponent::new(0.8).with_flag("no_sources_cited");
    }

    let unknown: Vec<&String> = cited
        .iter()
        .filter(|id| !observation.known_chunk_ids.contains(*id))
        .collect();

    if unknown.is_empty() {
        return RewardComponent::new(1.0);
    }

    // Any unresolved id caps the score well below 0.6; partial resolution
    // recovers a little.
    let resolved_fraction = (cited.len() - unknown.len()) as f64 / cited.len() as f64;
    let score = 0.2 + 0.35 * resolved_fraction;

    let mut component = RewardComponent::new(score)
        .with_flag("unknown_grounding_ids")
        .with_details(json!({ "unknown_ids": unknown }));
    if component.score < config.thresholds.grounding {
        component.flag("grounding_low");
    }
    component
}

// ---------------------------------------------------------------------------
// Style axis
// ---------------------------------------------------------------------------

/// Word-count band plus banned-phrase screening.
fn score_style(response: &str, config: &ValidatorConfig) -> RewardComponent {
    let lowercased = response.to_lowercase();
    let word_count = response.split_whitespace().count();

    let mut score: f64 = 1.0;
    let mut component = RewardComponent::new(1.0);

    if word_count < config.min_words {
        score = 0.55;
        component.flag("too_short");
    } else if word_count > config.max_words {
        score = 0.55;
        component.flag("too_long");
    }

    for phrase in &config.banned_phrases {
        if lowercased.contains(&phrase.to_lowercase()) {
            score -= 0.4;
            component.flag("banned_phrase");
        }
    }

    component.score = score.clamp(0.0, 1.0);
    component.details = Some(json!({ "word_count": word_count }));
    component
}

// ---------------------------------------------------------------------------
// Stepwise rubric axis
// ---------------------------------------------------------------------------

/// Stage-progression decomposition of a multi-step explanation.
///
/// Produces one score per expected stage (definition → mechanism → example →
/// check) plus one per sentence, so a well-formed three-sentence explanation
/// always yields at least six step scores under `details.step_scores`.
fn score_stepwise(response: &str) -> RewardComponent {
    let lowercased = format!(" {} ", response.to_lowercase());

    let sentences: Vec<&str> = response
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
        .collect();

    let stage_scores = [
        if contains_any(&lowercased, FACTUAL_MARKERS) { 1.0 } else { 0.0 },
        if contains_any(&lowercased, MECHANISM_MARKERS) { 1.0 } else { 0.0 },
        if contains_any(&lowercased, EXAMPLE_MARKERS) { 1.0 } else { 0.0 },
        if has_check_question(response) { 1.0 } else { 0.0 },
    ];

    let mut step_scores: Vec<f64> = stage_scores.to_vec();
    for sentence in &sentences {
        let padded = format!(" {} ", sentence.to_lowercase());
        let matches_stage = contains_any(&padded, FACTUAL_MARKERS)
            || contains_any(&padded, MECHANISM_MARKERS)
            || contains_any(&padded, EXAMPLE_MARKERS)
            || CHECK_QUESTION.is_match(sentence);
        let sentence_score = if matches_stage {
            1.0
        } else if sentence.split_whitespace().count() > 3 {
            0.5
        } else {
            0.2
        };
        step_scores.push(sentence_score);
    }

    let score = if step_scores.is_empty() {
        0.0
    } else {
        step_scores.iter().sum::<f64>() / step_scores.len() as f64
    };

    let mut component =
        RewardComponent::new(score).with_details(json!({ "step_scores": step_scores }));
    if sentences.len() < 3 {
        component.flag("stepwise_too_few_sentences");
    }
    component
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| haystack.contains(marker))
}
