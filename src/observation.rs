//! Immutable snapshot of one tutoring turn.
//!
//! The snapshot builder folds classifier output, retrieval payloads, session
//! state, and the chosen action into a single [`Observation`] that every
//! scorer consumes read-only. There is no judgment logic here, only
//! defensive data shaping over the loosely-typed payloads upstream
//! collaborators hand us. Building is pure and deterministic: identical
//! inputs always produce structurally identical observations.

use crate::config::SnapshotConfig;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// Sub-structures
// ---------------------------------------------------------------------------

/// Output of the upstream message classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierOutput {
    /// Dominant intent label (e.g. "question", "answer", "explanation").
    pub intent: String,
    /// Affect label (e.g. "engaged", "confused", "frustrated", "neutral").
    pub affect: String,
    /// Concept the classifier attributed the message to, if any.
    pub concept: Option<String>,
    /// Classifier confidence in [0, 1], when it reported one.
    pub confidence: Option<f64>,
    /// Whether the classifier requested human escalation.
    pub escalate: bool,
}

/// The tutor's view of where the student is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TutorContext {
    /// Concept currently in focus.
    pub focus_concept: String,
    /// Zero-based difficulty level of the focus concept.
    pub concept_level: u32,
    /// Concept inferred from the conversation, when it diverges from focus.
    pub inferred_concept: Option<String>,
    /// Ordered learning path the student is working through.
    pub learning_path: Vec<String>,
    /// Mastery snapshot for the focus concept at turn start.
    pub mastery_snapshot: Option<f64>,
}

/// One retrieval chunk as carried inside the observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub id: String,
    pub pedagogy_role: Option<String>,
    pub page: Option<i64>,
    pub similarity: Option<f64>,
    pub bm25: Option<f64>,
    pub fused_score: Option<f64>,
    /// Truncated snippet text, present only when snippets are enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Retrieval state for the turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalContext {
    /// The query that produced these chunks.
    pub query: String,
    /// Chunk ids actually shown this turn, in display order.
    pub shown_chunk_ids: Vec<String>,
    /// Chunk ids the generated response cited as sources.
    pub cited_chunk_ids: Vec<String>,
    /// Pedagogy roles in chunk order (None entries dropped).
    pub pedagogy_roles: Vec<String>,
    /// Per-chunk summaries in display order.
    pub chunks: Vec<ChunkSummary>,
}

/// Session identity for the turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    /// Zero-based turn index within the session.
    pub turn_index: u32,
    pub resource_id: Option<String>,
}

/// Description of the action the policy chose for this turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescription {
    pub action_type: String,
    /// Whether a cold-start path produced this action.
    pub used_cold_start: bool,
    pub confidence: Option<f64>,
    pub mastery_delta: Option<f64>,
    /// Chunk ids the action claims as sources. Grounding compares these
    /// against the session-wide chunk universe.
    pub source_chunk_ids: Vec<String>,
    /// Free-form action parameters.
    pub params: JsonValue,
    pub requested_override: Option<String>,
    pub applied_override: Option<String>,
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// Immutable structured snapshot of one tutoring turn's inputs.
///
/// Built once per turn, consumed read-only by every scorer. Plain
/// serializable data, safe to log, persist, or embed in LLM context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub message: String,
    pub message_id: String,
    pub target_concepts: Vec<String>,
    pub classifier: ClassifierOutput,
    pub tutor: TutorContext,
    pub retrieval: RetrievalContext,
    /// Opaque policy state carried through for logging and judge context.
    pub policy_state: JsonValue,
    pub session: SessionInfo,
    pub action: ActionDescription,
    /// Every chunk id referenceable this session: the universe grounding
    /// checks resolve against. A superset of the current turn's shown ids.
    pub known_chunk_ids: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// Builder inputs
// ---------------------------------------------------------------------------

/// Raw retrieval payload as supplied by the retrieval provider.
#[derive(Debug, Clone)]
pub struct RetrievalInput<'a> {
    pub query: &'a str,
    /// Raw chunk objects in display order. Loosely typed on purpose;
    /// ids and scores are coerced defensively, never trusted.
    pub chunks: &'a [JsonValue],
    /// Chunk ids the response cited, pre-coercion.
    pub cited_chunk_ids: &'a [JsonValue],
    /// Every chunk id seen so far this session, pre-coercion.
    pub session_chunk_ids: &'a [JsonValue],
}

/// Raw action payload from the policy layer.
#[derive(Debug, Clone)]
pub struct ActionInput<'a> {
    pub action_type: &'a str,
    pub used_cold_start: bool,
    pub confidence: &'a JsonValue,
    pub mastery_delta: &'a JsonValue,
    pub source_chunk_ids: &'a [JsonValue],
    pub params: JsonValue,
    pub requested_override: Option<&'a str>,
    pub applied_override: Option<&'a str>,
}

// ---------------------------------------------------------------------------
// Snapshot builder
// ---------------------------------------------------------------------------

/// Assemble an [`Observation`] from one turn's raw inputs.
///
/// No side effects and no failure path: malformed ids are dropped, malformed
/// numbers become `None`. Safe to call any number of times.
pub fn build_observation(
    message: &str,
    message_id: &str,
    target_concepts: Vec<String>,
    classifier: ClassifierOutput,
    tutor: TutorContext,
    retrieval: RetrievalInput<'_>,
    policy_state: JsonValue,
    session: SessionInfo,
    action: ActionInput<'_>,
    config: &SnapshotConfig,
) -> Observation {
    let chunks: Vec<ChunkSummary> = retrieval
        .chunks
        .iter()
        .filter_map(|raw| build_chunk_summary(raw, config))
        .collect();

    let shown_chunk_ids: Vec<String> = chunks.iter().map(|chunk| chunk.id.clone()).collect();
    let pedagogy_roles: Vec<String> = chunks
        .iter()
        .filter_map(|chunk| chunk.pedagogy_role.clone())
        .collect();

    let cited_chunk_ids: Vec<String> = retrieval
        .cited_chunk_ids
        .iter()
        .filter_map(coerce_chunk_id)
        .collect();

    // The grounding universe spans the whole session, not just this turn.
    let mut known_chunk_ids: BTreeSet<String> = retrieval
        .session_chunk_ids
        .iter()
        .filter_map(coerce_chunk_id)
        .collect();
    known_chunk_ids.extend(shown_chunk_ids.iter().cloned());

    let source_chunk_ids: Vec<String> = action
        .source_chunk_ids
        .iter()
        .filter_map(coerce_chunk_id)
        .collect();

    Observation {
        message: message.to_owned(),
        message_id: message_id.to_owned(),
        target_concepts,
        classifier,
        tutor,
        retrieval: RetrievalContext {
            query: retrieval.query.to_owned(),
            shown_chunk_ids,
            cited_chunk_ids,
            pedagogy_roles,
            chunks,
        },
        policy_state,
        session,
        action: ActionDescription {
            action_type: action.action_type.to_owned(),
            used_cold_start: action.used_cold_start,
            confidence: coerce_float(Some(action.confidence)),
            mastery_delta: coerce_float(Some(action.mastery_delta)),
            source_chunk_ids,
            params: action.params,
            requested_override: action.requested_override.map(String::from),
            applied_override: action.applied_override.map(String::from),
        },
        known_chunk_ids,
    }
}

fn build_chunk_summary(raw: &JsonValue, config: &SnapshotConfig) -> Option<ChunkSummary> {
    // A chunk without a usable id is dropped, never defaulted.
    let id = coerce_chunk_id(raw.get("id").unwrap_or(&JsonValue::Null))?;

    let snippet = if config.include_snippets {
        raw.get("snippet")
            .and_then(JsonValue::as_str)
            .map(|text| truncate_chars(text, config.snippet_char_budget))
    } else {
        None
    };

    Some(ChunkSummary {
        id,
        pedagogy_role: resolve_pedagogy_role(raw),
        page: raw.get("page").and_then(JsonValue::as_i64),
        similarity: coerce_float(raw.get("similarity")),
        bm25: coerce_float(raw.get("bm25")),
        fused_score: coerce_float(raw.get("fused_score")),
        snippet,
    })
}

// ---------------------------------------------------------------------------
// Coercion helpers
// ---------------------------------------------------------------------------

/// Coerce a raw value into a chunk id.
///
/// Strings are trimmed; empty and null values are dropped. Integer ids are
/// stringified so numeric and string forms of the same id unify.
pub(crate) fn coerce_chunk_id(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_owned())
        }
        JsonValue::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Coerce a raw value into a float, returning `None` on anything that does
/// not parse instead of raising. Accepts numbers and numeric strings since
/// upstream payloads carry both.
pub(crate) fn coerce_float(value: Option<&JsonValue>) -> Option<f64> {
    match value? {
        JsonValue::Number(number) => number.as_f64(),
        JsonValue::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Resolve a chunk's pedagogy role.
///
/// Checks the direct field first, then a nested tag map under the `tags` and
/// `metadata` keys with `pedagogy_role` / `role` alternates.
fn resolve_pedagogy_role(raw: &JsonValue) -> Option<String> {
    if let Some(role) = raw.get("pedagogy_role").and_then(JsonValue::as_str) {
        return Some(role.to_owned());
    }
    for map_key in ["tags", "metadata"] {
        for role_key in ["pedagogy_role", "role"] {
            if let Some(role) = raw
                .get(map_key)
                .and_then(|map| map.get(role_key))
                .and_then(JsonValue::as_str)
            {
                return Some(role.to_owned());
            }
        }
    }
    None
}

/// Truncate to a character budget without splitting a multi-byte character.
fn truncate_chars(text: &str, budget: usize) -> String {
    text.chars().take(budget).collect()
}
