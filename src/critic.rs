//! LLM-judged quality assessment, independent of the deterministic validator.
//!
//! The critic is a second opinion used in preference comparisons and exposed
//! standalone. It must never hard-fail a turn: any judge failure, timeout, or
//! unparseable output is replaced by a fixed neutral-to-positive default and
//! logged. A scoring pipeline degrades gracefully; it does not stall.

use crate::config::CriticConfig;
use crate::judge::{extract_json_object, Judge};
use crate::metrics::MetricsSink;
use crate::observation::Observation;

use serde::{Deserialize, Serialize};

use std::sync::Arc;
use tokio::time::Duration;

/// Quality assessment of one response by the LLM judge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticAssessment {
    pub clarity: f64,
    pub accuracy: f64,
    pub support: f64,
    pub confidence: f64,
    pub hallucination: bool,
    pub notes: String,
}

impl CriticAssessment {
    /// The conservative fallback used whenever the judge is unavailable.
    pub fn neutral_default(notes: impl Into<String>) -> Self {
        Self {
            clarity: 0.75,
            accuracy: 0.75,
            support: 0.7,
            confidence: 0.6,
            hallucination: false,
            notes: notes.into(),
        }
    }
}

/// Judge output before clamping. Missing fields take neutral values so a
/// partially-formed object still parses.
#[derive(Debug, Deserialize)]
struct RawAssessment {
    #[serde(default = "neutral_score")]
    clarity: f64,
    #[serde(default = "neutral_score")]
    accuracy: f64,
    #[serde(default = "neutral_score")]
    support: f64,
    #[serde(default = "neutral_score")]
    confidence: f64,
    #[serde(default)]
    hallucination: bool,
    #[serde(default)]
    notes: String,
}

fn neutral_score() -> f64 {
    0.7
}

/// LLM critic over (observation, response, cited sources).
pub struct Critic<J: Judge> {
    judge: J,
    config: CriticConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl<J: Judge> Critic<J> {
    pub fn new(judge: J, config: CriticConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            judge,
            config,
            metrics,
        }
    }

    /// Assess a response. Infallible by contract: the neutral default
    /// covers every failure mode.
    pub async fn assess(
        &self,
        observation: &Observation,
        response: &str,
        source_chunk_ids: &[String],
    ) -> CriticAssessment {
        let prompt = build_prompt(observation, response, source_chunk_ids);
        let judge_future = self.judge.judge(&prompt);

        let raw = match tokio::time::timeout(
            Duration::from_millis(self.config.budget_ms),
            judge_future,
        )
        .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(error)) => {
                tracing::warn!(%error, "critic judge call failed, using neutral default");
                self.metrics.increment("critic.fallback");
                return CriticAssessment::neutral_default("judge unavailable");
            }
            Err(_elapsed) => {
                tracing::warn!(
                    budget_ms = self.config.budget_ms,
                    "critic judge call timed out, using neutral default"
                );
                self.metrics.increment("critic.fallback");
                return CriticAssessment::neutral_default("judge timed out");
            }
        };

        match parse_assessment(&raw) {
            Some(assessment) => assessment,
            None => {
                tracing::warn!("critic judge returned unparseable output");
                self.metrics.increment("critic.fallback");
                CriticAssessment::neutral_default("judge output unparseable")
            }
        }
    }
}

fn parse_assessment(raw: &str) -> Option<CriticAssessment> {
    let json_slice = extract_json_object(raw)?;
    let parsed: RawAssessment = serde_json::from_str(json_slice).ok()?;
    Some(CriticAssessment {
        clarity: parsed.clarity.clamp(0.0, 1.0),
        accuracy: parsed.accuracy.clamp(0.0, 1.0),
        support: parsed.support.clamp(0.0, 1.0),
        confidence: parsed.confidence.clamp(0.0, 1.0),
        hallucination: parsed.hallucination,
        notes: parsed.notes,
    })
}

fn build_prompt(observation: &Observation, response: &str, source_chunk_ids: &[String]) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push(format!(
        "Student message: {}\nClassified intent: {} | affect: {} | focus concept: {}",
        observation.message,
        observation.classifier.intent,
        observation.classifier.affect,
        observation.tutor.focus_concept,
    ));

    if !source_chunk_ids.is_empty() {
        lines.push(format!("Cited source chunks: {}", source_chunk_ids.join(", ")));
    }

    lines.push(format!("Tutor response to assess:\n{response}"));

    lines.push(
        "Assess the tutor response. Return only a JSON object with keys \
         clarity, accuracy, support, confidence (each 0.0-1.0), \
         hallucination (boolean), and notes (short string). No other text."
            .to_string(),
    );

    lines.join("\n\n")
}
