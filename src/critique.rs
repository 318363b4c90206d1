//! Pre-emission self-critique of a single produced response.
//!
//! Not a comparison; the host uses the verdict to decide whether to
//! regenerate before emitting. Failures here must be invisible to the
//! calling pipeline: any judge error collapses to a safe default that
//! recommends no revision.

use crate::config::CritiqueConfig;
use crate::judge::{extract_json_object, Judge};
use crate::metrics::MetricsSink;
use crate::observation::Observation;

use serde::{Deserialize, Serialize};

use std::sync::Arc;
use tokio::time::Duration;

/// Capability interface over whatever plan representation the host uses.
///
/// The critique only needs the three narrative fields; any plan type can
/// implement this without exposing its internals.
pub trait Plan {
    fn thinking(&self) -> &str;
    fn intended_action(&self) -> &str;
    fn action_rationale(&self) -> &str;
}

/// Verdict over a single candidate response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CritiqueResult {
    /// Overall quality in [0, 1].
    pub overall_quality: f64,
    pub issues_found: Vec<String>,
    pub suggestions: Vec<String>,
    pub should_revise: bool,
    pub reasoning: String,
}

impl CritiqueResult {
    /// The safe default: middling quality, no revision. Used on any judge
    /// failure so a broken judge never triggers regeneration loops.
    pub fn safe_default(reasoning: impl Into<String>) -> Self {
        Self {
            overall_quality: 0.6,
            issues_found: Vec::new(),
            suggestions: Vec::new(),
            should_revise: false,
            reasoning: reasoning.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCritique {
    #[serde(default = "default_quality")]
    overall_quality: f64,
    #[serde(default)]
    issues_found: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default)]
    should_revise: bool,
    #[serde(default)]
    reasoning: String,
}

fn default_quality() -> f64 {
    0.6
}

/// LLM self-critique over (plan, response, observation).
pub struct SelfCritic<J: Judge> {
    judge: J,
    config: CritiqueConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl<J: Judge> SelfCritic<J> {
    pub fn new(judge: J, config: CritiqueConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            judge,
            config,
            metrics,
        }
    }

    /// Critique a response before emission. Never fails.
    pub async fn review(
        &self,
        plan: &dyn Plan,
        response: &str,
        observation: &Observation,
    ) -> CritiqueResult {
        let prompt = build_prompt(plan, response, observation);
        let judge_future = self.judge.judge(&prompt);

        let raw = match tokio::time::timeout(
            Duration::from_millis(self.config.budget_ms),
            judge_future,
        )
        .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(error)) => {
                tracing::warn!(%error, "self-critique judge failed, using safe default");
                self.metrics.increment("critique.fallback");
                return CritiqueResult::safe_default("judge unavailable");
            }
            Err(_elapsed) => {
                tracing::warn!(
                    budget_ms = self.config.budget_ms,
                    "self-critique judge timed out, using safe default"
                );
                self.metrics.increment("critique.fallback");
                return CritiqueResult::safe_default("judge timed out");
            }
        };

        match parse_critique(&raw) {
            Some(result) => result,
            None => {
                tracing::warn!("self-critique judge returned unparseable output");
                self.metrics.increment("critique.fallback");
                CritiqueResult::safe_default("judge output unparseable")
            }
        }
    }
}

fn parse_critique(raw: &str) -> Option<CritiqueResult> {
    let json_slice = extract_json_object(raw)?;
    let parsed: RawCritique = serde_json::from_str(json_slice).ok()?;
    Some(CritiqueResult {
        overall_quality: parsed.overall_quality.clamp(0.0, 1.0),
        issues_found: parsed.issues_found,
        suggestions: parsed.suggestions,
        should_revise: parsed.should_revise,
        reasoning: parsed.reasoning,
    })
}

fn build_prompt(plan: &dyn Plan, response: &str, observation: &Observation) -> String {
    format!(
        "Student message: {message}\n\
         Classified intent: {intent} | affect: {affect}\n\n\
         The tutor planned:\n\
         - thinking: {thinking}\n\
         - intended action: {action}\n\
         - rationale: {rationale}\n\n\
         The tutor produced:\n{response}\n\n\
         Critique whether the response delivers on the plan for this student. \
         Return only a JSON object with keys overall_quality (0.0-1.0), \
         issues_found (array of strings), suggestions (array of strings), \
         should_revise (boolean), reasoning (short string). No other text.",
        message = observation.message,
        intent = observation.classifier.intent,
        affect = observation.classifier.affect,
        thinking = plan.thinking(),
        action = plan.intended_action(),
        rationale = plan.action_rationale(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SnapshotConfig;
    use crate::judge::StaticJudge;
    use crate::metrics::{CountingMetrics, NoopMetrics};
    use crate::observation::{
        build_observation, ActionInput, ClassifierOutput, Observation, RetrievalInput,
        SessionInfo, TutorContext,
    };
    use serde_json::json;

    /// Judge whose future never resolves, as a hung provider would behave.
    #[derive(Clone)]
    struct HangingJudge;

    impl Judge for HangingJudge {
        fn judge(
            &self,
            _prompt: &str,
        ) -> impl std::future::Future<Output = anyhow::Result<String>> + Send {
            std::future::pending()
        }
    }

    struct FixedPlan;

    impl Plan for FixedPlan {
        fn thinking(&self) -> &str {
            "student seems stuck on denominators"
        }
        fn intended_action(&self) -> &str {
            "explain with a pizza example"
        }
        fn action_rationale(&self) -> &str {
            "concrete examples help confused students"
        }
    }

    fn observation() -> Observation {
        build_observation(
            "I don't get it",
            "m-1",
            vec![],
            ClassifierOutput {
                intent: "question".into(),
                affect: "confused".into(),
                concept: None,
                confidence: None,
                escalate: false,
            },
            TutorContext {
                focus_concept: "fractions".into(),
                concept_level: 0,
                inferred_concept: None,
                learning_path: vec![],
                mastery_snapshot: None,
            },
            RetrievalInput {
                query: "",
                chunks: &[],
                cited_chunk_ids: &[],
                session_chunk_ids: &[],
            },
            json!({}),
            SessionInfo {
                session_id: "s".into(),
                turn_index: 1,
                resource_id: None,
            },
            ActionInput {
                action_type: "explain",
                used_cold_start: true,
                confidence: &json!(null),
                mastery_delta: &json!(null),
                source_chunk_ids: &[],
                params: json!({}),
                requested_override: None,
                applied_override: None,
            },
            &SnapshotConfig::default(),
        )
    }

    #[tokio::test]
    async fn parses_revision_verdict() {
        let judge = StaticJudge::with_response(
            r#"{"overall_quality": 0.4, "issues_found": ["no example"],
                "suggestions": ["add a concrete example"], "should_revise": true,
                "reasoning": "plan called for an example"}"#,
        );
        let critic = SelfCritic::new(judge, CritiqueConfig::default(), Arc::new(NoopMetrics));

        let result = critic.review(&FixedPlan, "Fractions are numbers.", &observation()).await;

        assert!(result.should_revise);
        assert_eq!(result.issues_found, vec!["no example"]);
        assert_eq!(result.overall_quality, 0.4);
    }

    #[tokio::test]
    async fn judge_failure_never_recommends_revision() {
        let metrics = Arc::new(CountingMetrics::new());
        let critic = SelfCritic::new(
            StaticJudge::unavailable(),
            CritiqueConfig::default(),
            metrics.clone(),
        );

        let result = critic.review(&FixedPlan, "anything", &observation()).await;

        assert_eq!(result.overall_quality, 0.6);
        assert!(!result.should_revise);
        assert!(result.issues_found.is_empty());
        assert_eq!(metrics.count("critique.fallback"), 1);
    }

    #[tokio::test]
    async fn hung_judge_times_out_to_safe_default() {
        let metrics = Arc::new(CountingMetrics::new());
        let critic = SelfCritic::new(
            HangingJudge,
            CritiqueConfig { budget_ms: 10 },
            metrics.clone(),
        );

        let result = critic.review(&FixedPlan, "anything", &observation()).await;

        assert_eq!(result.overall_quality, 0.6);
        assert!(!result.should_revise);
        assert_eq!(result.reasoning, "judge timed out");
        assert_eq!(metrics.count("critique.fallback"), 1);
    }

    #[test]
    fn prompt_carries_plan_fields() {
        let prompt = build_prompt(&FixedPlan, "response text", &observation());
        assert!(prompt.contains("pizza example"));
        assert!(prompt.contains("student seems stuck"));
        assert!(prompt.contains("response text"));
    }
}
