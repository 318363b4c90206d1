//! Narrow seam over the LLM judge call.
//!
//! The critic and self-critique components only ever need "send a prompt,
//! get text back"; everything else (provider, model routing, structured
//! parsing, fallbacks) lives on this side of the trait. `RigJudge` is the
//! production implementation; `StaticJudge` serves deterministic and mocked
//! environments.

use anyhow::Result;
use rig::agent::AgentBuilder;
use rig::completion::{CompletionModel, Prompt};

use std::future::Future;

/// A single-turn judge call. Implementations must tolerate any prompt and
/// surface failures as errors; callers always have a safe fallback value.
pub trait Judge: Send + Sync {
    fn judge(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;
}

// ---------------------------------------------------------------------------
// Production judge
// ---------------------------------------------------------------------------

/// Judge backed by a rig completion model.
///
/// Builds a short-lived single-turn agent per call, the same way the host
/// builds its other auxiliary agents.
#[derive(Clone)]
pub struct RigJudge<M: CompletionModel> {
    model: M,
    preamble: String,
}

impl<M: CompletionModel> RigJudge<M> {
    pub fn new(model: M, preamble: impl Into<String>) -> Self {
        Self {
            model,
            preamble: preamble.into(),
        }
    }
}

impl<M: CompletionModel> Judge for RigJudge<M> {
    async fn judge(&self, prompt: &str) -> Result<String> {
        let agent = AgentBuilder::new(self.model.clone())
            .preamble(&self.preamble)
            .build();
        let response = agent.prompt(prompt).await?;
        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Deterministic judge
// ---------------------------------------------------------------------------

/// Judge for deterministic or mocked environments.
///
/// Returns a fixed scripted response, or an error when constructed as
/// unavailable, which exercises the caller's fallback path.
#[derive(Debug, Clone, Default)]
pub struct StaticJudge {
    response: Option<String>,
}

impl StaticJudge {
    /// Always answer with the given text.
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
        }
    }

    /// Always fail, as a hung or misconfigured judge would.
    pub fn unavailable() -> Self {
        Self { response: None }
    }
}

impl Judge for StaticJudge {
    async fn judge(&self, _prompt: &str) -> Result<String> {
        match &self.response {
            Some(response) => Ok(response.clone()),
            None => anyhow::bail!("static judge has no scripted response"),
        }
    }
}

// ---------------------------------------------------------------------------
// Output shaping
// ---------------------------------------------------------------------------

/// Extract the first JSON object from judge output.
///
/// Judges are asked for bare JSON but routinely wrap it in markdown fences
/// or prose. Slicing from the first `{` to the last `}` recovers the object
/// in those cases; `None` means there is nothing JSON-shaped at all.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end >= start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_judge_returns_scripted_response() {
        let judge = StaticJudge::with_response(r#"{"ok": true}"#);
        let response = judge.judge("ignored").await.unwrap();
        assert_eq!(response, r#"{"ok": true}"#);
    }

    #[tokio::test]
    async fn unavailable_judge_errors() {
        let judge = StaticJudge::unavailable();
        assert!(judge.judge("ignored").await.is_err());
    }

    #[test]
    fn extracts_fenced_json() {
        let raw = "Here you go:\n```json\n{\"clarity\": 0.9}\n```\nHope that helps.";
        assert_eq!(extract_json_object(raw), Some("{\"clarity\": 0.9}"));
    }

    #[test]
    fn extract_handles_bare_and_missing_json() {
        assert_eq!(extract_json_object("{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("} reversed {"), None);
    }
}
