//! Scoring backbone for an LLM tutoring agent.
//!
//! Every tutoring turn flows through the same loop: fold the turn's raw
//! inputs into an immutable [`Observation`], score candidate responses with
//! a deterministic multi-axis validator, optionally get a second opinion
//! from an LLM critic, pick among candidates, and fold the interaction
//! signals into a persisted per-(user, concept) mastery estimate.
//!
//! The deterministic paths are pure functions over the observation. The
//! judge-backed paths ([`critic`], [`critique`]) degrade to fixed fallback
//! values on any failure, so a broken or slow judge can never stall a turn.
//! [`ScoringEngine`] wires the pieces together behind one host-facing
//! surface.

pub mod config;
pub mod critic;
pub mod critique;
pub mod engine;
pub mod judge;
pub mod mastery;
pub mod metrics;
pub mod observation;
pub mod preference;
pub mod reward;
pub mod store;
pub mod validator;

pub use config::ScoringConfig;
pub use critic::{Critic, CriticAssessment};
pub use critique::{CritiqueResult, Plan, SelfCritic};
pub use engine::ScoringEngine;
pub use judge::{Judge, RigJudge, StaticJudge};
pub use mastery::{compute_mastery_delta, MasterySignals, MasteryUpdate};
pub use metrics::{CountingMetrics, MetricsSink, NoopMetrics};
pub use observation::{
    build_observation, ActionInput, ClassifierOutput, Observation, RetrievalInput, SessionInfo,
    TutorContext,
};
pub use preference::{prefer, PreferenceDecision, ScoredCandidate};
pub use reward::{RewardComponent, RewardResult};
pub use store::{MasteryRecord, MasteryStore};
pub use validator::score_response;

/// Errors surfaced by the fallible parts of the scoring system.
///
/// Most scoring paths are deliberately infallible and fall back instead of
/// erroring; this enum covers the store and the few caller-bug cases.
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("mastery database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("scoring engine error: {0}")]
    Engine(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
