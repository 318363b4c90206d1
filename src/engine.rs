//! ScoringEngine: the host-facing facade over every scoring component.
//!
//! One engine instance lives for the process lifetime and is shared across
//! sessions. Deterministic scoring is synchronous; judge-backed paths are
//! async with internal fallbacks. Persistence failures are logged and
//! swallowed; scoring output is never withheld because an audit write or
//! mastery write failed.

use crate::config::ScoringConfig;
use crate::critic::{Critic, CriticAssessment};
use crate::critique::{CritiqueResult, Plan, SelfCritic};
use crate::judge::Judge;
use crate::mastery::{self, MasterySignals, MasteryUpdate};
use crate::metrics::MetricsSink;
use crate::observation::{
    build_observation, ActionInput, ClassifierOutput, Observation, RetrievalInput, SessionInfo,
    TutorContext,
};
use crate::preference::{self, PreferenceDecision, ScoredCandidate};
use crate::reward::RewardResult;
use crate::store::MasteryStore;
use crate::validator;
use crate::ScoringError;

use serde_json::Value as JsonValue;

use std::sync::Arc;
use std::time::Instant;

/// Facade wiring the snapshot builder, validator, critic, self-critique,
/// preference selector, and mastery updater behind one surface.
pub struct ScoringEngine<J: Judge + Clone> {
    config: ScoringConfig,
    critic: Critic<J>,
    self_critic: SelfCritic<J>,
    store: Arc<MasteryStore>,
    metrics: Arc<dyn MetricsSink>,
}

impl<J: Judge + Clone> ScoringEngine<J> {
    pub fn new(
        config: ScoringConfig,
        judge: J,
        store: Arc<MasteryStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let critic = Critic::new(judge.clone(), config.critic.clone(), metrics.clone());
        let self_critic = SelfCritic::new(judge, config.critique.clone(), metrics.clone());
        Self {
            config,
            critic,
            self_critic,
            store,
            metrics,
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Build the immutable turn snapshot under the engine's configuration.
    #[allow(clippy::too_many_arguments)]
    pub fn observe(
        &self,
        message: &str,
        message_id: &str,
        target_concepts: Vec<String>,
        classifier: ClassifierOutput,
        tutor: TutorContext,
        retrieval: RetrievalInput<'_>,
        policy_state: JsonValue,
        session: SessionInfo,
        action: ActionInput<'_>,
    ) -> Observation {
        build_observation(
            message,
            message_id,
            target_concepts,
            classifier,
            tutor,
            retrieval,
            policy_state,
            session,
            action,
            &self.config.snapshot,
        )
    }

    /// Score a response with the deterministic validator and append the
    /// result to the reward audit trail.
    ///
    /// Takes no separate response metadata: the grounding axis reads the
    /// claimed source ids from `observation.action.source_chunk_ids`, so
    /// the observation already carries everything the validator needs.
    pub async fn score(&self, observation: &Observation, response: &str) -> RewardResult {
        let started = Instant::now();
        let result = validator::score_response(observation, response, &self.config.validator);
        self.metrics
            .timing("validator.score_ms", started.elapsed().as_millis() as u64);
        self.metrics.increment("reward.scored");

        // Audit trail is best-effort.
        if let Err(error) = self
            .store
            .log_reward(
                &observation.session.session_id,
                observation.session.turn_index,
                &result,
            )
            .await
        {
            tracing::warn!(%error, "failed to log reward event");
        }

        result
    }

    /// Ask the LLM critic for an independent assessment. Never fails.
    pub async fn critique(
        &self,
        observation: &Observation,
        response: &str,
        source_chunk_ids: &[String],
    ) -> CriticAssessment {
        self.critic
            .assess(observation, response, source_chunk_ids)
            .await
    }

    /// Run the pre-emission self-critique pass. Never fails.
    pub async fn self_critique(
        &self,
        plan: &dyn Plan,
        response: &str,
        observation: &Observation,
    ) -> CritiqueResult {
        self.self_critic.review(plan, response, observation).await
    }

    /// Pick the preferred candidate and append the comparison to the
    /// preference audit trail.
    pub async fn prefer(
        &self,
        observation: &Observation,
        candidates: &[ScoredCandidate],
    ) -> Result<PreferenceDecision, ScoringError> {
        let decision = preference::prefer(candidates, &self.config.preference)?;
        self.metrics.increment("preference.decided");

        if let Err(error) = self
            .store
            .log_preference(
                &observation.session.session_id,
                observation.session.turn_index,
                &decision,
            )
            .await
        {
            tracing::warn!(%error, "failed to log preference record");
        }

        Ok(decision)
    }

    /// Fold one turn's signals into a bounded mastery delta. Pure.
    pub fn compute_mastery_delta(
        &self,
        concept: &str,
        signals: &MasterySignals,
        current_mastery: f64,
    ) -> MasteryUpdate {
        mastery::compute_mastery_delta(concept, signals, current_mastery, &self.config.mastery)
    }

    /// Apply a computed update to the store.
    ///
    /// Returns the post-update mastery, or `None` when the write failed;
    /// the caller still holds the update and can retry or drop it. A
    /// non-effective update never writes.
    pub async fn apply_update(&self, user_id: &str, update: &MasteryUpdate) -> Option<f64> {
        if !update.is_effective() {
            self.metrics.increment("mastery.no_signal");
        }

        match self.store.apply_update(user_id, update).await {
            Ok(mastery) => {
                if update.is_effective() {
                    self.metrics.increment("mastery.applied");
                    tracing::debug!(
                        user_id,
                        concept = %update.concept,
                        delta = update.delta,
                        mastery,
                        reason = %update.reason,
                        "mastery updated"
                    );
                }
                Some(mastery)
            }
            Err(error) => {
                tracing::warn!(%error, user_id, concept = %update.concept, "mastery write failed");
                None
            }
        }
    }

    /// Fetch current mastery, compute the delta, and apply it in one step.
    ///
    /// A failed initial read falls back to 0.0 so the turn still produces
    /// an update.
    pub async fn update_mastery(
        &self,
        user_id: &str,
        concept: &str,
        signals: &MasterySignals,
    ) -> (MasteryUpdate, Option<f64>) {
        let current = match self.store.get(user_id, concept).await {
            Ok(record) => record.map(|record| record.mastery).unwrap_or(0.0),
            Err(error) => {
                tracing::warn!(%error, user_id, concept, "mastery read failed, assuming 0.0");
                0.0
            }
        };

        let update = self.compute_mastery_delta(concept, signals, current);
        let mastery = self.apply_update(user_id, &update).await;
        (update, mastery)
    }
}

impl<J: Judge + Clone> std::fmt::Debug for ScoringEngine<J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringEngine").finish_non_exhaustive()
    }
}
