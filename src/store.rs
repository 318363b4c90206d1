//! MasteryStore: persistence for mastery records and scoring audit trails.
//!
//! Wraps a dedicated SQLite pool. Mastery rows are mutated through a single
//! atomic upsert whose additive-and-clamp arithmetic runs inside the
//! statement, so concurrent updates for the same (user, concept) serialize
//! on the delta rather than racing on the whole row. Reward and preference
//! audit rows are append-only and written fail-open by the engine.

use crate::mastery::{reason_has_code, MasteryUpdate, CODE_CORRECT_ANSWER};
use crate::preference::PreferenceDecision;
use crate::reward::RewardResult;
use crate::ScoringError;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Persisted mastery state for one (user, concept) pair.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct MasteryRecord {
    pub user_id: String,
    pub concept: String,
    /// Estimated proficiency in [0, 1].
    pub mastery: f64,
    pub attempts: i64,
    pub correct: i64,
    pub last_seen: String,
}

/// Dedicated SQLite pool for mastery and scoring audit data.
pub struct MasteryStore {
    pool: SqlitePool,
}

impl MasteryStore {
    /// Connect to (or create) the mastery database at the given path.
    ///
    /// Runs the embedded schema, enables WAL mode, and configures a small
    /// pool.
    pub async fn connect(path: &Path) -> Result<Arc<Self>, ScoringError> {
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|error| ScoringError::Engine(format!("invalid db path: {error}")))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        Ok(Arc::new(Self { pool }))
    }

    /// Expose the pool for tests that need direct query access.
    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -- Mastery records ----------------------------------------------------

    /// Apply a mastery update and return the post-update mastery value.
    ///
    /// Effective updates run one atomic upsert: on insert the record is
    /// seeded with `mastery = max(delta, 0)`, one attempt, and a correctness
    /// count derived from the reason codes; on conflict attempts and correct
    /// are incremented and mastery moves by the delta, clamped into [0, 1].
    /// A zero delta performs a read-only lookup instead of any write.
    pub async fn apply_update(
        &self,
        user_id: &str,
        update: &MasteryUpdate,
    ) -> Result<f64, ScoringError> {
        if !update.is_effective() {
            return Ok(self
                .get(user_id, &update.concept)
                .await?
                .map(|record| record.mastery)
                .unwrap_or(0.0));
        }

        let correct_increment: i64 =
            if reason_has_code(&update.reason, CODE_CORRECT_ANSWER) { 1 } else { 0 };

        let mastery: f64 = sqlx::query_scalar(
            r#"
            INSERT INTO mastery_records (user_id, concept, mastery, attempts, correct, last_seen)
            VALUES (?, ?, max(?, 0.0), 1, ?, datetime('now'))
            ON CONFLICT(user_id, concept) DO UPDATE SET
                mastery   = min(1.0, max(0.0, mastery_records.mastery + ?)),
                attempts  = mastery_records.attempts + 1,
                correct   = mastery_records.correct + ?,
                last_seen = excluded.last_seen
            RETURNING mastery
            "#,
        )
        .bind(user_id)
        .bind(&update.concept)
        .bind(update.delta)
        .bind(correct_increment)
        .bind(update.delta)
        .bind(correct_increment)
        .fetch_one(&self.pool)
        .await?;

        Ok(mastery)
    }

    /// Fetch the mastery record for one (user, concept) pair.
    pub async fn get(
        &self,
        user_id: &str,
        concept: &str,
    ) -> Result<Option<MasteryRecord>, ScoringError> {
        let record = sqlx::query_as(
            "SELECT user_id, concept, mastery, attempts, correct, last_seen \
             FROM mastery_records WHERE user_id = ? AND concept = ?",
        )
        .bind(user_id)
        .bind(concept)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// All mastery records for a user, most recently seen first.
    pub async fn for_user(&self, user_id: &str) -> Result<Vec<MasteryRecord>, ScoringError> {
        let records = sqlx::query_as(
            "SELECT user_id, concept, mastery, attempts, correct, last_seen \
             FROM mastery_records WHERE user_id = ? ORDER BY last_seen DESC, concept ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    // -- Audit trail --------------------------------------------------------

    /// Append one scored turn to the reward audit trail.
    pub async fn log_reward(
        &self,
        session_id: &str,
        turn_index: u32,
        result: &RewardResult,
    ) -> Result<(), ScoringError> {
        let id = uuid::Uuid::new_v4().to_string();
        let components_json = serde_json::to_string(&result.components)
            .map_err(|error| ScoringError::Engine(error.to_string()))?;
        let flags_json = serde_json::to_string(&result.flags)
            .map_err(|error| ScoringError::Engine(error.to_string()))?;

        sqlx::query(
            "INSERT INTO reward_events (id, session_id, turn_index, total, flags, components, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        )
        .bind(&id)
        .bind(session_id)
        .bind(turn_index as i64)
        .bind(result.total)
        .bind(&flags_json)
        .bind(&components_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append one preference comparison, for offline preference learning.
    pub async fn log_preference(
        &self,
        session_id: &str,
        turn_index: u32,
        decision: &PreferenceDecision,
    ) -> Result<(), ScoringError> {
        let id = uuid::Uuid::new_v4().to_string();
        let scores_json = serde_json::to_string(&decision.scores)
            .map_err(|error| ScoringError::Engine(error.to_string()))?;

        sqlx::query(
            "INSERT INTO preference_records \
             (id, session_id, turn_index, chosen_index, scores, confidence, reason, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        )
        .bind(&id)
        .bind(session_id)
        .bind(turn_index as i64)
        .bind(decision.chosen_index as i64)
        .bind(&scores_json)
        .bind(decision.confidence)
        .bind(&decision.reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl std::fmt::Debug for MasteryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasteryStore").finish_non_exhaustive()
    }
}

/// Embedded schema. All tables use `IF NOT EXISTS` so re-running is safe.
const SCHEMA: &str = r#"
-- Per-(user, concept) mastery state
CREATE TABLE IF NOT EXISTS mastery_records (
    user_id TEXT NOT NULL,
    concept TEXT NOT NULL,
    mastery REAL NOT NULL DEFAULT 0.0,
    attempts INTEGER NOT NULL DEFAULT 0,
    correct INTEGER NOT NULL DEFAULT 0,
    last_seen TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (user_id, concept)
);
CREATE INDEX IF NOT EXISTS idx_mastery_user ON mastery_records(user_id, last_seen);

-- Reward audit trail (one row per scored turn)
CREATE TABLE IF NOT EXISTS reward_events (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    turn_index INTEGER NOT NULL,
    total REAL NOT NULL,
    flags TEXT NOT NULL,
    components TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_reward_session ON reward_events(session_id, turn_index);

-- Preference comparisons (training data for preference learning)
CREATE TABLE IF NOT EXISTS preference_records (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    turn_index INTEGER NOT NULL,
    chosen_index INTEGER NOT NULL,
    scores TEXT NOT NULL,
    confidence REAL NOT NULL,
    reason TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_preference_session ON preference_records(session_id, turn_index);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    /// Spin up an isolated store backed by a throwaway SQLite file.
    async fn setup() -> Arc<MasteryStore> {
        let path = std::env::temp_dir().join(format!(
            "tutor_scoring_test_store_{}.db",
            uuid::Uuid::new_v4()
        ));
        MasteryStore::connect(&path).await.unwrap()
    }

    fn update(concept: &str, delta: f64, reason: &str) -> MasteryUpdate {
        MasteryUpdate {
            concept: concept.into(),
            delta,
            reason: reason.into(),
            confidence: 0.8,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn first_update_seeds_record() {
        let store = setup().await;

        let mastery = store
            .apply_update("u1", &update("fractions", 0.12, "engaged,correct_answer"))
            .await
            .unwrap();
        assert!((mastery - 0.12).abs() < 1e-9);

        let record = store.get("u1", "fractions").await.unwrap().unwrap();
        assert_eq!(record.attempts, 1);
        assert_eq!(record.correct, 1);
    }

    #[tokio::test]
    async fn negative_first_update_seeds_at_zero() {
        let store = setup().await;

        let mastery = store
            .apply_update("u1", &update("fractions", -0.08, "confused"))
            .await
            .unwrap();
        assert_eq!(mastery, 0.0);

        let record = store.get("u1", "fractions").await.unwrap().unwrap();
        assert_eq!(record.attempts, 1);
        assert_eq!(record.correct, 0);
    }

    #[tokio::test]
    async fn conflict_accumulates_and_clamps() {
        let store = setup().await;

        store
            .apply_update("u1", &update("fractions", 0.3, "correct_answer"))
            .await
            .unwrap();
        store
            .apply_update("u1", &update("fractions", 0.3, "correct_answer"))
            .await
            .unwrap();
        let mastery = store
            .apply_update("u1", &update("fractions", 0.3, "correct_answer"))
            .await
            .unwrap();
        // 0.3 + 0.3 + 0.3 = 0.9, still under the ceiling.
        assert!((mastery - 0.9).abs() < 1e-9);

        let mastery = store
            .apply_update("u1", &update("fractions", 0.3, "correct_answer"))
            .await
            .unwrap();
        assert_eq!(mastery, 1.0);

        let record = store.get("u1", "fractions").await.unwrap().unwrap();
        assert_eq!(record.attempts, 4);
        assert_eq!(record.correct, 4);
    }

    #[tokio::test]
    async fn incorrect_answer_reason_does_not_count_as_correct() {
        let store = setup().await;

        store
            .apply_update("u1", &update("fractions", -0.1, "incorrect_answer"))
            .await
            .unwrap();

        let record = store.get("u1", "fractions").await.unwrap().unwrap();
        assert_eq!(record.correct, 0);
    }

    #[tokio::test]
    async fn zero_delta_is_read_only() {
        let store = setup().await;

        store
            .apply_update("u1", &update("fractions", 0.2, "correct_answer"))
            .await
            .unwrap();

        let mastery = store
            .apply_update("u1", &update("fractions", 0.0, "no_signal"))
            .await
            .unwrap();
        assert!((mastery - 0.2).abs() < 1e-9);

        // No write happened: attempts unchanged.
        let record = store.get("u1", "fractions").await.unwrap().unwrap();
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test]
    async fn zero_delta_on_missing_record_reads_zero() {
        let store = setup().await;
        let mastery = store
            .apply_update("u1", &update("never-seen", 0.0, "no_signal"))
            .await
            .unwrap();
        assert_eq!(mastery, 0.0);
        assert!(store.get("u1", "never-seen").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mastery_never_leaves_unit_interval() {
        let store = setup().await;

        store
            .apply_update("u1", &update("fractions", 0.25, "correct_answer"))
            .await
            .unwrap();
        let mastery = store
            .apply_update("u1", &update("fractions", -0.9, "frustrated"))
            .await
            .unwrap();
        assert_eq!(mastery, 0.0);
    }

    #[tokio::test]
    async fn concurrent_updates_serialize_additively() {
        let store = setup().await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .apply_update("u1", &update("fractions", 0.05, "correct_answer"))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let record = store.get("u1", "fractions").await.unwrap().unwrap();
        assert_eq!(record.attempts, 10);
        assert!((record.mastery - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn for_user_lists_all_concepts() {
        let store = setup().await;

        store
            .apply_update("u1", &update("fractions", 0.1, "engaged"))
            .await
            .unwrap();
        store
            .apply_update("u1", &update("ratios", 0.2, "correct_answer"))
            .await
            .unwrap();
        store
            .apply_update("u2", &update("fractions", 0.3, "correct_answer"))
            .await
            .unwrap();

        let records = store.for_user("u1").await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|record| record.user_id == "u1"));
    }

    #[tokio::test]
    async fn audit_rows_round_trip() {
        let store = setup().await;

        let decision = PreferenceDecision {
            chosen_index: 1,
            scores: vec![0.5, 0.8],
            confidence: 0.9,
            reason: "candidate 1 leads".into(),
        };
        store.log_preference("s-1", 2, &decision).await.unwrap();

        let row: (i64, String) = sqlx::query_as(
            "SELECT chosen_index, scores FROM preference_records WHERE session_id = 's-1'",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(row.0, 1);
        assert_eq!(row.1, "[0.5,0.8]");
    }
}
