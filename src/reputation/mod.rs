//! Weighted rolling average agent rating with a capped weight (§4.5).

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;
use crate::event_bus::EventBus;

const MAX_WEIGHT: i32 = 50;

#[derive(Debug, Error)]
pub enum ReputationError {
    #[error("agent not found: {0}")]
    AgentNotFound(Uuid),

    #[error("rating out of range: {0}")]
    InvalidRating(u8),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<ReputationError> for AppError {
    fn from(err: ReputationError) -> Self {
        match err {
            ReputationError::AgentNotFound(id) => AppError::NotFound(format!("agent {id}")),
            ReputationError::InvalidRating(r) => {
                AppError::InvalidInput(format!("rating {r} must be in 1..=5"))
            }
            ReputationError::Database(e) => AppError::Database(e),
        }
    }
}

/// Pure weighted-average update, independent of storage:
/// - `jobs_completed == 0`: the new score is simply the rating.
/// - otherwise: weight caps at 50 so one long-lived worker's history can
///   never be fully erased by a single rating, nor can an early bad rating
///   dominate a brand-new worker.
pub fn update_score(old_score: Decimal, jobs_completed: i32, rating: u8) -> Decimal {
    if jobs_completed == 0 {
        return Decimal::from(rating);
    }
    let weight = jobs_completed.min(MAX_WEIGHT);
    let weight_dec = Decimal::from(weight);
    let numerator = old_score * weight_dec + Decimal::from(rating);
    let denominator = weight_dec + Decimal::ONE;
    (numerator / denominator).round_dp(2)
}

#[derive(Clone)]
pub struct ReputationService {
    pool: PgPool,
    events: EventBus,
}

impl ReputationService {
    pub fn new(pool: PgPool, events: EventBus) -> Self {
        Self { pool, events }
    }

    /// Loads the worker's current score/count, applies [`update_score`], and
    /// persists the result within the caller's transaction, so a job
    /// completion's status flip and reputation update commit or roll back
    /// together. `jobs_completed` here is read *before* the Job State
    /// Machine's own counter increment for the same completion so the
    /// weight reflects "jobs completed prior to this one", matching the
    /// original's read-then-increment ordering.
    pub async fn record_rating_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        worker_agent_id: Uuid,
        rating: u8,
    ) -> Result<Decimal, ReputationError> {
        if !(1..=5).contains(&rating) {
            return Err(ReputationError::InvalidRating(rating));
        }

        let row: Option<(Decimal, i32)> =
            sqlx::query_as("SELECT reputation_score, jobs_completed FROM agents WHERE id = $1")
                .bind(worker_agent_id)
                .fetch_optional(&mut **tx)
                .await?;
        let (old_score, jobs_completed) =
            row.ok_or(ReputationError::AgentNotFound(worker_agent_id))?;

        let new_score = update_score(old_score, jobs_completed, rating);

        sqlx::query("UPDATE agents SET reputation_score = $2 WHERE id = $1")
            .bind(worker_agent_id)
            .bind(new_score)
            .execute(&mut **tx)
            .await?;

        Ok(new_score)
    }

    /// Applies [`Self::record_rating_in_tx`], committing in its own
    /// transaction, and publishes `reputation_updated`.
    pub async fn record_rating(
        &self,
        worker_agent_id: Uuid,
        rating: u8,
    ) -> Result<Decimal, ReputationError> {
        let mut tx = self.pool.begin().await?;
        let new_score = Self::record_rating_in_tx(&mut tx, worker_agent_id, rating).await?;
        tx.commit().await?;

        self.events.publish(
            "reputation_updated",
            serde_json::json!({
                "agent_id": worker_agent_id,
                "new_score": new_score.to_f64(),
                "rating": rating,
            }),
        );

        Ok(new_score)
    }
}
