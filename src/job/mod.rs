//! Drives a job from creation through settlement, orchestrating Ledger
//! calls on funding, release, and refund (§4.4).

use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;
use crate::event_bus::EventBus;
use crate::ledger::{Ledger, LedgerError};
use crate::models::{
    Deliverable, Job, JobStatus, Negotiation, NegotiationStatus, PricingSource, Service,
};
use crate::reputation::{ReputationError, ReputationService};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("reputation error: {0}")]
    Reputation(#[from] ReputationError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(m) => AppError::NotFound(m),
            JobError::InvalidInput(m) => AppError::InvalidInput(m),
            JobError::InvalidState(m) => AppError::InvalidState(m),
            JobError::Forbidden(m) => AppError::Forbidden(m),
            JobError::Ledger(e) => e.into(),
            JobError::Reputation(e) => e.into(),
            JobError::Database(e) => AppError::Database(e),
        }
    }
}

/// Maximum ancestor-chain walk depth when checking for a parent-job cycle
/// (§9 design note). Bounds the cost of a corrupted chain instead of
/// walking indefinitely.
const MAX_ANCESTOR_DEPTH: u32 = 1000;

#[derive(Clone)]
pub struct JobStateMachine {
    pool: PgPool,
    ledger: Ledger,
    events: EventBus,
    default_currency: String,
}

impl JobStateMachine {
    pub fn new(pool: PgPool, ledger: Ledger, events: EventBus, default_currency: String) -> Self {
        Self {
            pool,
            ledger,
            events,
            default_currency,
        }
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Job, JobError> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| JobError::NotFound(format!("job {job_id}")))
    }

    pub async fn deliverables(&self, job_id: Uuid) -> Result<Vec<Deliverable>, JobError> {
        let rows = sqlx::query_as::<_, Deliverable>(
            "SELECT * FROM deliverables WHERE job_id = $1 ORDER BY version ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_message(
        tx: &mut Transaction<'_, Postgres>,
        from_agent_id: Uuid,
        to_agent_id: Uuid,
        job_id: Uuid,
        message_type: &str,
        content: Value,
    ) -> Result<(), JobError> {
        sqlx::query(
            r#"
            INSERT INTO messages (from_agent_id, to_agent_id, job_id, message_type, content)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(from_agent_id)
        .bind(to_agent_id)
        .bind(job_id)
        .bind(message_type)
        .bind(content)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_activity(
        tx: &mut Transaction<'_, Postgres>,
        event_type: &str,
        agent_id: Option<Uuid>,
        job_id: Option<Uuid>,
        service_id: Option<Uuid>,
        data: Value,
    ) -> Result<(), JobError> {
        sqlx::query(
            r#"
            INSERT INTO activity_log (event_type, agent_id, job_id, service_id, data)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event_type)
        .bind(agent_id)
        .bind(job_id)
        .bind(service_id)
        .bind(data)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// A new job's id doesn't exist until after this check, so a cycle
    /// through the *new* job is structurally impossible: `parent_job_id`
    /// is write-once at creation and never repointed, making the job graph
    /// a forest by construction. What we do still guard against is a
    /// corrupted or unbounded ancestor chain already sitting in the table;
    /// walk up to [`MAX_ANCESTOR_DEPTH`] confirming the chain terminates.
    async fn check_ancestor_chain(&self, candidate_parent: Uuid) -> Result<(), JobError> {
        let mut current = candidate_parent;
        for _ in 0..MAX_ANCESTOR_DEPTH {
            let row: Option<(Option<Uuid>,)> =
                sqlx::query_as("SELECT parent_job_id FROM jobs WHERE id = $1")
                    .bind(current)
                    .fetch_optional(&self.pool)
                    .await?;
            let (parent,) = row.ok_or_else(|| JobError::NotFound(format!("job {current}")))?;
            match parent {
                Some(next) => current = next,
                None => return Ok(()),
            }
        }
        Err(JobError::InvalidInput(
            "parent job ancestor chain exceeds maximum depth".to_string(),
        ))
    }

    /// Resolves a [`PricingSource`] into a locked price, per §4.4 `create`.
    async fn resolve_price(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        service: &Service,
        client_agent_id: Uuid,
        source: &PricingSource,
    ) -> Result<(Decimal, Option<Uuid>, Option<String>), JobError> {
        match source {
            PricingSource::Negotiation { negotiation_id } => {
                let negotiation = sqlx::query_as::<_, Negotiation>(
                    "SELECT * FROM negotiations WHERE id = $1",
                )
                .bind(negotiation_id)
                .fetch_optional(&mut **tx)
                .await?
                .ok_or_else(|| {
                    JobError::NotFound(format!("negotiation {negotiation_id}"))
                })?;

                if negotiation.status != NegotiationStatus::Agreed {
                    return Err(JobError::InvalidInput(
                        "negotiation is not agreed".to_string(),
                    ));
                }
                if negotiation.client_agent_id != client_agent_id {
                    return Err(JobError::Forbidden(
                        "you are not the client of this negotiation".to_string(),
                    ));
                }
                if negotiation.service_id != service.id {
                    return Err(JobError::InvalidInput(
                        "negotiation service does not match requested service".to_string(),
                    ));
                }
                Ok((negotiation.current_price, Some(*negotiation_id), None))
            }
            PricingSource::Quote { quote_id, price } => Ok((*price, None, Some(quote_id.clone()))),
            PricingSource::Midpoint => Ok((service.midpoint_price(), None, None)),
        }
    }

    /// §4.4 `create`. Fails atomically (no job row, no ledger entries) if
    /// escrow cannot be locked.
    pub async fn create(
        &self,
        client_agent_id: Uuid,
        service: &Service,
        title: Option<String>,
        input_data: Value,
        parent_job_id: Option<Uuid>,
        source: PricingSource,
    ) -> Result<Job, JobError> {
        if !service.is_active {
            return Err(JobError::InvalidInput("service is not active".to_string()));
        }

        if let Some(parent) = parent_job_id {
            self.check_ancestor_chain(parent).await?;
        }

        let mut tx = self.pool.begin().await?;

        let (price, negotiation_id, quote_id) = self
            .resolve_price(&mut tx, service, client_agent_id, &source)
            .await?;

        let job_id = Uuid::new_v4();
        let title = title.unwrap_or_else(|| format!("Hire: {}", service.name));
        let negotiated_by = source.negotiated_by();

        sqlx::query(
            r#"
            INSERT INTO jobs
                (id, service_id, client_agent_id, worker_agent_id, parent_job_id,
                 negotiation_id, quote_id, negotiated_by, title, input_data, price, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'pending')
            "#,
        )
        .bind(job_id)
        .bind(service.id)
        .bind(client_agent_id)
        .bind(service.agent_id)
        .bind(parent_job_id)
        .bind(negotiation_id)
        .bind(&quote_id)
        .bind(negotiated_by.as_str())
        .bind(&title)
        .bind(&input_data)
        .bind(price)
        .execute(&mut *tx)
        .await?;

        // Escrow lock joins this same transaction: if it fails, the job row
        // insert above rolls back with it and no unfunded job is ever
        // visible, rather than being inserted and then deleted after the
        // fact.
        Ledger::lock_escrow_in_tx(&mut tx, client_agent_id, job_id, price, &self.default_currency)
            .await?;

        sqlx::query(
            "UPDATE jobs SET escrow_status = 'funded', escrow_amount = $2, escrowed_at = now() WHERE id = $1",
        )
        .bind(job_id)
        .bind(price)
        .execute(&mut *tx)
        .await?;

        Self::insert_message(
            &mut tx,
            client_agent_id,
            service.agent_id,
            job_id,
            "job_created",
            json!({"message": "You've been hired!", "job_id": job_id, "title": title, "price": price.to_string()}),
        )
        .await?;

        Self::insert_activity(
            &mut tx,
            "job_created",
            Some(client_agent_id),
            Some(job_id),
            Some(service.id),
            json!({"worker_id": service.agent_id, "price": price.to_string(), "negotiated_by": negotiated_by.as_str()}),
        )
        .await?;

        tx.commit().await?;

        self.events.publish(
            "job_created",
            json!({"job_id": job_id, "client_id": client_agent_id, "worker_id": service.agent_id, "price": price.to_string()}),
        );

        self.get(job_id).await
    }

    /// Guards a transition against the state diagram in [`Job::can_transition_to`].
    fn require_transition(job: &Job, next: JobStatus) -> Result<(), JobError> {
        if !job.can_transition_to(next) {
            return Err(JobError::InvalidState(format!(
                "cannot transition job from '{}' to '{}'",
                job.status.as_str(),
                next.as_str()
            )));
        }
        Ok(())
    }

    /// Locks the job row, re-reads its status under the lock, and fails
    /// `InvalidState` if it has moved since the caller last observed it
    /// (§5 stale-transition guard).
    async fn lock_job(
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
    ) -> Result<Job, JobError> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| JobError::NotFound(format!("job {job_id}")))
    }

    /// §4.4 `start`.
    pub async fn start(&self, job_id: Uuid, worker_agent_id: Uuid) -> Result<Job, JobError> {
        let mut tx = self.pool.begin().await?;
        let job = Self::lock_job(&mut tx, job_id).await?;

        if job.worker_agent_id != worker_agent_id {
            return Err(JobError::Forbidden("you are not the worker for this job".to_string()));
        }
        Self::require_transition(&job, JobStatus::InProgress)?;

        sqlx::query("UPDATE jobs SET status = 'in_progress', started_at = now() WHERE id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        Self::insert_message(
            &mut tx,
            worker_agent_id,
            job.client_agent_id,
            job_id,
            "job_started",
            json!({"message": "Work has started on your job", "job_id": job_id}),
        )
        .await?;
        Self::insert_activity(
            &mut tx,
            "job_started",
            Some(worker_agent_id),
            Some(job_id),
            Some(job.service_id),
            json!({}),
        )
        .await?;

        tx.commit().await?;
        self.events
            .publish("job_started", json!({"job_id": job_id, "worker_id": worker_agent_id}));
        self.get(job_id).await
    }

    /// §4.4 `deliver`. Appends a new `Deliverable` versioned by count.
    pub async fn deliver(
        &self,
        job_id: Uuid,
        worker_agent_id: Uuid,
        artifact_type: String,
        content: Value,
        artifact_metadata: Option<Value>,
    ) -> Result<Job, JobError> {
        let mut tx = self.pool.begin().await?;
        let job = Self::lock_job(&mut tx, job_id).await?;

        if job.worker_agent_id != worker_agent_id {
            return Err(JobError::Forbidden("you are not the worker for this job".to_string()));
        }
        Self::require_transition(&job, JobStatus::Delivered)?;

        let existing: i64 =
            sqlx::query_scalar("SELECT count(*) FROM deliverables WHERE job_id = $1")
                .bind(job_id)
                .fetch_one(&mut *tx)
                .await?;
        let version = existing as i32 + 1;

        sqlx::query(
            r#"
            INSERT INTO deliverables (job_id, version, artifact_type, content, artifact_metadata)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(job_id)
        .bind(version)
        .bind(&artifact_type)
        .bind(&content)
        .bind(&artifact_metadata)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE jobs SET status = 'delivered', delivered_at = now() WHERE id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        Self::insert_message(
            &mut tx,
            worker_agent_id,
            job.client_agent_id,
            job_id,
            "work_delivered",
            json!({"message": "Work has been delivered", "job_id": job_id, "version": version}),
        )
        .await?;
        Self::insert_activity(
            &mut tx,
            "job_delivered",
            Some(worker_agent_id),
            Some(job_id),
            Some(job.service_id),
            json!({"version": version}),
        )
        .await?;

        tx.commit().await?;
        self.events.publish(
            "job_delivered",
            json!({"job_id": job_id, "worker_id": worker_agent_id, "version": version}),
        );
        self.get(job_id).await
    }

    /// §4.4 `request_revision`.
    pub async fn request_revision(
        &self,
        job_id: Uuid,
        client_agent_id: Uuid,
        feedback: String,
    ) -> Result<Job, JobError> {
        let mut tx = self.pool.begin().await?;
        let job = Self::lock_job(&mut tx, job_id).await?;

        if job.client_agent_id != client_agent_id {
            return Err(JobError::Forbidden("you are not the client for this job".to_string()));
        }
        Self::require_transition(&job, JobStatus::RevisionRequested)?;

        sqlx::query("UPDATE jobs SET status = 'revision_requested' WHERE id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        Self::insert_message(
            &mut tx,
            client_agent_id,
            job.worker_agent_id,
            job_id,
            "revision_requested",
            json!({"message": "Revision needed", "job_id": job_id, "feedback": feedback}),
        )
        .await?;
        Self::insert_activity(
            &mut tx,
            "job_revision_requested",
            Some(client_agent_id),
            Some(job_id),
            Some(job.service_id),
            json!({"feedback": feedback}),
        )
        .await?;

        tx.commit().await?;
        self.get(job_id).await
    }

    /// Rolls the status update, the reputation update, the ledger release,
    /// the counter bumps, and the auto-message into one transaction. If the
    /// ledger release fails, the whole transition rolls back: the job stays
    /// `delivered`/un-released rather than being marked completed with no
    /// payout (no partial settlement is exposed).
    pub async fn complete(
        &self,
        job_id: Uuid,
        client_agent_id: Uuid,
        rating: u8,
        review: Option<String>,
    ) -> Result<Job, JobError> {
        if !(1..=5).contains(&rating) {
            return Err(JobError::InvalidInput("rating must be between 1 and 5".to_string()));
        }

        let mut tx = self.pool.begin().await?;
        let job = Self::lock_job(&mut tx, job_id).await?;

        if job.client_agent_id != client_agent_id {
            return Err(JobError::Forbidden("you are not the client for this job".to_string()));
        }
        Self::require_transition(&job, JobStatus::Completed)?;

        let new_score =
            ReputationService::record_rating_in_tx(&mut tx, job.worker_agent_id, rating).await?;

        sqlx::query(
            "UPDATE jobs SET status = 'completed', completed_at = now(), rating = $2, review = $3 WHERE id = $1",
        )
        .bind(job_id)
        .bind(rating as i16)
        .bind(&review)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE agents SET jobs_completed = jobs_completed + 1, total_earned = total_earned + $2 WHERE id = $1",
        )
        .bind(job.worker_agent_id)
        .bind(job.price)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE agents SET jobs_hired = jobs_hired + 1, total_spent = total_spent + $2 WHERE id = $1",
        )
        .bind(client_agent_id)
        .bind(job.price)
        .execute(&mut *tx)
        .await?;

        // Release full escrow in the same transaction as the status flip:
        // no partial settlement here, so escrow_total == payout. The
        // refund-remainder path in Ledger::release_escrow_in_tx exists for
        // future partial-settlement use.
        Ledger::release_escrow_in_tx(
            &mut tx,
            client_agent_id,
            job.worker_agent_id,
            job_id,
            job.price,
            job.escrow_amount,
            &self.default_currency,
        )
        .await?;

        sqlx::query("UPDATE jobs SET escrow_status = 'released', released_at = now() WHERE id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        Self::insert_message(
            &mut tx,
            client_agent_id,
            job.worker_agent_id,
            job_id,
            "job_completed",
            json!({"message": format!("Job completed - Rating: {rating}/5"), "job_id": job_id, "rating": rating, "review": review}),
        )
        .await?;
        Self::insert_activity(
            &mut tx,
            "job_completed",
            Some(client_agent_id),
            Some(job_id),
            Some(job.service_id),
            json!({"rating": rating, "review": review}),
        )
        .await?;

        tx.commit().await?;

        self.events.publish(
            "job_completed",
            json!({"job_id": job_id, "rating": rating, "worker_id": job.worker_agent_id}),
        );
        self.events.publish(
            "reputation_updated",
            json!({"agent_id": job.worker_agent_id, "new_score": new_score.to_string(), "rating": rating}),
        );

        self.get(job_id).await
    }

    /// §4.4 `cancel`. The only permissible pre-work termination.
    pub async fn cancel(&self, job_id: Uuid, client_agent_id: Uuid) -> Result<Job, JobError> {
        let mut tx = self.pool.begin().await?;
        let job = Self::lock_job(&mut tx, job_id).await?;

        if job.client_agent_id != client_agent_id {
            return Err(JobError::Forbidden("you are not the client for this job".to_string()));
        }
        Self::require_transition(&job, JobStatus::Cancelled)?;

        sqlx::query("UPDATE jobs SET status = 'cancelled' WHERE id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        Ledger::refund_escrow_in_tx(&mut tx, client_agent_id, job_id, job.escrow_amount, &self.default_currency)
            .await?;

        sqlx::query("UPDATE jobs SET escrow_status = 'refunded', refunded_at = now() WHERE id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        Self::insert_message(
            &mut tx,
            client_agent_id,
            job.worker_agent_id,
            job_id,
            "job_cancelled",
            json!({"message": "Job has been cancelled", "job_id": job_id}),
        )
        .await?;
        Self::insert_activity(
            &mut tx,
            "job_cancelled",
            Some(client_agent_id),
            Some(job_id),
            Some(job.service_id),
            json!({}),
        )
        .await?;

        tx.commit().await?;

        self.events
            .publish("job_cancelled", json!({"job_id": job_id, "client_id": client_agent_id}));
        self.get(job_id).await
    }

    /// §4.4 `fail`: worker-initiated termination mid-work, same refund path
    /// as cancel.
    pub async fn fail(
        &self,
        job_id: Uuid,
        worker_agent_id: Uuid,
        reason: String,
    ) -> Result<Job, JobError> {
        let mut tx = self.pool.begin().await?;
        let job = Self::lock_job(&mut tx, job_id).await?;

        if job.worker_agent_id != worker_agent_id {
            return Err(JobError::Forbidden("you are not the worker for this job".to_string()));
        }
        Self::require_transition(&job, JobStatus::Failed)?;

        sqlx::query("UPDATE jobs SET status = 'failed' WHERE id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        Ledger::refund_escrow_in_tx(
            &mut tx,
            job.client_agent_id,
            job_id,
            job.escrow_amount,
            &self.default_currency,
        )
        .await?;

        sqlx::query("UPDATE jobs SET escrow_status = 'refunded', refunded_at = now() WHERE id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        Self::insert_message(
            &mut tx,
            worker_agent_id,
            job.client_agent_id,
            job_id,
            "job_failed",
            json!({"message": "Worker reported failure", "job_id": job_id, "reason": reason}),
        )
        .await?;
        Self::insert_activity(
            &mut tx,
            "job_failed",
            Some(worker_agent_id),
            Some(job_id),
            Some(job.service_id),
            json!({"reason": reason}),
        )
        .await?;

        tx.commit().await?;

        self.events
            .publish("job_failed", json!({"job_id": job_id, "worker_id": worker_agent_id}));
        self.get(job_id).await
    }
}
