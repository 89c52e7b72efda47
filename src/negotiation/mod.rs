//! Bounded bilateral price discovery between a client and a worker over a
//! single service (§4.3).

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::models::{Negotiation, NegotiationOffer, NegotiationStatus, OfferAction, Role, Service};

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("expired: {0}")]
    Expired(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<NegotiationError> for AppError {
    fn from(err: NegotiationError) -> Self {
        match err {
            NegotiationError::NotFound(m) => AppError::NotFound(m),
            NegotiationError::InvalidInput(m) => AppError::InvalidInput(m),
            NegotiationError::InvalidState(m) => AppError::InvalidState(m),
            NegotiationError::Forbidden(m) => AppError::Forbidden(m),
            NegotiationError::InsufficientFunds(m) => AppError::InsufficientFunds(m),
            NegotiationError::Expired(m) => AppError::Expired(m),
            NegotiationError::Database(e) => AppError::Database(e),
        }
    }
}

pub enum RespondAction {
    Accept,
    Counter { new_price: Decimal },
    Reject,
}

#[derive(Clone)]
pub struct NegotiationEngine {
    pool: PgPool,
    config: AppConfig,
}

impl NegotiationEngine {
    pub fn new(pool: PgPool, config: AppConfig) -> Self {
        Self { pool, config }
    }

    async fn load(&self, id: Uuid) -> Result<Negotiation, NegotiationError> {
        sqlx::query_as::<_, Negotiation>("SELECT * FROM negotiations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| NegotiationError::NotFound(format!("negotiation {id}")))
    }

    async fn append_offer(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        negotiation_id: Uuid,
        agent_id: Uuid,
        agent_role: Role,
        action: OfferAction,
        price: Decimal,
        message: Option<String>,
    ) -> Result<(), NegotiationError> {
        sqlx::query(
            r#"
            INSERT INTO negotiation_offers
                (negotiation_id, agent_id, agent_role, action, price, message)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(negotiation_id)
        .bind(agent_id)
        .bind(agent_role.as_str())
        .bind(action.as_str())
        .bind(price)
        .bind(message)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// §4.3 `start`. `client_max_price` and `message` are optional; when no
    /// message is supplied one is generated from the job description,
    /// matching the original's default.
    pub async fn start(
        &self,
        client_agent_id: Uuid,
        service: &Service,
        job_description: String,
        initial_offer: Decimal,
        client_max_price: Option<Decimal>,
        message: Option<String>,
    ) -> Result<Negotiation, NegotiationError> {
        if initial_offer < service.min_price || initial_offer > service.max_price {
            return Err(NegotiationError::InvalidInput(format!(
                "initial offer {initial_offer} outside service bounds [{}, {}]",
                service.min_price, service.max_price
            )));
        }
        if let Some(cap) = client_max_price {
            if initial_offer > cap {
                return Err(NegotiationError::InvalidInput(
                    "initial offer exceeds client max price".to_string(),
                ));
            }
        }

        let client_available: Decimal =
            sqlx::query_scalar("SELECT available FROM agents WHERE id = $1")
                .bind(client_agent_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| NegotiationError::NotFound(format!("agent {client_agent_id}")))?;

        if client_available < initial_offer {
            return Err(NegotiationError::InsufficientFunds(format!(
                "client has {client_available}, needs {initial_offer}"
            )));
        }

        let expires_at = Utc::now() + Duration::hours(self.config.negotiation_ttl_hours);

        let mut tx = self.pool.begin().await?;

        let negotiation_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO negotiations
                (service_id, client_agent_id, worker_agent_id, job_description, status,
                 current_price, current_proposer, service_min_price, service_max_price,
                 client_max_price, round_count, max_rounds, expires_at)
            VALUES ($1, $2, $3, $4, 'active', $5, 'client', $6, $7, $8, 1, $9, $10)
            RETURNING id
            "#,
        )
        .bind(service.id)
        .bind(client_agent_id)
        .bind(service.agent_id)
        .bind(&job_description)
        .bind(initial_offer)
        .bind(service.min_price)
        .bind(service.max_price)
        .bind(client_max_price)
        .bind(self.config.default_max_rounds)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await?;

        let offer_message =
            message.unwrap_or_else(|| format!("Initial offer for: {job_description}"));

        self.append_offer(
            &mut tx,
            negotiation_id,
            client_agent_id,
            Role::Client,
            OfferAction::Offer,
            initial_offer,
            Some(offer_message),
        )
        .await?;

        tx.commit().await?;

        self.load(negotiation_id).await
    }

    /// §4.3 `respond`. Locks the negotiation row `FOR UPDATE` so concurrent
    /// accept races linearize (§5, §8 scenario 6): the first to commit wins,
    /// the second observes the post-commit state and fails `InvalidState`.
    pub async fn respond(
        &self,
        negotiation_id: Uuid,
        agent_id: Uuid,
        action: RespondAction,
        message: Option<String>,
    ) -> Result<Negotiation, NegotiationError> {
        let mut tx = self.pool.begin().await?;

        let negotiation = sqlx::query_as::<_, Negotiation>(
            "SELECT * FROM negotiations WHERE id = $1 FOR UPDATE",
        )
        .bind(negotiation_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| NegotiationError::NotFound(format!("negotiation {negotiation_id}")))?;

        if negotiation.status != NegotiationStatus::Active {
            return Err(NegotiationError::InvalidState(format!(
                "negotiation is {}, cannot respond",
                negotiation.status.as_str()
            )));
        }

        if Utc::now() > negotiation.expires_at {
            sqlx::query("UPDATE negotiations SET status = 'expired' WHERE id = $1")
                .bind(negotiation_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Err(NegotiationError::Expired(format!(
                "negotiation {negotiation_id} expired"
            )));
        }

        let role = negotiation
            .is_participant(agent_id)
            .ok_or_else(|| NegotiationError::Forbidden("not part of this negotiation".to_string()))?;

        if negotiation.current_proposer == role {
            return Err(NegotiationError::InvalidState(
                "waiting for other party to respond".to_string(),
            ));
        }

        let (offer_action, final_price) = match action {
            RespondAction::Accept => {
                sqlx::query(
                    "UPDATE negotiations SET status = 'agreed', agreed_at = now() WHERE id = $1",
                )
                .bind(negotiation_id)
                .execute(&mut *tx)
                .await?;
                (OfferAction::Accept, negotiation.current_price)
            }
            RespondAction::Counter { new_price } => {
                if new_price < negotiation.service_min_price
                    || new_price > negotiation.service_max_price
                {
                    return Err(NegotiationError::InvalidInput(format!(
                        "counter {new_price} outside service bounds [{}, {}]",
                        negotiation.service_min_price, negotiation.service_max_price
                    )));
                }
                if role == Role::Client {
                    if new_price > negotiation.effective_max_price() {
                        return Err(NegotiationError::InvalidInput(
                            "counter exceeds client max price".to_string(),
                        ));
                    }
                    let available: Decimal =
                        sqlx::query_scalar("SELECT available FROM agents WHERE id = $1")
                            .bind(agent_id)
                            .fetch_one(&mut *tx)
                            .await?;
                    if available < new_price {
                        return Err(NegotiationError::InsufficientFunds(format!(
                            "client has {available}, needs {new_price}"
                        )));
                    }
                }

                let round_count = negotiation.round_count + 1;
                if round_count > negotiation.max_rounds {
                    sqlx::query("UPDATE negotiations SET status = 'rejected', round_count = $2 WHERE id = $1")
                        .bind(negotiation_id)
                        .bind(round_count)
                        .execute(&mut *tx)
                        .await?;
                    self.append_offer(
                        &mut tx,
                        negotiation_id,
                        agent_id,
                        role,
                        OfferAction::Reject,
                        negotiation.current_price,
                        Some("maximum negotiation rounds reached".to_string()),
                    )
                    .await?;
                    tx.commit().await?;
                    return Err(NegotiationError::InvalidState(format!(
                        "maximum negotiation rounds ({}) reached",
                        negotiation.max_rounds
                    )));
                }

                sqlx::query(
                    "UPDATE negotiations SET current_price = $2, current_proposer = $3, round_count = $4 WHERE id = $1",
                )
                .bind(negotiation_id)
                .bind(new_price)
                .bind(role.as_str())
                .bind(round_count)
                .execute(&mut *tx)
                .await?;
                (OfferAction::Counter, new_price)
            }
            RespondAction::Reject => {
                sqlx::query("UPDATE negotiations SET status = 'rejected' WHERE id = $1")
                    .bind(negotiation_id)
                    .execute(&mut *tx)
                    .await?;
                (OfferAction::Reject, negotiation.current_price)
            }
        };

        self.append_offer(
            &mut tx,
            negotiation_id,
            agent_id,
            role,
            offer_action,
            final_price,
            message,
        )
        .await?;

        tx.commit().await?;
        self.load(negotiation_id).await
    }

    pub async fn get(&self, negotiation_id: Uuid) -> Result<Negotiation, NegotiationError> {
        self.load(negotiation_id).await
    }

    pub async fn offers(
        &self,
        negotiation_id: Uuid,
    ) -> Result<Vec<NegotiationOffer>, NegotiationError> {
        let offers = sqlx::query_as::<_, NegotiationOffer>(
            "SELECT * FROM negotiation_offers WHERE negotiation_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(negotiation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(offers)
    }
}
