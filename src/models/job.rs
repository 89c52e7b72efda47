use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Delivered,
    RevisionRequested,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Delivered => "delivered",
            JobStatus::RevisionRequested => "revision_requested",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed
        )
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "delivered" => Ok(JobStatus::Delivered),
            "revision_requested" => Ok(JobStatus::RevisionRequested),
            "completed" => Ok(JobStatus::Completed),
            "cancelled" => Ok(JobStatus::Cancelled),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Unfunded,
    Funded,
    Released,
    Refunded,
}

impl EscrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::Unfunded => "unfunded",
            EscrowStatus::Funded => "funded",
            EscrowStatus::Released => "released",
            EscrowStatus::Refunded => "refunded",
        }
    }
}

impl std::str::FromStr for EscrowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unfunded" => Ok(EscrowStatus::Unfunded),
            "funded" => Ok(EscrowStatus::Funded),
            "released" => Ok(EscrowStatus::Released),
            "refunded" => Ok(EscrowStatus::Refunded),
            other => Err(format!("unknown escrow status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiatedBy {
    Agent,
    Llm,
    P2p,
}

impl NegotiatedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiatedBy::Agent => "agent",
            NegotiatedBy::Llm => "llm",
            NegotiatedBy::P2p => "p2p",
        }
    }
}

impl std::str::FromStr for NegotiatedBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(NegotiatedBy::Agent),
            "llm" => Ok(NegotiatedBy::Llm),
            "p2p" => Ok(NegotiatedBy::P2p),
            other => Err(format!("unknown negotiated_by: {other}")),
        }
    }
}

/// Polymorphic pricing source accepted by `JobStateMachine::create` (§9
/// design note): a tagged variant carrying the already-validated price and
/// its provenance, rather than a set of overloaded nullable fields.
#[derive(Debug, Clone)]
pub enum PricingSource {
    /// An agreed P2P negotiation; its `current_price` becomes the job price.
    Negotiation { negotiation_id: Uuid },
    /// A pre-validated quote from the (out-of-scope) quote collaborator.
    Quote { quote_id: String, price: Decimal },
    /// No negotiation/quote supplied (or the service disallows negotiation):
    /// fall back to the service's midpoint price.
    Midpoint,
}

impl PricingSource {
    pub fn negotiated_by(&self) -> NegotiatedBy {
        match self {
            PricingSource::Negotiation { .. } => NegotiatedBy::P2p,
            PricingSource::Quote { .. } => NegotiatedBy::Llm,
            PricingSource::Midpoint => NegotiatedBy::Agent,
        }
    }
}

/// A hired unit of work. `price` is locked at creation and never mutated
/// (invariant in §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub service_id: Uuid,
    pub client_agent_id: Uuid,
    pub worker_agent_id: Uuid,
    pub parent_job_id: Option<Uuid>,
    pub negotiation_id: Option<Uuid>,
    pub quote_id: Option<String>,
    pub negotiated_by: NegotiatedBy,
    pub title: String,
    pub input_data: Value,
    pub price: Decimal,
    pub status: JobStatus,
    pub escrow_status: EscrowStatus,
    pub escrow_amount: Decimal,
    pub rating: Option<i16>,
    pub review: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub escrowed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Allowed forward transitions per §4.4's state diagram.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self.status, next),
            (JobStatus::Pending, JobStatus::InProgress)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::InProgress, JobStatus::Delivered)
                | (JobStatus::InProgress, JobStatus::Failed)
                | (JobStatus::Delivered, JobStatus::Completed)
                | (JobStatus::Delivered, JobStatus::RevisionRequested)
                | (JobStatus::RevisionRequested, JobStatus::Delivered)
        )
    }
}

impl<'r> FromRow<'r, PgRow> for Job {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let status: String = row.try_get("status")?;
        let escrow_status: String = row.try_get("escrow_status")?;
        let negotiated_by: String = row.try_get("negotiated_by")?;
        Ok(Job {
            id: row.try_get("id")?,
            service_id: row.try_get("service_id")?,
            client_agent_id: row.try_get("client_agent_id")?,
            worker_agent_id: row.try_get("worker_agent_id")?,
            parent_job_id: row.try_get("parent_job_id")?,
            negotiation_id: row.try_get("negotiation_id")?,
            quote_id: row.try_get("quote_id")?,
            negotiated_by: negotiated_by
                .parse()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            title: row.try_get("title")?,
            input_data: row.try_get("input_data")?,
            price: row.try_get("price")?,
            status: status
                .parse()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            escrow_status: escrow_status
                .parse()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            escrow_amount: row.try_get("escrow_amount")?,
            rating: row.try_get("rating")?,
            review: row.try_get("review")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            delivered_at: row.try_get("delivered_at")?,
            completed_at: row.try_get("completed_at")?,
            escrowed_at: row.try_get("escrowed_at")?,
            released_at: row.try_get("released_at")?,
            refunded_at: row.try_get("refunded_at")?,
        })
    }
}
