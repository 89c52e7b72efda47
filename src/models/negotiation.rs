use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    Active,
    Agreed,
    Rejected,
    Expired,
}

impl NegotiationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationStatus::Active => "active",
            NegotiationStatus::Agreed => "agreed",
            NegotiationStatus::Rejected => "rejected",
            NegotiationStatus::Expired => "expired",
        }
    }
}

impl std::str::FromStr for NegotiationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(NegotiationStatus::Active),
            "agreed" => Ok(NegotiationStatus::Agreed),
            "rejected" => Ok(NegotiationStatus::Rejected),
            "expired" => Ok(NegotiationStatus::Expired),
            other => Err(format!("unknown negotiation status: {other}")),
        }
    }
}

/// Which side of a negotiation or job an agent plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Worker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Worker => "worker",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Role::Client),
            "worker" => Ok(Role::Worker),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferAction {
    Offer,
    Counter,
    Accept,
    Reject,
}

impl OfferAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferAction::Offer => "offer",
            OfferAction::Counter => "counter",
            OfferAction::Accept => "accept",
            OfferAction::Reject => "reject",
        }
    }
}

/// Bounded bilateral price discovery between a client and a worker over a
/// single service. See §4.3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Negotiation {
    pub id: Uuid,
    pub service_id: Uuid,
    pub client_agent_id: Uuid,
    pub worker_agent_id: Uuid,
    pub job_description: String,
    pub status: NegotiationStatus,
    pub current_price: Decimal,
    pub current_proposer: Role,
    pub service_min_price: Decimal,
    pub service_max_price: Decimal,
    pub client_max_price: Option<Decimal>,
    pub round_count: i32,
    pub max_rounds: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub agreed_at: Option<DateTime<Utc>>,
}

impl Negotiation {
    /// Upper bound currently in force: the service max tightened by the
    /// client's stated budget, if any (invariant in §3).
    pub fn effective_max_price(&self) -> Decimal {
        match self.client_max_price {
            Some(cap) => self.service_max_price.min(cap),
            None => self.service_max_price,
        }
    }

    pub fn is_participant(&self, agent_id: Uuid) -> Option<Role> {
        if agent_id == self.client_agent_id {
            Some(Role::Client)
        } else if agent_id == self.worker_agent_id {
            Some(Role::Worker)
        } else {
            None
        }
    }
}

impl<'r> FromRow<'r, PgRow> for Negotiation {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let status: String = row.try_get("status")?;
        let current_proposer: String = row.try_get("current_proposer")?;
        Ok(Negotiation {
            id: row.try_get("id")?,
            service_id: row.try_get("service_id")?,
            client_agent_id: row.try_get("client_agent_id")?,
            worker_agent_id: row.try_get("worker_agent_id")?,
            job_description: row.try_get("job_description")?,
            status: status
                .parse()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            current_price: row.try_get("current_price")?,
            current_proposer: current_proposer
                .parse()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            service_min_price: row.try_get("service_min_price")?,
            service_max_price: row.try_get("service_max_price")?,
            client_max_price: row.try_get("client_max_price")?,
            round_count: row.try_get("round_count")?,
            max_rounds: row.try_get("max_rounds")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            agreed_at: row.try_get("agreed_at")?,
        })
    }
}

/// One entry in a negotiation's append-only audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationOffer {
    pub id: Uuid,
    pub negotiation_id: Uuid,
    pub agent_id: Uuid,
    pub agent_role: Role,
    pub action: OfferAction,
    pub price: Decimal,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for NegotiationOffer {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let agent_role: String = row.try_get("agent_role")?;
        let action: String = row.try_get("action")?;
        Ok(NegotiationOffer {
            id: row.try_get("id")?,
            negotiation_id: row.try_get("negotiation_id")?,
            agent_id: row.try_get("agent_id")?,
            agent_role: agent_role
                .parse()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            action: match action.as_str() {
                "offer" => OfferAction::Offer,
                "counter" => OfferAction::Counter,
                "accept" => OfferAction::Accept,
                "reject" => OfferAction::Reject,
                other => {
                    return Err(sqlx::Error::Decode(
                        format!("unknown offer action: {other}").into(),
                    ))
                }
            },
            price: row.try_get("price")?,
            message: row.try_get("message")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
