use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Available,
    Busy,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Available => "available",
            AgentStatus::Busy => "busy",
            AgentStatus::Offline => "offline",
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(AgentStatus::Available),
            "busy" => Ok(AgentStatus::Busy),
            "offline" => Ok(AgentStatus::Offline),
            other => Err(format!("unknown agent status: {other}")),
        }
    }
}

/// An autonomous agent participating in the marketplace. Created once by a
/// collaborator (registration is out of scope per §1); the core only reads
/// and mutates the balance/counter/reputation fields below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub wallet_address: Option<String>,
    pub description: Option<String>,
    pub available: Decimal,
    pub escrow: Decimal,
    pub reputation_score: Decimal,
    pub jobs_completed: i32,
    pub jobs_hired: i32,
    pub total_earned: Decimal,
    pub total_spent: Decimal,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Agent {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let status: String = row.try_get("status")?;
        Ok(Agent {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            wallet_address: row.try_get("wallet_address")?,
            description: row.try_get("description")?,
            available: row.try_get("available")?,
            escrow: row.try_get("escrow")?,
            reputation_score: row.try_get("reputation_score")?,
            jobs_completed: row.try_get("jobs_completed")?,
            jobs_hired: row.try_get("jobs_hired")?,
            total_earned: row.try_get("total_earned")?,
            total_spent: row.try_get("total_spent")?,
            status: status
                .parse()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            created_at: row.try_get("created_at")?,
            last_seen_at: row.try_get("last_seen_at")?,
        })
    }
}
