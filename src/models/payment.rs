use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    TopUp,
    P2p,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::TopUp => "top_up",
            TransactionType::P2p => "p2p",
            TransactionType::Refund => "refund",
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top_up" => Ok(TransactionType::TopUp),
            "p2p" => Ok(TransactionType::P2p),
            "refund" => Ok(TransactionType::Refund),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Verified,
    Credited,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Verified => "verified",
            TransactionStatus::Credited => "credited",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "verified" => Ok(TransactionStatus::Verified),
            "credited" => Ok(TransactionStatus::Credited),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// Immutable record of an external on-chain payment, keyed by its unique
/// transaction hash. Progresses monotonically pending -> verified -> credited,
/// or to failed. See §4.2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub tx_hash: String,
    pub amount: Decimal,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub initiator_agent_id: Uuid,
    pub recipient_agent_id: Option<Uuid>,
    pub to_address: String,
    pub token_address: Option<String>,
    pub block_number: Option<i64>,
    pub from_address: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub credited_at: Option<DateTime<Utc>>,
}

impl PaymentTransaction {
    /// Which agent receives the eventual `Ledger::credit` call.
    pub fn credit_target(&self) -> Option<Uuid> {
        match self.transaction_type {
            TransactionType::TopUp => Some(self.initiator_agent_id),
            TransactionType::P2p => self.recipient_agent_id,
            TransactionType::Refund => Some(self.initiator_agent_id),
        }
    }
}

impl<'r> FromRow<'r, PgRow> for PaymentTransaction {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let transaction_type: String = row.try_get("transaction_type")?;
        let status: String = row.try_get("status")?;
        Ok(PaymentTransaction {
            id: row.try_get("id")?,
            tx_hash: row.try_get("tx_hash")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            transaction_type: transaction_type
                .parse()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            status: status
                .parse()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            initiator_agent_id: row.try_get("initiator_agent_id")?,
            recipient_agent_id: row.try_get("recipient_agent_id")?,
            to_address: row.try_get("to_address")?,
            token_address: row.try_get("token_address")?,
            block_number: row.try_get("block_number")?,
            from_address: row.try_get("from_address")?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
            verified_at: row.try_get("verified_at")?,
            credited_at: row.try_get("credited_at")?,
        })
    }
}
