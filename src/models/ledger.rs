use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerTransactionType {
    EscrowLock,
    EscrowRelease,
    EscrowRefund,
    Credit,
}

impl LedgerTransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerTransactionType::EscrowLock => "escrow_lock",
            LedgerTransactionType::EscrowRelease => "escrow_release",
            LedgerTransactionType::EscrowRefund => "escrow_refund",
            LedgerTransactionType::Credit => "credit",
        }
    }
}

impl std::str::FromStr for LedgerTransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "escrow_lock" => Ok(LedgerTransactionType::EscrowLock),
            "escrow_release" => Ok(LedgerTransactionType::EscrowRelease),
            "escrow_refund" => Ok(LedgerTransactionType::EscrowRefund),
            "credit" => Ok(LedgerTransactionType::Credit),
            other => Err(format!("unknown ledger transaction type: {other}")),
        }
    }
}

/// Write-only journal entry. Never mutated after insertion; the sum of
/// these across an agent's lifetime is the audit-source-of-truth for its
/// balances (invariant in §3/§8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: Uuid,
    pub job_id: Option<Uuid>,
    pub agent_id: Uuid,
    pub counterparty_agent_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub transaction_type: LedgerTransactionType,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for LedgerTransaction {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let transaction_type: String = row.try_get("transaction_type")?;
        Ok(LedgerTransaction {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            agent_id: row.try_get("agent_id")?,
            counterparty_agent_id: row.try_get("counterparty_agent_id")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            transaction_type: transaction_type
                .parse()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
