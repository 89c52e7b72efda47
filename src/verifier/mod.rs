//! Admits external on-chain payments into the Ledger exactly once, under
//! adversarial replay (§4.2).

use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::chain_adapter::{scale_by_decimals, ChainAdapter, ChainAdapterError};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::event_bus::EventBus;
use crate::ledger::{Ledger, LedgerError};
use crate::models::{PaymentTransaction, TransactionStatus, TransactionType};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("transaction already processed: {0}")]
    AlreadyProcessed(String),

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<VerifyError> for AppError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::AlreadyProcessed(m) => AppError::AlreadyProcessed(m),
            VerifyError::VerificationFailed(m) => AppError::VerificationFailed(m),
            VerifyError::InvalidInput(m) => AppError::InvalidInput(m),
            VerifyError::NotFound(m) => AppError::NotFound(m),
            VerifyError::Upstream(m) => AppError::Upstream(m),
            VerifyError::Ledger(e) => e.into(),
            VerifyError::Database(e) => AppError::Database(e),
        }
    }
}

pub struct VerifyRequest {
    pub tx_hash: String,
    pub expected_amount: Decimal,
    pub currency: String,
    pub initiator_agent_id: Uuid,
    pub transaction_type: TransactionType,
    pub recipient_agent_id: Option<Uuid>,
    pub token_address: Option<String>,
}

#[derive(Clone)]
pub struct PaymentVerifier {
    pool: PgPool,
    ledger: Ledger,
    chain: Arc<dyn ChainAdapter>,
    config: AppConfig,
    events: EventBus,
}

/// Normalizes a submitted tx hash: trims whitespace, lowercases, ensures a
/// `0x` prefix, then length-validates to 64 hex digits after the prefix.
pub fn normalize_tx_hash(raw: &str) -> Result<String, VerifyError> {
    let trimmed = raw.trim().to_lowercase();
    let hash = if trimmed.starts_with("0x") {
        trimmed
    } else {
        format!("0x{trimmed}")
    };
    let body = &hash[2..];
    if body.len() != 64 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(VerifyError::InvalidInput(format!(
            "tx_hash must be 64 hex digits after 0x prefix, got {}",
            body.len()
        )));
    }
    Ok(hash)
}

impl PaymentVerifier {
    pub fn new(
        pool: PgPool,
        ledger: Ledger,
        chain: Arc<dyn ChainAdapter>,
        config: AppConfig,
        events: EventBus,
    ) -> Self {
        Self {
            pool,
            ledger,
            chain,
            config,
            events,
        }
    }

    async fn find_by_hash(&self, tx_hash: &str) -> Result<Option<PaymentTransaction>, VerifyError> {
        let tx = sqlx::query_as::<_, PaymentTransaction>(
            "SELECT * FROM payment_transactions WHERE tx_hash = $1",
        )
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tx)
    }

    async fn recipient_address(
        &self,
        transaction_type: TransactionType,
        recipient_agent_id: Option<Uuid>,
    ) -> Result<String, VerifyError> {
        match transaction_type {
            TransactionType::TopUp | TransactionType::Refund => {
                Ok(self.config.platform_wallet_address.clone())
            }
            TransactionType::P2p => {
                let recipient_id = recipient_agent_id.ok_or_else(|| {
                    VerifyError::InvalidInput("p2p payment requires recipient_agent_id".to_string())
                })?;
                let wallet: Option<String> =
                    sqlx::query_scalar("SELECT wallet_address FROM agents WHERE id = $1")
                        .bind(recipient_id)
                        .fetch_optional(&self.pool)
                        .await?
                        .ok_or_else(|| {
                            VerifyError::NotFound(format!("agent {recipient_id}"))
                        })?;
                wallet.filter(|w| !w.is_empty()).ok_or_else(|| {
                    VerifyError::InvalidInput(format!(
                        "recipient agent {recipient_id} has no wallet address configured"
                    ))
                })
            }
        }
    }

    /// Runs the full §4.2 procedure: replay check, pending record, on-chain
    /// verification, credit. Returns the credited agent's new `available`
    /// balance.
    pub async fn verify_and_credit(&self, req: VerifyRequest) -> Result<Decimal, VerifyError> {
        let tx_hash = normalize_tx_hash(&req.tx_hash)?;

        if let Some(existing) = self.find_by_hash(&tx_hash).await? {
            match existing.status {
                TransactionStatus::Credited => {
                    return Err(VerifyError::AlreadyProcessed(format!(
                        "transaction {tx_hash} already credited"
                    )));
                }
                TransactionStatus::Verified => {
                    return self.complete_credit(existing).await;
                }
                TransactionStatus::Failed => {
                    sqlx::query("DELETE FROM payment_transactions WHERE id = $1")
                        .bind(existing.id)
                        .execute(&self.pool)
                        .await?;
                }
                TransactionStatus::Pending => {
                    // A concurrent submission is mid-flight; treat this one
                    // as a retry candidate by falling through to a fresh
                    // verification attempt rather than double-inserting.
                    return self.reverify(existing).await;
                }
            }
        }

        let to_address = self
            .recipient_address(req.transaction_type, req.recipient_agent_id)
            .await?;
        let token_address = req
            .token_address
            .clone()
            .unwrap_or_else(|| self.config.platform_token_address.clone());

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO payment_transactions
                (id, tx_hash, amount, currency, transaction_type, status,
                 initiator_agent_id, recipient_agent_id, to_address, token_address)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $8, $9)
            "#,
        )
        .bind(id)
        .bind(&tx_hash)
        .bind(req.expected_amount)
        .bind(&req.currency)
        .bind(req.transaction_type.as_str())
        .bind(req.initiator_agent_id)
        .bind(req.recipient_agent_id)
        .bind(&to_address)
        .bind(&token_address)
        .execute(&self.pool)
        .await?;

        let pending = self
            .find_by_hash(&tx_hash)
            .await?
            .expect("just inserted");

        self.run_verification(pending, &to_address, &token_address).await
    }

    async fn reverify(&self, pending: PaymentTransaction) -> Result<Decimal, VerifyError> {
        let to_address = pending.to_address.clone();
        let token_address = pending
            .token_address
            .clone()
            .unwrap_or_else(|| self.config.platform_token_address.clone());
        self.run_verification(pending, &to_address, &token_address).await
    }

    async fn run_verification(
        &self,
        pending: PaymentTransaction,
        to_address: &str,
        token_address: &str,
    ) -> Result<Decimal, VerifyError> {
        match self.check_on_chain(&pending, to_address, token_address).await {
            Ok((block_number, from_address)) => {
                sqlx::query(
                    "UPDATE payment_transactions SET status = 'verified', verified_at = now(), block_number = $2, from_address = $3 WHERE id = $1",
                )
                .bind(pending.id)
                .bind(block_number)
                .bind(from_address)
                .execute(&self.pool)
                .await?;
            }
            Err(VerifyError::Upstream(reason)) => {
                // Transient: the receipt was never confirmed, so the row
                // stays `pending` and a retry re-enters this same path
                // (§5's deadline/timeout model), rather than being marked
                // `verified` or `failed` prematurely.
                return Err(VerifyError::Upstream(reason));
            }
            Err(VerifyError::VerificationFailed(reason)) => {
                sqlx::query(
                    "UPDATE payment_transactions SET status = 'failed', failure_reason = $2 WHERE id = $1",
                )
                .bind(pending.id)
                .bind(&reason)
                .execute(&self.pool)
                .await?;
                return Err(VerifyError::VerificationFailed(reason));
            }
            Err(other) => return Err(other),
        }

        let refreshed = self
            .find_by_hash(&pending.tx_hash)
            .await?
            .expect("row exists, we just updated it");
        self.complete_credit(refreshed).await
    }

    /// Verifies `pending` against the chain and, on success, returns the
    /// receipt's `block_number` and `from_address` for persistence.
    async fn check_on_chain(
        &self,
        pending: &PaymentTransaction,
        to_address: &str,
        token_address: &str,
    ) -> Result<(i64, String), VerifyError> {
        let receipt = self
            .chain
            .get_receipt(&pending.tx_hash)
            .await
            .map_err(|e| match e {
                ChainAdapterError::NotFound(_) => {
                    VerifyError::VerificationFailed("transaction receipt not found".to_string())
                }
                ChainAdapterError::Rpc(msg) => VerifyError::Upstream(msg),
            })?;

        if !receipt.success {
            return Err(VerifyError::VerificationFailed(
                "transaction execution failed on-chain".to_string(),
            ));
        }

        let decimals = self
            .chain
            .token_decimals(token_address)
            .await
            .map_err(|e| match e {
                ChainAdapterError::NotFound(_) => {
                    VerifyError::VerificationFailed("token contract not found".to_string())
                }
                ChainAdapterError::Rpc(msg) => VerifyError::Upstream(msg),
            })?;

        let target_token = token_address.to_lowercase();
        let target_to = to_address.to_lowercase();

        let mut saw_recipient_mismatch = false;
        let mut saw_amount_mismatch = false;

        for log in &receipt.logs {
            if log.address.to_lowercase() != target_token {
                continue;
            }
            let Some(transfer) = log.decode_transfer() else {
                continue;
            };
            if transfer.to != target_to {
                saw_recipient_mismatch = true;
                continue;
            }
            let amount_human = scale_by_decimals(transfer.value, decimals);
            if amount_human == pending.amount {
                return Ok((receipt.block_number, receipt.from.clone()));
            }
            saw_amount_mismatch = true;
        }

        if saw_amount_mismatch {
            Err(VerifyError::VerificationFailed(
                "transfer amount does not match expected amount".to_string(),
            ))
        } else if saw_recipient_mismatch {
            Err(VerifyError::VerificationFailed(
                "transfer recipient does not match expected recipient".to_string(),
            ))
        } else {
            Err(VerifyError::VerificationFailed(
                "no matching ERC-20 Transfer event found in receipt".to_string(),
            ))
        }
    }

    async fn complete_credit(&self, tx: PaymentTransaction) -> Result<Decimal, VerifyError> {
        let credit_target = tx.credit_target().ok_or_else(|| {
            VerifyError::InvalidInput("payment transaction has no credit target".to_string())
        })?;

        match self
            .ledger
            .credit(credit_target, tx.amount, &tx.currency, &tx.id.to_string())
            .await
        {
            Ok(new_balance) => {
                sqlx::query(
                    "UPDATE payment_transactions SET status = 'credited', credited_at = now() WHERE id = $1",
                )
                .bind(tx.id)
                .execute(&self.pool)
                .await?;

                self.events.publish(
                    "payment_credited",
                    serde_json::json!({
                        "tx_hash": tx.tx_hash,
                        "agent_id": credit_target,
                        "amount": tx.amount.to_string(),
                    }),
                );

                Ok(new_balance)
            }
            Err(err) => {
                sqlx::query(
                    "UPDATE payment_transactions SET failure_reason = $2 WHERE id = $1",
                )
                .bind(tx.id)
                .bind(err.to_string())
                .execute(&self.pool)
                .await?;
                Err(VerifyError::Ledger(err))
            }
        }
    }
}
