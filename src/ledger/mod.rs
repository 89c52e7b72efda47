//! Single authority for atomic balance movement (§4.1).
//!
//! Every operation locks the affected agent rows in ascending-id order with
//! `SELECT ... FOR UPDATE`, performs the arithmetic, appends one or more
//! `LedgerTransaction` rows. The `_in_tx` associated functions take the
//! caller's transaction directly so a ledger move can be joined into a
//! larger transition (e.g. the Job State Machine's status update) and commit
//! or roll back as one unit; the plain methods open and commit their own
//! transaction for callers (like the Payment Verifier) that only need the
//! ledger move itself to be atomic. The ledger does not deduplicate: callers
//! that need idempotency supply their own key (a job id for escrow moves, a
//! payment transaction id for credits) and are responsible for not calling
//! twice.

use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::LedgerTransactionType;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("agent not found: {0}")]
    AgentNotFound(Uuid),

    #[error("insufficient available balance: agent {agent} has {available}, needs {required}")]
    InsufficientFunds {
        agent: Uuid,
        available: Decimal,
        required: Decimal,
    },

    #[error("insufficient escrow balance: agent {agent} has {escrow} escrowed, needs {required}")]
    InsufficientEscrow {
        agent: Uuid,
        escrow: Decimal,
        required: Decimal,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AgentNotFound(id) => AppError::NotFound(format!("agent {id}")),
            LedgerError::InsufficientFunds { .. } | LedgerError::InsufficientEscrow { .. } => {
                AppError::InsufficientFunds(err.to_string())
            }
            LedgerError::Database(e) => AppError::Database(e),
        }
    }
}

#[derive(Clone)]
pub struct Ledger {
    pool: PgPool,
}

impl Ledger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Locks a single agent row `FOR UPDATE`. Ascending-id ordering only
    /// matters when more than one agent is touched in the same operation;
    /// `lock_escrow` and `refund_escrow` touch one agent so this suffices.
    async fn lock_agent(
        tx: &mut Transaction<'_, Postgres>,
        agent_id: Uuid,
    ) -> Result<(Decimal, Decimal), LedgerError> {
        let row = sqlx::query_as::<_, (Decimal, Decimal)>(
            "SELECT available, escrow FROM agents WHERE id = $1 FOR UPDATE",
        )
        .bind(agent_id)
        .fetch_optional(&mut **tx)
        .await?;

        row.ok_or(LedgerError::AgentNotFound(agent_id))
    }

    /// Locks two agent rows in ascending id order to avoid deadlocking
    /// against a concurrent operation that touches the same pair (§5).
    async fn lock_pair(
        tx: &mut Transaction<'_, Postgres>,
        a: Uuid,
        b: Uuid,
    ) -> Result<(), LedgerError> {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        sqlx::query("SELECT id FROM agents WHERE id = $1 FOR UPDATE")
            .bind(first)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(LedgerError::AgentNotFound(first))?;
        sqlx::query("SELECT id FROM agents WHERE id = $1 FOR UPDATE")
            .bind(second)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(LedgerError::AgentNotFound(second))?;
        Ok(())
    }

    async fn write_entry(
        tx: &mut Transaction<'_, Postgres>,
        job_id: Option<Uuid>,
        agent_id: Uuid,
        counterparty_agent_id: Option<Uuid>,
        amount: Decimal,
        currency: &str,
        transaction_type: LedgerTransactionType,
        idempotency_key: &str,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO ledger_transactions
                (job_id, agent_id, counterparty_agent_id, amount, currency, transaction_type, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(job_id)
        .bind(agent_id)
        .bind(counterparty_agent_id)
        .bind(amount)
        .bind(currency)
        .bind(transaction_type.as_str())
        .bind(json!({ "idempotency_key": idempotency_key }))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Increments an agent's available balance within the caller's
    /// transaction. Used by the Payment Verifier to admit external funds;
    /// `idempotency_key` is normally the `PaymentTransaction` id.
    pub async fn credit_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        agent_id: Uuid,
        amount: Decimal,
        currency: &str,
        idempotency_key: &str,
    ) -> Result<Decimal, LedgerError> {
        Self::lock_agent(tx, agent_id).await?;

        let new_available: Decimal = sqlx::query_scalar(
            "UPDATE agents SET available = available + $1 WHERE id = $2 RETURNING available",
        )
        .bind(amount)
        .bind(agent_id)
        .fetch_one(&mut **tx)
        .await?;

        Self::write_entry(
            tx,
            None,
            agent_id,
            None,
            amount,
            currency,
            LedgerTransactionType::Credit,
            idempotency_key,
        )
        .await?;

        Ok(new_available)
    }

    /// Increments an agent's available balance, committing in its own
    /// transaction.
    pub async fn credit(
        &self,
        agent_id: Uuid,
        amount: Decimal,
        currency: &str,
        idempotency_key: &str,
    ) -> Result<Decimal, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let new_available = Self::credit_in_tx(&mut tx, agent_id, amount, currency, idempotency_key).await?;
        tx.commit().await?;
        Ok(new_available)
    }

    /// Moves `amount` from `client`'s available balance into escrow against
    /// `job_id`, within the caller's transaction. Fails with
    /// `InsufficientFunds` if the client cannot cover it.
    pub async fn lock_escrow_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        client: Uuid,
        job_id: Uuid,
        amount: Decimal,
        currency: &str,
    ) -> Result<(), LedgerError> {
        let (available, _escrow) = Self::lock_agent(tx, client).await?;

        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                agent: client,
                available,
                required: amount,
            });
        }

        sqlx::query("UPDATE agents SET available = available - $1, escrow = escrow + $1 WHERE id = $2")
            .bind(amount)
            .bind(client)
            .execute(&mut **tx)
            .await?;

        Self::write_entry(
            tx,
            Some(job_id),
            client,
            None,
            amount,
            currency,
            LedgerTransactionType::EscrowLock,
            &job_id.to_string(),
        )
        .await?;

        Ok(())
    }

    /// Moves `amount` from `client`'s available balance into escrow against
    /// `job_id`, committing in its own transaction. The caller (Job State
    /// Machine) rolls the whole job creation back on failure.
    pub async fn lock_escrow(
        &self,
        client: Uuid,
        job_id: Uuid,
        amount: Decimal,
        currency: &str,
    ) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_escrow_in_tx(&mut tx, client, job_id, amount, currency).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Releases a funded job's escrow within the caller's transaction:
    /// `payout_amount` goes to the worker's available balance, the
    /// remainder (`escrow_total - payout_amount`) refunds to the client's
    /// available balance. Writes an `escrow_release` entry and, if there is
    /// a remainder, an `escrow_refund` entry.
    pub async fn release_escrow_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        client: Uuid,
        worker: Uuid,
        job_id: Uuid,
        payout_amount: Decimal,
        escrow_total: Decimal,
        currency: &str,
    ) -> Result<(), LedgerError> {
        if payout_amount < Decimal::ZERO || payout_amount > escrow_total {
            return Err(LedgerError::InsufficientEscrow {
                agent: client,
                escrow: escrow_total,
                required: payout_amount,
            });
        }

        Self::lock_pair(tx, client, worker).await?;

        let client_escrow: Decimal = sqlx::query_scalar("SELECT escrow FROM agents WHERE id = $1")
            .bind(client)
            .fetch_one(&mut **tx)
            .await?;

        if client_escrow < escrow_total {
            return Err(LedgerError::InsufficientEscrow {
                agent: client,
                escrow: client_escrow,
                required: escrow_total,
            });
        }

        let refund_amount = escrow_total - payout_amount;

        sqlx::query("UPDATE agents SET escrow = escrow - $1 WHERE id = $2")
            .bind(escrow_total)
            .bind(client)
            .execute(&mut **tx)
            .await?;
        sqlx::query("UPDATE agents SET available = available + $1 WHERE id = $2")
            .bind(payout_amount)
            .bind(worker)
            .execute(&mut **tx)
            .await?;
        if refund_amount > Decimal::ZERO {
            sqlx::query("UPDATE agents SET available = available + $1 WHERE id = $2")
                .bind(refund_amount)
                .bind(client)
                .execute(&mut **tx)
                .await?;
        }

        Self::write_entry(
            tx,
            Some(job_id),
            client,
            Some(worker),
            payout_amount,
            currency,
            LedgerTransactionType::EscrowRelease,
            &job_id.to_string(),
        )
        .await?;

        if refund_amount > Decimal::ZERO {
            Self::write_entry(
                tx,
                Some(job_id),
                client,
                None,
                refund_amount,
                currency,
                LedgerTransactionType::EscrowRefund,
                &job_id.to_string(),
            )
            .await?;
        }

        Ok(())
    }

    /// Releases a funded job's escrow, committing in its own transaction.
    pub async fn release_escrow(
        &self,
        client: Uuid,
        worker: Uuid,
        job_id: Uuid,
        payout_amount: Decimal,
        escrow_total: Decimal,
        currency: &str,
    ) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;
        Self::release_escrow_in_tx(&mut tx, client, worker, job_id, payout_amount, escrow_total, currency)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Refunds the full escrowed amount back to the client within the
    /// caller's transaction (cancel/fail paths, which never partially
    /// settle).
    pub async fn refund_escrow_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        client: Uuid,
        job_id: Uuid,
        amount: Decimal,
        currency: &str,
    ) -> Result<(), LedgerError> {
        let (_available, escrow) = Self::lock_agent(tx, client).await?;

        if escrow < amount {
            return Err(LedgerError::InsufficientEscrow {
                agent: client,
                escrow,
                required: amount,
            });
        }

        sqlx::query("UPDATE agents SET escrow = escrow - $1, available = available + $1 WHERE id = $2")
            .bind(amount)
            .bind(client)
            .execute(&mut **tx)
            .await?;

        Self::write_entry(
            tx,
            Some(job_id),
            client,
            None,
            amount,
            currency,
            LedgerTransactionType::EscrowRefund,
            &job_id.to_string(),
        )
        .await?;

        Ok(())
    }

    /// Refunds the full escrowed amount back to the client, committing in
    /// its own transaction.
    pub async fn refund_escrow(
        &self,
        client: Uuid,
        job_id: Uuid,
        amount: Decimal,
        currency: &str,
    ) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;
        Self::refund_escrow_in_tx(&mut tx, client, job_id, amount, currency).await?;
        tx.commit().await?;
        Ok(())
    }
}
