//! `/payments/verify` endpoint (§6, §4.2).

use axum::extract::State;
use axum::Json;
use std::str::FromStr;

use crate::error::AppError;
use crate::models::TransactionType;
use crate::server::auth::AgentId;
use crate::server::dto::{VerifyPaymentRequest, VerifyPaymentResponse};
use crate::server::AppState;
use crate::verifier::VerifyRequest;

pub async fn verify_payment(
    State(state): State<AppState>,
    AgentId(initiator_agent_id): AgentId,
    Json(body): Json<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>, AppError> {
    let transaction_type = TransactionType::from_str(&body.transaction_type)
        .map_err(AppError::InvalidInput)?;

    let credit_target = match transaction_type {
        TransactionType::TopUp | TransactionType::Refund => initiator_agent_id,
        TransactionType::P2p => body.recipient_agent_id.ok_or_else(|| {
            AppError::InvalidInput("p2p payment requires recipient_agent_id".to_string())
        })?,
    };

    let new_available_balance = state
        .verifier
        .verify_and_credit(VerifyRequest {
            tx_hash: body.tx_hash,
            expected_amount: body.amount,
            currency: body.currency.unwrap_or_else(|| state.config.default_currency.clone()),
            initiator_agent_id,
            transaction_type,
            recipient_agent_id: body.recipient_agent_id,
            token_address: body.token_address,
        })
        .await?;

    Ok(Json(VerifyPaymentResponse {
        agent_id: credit_target,
        new_available_balance,
    }))
}
