//! Request/response shapes for the HTTP layer. Kept separate from the core
//! models: these are wire-format only and never leak into `crate::models`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub service_id: Uuid,
    pub input_data: Value,
    pub title: Option<String>,
    pub parent_job_id: Option<Uuid>,
    pub quote_id: Option<String>,
    pub negotiation_id: Option<Uuid>,
    pub agreed_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct DeliverRequest {
    pub artifact_type: String,
    pub content: Value,
    pub artifact_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct RequestRevisionRequest {
    pub feedback: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteJobRequest {
    pub rating: u8,
    pub review: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FailJobRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct NegotiationStartRequest {
    pub service_id: Uuid,
    pub job_description: String,
    pub initial_offer: Decimal,
    pub max_price: Option<Decimal>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NegotiationRespondRequest {
    Accept,
    Counter {
        counter_price: Decimal,
        message: Option<String>,
    },
    Reject {
        message: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    pub tx_hash: String,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub transaction_type: String,
    pub recipient_agent_id: Option<Uuid>,
    pub token_address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub agent_id: Uuid,
    pub new_available_balance: Decimal,
}
