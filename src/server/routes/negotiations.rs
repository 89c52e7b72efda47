//! `/negotiations` endpoints (§6, §4.3).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Negotiation, NegotiationOffer};
use crate::negotiation::RespondAction;
use crate::server::auth::AgentId;
use crate::server::dto::{NegotiationRespondRequest, NegotiationStartRequest};
use crate::server::routes::load_service;
use crate::server::AppState;

pub async fn start_negotiation(
    State(state): State<AppState>,
    AgentId(client_agent_id): AgentId,
    Json(body): Json<NegotiationStartRequest>,
) -> Result<(StatusCode, Json<Negotiation>), AppError> {
    let service = load_service(&state.pool, body.service_id).await?;

    let negotiation = state
        .negotiations
        .start(
            client_agent_id,
            &service,
            body.job_description,
            body.initial_offer,
            body.max_price,
            body.message,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(negotiation)))
}

pub async fn respond_to_negotiation(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(negotiation_id): Path<Uuid>,
    Json(body): Json<NegotiationRespondRequest>,
) -> Result<Json<Negotiation>, AppError> {
    let (action, message) = match body {
        NegotiationRespondRequest::Accept => (RespondAction::Accept, None),
        NegotiationRespondRequest::Counter {
            counter_price,
            message,
        } => (
            RespondAction::Counter {
                new_price: counter_price,
            },
            message,
        ),
        NegotiationRespondRequest::Reject { message } => (RespondAction::Reject, message),
    };

    let negotiation = state
        .negotiations
        .respond(negotiation_id, agent_id, action, message)
        .await?;

    Ok(Json(negotiation))
}

pub async fn get_negotiation(
    State(state): State<AppState>,
    Path(negotiation_id): Path<Uuid>,
) -> Result<Json<Negotiation>, AppError> {
    Ok(Json(state.negotiations.get(negotiation_id).await?))
}

pub async fn list_offers(
    State(state): State<AppState>,
    Path(negotiation_id): Path<Uuid>,
) -> Result<Json<Vec<NegotiationOffer>>, AppError> {
    Ok(Json(state.negotiations.offers(negotiation_id).await?))
}
