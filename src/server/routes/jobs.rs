//! `/jobs` endpoints (§6). Thin: parse, resolve the pricing source, call
//! into `JobStateMachine`, shape the response. No business logic lives
//! here.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Job, PricingSource};
use crate::server::auth::AgentId;
use crate::server::dto::{
    CompleteJobRequest, CreateJobRequest, DeliverRequest, FailJobRequest,
    RequestRevisionRequest,
};
use crate::server::routes::load_service;
use crate::server::AppState;

/// Resolves the job's pricing source from the request body per §4.4
/// `create`: an agreed negotiation, a pre-validated quote, or (absent
/// either) the service's midpoint default.
fn resolve_pricing_source(body: &CreateJobRequest) -> Result<PricingSource, AppError> {
    if let Some(negotiation_id) = body.negotiation_id {
        return Ok(PricingSource::Negotiation { negotiation_id });
    }
    if let Some(quote_id) = &body.quote_id {
        let price = body.agreed_price.ok_or_else(|| {
            AppError::InvalidInput("quote_id requires agreed_price".to_string())
        })?;
        return Ok(PricingSource::Quote {
            quote_id: quote_id.clone(),
            price,
        });
    }
    Ok(PricingSource::Midpoint)
}

pub async fn create_job(
    State(state): State<AppState>,
    AgentId(client_agent_id): AgentId,
    Json(body): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<Job>), AppError> {
    let service = load_service(&state.pool, body.service_id).await?;
    let source = resolve_pricing_source(&body)?;

    let job = state
        .jobs
        .create(
            client_agent_id,
            &service,
            body.title,
            body.input_data,
            body.parent_job_id,
            source,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, AppError> {
    Ok(Json(state.jobs.get(job_id).await?))
}

pub async fn start_job(
    State(state): State<AppState>,
    AgentId(worker_agent_id): AgentId,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, AppError> {
    Ok(Json(state.jobs.start(job_id, worker_agent_id).await?))
}

pub async fn deliver_job(
    State(state): State<AppState>,
    AgentId(worker_agent_id): AgentId,
    Path(job_id): Path<Uuid>,
    Json(body): Json<DeliverRequest>,
) -> Result<Json<Job>, AppError> {
    Ok(Json(
        state
            .jobs
            .deliver(
                job_id,
                worker_agent_id,
                body.artifact_type,
                body.content,
                body.artifact_metadata,
            )
            .await?,
    ))
}

pub async fn request_revision(
    State(state): State<AppState>,
    AgentId(client_agent_id): AgentId,
    Path(job_id): Path<Uuid>,
    Json(body): Json<RequestRevisionRequest>,
) -> Result<Json<Job>, AppError> {
    Ok(Json(
        state
            .jobs
            .request_revision(job_id, client_agent_id, body.feedback)
            .await?,
    ))
}

pub async fn complete_job(
    State(state): State<AppState>,
    AgentId(client_agent_id): AgentId,
    Path(job_id): Path<Uuid>,
    Json(body): Json<CompleteJobRequest>,
) -> Result<Json<Job>, AppError> {
    if !(1..=5).contains(&body.rating) {
        return Err(AppError::InvalidInput(
            "rating must be between 1 and 5".to_string(),
        ));
    }
    Ok(Json(
        state
            .jobs
            .complete(job_id, client_agent_id, body.rating, body.review)
            .await?,
    ))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    AgentId(client_agent_id): AgentId,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, AppError> {
    Ok(Json(state.jobs.cancel(job_id, client_agent_id).await?))
}

pub async fn fail_job(
    State(state): State<AppState>,
    AgentId(worker_agent_id): AgentId,
    Path(job_id): Path<Uuid>,
    Json(body): Json<FailJobRequest>,
) -> Result<Json<Job>, AppError> {
    Ok(Json(
        state
            .jobs
            .fail(job_id, worker_agent_id, body.reason)
            .await?,
    ))
}
