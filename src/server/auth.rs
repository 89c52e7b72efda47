//! Local stand-in for the API-key authentication collaborator. The core
//! does not implement credential verification: a real deployment fronts
//! these routes with a constant-time API-key lookup and injects the
//! resolved agent id. For exercising the core directly, this extractor
//! trusts an `X-Agent-Id` header.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::AppError;

pub struct AgentId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AgentId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("X-Agent-Id")
            .ok_or(AppError::Unauthenticated)?
            .to_str()
            .map_err(|_| AppError::Unauthenticated)?;
        let id = Uuid::parse_str(header).map_err(|_| AppError::Unauthenticated)?;
        Ok(AgentId(id))
    }
}
