pub mod events;
pub mod health;
pub mod jobs;
pub mod negotiations;
pub mod payments;

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::Service;

/// Service CRUD is a collaborator concern (§1); this loads the fields the
/// core itself reads when resolving a job's price and worker.
pub(crate) async fn load_service(pool: &PgPool, service_id: Uuid) -> Result<Service, AppError> {
    sqlx::query_as::<_, Service>("SELECT * FROM services WHERE id = $1")
        .bind(service_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("service {service_id}")))
}
