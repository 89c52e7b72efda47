use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// One versioned artifact submitted against a job. Append-only: redelivery
/// creates a new row with an incremented `version`, it never overwrites the
/// previous one.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Deliverable {
    pub id: Uuid,
    pub job_id: Uuid,
    pub version: i32,
    pub artifact_type: String,
    pub content: Value,
    pub artifact_metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}
