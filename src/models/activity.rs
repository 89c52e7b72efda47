use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Durable per-transition audit row, distinct from the in-memory Event Bus.
/// Written inside the same transaction as the state change it records
/// (SPEC_FULL §3), giving a queryable history even if no one was listening
/// on the bus when the event fired.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ActivityLog {
    pub id: i64,
    pub event_type: String,
    pub agent_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}
