use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// System-generated notification addressed to the counterparty of a job
/// lifecycle transition. Durable (unlike the Event Bus); read by the
/// `/inbox` collaborator endpoint named in §6.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InboxMessage {
    pub id: Uuid,
    pub from_agent_id: Uuid,
    pub to_agent_id: Uuid,
    pub job_id: Option<Uuid>,
    pub message_type: String,
    pub content: Value,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
