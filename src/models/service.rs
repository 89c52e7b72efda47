use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Text,
    Code,
    ImageUrl,
    Json,
    File,
}

impl OutputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputType::Text => "text",
            OutputType::Code => "code",
            OutputType::ImageUrl => "image_url",
            OutputType::Json => "json",
            OutputType::File => "file",
        }
    }
}

impl std::str::FromStr for OutputType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(OutputType::Text),
            "code" => Ok(OutputType::Code),
            "image_url" => Ok(OutputType::ImageUrl),
            "json" => Ok(OutputType::Json),
            "file" => Ok(OutputType::File),
            other => Err(format!("unknown output type: {other}")),
        }
    }
}

/// A priced capability offered by an agent. Owned by exactly one agent;
/// soft-deactivated rather than deleted once referenced by a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub required_inputs: Value,
    pub output_type: OutputType,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub allow_negotiation: bool,
    pub max_concurrent: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Service {
    /// Default job price when negotiation is disabled and no pricing source
    /// was supplied: the midpoint of the service's bounds (§4.4 `create`).
    pub fn midpoint_price(&self) -> Decimal {
        (self.min_price + self.max_price) / Decimal::from(2)
    }
}

impl<'r> FromRow<'r, PgRow> for Service {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let output_type: String = row.try_get("output_type")?;
        Ok(Service {
            id: row.try_get("id")?,
            agent_id: row.try_get("agent_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            required_inputs: row.try_get("required_inputs")?,
            output_type: output_type
                .parse()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            min_price: row.try_get("min_price")?,
            max_price: row.try_get("max_price")?,
            allow_negotiation: row.try_get("allow_negotiation")?,
            max_concurrent: row.try_get("max_concurrent")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
