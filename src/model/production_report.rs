use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, EnumString, AsRefStr,
    Display, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductionStatus {
    Draft,
    Submitted,
    Reviewed,
    Approved,
    Archived,
}

/// One weighbridge ticket: a loaded truck weighed in and out.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct ProductionReport {
    pub id: u64,
    pub date: NaiveDate,
    #[schema(example = "KT 1234 AB")]
    pub plate_number: String,
    pub buyer_id: Option<u64>,
    pub buyer_name: String,
    pub destination: String,
    pub gross_ton: f64,
    pub tare_ton: f64,
    pub net_ton: f64,
    pub source_file: Option<String>,
    pub notes: Option<String>,
    pub status: String,
    pub approved_by: Option<u64>,
    pub created_by: Option<u64>,
    pub deleted_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
