use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;
use validator::Validate;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Cancelled,
}

/// One invoice line. `discount` and `tax` are percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, Validate)]
pub struct InvoiceItem {
    #[validate(length(min = 1, message = "Description is required"))]
    pub description: String,
    #[validate(range(min = 0.0, message = "Quantity must not be negative"))]
    pub quantity: f64,
    #[validate(range(min = 0.0, message = "Price must not be negative"))]
    pub price: f64,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 100.0, message = "Discount must be between 0 and 100 percent"))]
    pub discount: f64,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 100.0, message = "Tax must be between 0 and 100 percent"))]
    pub tax: f64,
    /// Filled in by the server.
    #[serde(default)]
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct Invoice {
    pub id: u64,
    #[schema(example = "INV-2025-001")]
    pub number: String,
    pub created_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub applicant_name: String,
    pub recipient_name: String,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub header_image: Option<String>,
    pub show_bank_details: bool,
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    pub account_holder: Option<String>,
    pub transfer_method: Option<String>,
    pub signature_name: Option<String>,
    pub signature_position: Option<String>,
    pub signature_location: Option<String>,
    #[schema(value_type = Vec<InvoiceItem>)]
    pub items: Json<Vec<InvoiceItem>>,
    pub subtotal: f64,
    pub discount: f64,
    pub tax: f64,
    pub total: f64,
    pub status: String,
    pub created_by: Option<u64>,
    pub deleted_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
