use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use utoipa::ToSchema;

/// Status shared by kas kecil and kas besar expenses.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, EnumString, AsRefStr,
    Display, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum KasStatus {
    Draft,
    Submitted,
    Reviewed,
    Approved,
    Archived,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct KasKecilExpense {
    pub id: u64,
    #[schema(example = "Senin")]
    pub day: String,
    pub date: NaiveDate,
    #[schema(example = "Januari")]
    pub month: String,
    pub activity_type: String,
    pub item: String,
    pub quantity: f64,
    pub unit: String,
    pub unit_price: f64,
    pub total: f64,
    pub vendor_name: Option<String>,
    pub vendor_phone: Option<String>,
    pub vendor_email: Option<String>,
    pub category: String,
    pub sub_category: Option<String>,
    pub receipt_url: Option<String>,
    pub status: String,
    pub notes: Option<String>,
    pub approval_notes: Option<String>,
    pub approved_by: Option<u64>,
    pub created_by: Option<u64>,
    pub deleted_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct KasBesarExpense {
    pub id: u64,
    pub day: String,
    pub date: NaiveDate,
    pub month: String,
    pub activity_type: String,
    pub item: String,
    pub quantity: f64,
    pub unit: String,
    pub unit_price: f64,
    pub total: f64,
    pub vendor_name: String,
    pub vendor_phone: Option<String>,
    pub vendor_email: Option<String>,
    pub category: String,
    pub sub_category: String,
    pub receipt_url: Option<String>,
    pub contract_url: Option<String>,
    pub status: String,
    pub notes: Option<String>,
    pub approval_notes: Option<String>,
    pub approved_by: Option<u64>,
    pub created_by: Option<u64>,
    pub deleted_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn status_round_trips_through_its_column_text() {
        for status in KasStatus::iter() {
            assert_eq!(KasStatus::from_str(status.as_ref()).unwrap(), status);
        }
        assert!(KasStatus::from_str("PENDING").is_err());
    }
}
