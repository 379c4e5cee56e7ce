use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Kwitansi {
    pub id: u64,
    #[schema(example = "KW-000012-0003-001")]
    pub number: String,
    pub date: NaiveDate,
    pub recipient_name: String,
    pub amount: f64,
    #[schema(example = "satu juta lima ratus ribu rupiah")]
    pub amount_in_words: String,
    pub purpose: String,
    pub payer_name: String,
    pub account_number: Option<String>,
    pub account_name: Option<String>,
    pub bank_name: Option<String>,
    pub transfer_method: Option<String>,
    pub place: Option<String>,
    pub receipt_date: Option<String>,
    pub signature_name: Option<String>,
    pub signature_position: Option<String>,
    pub stamp: Option<String>,
    pub header_image: Option<String>,
    pub payroll_run_id: Option<u64>,
    pub payroll_line_id: Option<u64>,
    pub employee_id: Option<u64>,
    pub created_by: Option<u64>,
    pub deleted_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
