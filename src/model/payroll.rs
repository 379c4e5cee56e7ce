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
pub enum PayrollStatus {
    Draft,
    Submitted,
    Approved,
    Paid,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct PayrollRun {
    pub id: u64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    #[schema(example = "DRAFT")]
    pub status: String,
    pub custom_file_name: Option<String>,
    pub notes: Option<String>,
    pub tax_rate: f64,
    /// Lines were read from an exported document; their figures are fixed.
    pub imported: bool,
    pub created_by: Option<u64>,
    pub approved_by: Option<u64>,
    pub deleted_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct PayrollLine {
    pub id: u64,
    pub payroll_run_id: u64,
    pub employee_id: u64,
    pub employee_name: String,
    pub working_days: i32,
    pub daily_wage: f64,
    pub meal_allowance: f64,
    pub fuel_allowance: f64,
    pub overtime_hours: f64,
    pub overtime_amount: f64,
    pub cash_advance: f64,
    pub gross: f64,
    pub taxable_amount: f64,
    pub tax_rate: f64,
    pub tax_amount: f64,
    pub total_deductions: f64,
    pub net: f64,
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct PayrollLineComponent {
    pub id: u64,
    pub payroll_line_id: u64,
    /// `None` for ad-hoc components entered on the run itself.
    pub pay_component_id: Option<u64>,
    pub name: String,
    pub kind: String,
    pub amount: f64,
    pub taxable: bool,
}
