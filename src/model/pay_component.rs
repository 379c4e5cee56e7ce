use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema, EnumString, AsRefStr,
    Display, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentKind {
    Earning,
    Deduction,
}

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, EnumString, AsRefStr,
    Display, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CalcMethod {
    /// Fixed amount per payroll line.
    Flat,
    /// `rate` multiplied by the working days.
    PerDay,
    /// `rate` percent of the basis.
    Percentage,
}

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, EnumString, AsRefStr,
    Display, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CalcBasis {
    DailyWage,
    Gross,
    WorkingDays,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct PayComponent {
    pub id: u64,
    #[schema(example = "Tunjangan Transport")]
    pub name: String,
    #[schema(example = "EARNING")]
    pub kind: String,
    pub taxable: bool,
    #[schema(example = "FLAT")]
    pub method: String,
    #[schema(example = "DAILY_WAGE")]
    pub basis: String,
    pub rate: Option<f64>,
    pub amount: Option<f64>,
    pub cap_min: Option<f64>,
    pub cap_max: Option<f64>,
    pub sort_order: i32,
    pub active: bool,
    pub created_by: Option<u64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
