use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(
    example = json!({
        "id": 1,
        "name": "Budi Santoso",
        "nik": "6401010101900001",
        "position": "Operator Excavator",
        "site": "Site A",
        "birth_place": "Samarinda",
        "birth_date": "1990-01-01",
        "address": "Jl. Merdeka 1",
        "daily_wage": 150000.0,
        "meal_allowance": 25000.0,
        "fuel_allowance": 10000.0,
        "bank_name": "BRI",
        "bank_account": "0123456789",
        "npwp": null,
        "start_date": "2024-01-01",
        "active": true,
        "created_at": "2024-01-01T00:00:00",
        "updated_at": "2024-01-01T00:00:00"
    })
)]
pub struct Employee {
    pub id: u64,
    pub name: String,
    pub nik: Option<String>,
    pub position: String,
    pub site: String,
    pub birth_place: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub address: Option<String>,
    pub daily_wage: f64,
    pub meal_allowance: f64,
    pub fuel_allowance: f64,
    pub bank_name: Option<String>,
    pub bank_account: Option<String>,
    pub npwp: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
