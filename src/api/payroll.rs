use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::str::FromStr;

use crate::{
    api::{ApiResult, created, done, ok, ok_with_message, paginated},
    auth::auth::AuthUser,
    config::Config,
    domain::{
        payroll::{
            CalculatedComponent, ComponentRule, ComponentSummary, CustomComponent, LineCalculation, LineOverride,
            PayrollEmployee, PayrollSummary, calculate_line, summarize, summarize_components,
        },
        terbilang,
        workflow::{can_move_payroll, payroll_targets, transition_error},
    },
    error::ApiError,
    model::{
        employee::Employee,
        pay_component::{ComponentKind, PayComponent},
        payroll::{PayrollLine, PayrollLineComponent, PayrollRun, PayrollStatus},
    },
    utils::{
        dashboard_cache,
        db_utils::SqlUpdate,
        pagination::Page,
        soft_delete::{DeleteQuery, Marker, delete_row},
    },
};
use actix_web::{HttpResponse, http::header, web};
use chrono::{Local, NaiveDate};
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use sqlx::{MySql, MySqlPool, QueryBuilder, Transaction};
use tracing::{debug, error, info, warn};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

// -------------------- Request / response types --------------------

#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
pub struct PayrollEmployeeInput {
    #[schema(example = 1)]
    pub employee_id: u64,
    #[serde(flatten)]
    #[validate(nested)]
    pub inputs: LineOverride,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct PreviewPayroll {
    /// Withholding percentage applied to the taxable amount.
    #[validate(range(min = 0.0, max = 100.0, message = "Tax rate must be between 0 and 100"))]
    pub tax_rate: Option<f64>,
    #[validate(length(min = 1, message = "At least one employee is required"), nested)]
    pub employees: Vec<PayrollEmployeeInput>,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreatePayroll {
    #[schema(example = "2025-01-01", format = "date", value_type = String)]
    pub period_start: NaiveDate,
    #[schema(example = "2025-01-31", format = "date", value_type = String)]
    pub period_end: NaiveDate,
    #[validate(length(max = 1000, message = "File name is too long"))]
    pub custom_file_name: Option<String>,
    pub notes: Option<String>,
    #[validate(range(min = 0.0, max = 100.0, message = "Tax rate must be between 0 and 100"))]
    pub tax_rate: Option<f64>,
    #[validate(length(min = 1, message = "At least one employee is required"), nested)]
    pub employees: Vec<PayrollEmployeeInput>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
pub struct LineDaysUpdate {
    pub line_id: u64,
    #[validate(range(min = 0, max = 31, message = "Working days must be between 0 and 31"))]
    pub working_days: i32,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct UpdatePayroll {
    #[validate(length(max = 1000, message = "File name is too long"))]
    pub custom_file_name: Option<String>,
    pub notes: Option<String>,
    #[validate(range(min = 0.0, max = 100.0, message = "Tax rate must be between 0 and 100"))]
    pub tax_rate: Option<f64>,
    /// Working-day corrections; only while the run is DRAFT.
    #[validate(nested)]
    pub lines: Option<Vec<LineDaysUpdate>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PayrollStatusChange {
    pub status: PayrollStatus,
    pub notes: Option<String>,
}

/// One employee as read from an exported payroll document.
#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
pub struct ImportedEmployee {
    pub employee_id: Option<u64>,
    #[validate(length(min = 1, message = "Employee name is required"))]
    pub name: String,
    pub position: Option<String>,
    pub site: Option<String>,
    #[validate(range(min = 0.0, message = "Basic salary must not be negative"))]
    pub basic_salary: f64,
    #[serde(default)]
    #[validate(range(min = 0.0, message = "Allowances must not be negative"))]
    pub allowances: f64,
    #[serde(default)]
    #[validate(range(min = 0.0, message = "Deductions must not be negative"))]
    pub deductions: f64,
    #[validate(range(min = 0.0, message = "Net salary must not be negative"))]
    pub net_salary: f64,
    #[validate(range(min = 1, max = 31, message = "Working days must be between 1 and 31"))]
    pub working_days: i32,
    #[serde(default)]
    #[validate(range(min = 0.0, message = "Overtime hours must not be negative"))]
    pub overtime_hours: f64,
    #[serde(default)]
    #[validate(range(min = 0.0, message = "Overtime pay must not be negative"))]
    pub overtime_pay: f64,
    #[serde(default)]
    #[validate(nested)]
    pub components: Vec<CustomComponent>,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ImportPayroll {
    #[schema(format = "date", value_type = String)]
    pub period_start: NaiveDate,
    #[schema(format = "date", value_type = String)]
    pub period_end: NaiveDate,
    #[validate(length(max = 1000, message = "File name is too long"))]
    pub custom_file_name: Option<String>,
    pub notes: Option<String>,
    #[validate(length(min = 1, message = "At least one employee is required"), nested)]
    pub employees: Vec<ImportedEmployee>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PayrollQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<PayrollStatus>,
    pub created_by: Option<u64>,
}

#[derive(Serialize, ToSchema)]
pub struct PayrollPreview {
    pub lines: Vec<LineCalculation>,
    pub summary: PayrollSummary,
    pub component_summary: Vec<ComponentSummary>,
}

#[derive(Serialize, sqlx::FromRow, ToSchema)]
pub struct PayrollRunListItem {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub run: PayrollRun,
    pub employee_count: i64,
    pub total_net: Option<f64>,
}

#[derive(Serialize, ToSchema)]
pub struct PayrollLineDetail {
    #[serde(flatten)]
    pub line: PayrollLine,
    pub components: Vec<PayrollLineComponent>,
}

#[derive(Serialize, ToSchema)]
pub struct RunTotals {
    pub employee_count: usize,
    pub total_gross: f64,
    pub total_deductions: f64,
    pub total_tax: f64,
    pub total_net: f64,
}

#[derive(Serialize, ToSchema)]
pub struct PayrollRunDetail {
    #[serde(flatten)]
    pub run: PayrollRun,
    pub lines: Vec<PayrollLineDetail>,
    pub totals: RunTotals,
}

#[derive(Serialize, ToSchema)]
pub struct StatusChanged {
    pub run: PayrollRun,
    /// Receipts created by this change (approval only).
    pub kwitansi_generated: u64,
}

// -------------------- Helpers --------------------

fn check_period(start: NaiveDate, end: NaiveDate) -> Result<(), ApiError> {
    if end < start {
        return Err(ApiError::field(
            "period_end",
            "Period end must not be before period start",
        ));
    }
    Ok(())
}

pub fn kwitansi_number(run_id: u64, employee_id: u64, seq: i64) -> String {
    format!("KW-{:06}-{:04}-{:03}", run_id, employee_id, seq)
}

fn parse_status(raw: &str) -> Result<PayrollStatus, ApiError> {
    PayrollStatus::from_str(raw).map_err(|_| {
        error!(status = raw, "Unknown payroll status stored");
        ApiError::Internal
    })
}

async fn fetch_run(pool: &MySqlPool, id: u64) -> Result<PayrollRun, ApiError> {
    sqlx::query_as::<_, PayrollRun>(
        "SELECT * FROM payroll_runs WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Payroll run not found"))
}

async fn fetch_run_detail(pool: &MySqlPool, id: u64) -> Result<PayrollRunDetail, ApiError> {
    let run = fetch_run(pool, id).await?;

    let lines = sqlx::query_as::<_, PayrollLine>(
        "SELECT * FROM payroll_lines WHERE payroll_run_id = ? ORDER BY employee_name, id",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let components = sqlx::query_as::<_, PayrollLineComponent>(
        r#"
        SELECT plc.*
        FROM payroll_line_components plc
        JOIN payroll_lines pl ON pl.id = plc.payroll_line_id
        WHERE pl.payroll_run_id = ?
        ORDER BY plc.id
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let mut by_line: HashMap<u64, Vec<PayrollLineComponent>> = HashMap::new();
    for c in components {
        by_line.entry(c.payroll_line_id).or_default().push(c);
    }

    let totals = RunTotals {
        employee_count: lines.len(),
        total_gross: lines.iter().map(|l| l.gross).sum(),
        total_deductions: lines.iter().map(|l| l.total_deductions).sum(),
        total_tax: lines.iter().map(|l| l.tax_amount).sum(),
        total_net: lines.iter().map(|l| l.net).sum(),
    };

    let lines = lines
        .into_iter()
        .map(|line| PayrollLineDetail {
            components: by_line.remove(&line.id).unwrap_or_default(),
            line,
        })
        .collect();

    Ok(PayrollRunDetail { run, lines, totals })
}

async fn active_rules(pool: &MySqlPool) -> Result<Vec<ComponentRule>, ApiError> {
    let components = sqlx::query_as::<_, PayComponent>(
        "SELECT * FROM pay_components WHERE active = TRUE ORDER BY sort_order, name",
    )
    .fetch_all(pool)
    .await?;
    components.iter().map(ComponentRule::try_from).collect()
}

/// Calculates every requested line against the stored employees and active components.
async fn calculate_lines(
    pool: &MySqlPool,
    tax_rate: f64,
    inputs: &[PayrollEmployeeInput],
) -> Result<Vec<LineCalculation>, ApiError> {
    let mut seen = HashSet::new();
    if let Some(dup) = inputs.iter().find(|i| !seen.insert(i.employee_id)) {
        return Err(ApiError::bad_request(format!(
            "Employee {} is listed more than once",
            dup.employee_id
        )));
    }

    let mut qb = QueryBuilder::<MySql>::new("SELECT * FROM employees WHERE active = TRUE AND id IN (");
    let mut ids = qb.separated(", ");
    for input in inputs {
        ids.push_bind(input.employee_id);
    }
    ids.push_unseparated(")");
    let employees: HashMap<u64, Employee> = qb
        .build_query_as::<Employee>()
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|e| (e.id, e))
        .collect();

    let missing: Vec<String> = inputs
        .iter()
        .filter(|i| !employees.contains_key(&i.employee_id))
        .map(|i| i.employee_id.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ApiError::bad_request(format!(
            "Unknown or inactive employee id(s): {}",
            missing.join(", ")
        )));
    }

    let rules = active_rules(pool).await?;

    inputs
        .iter()
        .map(|input| {
            let employee = &employees[&input.employee_id];
            calculate_line(&PayrollEmployee::from(employee), &rules, &input.inputs, tax_rate)
        })
        .collect()
}

async fn insert_components(
    tx: &mut Transaction<'_, MySql>,
    line_id: u64,
    components: &[CalculatedComponent],
) -> Result<(), sqlx::Error> {
    for c in components {
        sqlx::query(
            r#"
            INSERT INTO payroll_line_components
            (payroll_line_id, pay_component_id, name, kind, amount, taxable)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(line_id)
        .bind(c.pay_component_id)
        .bind(&c.name)
        .bind(c.kind.as_ref())
        .bind(c.amount)
        .bind(c.taxable)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn insert_line(
    tx: &mut Transaction<'_, MySql>,
    run_id: u64,
    line: &LineCalculation,
    notes: Option<&str>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO payroll_lines
        (payroll_run_id, employee_id, employee_name, working_days, daily_wage, meal_allowance,
         fuel_allowance, overtime_hours, overtime_amount, cash_advance, gross, taxable_amount,
         tax_rate, tax_amount, total_deductions, net, status, notes)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(run_id)
    .bind(line.employee_id)
    .bind(&line.employee_name)
    .bind(line.working_days)
    .bind(line.daily_wage)
    .bind(line.meal_allowance)
    .bind(line.fuel_allowance)
    .bind(line.overtime_hours)
    .bind(line.overtime_amount)
    .bind(line.cash_advance)
    .bind(line.gross)
    .bind(line.taxable_amount)
    .bind(line.tax_rate)
    .bind(line.tax_amount)
    .bind(line.total_deductions)
    .bind(line.net)
    .bind(PayrollStatus::Draft.as_ref())
    .bind(notes)
    .execute(&mut **tx)
    .await?;

    let line_id = result.last_insert_id();
    insert_components(tx, line_id, &line.components).await?;
    Ok(line_id)
}

async fn insert_run(
    tx: &mut Transaction<'_, MySql>,
    start: NaiveDate,
    end: NaiveDate,
    custom_file_name: Option<&str>,
    notes: Option<&str>,
    tax_rate: f64,
    imported: bool,
    created_by: u64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO payroll_runs
        (period_start, period_end, status, custom_file_name, notes, tax_rate, imported, created_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(start)
    .bind(end)
    .bind(PayrollStatus::Draft.as_ref())
    .bind(custom_file_name)
    .bind(notes)
    .bind(tax_rate)
    .bind(imported)
    .bind(created_by)
    .execute(&mut **tx)
    .await?;
    Ok(result.last_insert_id())
}

/// Lines can be recalculated only on DRAFT runs built by the calculator.
fn check_recalculable(run: &PayrollRun) -> Result<(), ApiError> {
    if parse_status(&run.status)? != PayrollStatus::Draft {
        return Err(ApiError::bad_request(
            "Tax rate and working days can only change while the run is DRAFT",
        ));
    }
    if run.imported {
        return Err(ApiError::bad_request(
            "Imported payroll runs keep their imported figures; re-import to correct them",
        ));
    }
    Ok(())
}

/// Recalculates a stored line with new working days and tax rate, keeping its
/// components, overtime and cash advance.
async fn recalculate_line(
    tx: &mut Transaction<'_, MySql>,
    line: &PayrollLine,
    working_days: i32,
    tax_rate: f64,
) -> Result<(), ApiError> {
    let stored = sqlx::query_as::<_, PayrollLineComponent>(
        "SELECT * FROM payroll_line_components WHERE payroll_line_id = ? ORDER BY id",
    )
    .bind(line.id)
    .fetch_all(&mut **tx)
    .await?;

    let component_ids: Vec<u64> = stored.iter().filter_map(|c| c.pay_component_id).collect();
    let mut rules = Vec::new();
    if !component_ids.is_empty() {
        let mut qb = QueryBuilder::<MySql>::new("SELECT * FROM pay_components WHERE id IN (");
        let mut ids = qb.separated(", ");
        for id in &component_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");
        let components = qb
            .build_query_as::<PayComponent>()
            .fetch_all(&mut **tx)
            .await?;
        rules = components
            .iter()
            .map(ComponentRule::try_from)
            .collect::<Result<Vec<_>, _>>()?;
    }

    let custom_components = stored
        .iter()
        .filter(|c| c.pay_component_id.is_none())
        .map(|c| {
            Ok(CustomComponent {
                name: c.name.clone(),
                kind: ComponentKind::from_str(&c.kind).map_err(|_| ApiError::Internal)?,
                amount: c.amount,
                taxable: c.taxable,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let employee = PayrollEmployee {
        id: line.employee_id,
        name: line.employee_name.clone(),
        daily_wage: line.daily_wage,
        meal_allowance: line.meal_allowance,
        fuel_allowance: line.fuel_allowance,
    };
    let inputs = LineOverride {
        working_days: Some(working_days),
        overtime_hours: Some(line.overtime_hours),
        overtime_amount: Some(line.overtime_amount),
        cash_advance: Some(line.cash_advance),
        custom_components,
        ..Default::default()
    };
    let calc = calculate_line(&employee, &rules, &inputs, tax_rate)?;

    sqlx::query(
        r#"
        UPDATE payroll_lines
        SET working_days = ?, gross = ?, taxable_amount = ?, tax_rate = ?, tax_amount = ?,
            total_deductions = ?, net = ?
        WHERE id = ?
        "#,
    )
    .bind(calc.working_days)
    .bind(calc.gross)
    .bind(calc.taxable_amount)
    .bind(calc.tax_rate)
    .bind(calc.tax_amount)
    .bind(calc.total_deductions)
    .bind(calc.net)
    .bind(line.id)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM payroll_line_components WHERE payroll_line_id = ?")
        .bind(line.id)
        .execute(&mut **tx)
        .await?;
    insert_components(tx, line.id, &calc.components).await?;
    Ok(())
}

/// Runs `create` for every line and counts the receipts it made. A failing
/// line is logged and skipped so the other employees still get theirs.
async fn create_each<'a, F, Fut>(run_id: u64, lines: &'a [PayrollLine], mut create: F) -> u64
where
    F: FnMut(&'a PayrollLine) -> Fut,
    Fut: Future<Output = Result<bool, ApiError>>,
{
    let mut generated = 0;
    for line in lines {
        match create(line).await {
            Ok(true) => generated += 1,
            Ok(false) => {}
            Err(e) => warn!(
                run_id,
                employee_id = line.employee_id,
                error = %e,
                "Failed to generate kwitansi for employee"
            ),
        }
    }
    generated
}

/// Creates one kwitansi per line of an approved run, skipping employees that already have one.
async fn generate_kwitansi(
    pool: &MySqlPool,
    config: &Config,
    run: &PayrollRun,
    user_id: u64,
) -> Result<u64, ApiError> {
    let lines = sqlx::query_as::<_, PayrollLine>(
        "SELECT * FROM payroll_lines WHERE payroll_run_id = ? ORDER BY id",
    )
    .bind(run.id)
    .fetch_all(pool)
    .await?;

    let purpose = format!(
        "Pembayaran gaji periode {} s/d {}",
        run.period_start.format("%d/%m/%Y"),
        run.period_end.format("%d/%m/%Y")
    );
    let today = Local::now().date_naive();

    Ok(create_each(run.id, &lines, |line| {
        line_kwitansi(pool, config, run, line, &purpose, today, user_id)
    })
    .await)
}

/// Creates the receipt for one line in its own transaction. Returns false when
/// the employee already has a live receipt for the run.
async fn line_kwitansi(
    pool: &MySqlPool,
    config: &Config,
    run: &PayrollRun,
    line: &PayrollLine,
    purpose: &str,
    date: NaiveDate,
    user_id: u64,
) -> Result<bool, ApiError> {
    let mut tx = pool.begin().await?;

    let (live, all): (i64, i64) = sqlx::query_as(
        r#"
        SELECT CAST(COALESCE(SUM(deleted_at IS NULL), 0) AS SIGNED), COUNT(*)
        FROM kwitansi
        WHERE payroll_run_id = ? AND employee_id = ?
        "#,
    )
    .bind(run.id)
    .bind(line.employee_id)
    .fetch_one(&mut *tx)
    .await?;
    if live > 0 {
        return Ok(false);
    }

    let bank: Option<(Option<String>, Option<String>)> =
        sqlx::query_as("SELECT bank_name, bank_account FROM employees WHERE id = ?")
            .bind(line.employee_id)
            .fetch_optional(&mut *tx)
            .await?;
    let (bank_name, bank_account) = bank.unwrap_or((None, None));

    sqlx::query(
        r#"
        INSERT INTO kwitansi
        (number, date, recipient_name, amount, amount_in_words, purpose, payer_name,
         account_number, account_name, bank_name, transfer_method, payroll_run_id,
         payroll_line_id, employee_id, created_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(kwitansi_number(run.id, line.employee_id, all + 1))
    .bind(date)
    .bind(&line.employee_name)
    .bind(line.net)
    .bind(terbilang::rupiah(line.net))
    .bind(purpose)
    .bind(&config.company_name)
    .bind(&bank_account)
    .bind(&line.employee_name)
    .bind(&bank_name)
    .bind(bank_account.as_ref().map(|_| "Transfer Bank"))
    .bind(run.id)
    .bind(line.id)
    .bind(line.employee_id)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

const CSV_HEADER: &str = "Employee,Working Days,Daily Wage,Meal Allowance,Fuel Allowance,Overtime Hours,Overtime,Cash Advance,Gross,Taxable,Tax Rate,Tax,Deductions,Net\n";

fn csv_row(line: &PayrollLine) -> String {
    format!(
        "{},{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
        csv_field(&line.employee_name),
        line.working_days,
        line.daily_wage,
        line.meal_allowance,
        line.fuel_allowance,
        line.overtime_hours,
        line.overtime_amount,
        line.cash_advance,
        line.gross,
        line.taxable_amount,
        line.tax_rate,
        line.tax_amount,
        line.total_deductions,
        line.net
    )
}

fn export_file_name(run: &PayrollRun) -> String {
    let base = run
        .custom_file_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end_matches(".csv").to_string())
        .unwrap_or_else(|| format!("payroll_{}_{}", run.period_start, run.period_end));
    let safe: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || "-_. ".contains(c) { c } else { '_' })
        .collect();
    format!("{safe}.csv")
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, query: &PayrollQuery) {
    qb.push(" WHERE pr.deleted_at IS NULL");
    if let Some(status) = query.status {
        qb.push(" AND pr.status = ").push_bind(status.as_ref().to_string());
    }
    if let Some(created_by) = query.created_by {
        qb.push(" AND pr.created_by = ").push_bind(created_by);
    }
}

// -------------------- Handlers --------------------

/// List payroll runs
#[utoipa::path(
    get,
    path = "/api/payroll",
    params(PayrollQuery),
    responses((status = 200, description = "Paginated payroll runs", body = [PayrollRunListItem])),
    tag = "Payroll",
    security(("bearer_auth" = []))
)]
pub async fn list_payroll(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<PayrollQuery>,
) -> ApiResult {
    let page = Page::new(query.page, query.limit);

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM payroll_runs pr");
    push_filters(&mut count, &query);
    let total: i64 = count.build_query_scalar().fetch_one(pool.get_ref()).await?;

    let mut data = QueryBuilder::<MySql>::new(
        r#"
        SELECT pr.*,
               (SELECT COUNT(*) FROM payroll_lines pl WHERE pl.payroll_run_id = pr.id) AS employee_count,
               (SELECT SUM(pl.net) FROM payroll_lines pl WHERE pl.payroll_run_id = pr.id) AS total_net
        FROM payroll_runs pr
        "#,
    );
    push_filters(&mut data, &query);
    data.push(" ORDER BY pr.period_start DESC, pr.id DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());

    let runs = data
        .build_query_as::<PayrollRunListItem>()
        .fetch_all(pool.get_ref())
        .await?;

    Ok(paginated(runs, page.meta(total)))
}

/// Preview payroll
///
/// Calculates lines and summaries without saving anything.
#[utoipa::path(
    post,
    path = "/api/payroll/preview",
    request_body = PreviewPayroll,
    responses(
        (status = 200, description = "Calculated payroll", body = PayrollPreview),
        (status = 400, description = "Invalid data or unknown employees")
    ),
    tag = "Payroll",
    security(("bearer_auth" = []))
)]
pub async fn preview_payroll(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<PreviewPayroll>,
) -> ApiResult {
    payload.validate()?;
    let lines = calculate_lines(&pool, payload.tax_rate.unwrap_or(0.0), &payload.employees).await?;

    Ok(ok(PayrollPreview {
        summary: summarize(&lines),
        component_summary: summarize_components(&lines),
        lines,
    }))
}

/// Create payroll run
#[utoipa::path(
    post,
    path = "/api/payroll",
    request_body = CreatePayroll,
    responses(
        (status = 201, description = "Payroll run created", body = PayrollRunDetail),
        (status = 400, description = "Invalid data or unknown employees")
    ),
    tag = "Payroll",
    security(("bearer_auth" = []))
)]
pub async fn create_payroll(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreatePayroll>,
) -> ApiResult {
    payload.validate()?;
    check_period(payload.period_start, payload.period_end)?;
    let tax_rate = payload.tax_rate.unwrap_or(0.0);

    let lines = calculate_lines(&pool, tax_rate, &payload.employees).await?;

    let mut tx = pool.begin().await?;
    let run_id = insert_run(
        &mut tx,
        payload.period_start,
        payload.period_end,
        payload.custom_file_name.as_deref(),
        payload.notes.as_deref(),
        tax_rate,
        false,
        auth.user_id,
    )
    .await?;
    for (line, input) in lines.iter().zip(&payload.employees) {
        insert_line(&mut tx, run_id, line, input.inputs.notes.as_deref()).await?;
    }
    tx.commit().await?;

    info!(run_id, lines = lines.len(), "Payroll run created");
    dashboard_cache::invalidate();

    Ok(created(fetch_run_detail(&pool, run_id).await?, "Payroll run created"))
}

async fn resolve_imported_employee(
    tx: &mut Transaction<'_, MySql>,
    imported: &ImportedEmployee,
    daily_wage: f64,
    meal_allowance: f64,
) -> Result<(u64, String), sqlx::Error> {
    if let Some(id) = imported.employee_id {
        let found: Option<(u64, String)> =
            sqlx::query_as("SELECT id, name FROM employees WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?;
        if let Some(found) = found {
            return Ok(found);
        }
    }

    let name = imported.name.trim();
    let by_name: Option<(u64, String)> = sqlx::query_as(
        "SELECT id, name FROM employees WHERE name = ? AND active = TRUE ORDER BY id LIMIT 1",
    )
    .bind(name)
    .fetch_optional(&mut **tx)
    .await?;
    if let Some(found) = by_name {
        return Ok(found);
    }

    let result = sqlx::query(
        r#"
        INSERT INTO employees (name, position, site, daily_wage, meal_allowance)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(name)
    .bind(imported.position.as_deref().unwrap_or("-"))
    .bind(imported.site.as_deref().unwrap_or("Default Site"))
    .bind(daily_wage)
    .bind(meal_allowance)
    .execute(&mut **tx)
    .await?;
    info!(employee_id = result.last_insert_id(), "Employee created from payroll import");
    Ok((result.last_insert_id(), name.to_string()))
}

/// Turns one imported employee into a stored line; amounts are taken as given.
fn imported_line(employee_id: u64, employee_name: String, e: &ImportedEmployee) -> LineCalculation {
    let days = e.working_days as f64;
    let gross = e.basic_salary + e.allowances + e.overtime_pay;
    let tax_amount = (gross - e.net_salary - e.deductions).max(0.0);
    let tax_rate = if gross > 0.0 {
        (tax_amount / gross * 10_000.0).round() / 100.0
    } else {
        0.0
    };
    LineCalculation {
        employee_id,
        employee_name,
        working_days: e.working_days,
        daily_wage: e.basic_salary / days,
        meal_allowance: e.allowances / days,
        fuel_allowance: 0.0,
        base: e.basic_salary,
        overtime_hours: e.overtime_hours,
        overtime_amount: e.overtime_pay,
        cash_advance: 0.0,
        gross,
        taxable_amount: gross,
        tax_rate,
        tax_amount,
        total_deductions: e.deductions,
        net: e.net_salary,
        components: Vec::new(),
    }
}

/// Import payroll
///
/// Stores a run read from an exported payroll document. Unknown employees are
/// created; components are linked to pay components of the same name.
#[utoipa::path(
    post,
    path = "/api/payroll/import",
    request_body = ImportPayroll,
    responses(
        (status = 201, description = "Payroll run imported", body = PayrollRunDetail),
        (status = 400, description = "Invalid data"),
        (status = 409, description = "A run already exists for this period")
    ),
    tag = "Payroll",
    security(("bearer_auth" = []))
)]
pub async fn import_payroll(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<ImportPayroll>,
) -> ApiResult {
    payload.validate()?;
    check_period(payload.period_start, payload.period_end)?;

    let mut tx = pool.begin().await?;

    let existing: Option<u64> = sqlx::query_scalar(
        r#"
        SELECT id FROM payroll_runs
        WHERE period_start = ? AND period_end = ? AND deleted_at IS NULL
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(payload.period_start)
    .bind(payload.period_end)
    .fetch_optional(&mut *tx)
    .await?;
    if let Some(existing) = existing {
        return Err(ApiError::conflict(format!(
            "A payroll run already exists for this period (run {existing})"
        )));
    }

    let notes = payload.notes.clone().unwrap_or_else(|| {
        format!("Payroll run for {}", payload.period_start.format("%m/%Y"))
    });
    let run_id = insert_run(
        &mut tx,
        payload.period_start,
        payload.period_end,
        payload.custom_file_name.as_deref(),
        Some(&notes),
        0.0,
        true,
        auth.user_id,
    )
    .await?;

    for imported in &payload.employees {
        let days = imported.working_days as f64;
        let (employee_id, employee_name) = resolve_imported_employee(
            &mut tx,
            imported,
            imported.basic_salary / days,
            imported.allowances / days,
        )
        .await?;

        let mut line = imported_line(employee_id, employee_name, imported);
        for c in &imported.components {
            let pay_component_id: Option<u64> = sqlx::query_scalar(
                "SELECT id FROM pay_components WHERE name = ? AND kind = ? ORDER BY active DESC, id LIMIT 1",
            )
            .bind(c.name.trim())
            .bind(c.kind.as_ref())
            .fetch_optional(&mut *tx)
            .await?;
            line.components.push(CalculatedComponent {
                pay_component_id,
                name: c.name.trim().to_string(),
                kind: c.kind,
                amount: c.amount,
                taxable: c.taxable,
            });
        }
        insert_line(&mut tx, run_id, &line, Some("Imported")).await?;
    }
    tx.commit().await?;

    info!(run_id, lines = payload.employees.len(), "Payroll run imported");
    dashboard_cache::invalidate();

    Ok(created(fetch_run_detail(&pool, run_id).await?, "Payroll run imported"))
}

/// Get payroll run
#[utoipa::path(
    get,
    path = "/api/payroll/{id}",
    params(("id", Path, description = "Payroll run ID")),
    responses(
        (status = 200, description = "Run with lines and components", body = PayrollRunDetail),
        (status = 404, description = "Payroll run not found")
    ),
    tag = "Payroll",
    security(("bearer_auth" = []))
)]
pub async fn get_payroll(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult {
    Ok(ok(fetch_run_detail(&pool, path.into_inner()).await?))
}

/// Update payroll run
///
/// Notes and file name can change at any time; tax rate and working days only
/// while the run is DRAFT, and the affected lines are recalculated.
#[utoipa::path(
    put,
    path = "/api/payroll/{id}",
    params(("id", Path, description = "Payroll run ID")),
    request_body = UpdatePayroll,
    responses(
        (status = 200, description = "Payroll run updated", body = PayrollRunDetail),
        (status = 400, description = "Invalid data or run not editable"),
        (status = 404, description = "Payroll run not found")
    ),
    tag = "Payroll",
    security(("bearer_auth" = []))
)]
pub async fn update_payroll(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<UpdatePayroll>,
) -> ApiResult {
    body.validate()?;
    let id = path.into_inner();
    let b = body.into_inner();

    let mut update = SqlUpdate::new("payroll_runs");
    update
        .set_some("custom_file_name", b.custom_file_name)
        .set_some("notes", b.notes)
        .set_some("tax_rate", b.tax_rate);
    let line_updates = b.lines.unwrap_or_default();

    if update.is_empty() && line_updates.is_empty() {
        return Err(ApiError::bad_request("No fields provided for update"));
    }

    let run = fetch_run(&pool, id).await?;
    let recalculates = b.tax_rate.is_some() || !line_updates.is_empty();
    if recalculates {
        check_recalculable(&run)?;
    }

    let mut tx = pool.begin().await?;
    if !update.is_empty() {
        update.execute(id, &mut *tx).await?;
    }

    if recalculates {
        let tax_rate = b.tax_rate.unwrap_or(run.tax_rate);
        let lines = sqlx::query_as::<_, PayrollLine>(
            "SELECT * FROM payroll_lines WHERE payroll_run_id = ?",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        if let Some(unknown) = line_updates
            .iter()
            .find(|u| !lines.iter().any(|l| l.id == u.line_id))
        {
            return Err(ApiError::bad_request(format!(
                "Line {} does not belong to this payroll run",
                unknown.line_id
            )));
        }

        for line in &lines {
            let requested = line_updates.iter().find(|u| u.line_id == line.id);
            // a tax change touches every line; a days change only its own
            if requested.is_none() && b.tax_rate.is_none() {
                continue;
            }
            let days = requested.map_or(line.working_days, |u| u.working_days);
            recalculate_line(&mut tx, line, days, tax_rate).await?;
        }
    }
    tx.commit().await?;
    dashboard_cache::invalidate();

    Ok(ok_with_message(
        fetch_run_detail(&pool, id).await?,
        "Payroll run updated",
    ))
}

/// Change payroll status
///
/// Follows the run workflow. Approving, rejecting and paying require the
/// approver or admin role; approval creates one kwitansi per line.
#[utoipa::path(
    patch,
    path = "/api/payroll/{id}/status",
    params(("id", Path, description = "Payroll run ID")),
    request_body = PayrollStatusChange,
    responses(
        (status = 200, description = "Status changed", body = StatusChanged),
        (status = 400, description = "Transition not allowed"),
        (status = 403, description = "Role may not perform this transition"),
        (status = 404, description = "Payroll run not found")
    ),
    tag = "Payroll",
    security(("bearer_auth" = []))
)]
pub async fn change_payroll_status(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    body: web::Json<PayrollStatusChange>,
) -> ApiResult {
    let id = path.into_inner();
    let target = body.status;

    if matches!(
        target,
        PayrollStatus::Approved | PayrollStatus::Rejected | PayrollStatus::Paid
    ) {
        auth.require_approver()?;
    }

    let run = fetch_run(&pool, id).await?;
    let current = parse_status(&run.status)?;
    if !can_move_payroll(current, target) {
        return Err(ApiError::bad_request(transition_error(
            current,
            target,
            payroll_targets(current),
        )));
    }

    let mut tx = pool.begin().await?;
    let mut update = SqlUpdate::new("payroll_runs");
    update
        .set("status", target.as_ref())
        .set_some("notes", body.notes.clone());
    if target == PayrollStatus::Approved {
        update.set("approved_by", auth.user_id);
    }
    update.execute(id, &mut *tx).await?;

    sqlx::query("UPDATE payroll_lines SET status = ? WHERE payroll_run_id = ?")
        .bind(target.as_ref())
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(run_id = id, from = %current, to = %target, user_id = auth.user_id, "Payroll status changed");

    let run = fetch_run(&pool, id).await?;
    let mut kwitansi_generated = 0;
    if target == PayrollStatus::Approved {
        // approval stands even if receipts cannot be created
        match generate_kwitansi(&pool, &config, &run, auth.user_id).await {
            Ok(n) => kwitansi_generated = n,
            Err(e) => warn!(run_id = id, error = %e, "Failed to generate kwitansi for approved payroll"),
        }
    }
    dashboard_cache::invalidate();

    let message = format!("Payroll status changed to {target}");
    Ok(ok_with_message(
        StatusChanged {
            run,
            kwitansi_generated,
        },
        message,
    ))
}

/// Export payroll run as CSV
#[utoipa::path(
    get,
    path = "/api/payroll/{id}/export",
    params(("id", Path, description = "Payroll run ID")),
    responses(
        (status = 200, description = "CSV document", content_type = "text/csv", body = String),
        (status = 404, description = "Payroll run not found")
    ),
    tag = "Payroll",
    security(("bearer_auth" = []))
)]
pub async fn export_payroll(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult {
    let id = path.into_inner();
    let run = fetch_run(&pool, id).await?;

    let mut csv = String::from(CSV_HEADER);
    let rows: Vec<String> = sqlx::query_as::<_, PayrollLine>(
        "SELECT * FROM payroll_lines WHERE payroll_run_id = ? ORDER BY employee_name, id",
    )
    .bind(id)
    .fetch(pool.get_ref())
    .map_ok(|line| csv_row(&line))
    .try_collect()
    .await?;
    for row in rows {
        csv.push_str(&row);
    }
    debug!(run_id = id, bytes = csv.len(), "Payroll exported");

    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", export_file_name(&run)),
        ))
        .body(csv))
}

/// Delete payroll run
///
/// Soft delete by default. `force=true` needs admin and a DRAFT run.
#[utoipa::path(
    delete,
    path = "/api/payroll/{id}",
    params(("id", Path, description = "Payroll run ID"), DeleteQuery),
    responses(
        (status = 200, description = "Payroll run deleted"),
        (status = 400, description = "Already deleted or not DRAFT"),
        (status = 403, description = "Force delete requires admin"),
        (status = 404, description = "Payroll run not found")
    ),
    tag = "Payroll",
    security(("bearer_auth" = []))
)]
pub async fn delete_payroll(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DeleteQuery>,
) -> ApiResult {
    let id = path.into_inner();
    if query.force {
        auth.require_admin()?;
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM payroll_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(pool.get_ref())
            .await?;
        match status {
            None => return Err(ApiError::not_found("Payroll run not found")),
            Some(s) if parse_status(&s)? != PayrollStatus::Draft => {
                return Err(ApiError::bad_request(
                    "Only DRAFT payroll runs can be permanently deleted",
                ));
            }
            _ => {}
        }
    }

    let outcome = delete_row(&pool, "payroll_runs", Marker::DeletedAt, id, query.force, "Payroll run").await?;
    info!(run_id = id, ?outcome, user_id = auth.user_id, "Payroll run deleted");
    dashboard_cache::invalidate();
    Ok(done(outcome.message("Payroll run")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use crate::test_support::{api_app, bearer, read_json};
    use actix_web::{http::StatusCode, test as atest};
    use serde_json::json;

    fn run(custom_file_name: Option<&str>) -> PayrollRun {
        let ts = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        PayrollRun {
            id: 12,
            period_start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            status: "DRAFT".into(),
            custom_file_name: custom_file_name.map(String::from),
            notes: None,
            tax_rate: 0.0,
            imported: false,
            created_by: None,
            approved_by: None,
            deleted_at: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    fn line(id: u64) -> PayrollLine {
        PayrollLine {
            id,
            payroll_run_id: 12,
            employee_id: id + 100,
            employee_name: format!("Employee {id}"),
            working_days: 22,
            daily_wage: 100_000.0,
            meal_allowance: 0.0,
            fuel_allowance: 0.0,
            overtime_hours: 0.0,
            overtime_amount: 0.0,
            cash_advance: 0.0,
            gross: 2_200_000.0,
            taxable_amount: 2_200_000.0,
            tax_rate: 0.0,
            tax_amount: 0.0,
            total_deductions: 0.0,
            net: 2_200_000.0,
            status: "DRAFT".into(),
            notes: None,
        }
    }

    #[actix_web::test]
    async fn one_failed_receipt_does_not_stop_the_rest() {
        let lines = [line(1), line(2), line(3), line(4)];
        let generated = create_each(12, &lines, |l| {
            let outcome = match l.id {
                2 => Err(ApiError::conflict("Duplicate kwitansi number")),
                3 => Ok(false),
                _ => Ok(true),
            };
            futures::future::ready(outcome)
        })
        .await;
        assert_eq!(generated, 2);
    }

    #[test]
    fn kwitansi_numbers_are_zero_padded() {
        assert_eq!(kwitansi_number(12, 3, 1), "KW-000012-0003-001");
    }

    #[test]
    fn csv_fields_are_quoted_when_needed() {
        assert_eq!(csv_field("Budi"), "Budi");
        assert_eq!(csv_field("Budi, S.T."), "\"Budi, S.T.\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn export_names() {
        assert_eq!(export_file_name(&run(None)), "payroll_2025-01-01_2025-01-31.csv");
        assert_eq!(export_file_name(&run(Some("Gaji Jan/2025.csv"))), "Gaji Jan_2025.csv");
    }

    #[test]
    fn imported_runs_are_not_recalculated() {
        assert!(check_recalculable(&run(None)).is_ok());

        let mut imported = run(None);
        imported.imported = true;
        assert!(matches!(
            check_recalculable(&imported),
            Err(ApiError::BadRequest(_))
        ));

        let mut submitted = run(None);
        submitted.status = "SUBMITTED".into();
        assert!(matches!(
            check_recalculable(&submitted),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn imported_line_derives_tax_from_totals() {
        let imported: ImportedEmployee = serde_json::from_value(json!({
            "name": "Budi",
            "basic_salary": 2_200_000.0,
            "allowances": 440_000.0,
            "deductions": 100_000.0,
            "net_salary": 2_408_000.0,
            "working_days": 22
        }))
        .unwrap();
        let line = imported_line(3, "Budi".into(), &imported);
        assert_eq!(line.gross, 2_640_000.0);
        assert_eq!(line.tax_amount, 132_000.0);
        assert_eq!(line.tax_rate, 5.0);
        assert_eq!(line.daily_wage, 100_000.0);
        assert_eq!(line.meal_allowance, 20_000.0);
    }

    #[actix_web::test]
    async fn create_rejects_reversed_period() {
        let app = api_app!();
        let req = atest::TestRequest::post()
            .uri("/api/payroll")
            .insert_header(bearer(Role::User))
            .set_json(json!({
                "period_start": "2025-02-01",
                "period_end": "2025-01-01",
                "employees": [{"employee_id": 1}]
            }))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(read_json(resp).await["details"]["period_end"].is_array());
    }

    #[actix_web::test]
    async fn preview_validates_working_days() {
        let app = api_app!();
        let req = atest::TestRequest::post()
            .uri("/api/payroll/preview")
            .insert_header(bearer(Role::User))
            .set_json(json!({"employees": [{"employee_id": 1, "working_days": 40}]}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn preview_needs_employees() {
        let app = api_app!();
        let req = atest::TestRequest::post()
            .uri("/api/payroll/preview")
            .insert_header(bearer(Role::User))
            .set_json(json!({"employees": []}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(read_json(resp).await["details"]["employees"].is_array());
    }

    #[actix_web::test]
    async fn plain_user_cannot_approve() {
        let app = api_app!();
        let req = atest::TestRequest::patch()
            .uri("/api/payroll/1/status")
            .insert_header(bearer(Role::User))
            .set_json(json!({"status": "APPROVED"}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn unknown_status_is_bad_request() {
        let app = api_app!();
        let req = atest::TestRequest::patch()
            .uri("/api/payroll/1/status")
            .insert_header(bearer(Role::Admin))
            .set_json(json!({"status": "DONE"}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn import_validates_lines() {
        let app = api_app!();
        let req = atest::TestRequest::post()
            .uri("/api/payroll/import")
            .insert_header(bearer(Role::User))
            .set_json(json!({
                "period_start": "2025-01-01",
                "period_end": "2025-01-31",
                "employees": [{
                    "name": "Budi",
                    "basic_salary": 1000.0,
                    "net_salary": -5.0,
                    "working_days": 0
                }]
            }))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
