use crate::{
    api::{ApiResult, created, done, ok, ok_with_message, paginated},
    auth::auth::AuthUser,
    error::ApiError,
    model::{employee::Employee, payroll::PayrollLine},
    utils::{
        dashboard_cache,
        db_utils::{SqlUpdate, like_pattern},
        pagination::Page,
        soft_delete::{DeleteQuery, Marker, delete_row},
    },
};
use actix_web::web;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateEmployee {
    #[schema(example = "Budi Santoso")]
    #[validate(length(min = 1, max = 255, message = "Name is required"))]
    pub name: String,
    #[schema(example = "6401010101900001")]
    #[validate(length(min = 1, max = 32, message = "NIK must be at most 32 characters"))]
    pub nik: Option<String>,
    #[schema(example = "Operator Excavator")]
    #[validate(length(min = 1, max = 255, message = "Position is required"))]
    pub position: String,
    #[schema(example = "Site A")]
    #[validate(length(min = 1, max = 255, message = "Site is required"))]
    pub site: String,
    pub birth_place: Option<String>,
    #[schema(example = "1990-01-01", format = "date", value_type = Option<String>)]
    pub birth_date: Option<NaiveDate>,
    pub address: Option<String>,
    #[schema(example = 150000.0)]
    #[validate(range(min = 0.0, message = "Daily wage must not be negative"))]
    pub daily_wage: f64,
    #[serde(default)]
    #[validate(range(min = 0.0, message = "Meal allowance must not be negative"))]
    pub meal_allowance: f64,
    #[serde(default)]
    #[validate(range(min = 0.0, message = "Fuel allowance must not be negative"))]
    pub fuel_allowance: f64,
    pub bank_name: Option<String>,
    pub bank_account: Option<String>,
    pub npwp: Option<String>,
    #[schema(example = "2024-01-01", format = "date", value_type = Option<String>)]
    pub start_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct UpdateEmployee {
    #[validate(length(min = 1, max = 255, message = "Name must not be empty"))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 32, message = "NIK must be at most 32 characters"))]
    pub nik: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Position must not be empty"))]
    pub position: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Site must not be empty"))]
    pub site: Option<String>,
    pub birth_place: Option<String>,
    #[schema(format = "date", value_type = Option<String>)]
    pub birth_date: Option<NaiveDate>,
    pub address: Option<String>,
    #[validate(range(min = 0.0, message = "Daily wage must not be negative"))]
    pub daily_wage: Option<f64>,
    #[validate(range(min = 0.0, message = "Meal allowance must not be negative"))]
    pub meal_allowance: Option<f64>,
    #[validate(range(min = 0.0, message = "Fuel allowance must not be negative"))]
    pub fuel_allowance: Option<f64>,
    pub bank_name: Option<String>,
    pub bank_account: Option<String>,
    pub npwp: Option<String>,
    #[schema(format = "date", value_type = Option<String>)]
    pub start_date: Option<NaiveDate>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EmployeeQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// Matches name, NIK or position.
    pub search: Option<String>,
    pub site: Option<String>,
    /// Defaults to active employees only.
    pub active: Option<bool>,
}

#[derive(Serialize, ToSchema)]
pub struct EmployeeDetail {
    #[serde(flatten)]
    pub employee: Employee,
    /// Latest five payroll lines of the employee.
    pub recent_payroll: Vec<PayrollLine>,
}

pub(crate) async fn fetch_employee(pool: &MySqlPool, id: u64) -> Result<Employee, ApiError> {
    sqlx::query_as::<_, Employee>("SELECT * FROM employees WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Employee not found"))
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, query: &EmployeeQuery) {
    qb.push(" WHERE active = ").push_bind(query.active.unwrap_or(true));

    if let Some(site) = query.site.as_deref().filter(|s| !s.trim().is_empty()) {
        qb.push(" AND site = ").push_bind(site.trim().to_string());
    }

    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let like = like_pattern(search);
        qb.push(" AND (name LIKE ")
            .push_bind(like.clone())
            .push(" OR nik LIKE ")
            .push_bind(like.clone())
            .push(" OR position LIKE ")
            .push_bind(like)
            .push(")");
    }
}

/// List employees
#[utoipa::path(
    get,
    path = "/api/employees",
    params(EmployeeQuery),
    responses(
        (status = 200, description = "Paginated employee list", body = [Employee]),
        (status = 503, description = "Database connection not available")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn list_employees(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<EmployeeQuery>,
) -> ApiResult {
    let page = Page::new(query.page, query.limit);

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM employees");
    push_filters(&mut count, &query);
    let total: i64 = count.build_query_scalar().fetch_one(pool.get_ref()).await?;

    let mut data = QueryBuilder::<MySql>::new("SELECT * FROM employees");
    push_filters(&mut data, &query);
    data.push(" ORDER BY name ASC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());
    debug!(sql = %data.sql(), "Fetching employees");

    let employees = data
        .build_query_as::<Employee>()
        .fetch_all(pool.get_ref())
        .await?;

    Ok(paginated(employees, page.meta(total)))
}

/// Create employee
#[utoipa::path(
    post,
    path = "/api/employees",
    request_body = CreateEmployee,
    responses(
        (status = 201, description = "Employee created", body = Employee),
        (status = 400, description = "Invalid data"),
        (status = 409, description = "NIK already registered")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn create_employee(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateEmployee>,
) -> ApiResult {
    payload.validate()?;
    let p = payload.into_inner();

    let result = sqlx::query(
        r#"
        INSERT INTO employees
        (name, nik, position, site, birth_place, birth_date, address, daily_wage,
         meal_allowance, fuel_allowance, bank_name, bank_account, npwp, start_date)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(p.name.trim())
    .bind(p.nik.as_deref().map(str::trim))
    .bind(p.position.trim())
    .bind(p.site.trim())
    .bind(&p.birth_place)
    .bind(p.birth_date)
    .bind(&p.address)
    .bind(p.daily_wage)
    .bind(p.meal_allowance)
    .bind(p.fuel_allowance)
    .bind(&p.bank_name)
    .bind(&p.bank_account)
    .bind(&p.npwp)
    .bind(p.start_date)
    .execute(pool.get_ref())
    .await
    .map_err(|e| match ApiError::from(e) {
        ApiError::Conflict(_) => ApiError::conflict("An employee with this NIK already exists"),
        other => other,
    })?;

    let employee = fetch_employee(&pool, result.last_insert_id()).await?;
    info!(employee_id = employee.id, "Employee created");
    dashboard_cache::invalidate();

    Ok(created(employee, "Employee created"))
}

/// Get employee
#[utoipa::path(
    get,
    path = "/api/employees/{id}",
    params(("id", Path, description = "Employee ID")),
    responses(
        (status = 200, description = "Employee with recent payroll lines", body = EmployeeDetail),
        (status = 404, description = "Employee not found")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn get_employee(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult {
    let id = path.into_inner();
    let employee = fetch_employee(&pool, id).await?;

    let recent_payroll = sqlx::query_as::<_, PayrollLine>(
        r#"
        SELECT pl.id, pl.payroll_run_id, pl.employee_id, pl.employee_name, pl.working_days,
               pl.daily_wage, pl.meal_allowance, pl.fuel_allowance, pl.overtime_hours,
               pl.overtime_amount, pl.cash_advance, pl.gross, pl.taxable_amount, pl.tax_rate,
               pl.tax_amount, pl.total_deductions, pl.net, pl.status, pl.notes
        FROM payroll_lines pl
        JOIN payroll_runs pr ON pr.id = pl.payroll_run_id
        WHERE pl.employee_id = ? AND pr.deleted_at IS NULL
        ORDER BY pr.period_end DESC, pl.id DESC
        LIMIT 5
        "#,
    )
    .bind(id)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(ok(EmployeeDetail {
        employee,
        recent_payroll,
    }))
}

/// Update employee
///
/// Only the fields present in the body change.
#[utoipa::path(
    put,
    path = "/api/employees/{id}",
    params(("id", Path, description = "Employee ID")),
    request_body = UpdateEmployee,
    responses(
        (status = 200, description = "Employee updated", body = Employee),
        (status = 400, description = "Invalid data or empty update"),
        (status = 404, description = "Employee not found"),
        (status = 409, description = "NIK already registered")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn update_employee(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<UpdateEmployee>,
) -> ApiResult {
    body.validate()?;
    let id = path.into_inner();
    let b = body.into_inner();

    let mut update = SqlUpdate::new("employees");
    update
        .set_some("name", b.name.map(|s| s.trim().to_string()))
        .set_some("nik", b.nik.map(|s| s.trim().to_string()))
        .set_some("position", b.position)
        .set_some("site", b.site)
        .set_some("birth_place", b.birth_place)
        .set_some("birth_date", b.birth_date)
        .set_some("address", b.address)
        .set_some("daily_wage", b.daily_wage)
        .set_some("meal_allowance", b.meal_allowance)
        .set_some("fuel_allowance", b.fuel_allowance)
        .set_some("bank_name", b.bank_name)
        .set_some("bank_account", b.bank_account)
        .set_some("npwp", b.npwp)
        .set_some("start_date", b.start_date)
        .set_some("active", b.active);

    if update.is_empty() {
        return Err(ApiError::bad_request("No fields provided for update"));
    }

    fetch_employee(&pool, id).await?;
    update.execute(id, pool.get_ref()).await?;
    dashboard_cache::invalidate();

    Ok(ok_with_message(
        fetch_employee(&pool, id).await?,
        "Employee updated",
    ))
}

/// Delete employee
///
/// Deactivates the employee. `force=true` (admin) removes the row, which fails
/// while payroll lines still reference it.
#[utoipa::path(
    delete,
    path = "/api/employees/{id}",
    params(("id", Path, description = "Employee ID"), DeleteQuery),
    responses(
        (status = 200, description = "Employee deleted"),
        (status = 400, description = "Already inactive or still referenced"),
        (status = 403, description = "Force delete requires admin"),
        (status = 404, description = "Employee not found")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn delete_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DeleteQuery>,
) -> ApiResult {
    if query.force {
        auth.require_admin()?;
    }
    let id = path.into_inner();
    let outcome = delete_row(&pool, "employees", Marker::ActiveFlag, id, query.force, "Employee").await?;
    info!(employee_id = id, ?outcome, "Employee deleted");
    dashboard_cache::invalidate();
    Ok(done(outcome.message("Employee")))
}

#[cfg(test)]
mod tests {
    use crate::model::role::Role;
    use crate::test_support::{api_app, bearer, read_json};
    use actix_web::{http::StatusCode, test as atest};
    use serde_json::json;

    #[actix_web::test]
    async fn requires_a_token() {
        let app = api_app!();
        let req = atest::TestRequest::get().uri("/api/employees").to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn create_validates_before_database() {
        let app = api_app!();
        let req = atest::TestRequest::post()
            .uri("/api/employees")
            .insert_header(bearer(Role::User))
            .set_json(json!({
                "name": "",
                "position": "Driver",
                "site": "Site A",
                "daily_wage": -1.0
            }))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = read_json(resp).await;
        assert!(body["details"]["name"].is_array());
        assert!(body["details"]["daily_wage"].is_array());
    }

    #[actix_web::test]
    async fn empty_update_is_rejected() {
        let app = api_app!();
        let req = atest::TestRequest::put()
            .uri("/api/employees/1")
            .insert_header(bearer(Role::User))
            .set_json(json!({}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(resp).await["error"], "No fields provided for update");
    }

    #[actix_web::test]
    async fn force_delete_needs_admin() {
        let app = api_app!();
        let req = atest::TestRequest::delete()
            .uri("/api/employees/1?force=true")
            .insert_header(bearer(Role::Approver))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn non_numeric_id_is_bad_request() {
        let app = api_app!();
        let req = atest::TestRequest::get()
            .uri("/api/employees/abc")
            .insert_header(bearer(Role::User))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn list_reports_unreachable_database() {
        let app = api_app!();
        let req = atest::TestRequest::get()
            .uri("/api/employees?search=budi")
            .insert_header(bearer(Role::User))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            read_json(resp).await["error"],
            "Database connection not available"
        );
    }
}
