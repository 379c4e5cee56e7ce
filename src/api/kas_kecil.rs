use crate::{
    api::{ApiResult, created, done, ok, ok_with_message, paginated},
    auth::auth::AuthUser,
    domain::calendar::{day_name, month_name},
    error::ApiError,
    model::kas::{KasKecilExpense, KasStatus},
    utils::{
        dashboard_cache,
        db_utils::{SqlUpdate, like_pattern},
        pagination::Page,
        soft_delete::{DeleteQuery, Marker, delete_row, restore_row},
    },
};
use actix_web::web;
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

const CATEGORY: &str = "kas_kecil";

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateKasKecil {
    #[schema(example = "2025-01-06", format = "date", value_type = String)]
    pub date: NaiveDate,
    /// Indonesian day name; derived from `date` when omitted.
    #[schema(example = "Senin")]
    pub day: Option<String>,
    /// Indonesian month name; derived from `date` when omitted.
    #[schema(example = "Januari")]
    pub month: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Activity type is required"))]
    pub activity_type: String,
    #[validate(length(min = 1, max = 255, message = "Item is required"))]
    pub item: String,
    #[validate(range(exclusive_min = 0.0, message = "Quantity must be greater than 0"))]
    pub quantity: f64,
    #[validate(length(min = 1, max = 32, message = "Unit is required"))]
    pub unit: String,
    #[validate(range(exclusive_min = 0.0, message = "Unit price must be greater than 0"))]
    pub unit_price: f64,
    pub vendor_name: Option<String>,
    pub vendor_phone: Option<String>,
    #[validate(email(message = "Invalid vendor email"))]
    pub vendor_email: Option<String>,
    pub sub_category: Option<String>,
    pub receipt_url: Option<String>,
    pub status: Option<KasStatus>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct UpdateKasKecil {
    #[schema(format = "date", value_type = Option<String>)]
    pub date: Option<NaiveDate>,
    pub day: Option<String>,
    pub month: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Activity type must not be empty"))]
    pub activity_type: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Item must not be empty"))]
    pub item: Option<String>,
    #[validate(range(exclusive_min = 0.0, message = "Quantity must be greater than 0"))]
    pub quantity: Option<f64>,
    #[validate(length(min = 1, max = 32, message = "Unit must not be empty"))]
    pub unit: Option<String>,
    #[validate(range(exclusive_min = 0.0, message = "Unit price must be greater than 0"))]
    pub unit_price: Option<f64>,
    pub vendor_name: Option<String>,
    pub vendor_phone: Option<String>,
    #[validate(email(message = "Invalid vendor email"))]
    pub vendor_email: Option<String>,
    pub sub_category: Option<String>,
    pub receipt_url: Option<String>,
    pub status: Option<KasStatus>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct KasKecilQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<KasStatus>,
    /// Matches item, activity type or vendor.
    pub search: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
}

pub(crate) async fn fetch_expense(pool: &MySqlPool, id: u64) -> Result<KasKecilExpense, ApiError> {
    sqlx::query_as::<_, KasKecilExpense>(
        "SELECT * FROM kas_kecil_expenses WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Kas kecil expense not found"))
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, query: &KasKecilQuery) {
    qb.push(" WHERE 1 = 1");
    if !query.include_deleted {
        qb.push(" AND deleted_at IS NULL");
    }
    if let Some(status) = query.status {
        qb.push(" AND status = ").push_bind(status.as_ref().to_string());
    }
    if let Some(term) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = like_pattern(term);
        qb.push(" AND (item LIKE ")
            .push_bind(pattern.clone())
            .push(" OR activity_type LIKE ")
            .push_bind(pattern.clone())
            .push(" OR vendor_name LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

/// List kas kecil expenses
#[utoipa::path(
    get,
    path = "/api/kas-kecil",
    params(KasKecilQuery),
    responses((status = 200, description = "Paginated expenses", body = [KasKecilExpense])),
    tag = "Kas Kecil",
    security(("bearer_auth" = []))
)]
pub async fn list_kas_kecil(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<KasKecilQuery>,
) -> ApiResult {
    let page = Page::new(query.page, query.limit);

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM kas_kecil_expenses");
    push_filters(&mut count, &query);
    let total: i64 = count.build_query_scalar().fetch_one(pool.get_ref()).await?;

    let mut data = QueryBuilder::<MySql>::new("SELECT * FROM kas_kecil_expenses");
    push_filters(&mut data, &query);
    data.push(" ORDER BY date DESC, id DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());

    let rows = data
        .build_query_as::<KasKecilExpense>()
        .fetch_all(pool.get_ref())
        .await?;

    Ok(paginated(rows, page.meta(total)))
}

/// Create kas kecil expense
///
/// `total` is `quantity × unit_price`.
#[utoipa::path(
    post,
    path = "/api/kas-kecil",
    request_body = CreateKasKecil,
    responses(
        (status = 201, description = "Expense created", body = KasKecilExpense),
        (status = 400, description = "Invalid data")
    ),
    tag = "Kas Kecil",
    security(("bearer_auth" = []))
)]
pub async fn create_kas_kecil(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateKasKecil>,
) -> ApiResult {
    payload.validate()?;
    let p = payload.into_inner();

    let result = sqlx::query(
        r#"
        INSERT INTO kas_kecil_expenses
        (day, date, month, activity_type, item, quantity, unit, unit_price, total, vendor_name,
         vendor_phone, vendor_email, category, sub_category, receipt_url, status, notes, created_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(p.day.unwrap_or_else(|| day_name(p.date).to_string()))
    .bind(p.date)
    .bind(p.month.unwrap_or_else(|| month_name(p.date).to_string()))
    .bind(p.activity_type.trim())
    .bind(p.item.trim())
    .bind(p.quantity)
    .bind(p.unit.trim())
    .bind(p.unit_price)
    .bind(p.quantity * p.unit_price)
    .bind(&p.vendor_name)
    .bind(&p.vendor_phone)
    .bind(&p.vendor_email)
    .bind(CATEGORY)
    .bind(&p.sub_category)
    .bind(&p.receipt_url)
    .bind(p.status.unwrap_or(KasStatus::Draft).as_ref())
    .bind(&p.notes)
    .bind(auth.user_id)
    .execute(pool.get_ref())
    .await?;

    let expense = fetch_expense(&pool, result.last_insert_id()).await?;
    info!(expense_id = expense.id, total = expense.total, "Kas kecil expense created");
    dashboard_cache::invalidate();

    Ok(created(expense, "Kas kecil expense created"))
}

/// Get kas kecil expense
#[utoipa::path(
    get,
    path = "/api/kas-kecil/{id}",
    params(("id", Path, description = "Expense ID")),
    responses(
        (status = 200, description = "Expense", body = KasKecilExpense),
        (status = 404, description = "Expense not found")
    ),
    tag = "Kas Kecil",
    security(("bearer_auth" = []))
)]
pub async fn get_kas_kecil(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult {
    Ok(ok(fetch_expense(&pool, path.into_inner()).await?))
}

/// Update kas kecil expense
///
/// Changing quantity or unit price recomputes the total; changing the date
/// re-derives day and month unless they are sent too.
#[utoipa::path(
    put,
    path = "/api/kas-kecil/{id}",
    params(("id", Path, description = "Expense ID")),
    request_body = UpdateKasKecil,
    responses(
        (status = 200, description = "Expense updated", body = KasKecilExpense),
        (status = 400, description = "Invalid data or empty update"),
        (status = 404, description = "Expense not found")
    ),
    tag = "Kas Kecil",
    security(("bearer_auth" = []))
)]
pub async fn update_kas_kecil(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<UpdateKasKecil>,
) -> ApiResult {
    body.validate()?;
    let id = path.into_inner();
    let b = body.into_inner();

    let mut update = SqlUpdate::new("kas_kecil_expenses");
    update
        .set_some("date", b.date)
        .set_some("day", b.day.or_else(|| b.date.map(|d| day_name(d).to_string())))
        .set_some("month", b.month.or_else(|| b.date.map(|d| month_name(d).to_string())))
        .set_some("activity_type", b.activity_type)
        .set_some("item", b.item)
        .set_some("quantity", b.quantity)
        .set_some("unit", b.unit)
        .set_some("unit_price", b.unit_price)
        .set_some("vendor_name", b.vendor_name)
        .set_some("vendor_phone", b.vendor_phone)
        .set_some("vendor_email", b.vendor_email)
        .set_some("sub_category", b.sub_category)
        .set_some("receipt_url", b.receipt_url)
        .set_some("status", b.status.map(|s| s.as_ref().to_string()))
        .set_some("notes", b.notes);

    if update.is_empty() {
        return Err(ApiError::bad_request("No fields provided for update"));
    }

    let current = fetch_expense(&pool, id).await?;
    if b.quantity.is_some() || b.unit_price.is_some() {
        let quantity = b.quantity.unwrap_or(current.quantity);
        let unit_price = b.unit_price.unwrap_or(current.unit_price);
        update.set("total", quantity * unit_price);
    }
    update.execute(id, pool.get_ref()).await?;
    dashboard_cache::invalidate();

    Ok(ok_with_message(
        fetch_expense(&pool, id).await?,
        "Kas kecil expense updated",
    ))
}

/// Delete kas kecil expense
#[utoipa::path(
    delete,
    path = "/api/kas-kecil/{id}",
    params(("id", Path, description = "Expense ID"), DeleteQuery),
    responses(
        (status = 200, description = "Expense deleted"),
        (status = 400, description = "Already deleted"),
        (status = 403, description = "Force delete requires admin"),
        (status = 404, description = "Expense not found")
    ),
    tag = "Kas Kecil",
    security(("bearer_auth" = []))
)]
pub async fn delete_kas_kecil(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DeleteQuery>,
) -> ApiResult {
    if query.force {
        auth.require_admin()?;
    }
    let id = path.into_inner();
    let outcome = delete_row(
        &pool,
        "kas_kecil_expenses",
        Marker::DeletedAt,
        id,
        query.force,
        "Kas kecil expense",
    )
    .await?;
    info!(expense_id = id, ?outcome, "Kas kecil expense deleted");
    dashboard_cache::invalidate();
    Ok(done(outcome.message("Kas kecil expense")))
}

/// Restore kas kecil expense
#[utoipa::path(
    patch,
    path = "/api/kas-kecil/{id}/restore",
    params(("id", Path, description = "Expense ID")),
    responses(
        (status = 200, description = "Expense restored", body = KasKecilExpense),
        (status = 400, description = "Expense is not deleted"),
        (status = 404, description = "Expense not found")
    ),
    tag = "Kas Kecil",
    security(("bearer_auth" = []))
)]
pub async fn restore_kas_kecil(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult {
    let id = path.into_inner();
    restore_row(&pool, "kas_kecil_expenses", id, "Kas kecil expense").await?;
    info!(expense_id = id, "Kas kecil expense restored");
    dashboard_cache::invalidate();
    Ok(ok_with_message(
        fetch_expense(&pool, id).await?,
        "Kas kecil expense restored",
    ))
}

#[cfg(test)]
mod tests {
    use crate::model::role::Role;
    use crate::test_support::{api_app, bearer, read_json};
    use actix_web::{http::StatusCode, test as atest};
    use serde_json::json;

    fn query(include_deleted: bool, search: Option<&str>) -> super::KasKecilQuery {
        super::KasKecilQuery {
            page: None,
            limit: None,
            status: None,
            search: search.map(String::from),
            include_deleted,
        }
    }

    fn filter_sql(q: &super::KasKecilQuery) -> String {
        let mut qb = sqlx::QueryBuilder::<sqlx::MySql>::new("SELECT * FROM kas_kecil_expenses");
        super::push_filters(&mut qb, q);
        qb.sql().to_string()
    }

    #[test]
    fn listing_hides_soft_deleted_rows_unless_asked() {
        assert!(filter_sql(&query(false, None)).contains("deleted_at IS NULL"));
        assert!(!filter_sql(&query(true, None)).contains("deleted_at"));
    }

    #[test]
    fn blank_search_adds_no_condition() {
        assert!(!filter_sql(&query(false, Some("  "))).contains("LIKE"));
        assert!(filter_sql(&query(false, Some("solar"))).contains("item LIKE"));
    }

    #[actix_web::test]
    async fn quantity_and_price_must_be_positive() {
        let app = api_app!();
        let req = atest::TestRequest::post()
            .uri("/api/kas-kecil")
            .insert_header(bearer(Role::User))
            .set_json(json!({
                "date": "2025-01-06",
                "activity_type": "Operasional",
                "item": "Solar",
                "quantity": 0.0,
                "unit": "liter",
                "unit_price": 0.0
            }))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = read_json(resp).await;
        assert!(body["details"]["quantity"].is_array());
        assert!(body["details"]["unit_price"].is_array());
    }

    #[actix_web::test]
    async fn unknown_status_filter_is_rejected() {
        let app = api_app!();
        let req = atest::TestRequest::get()
            .uri("/api/kas-kecil?status=PENDING")
            .insert_header(bearer(Role::User))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn force_delete_needs_admin() {
        let app = api_app!();
        let req = atest::TestRequest::delete()
            .uri("/api/kas-kecil/3?force=true")
            .insert_header(bearer(Role::User))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn restore_reports_unreachable_database() {
        let app = api_app!();
        let req = atest::TestRequest::patch()
            .uri("/api/kas-kecil/3/restore")
            .insert_header(bearer(Role::User))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
