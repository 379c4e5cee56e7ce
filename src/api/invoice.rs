use crate::{
    api::{ApiResult, Envelope, done, ok, ok_with_message},
    auth::auth::AuthUser,
    config::Config,
    domain::invoice::{InvoiceTotals, apply_totals},
    error::ApiError,
    model::invoice::{Invoice, InvoiceItem, InvoiceStatus},
    utils::{
        dashboard_cache,
        db_utils::{SqlUpdate, like_pattern},
        pagination::Page,
        soft_delete::{DeleteQuery, Marker, delete_row},
    },
};
use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{MySql, MySqlPool, QueryBuilder, types::Json};
use tracing::{error, info};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateInvoice {
    #[schema(example = "INV-2025-001")]
    #[validate(length(min = 1, max = 64, message = "Invoice number is required"))]
    pub number: String,
    #[schema(example = "2025-01-15", format = "date", value_type = String)]
    pub created_date: NaiveDate,
    #[schema(format = "date", value_type = Option<String>)]
    pub due_date: Option<NaiveDate>,
    #[validate(length(min = 1, max = 255, message = "Applicant name is required"))]
    pub applicant_name: String,
    #[validate(length(min = 1, max = 255, message = "Recipient name is required"))]
    pub recipient_name: String,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub header_image: Option<String>,
    #[serde(default)]
    pub show_bank_details: bool,
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    pub account_holder: Option<String>,
    pub transfer_method: Option<String>,
    pub signature_name: Option<String>,
    pub signature_position: Option<String>,
    pub signature_location: Option<String>,
    /// Item totals and invoice totals are computed by the server.
    #[serde(default)]
    #[validate(nested)]
    pub items: Vec<InvoiceItem>,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct UpdateInvoice {
    #[validate(length(min = 1, max = 64, message = "Invoice number must not be empty"))]
    pub number: Option<String>,
    #[schema(format = "date", value_type = Option<String>)]
    pub created_date: Option<NaiveDate>,
    #[schema(format = "date", value_type = Option<String>)]
    pub due_date: Option<NaiveDate>,
    #[validate(length(min = 1, max = 255, message = "Applicant name must not be empty"))]
    pub applicant_name: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Recipient name must not be empty"))]
    pub recipient_name: Option<String>,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub header_image: Option<String>,
    pub show_bank_details: Option<bool>,
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    pub account_holder: Option<String>,
    pub transfer_method: Option<String>,
    pub signature_name: Option<String>,
    pub signature_position: Option<String>,
    pub signature_location: Option<String>,
    pub status: Option<InvoiceStatus>,
    #[validate(nested)]
    pub items: Option<Vec<InvoiceItem>>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct InvoiceQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// Matches number, applicant or recipient.
    pub search: Option<String>,
    pub created_by: Option<u64>,
    #[param(value_type = Option<String>, format = "date")]
    pub date_from: Option<NaiveDate>,
    #[param(value_type = Option<String>, format = "date")]
    pub date_to: Option<NaiveDate>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RetentionMeta {
    pub total_records: i64,
    pub retention_limit: i64,
    pub is_at_limit: bool,
}

impl RetentionMeta {
    fn new(total_records: i64, retention_limit: i64) -> Self {
        Self {
            total_records,
            retention_limit,
            is_at_limit: retention_limit > 0 && total_records >= retention_limit,
        }
    }
}

/// Live invoices to retire so one more fits under `limit`; a limit of 0 disables retention.
pub fn retention_overflow(live: i64, limit: i64) -> i64 {
    if limit <= 0 {
        0
    } else {
        (live - limit + 1).max(0)
    }
}

async fn fetch_invoice(pool: &MySqlPool, id: u64) -> Result<Invoice, ApiError> {
    sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = ? AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Invoice not found"))
}

fn duplicate_number(e: sqlx::Error) -> ApiError {
    match ApiError::from(e) {
        ApiError::Conflict(_) => ApiError::conflict("An invoice with this number already exists"),
        other => other,
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, query: &InvoiceQuery) {
    qb.push(" WHERE deleted_at IS NULL");
    if let Some(term) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = like_pattern(term);
        qb.push(" AND (number LIKE ")
            .push_bind(pattern.clone())
            .push(" OR applicant_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR recipient_name LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(created_by) = query.created_by {
        qb.push(" AND created_by = ").push_bind(created_by);
    }
    if let Some(from) = query.date_from {
        qb.push(" AND created_date >= ").push_bind(from);
    }
    if let Some(to) = query.date_to {
        qb.push(" AND created_date <= ").push_bind(to);
    }
}

/// List invoices
///
/// `meta` reports how close the table is to its retention limit.
#[utoipa::path(
    get,
    path = "/api/invoices",
    params(InvoiceQuery),
    responses((status = 200, description = "Paginated invoices with retention meta", body = [Invoice])),
    tag = "Invoice",
    security(("bearer_auth" = []))
)]
pub async fn list_invoices(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<InvoiceQuery>,
) -> ApiResult {
    if let (Some(from), Some(to)) = (query.date_from, query.date_to) {
        if to < from {
            return Err(ApiError::field("date_to", "date_to must not be before date_from"));
        }
    }
    let page = Page::new(query.page, query.limit);

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM invoices");
    push_filters(&mut count, &query);
    let total: i64 = count.build_query_scalar().fetch_one(pool.get_ref()).await?;

    let live: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invoices WHERE deleted_at IS NULL")
        .fetch_one(pool.get_ref())
        .await?;

    let mut data = QueryBuilder::<MySql>::new("SELECT * FROM invoices");
    push_filters(&mut data, &query);
    data.push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());
    let invoices = data
        .build_query_as::<Invoice>()
        .fetch_all(pool.get_ref())
        .await?;

    let meta = RetentionMeta::new(live, config.invoice_retention_limit);
    Ok(HttpResponse::Ok().json(
        Envelope::new(invoices)
            .pagination(page.meta(total))
            .meta(json!(meta)),
    ))
}

/// Create invoice
///
/// When the live invoice count has reached the retention limit, the oldest
/// invoices are soft deleted in the same transaction.
#[utoipa::path(
    post,
    path = "/api/invoices",
    request_body = CreateInvoice,
    responses(
        (status = 201, description = "Invoice created", body = Invoice),
        (status = 400, description = "Invalid data"),
        (status = 409, description = "Invoice number already used")
    ),
    tag = "Invoice",
    security(("bearer_auth" = []))
)]
pub async fn create_invoice(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<CreateInvoice>,
) -> ApiResult {
    payload.validate()?;
    let mut p = payload.into_inner();
    if let Some(due) = p.due_date {
        if due < p.created_date {
            return Err(ApiError::field("due_date", "Due date must not be before the invoice date"));
        }
    }
    let totals = apply_totals(&mut p.items);

    let mut tx = pool.begin().await?;

    let live: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM invoices WHERE deleted_at IS NULL FOR UPDATE",
    )
    .fetch_one(&mut *tx)
    .await?;
    let overflow = retention_overflow(live, config.invoice_retention_limit);
    if overflow > 0 {
        sqlx::query(
            r#"
            UPDATE invoices SET deleted_at = NOW()
            WHERE deleted_at IS NULL
            ORDER BY created_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(overflow)
        .execute(&mut *tx)
        .await?;
        info!(retired = overflow, "Oldest invoices retired by retention limit");
    }

    let result = sqlx::query(
        r#"
        INSERT INTO invoices
        (number, created_date, due_date, applicant_name, recipient_name, notes, terms,
         header_image, show_bank_details, bank_name, account_number, account_holder,
         transfer_method, signature_name, signature_position, signature_location, items,
         subtotal, discount, tax, total, status, created_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(p.number.trim())
    .bind(p.created_date)
    .bind(p.due_date)
    .bind(p.applicant_name.trim())
    .bind(p.recipient_name.trim())
    .bind(&p.notes)
    .bind(&p.terms)
    .bind(&p.header_image)
    .bind(p.show_bank_details)
    .bind(&p.bank_name)
    .bind(&p.account_number)
    .bind(&p.account_holder)
    .bind(&p.transfer_method)
    .bind(&p.signature_name)
    .bind(&p.signature_position)
    .bind(&p.signature_location)
    .bind(Json(&p.items))
    .bind(totals.subtotal)
    .bind(totals.discount)
    .bind(totals.tax)
    .bind(totals.total)
    .bind(InvoiceStatus::Draft.as_ref())
    .bind(auth.user_id)
    .execute(&mut *tx)
    .await
    .map_err(duplicate_number)?;
    tx.commit().await?;

    let invoice = fetch_invoice(&pool, result.last_insert_id()).await?;
    info!(invoice_id = invoice.id, total = invoice.total, "Invoice created");
    dashboard_cache::invalidate();

    let message = if overflow > 0 {
        format!("Invoice created; {overflow} oldest invoice(s) archived to stay within the retention limit")
    } else {
        "Invoice created".to_string()
    };
    Ok(HttpResponse::Created().json(Envelope::new(invoice).message(message)))
}

/// Get invoice
#[utoipa::path(
    get,
    path = "/api/invoices/{id}",
    params(("id", Path, description = "Invoice ID")),
    responses(
        (status = 200, description = "Invoice", body = Invoice),
        (status = 404, description = "Invoice not found")
    ),
    tag = "Invoice",
    security(("bearer_auth" = []))
)]
pub async fn get_invoice(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult {
    Ok(ok(fetch_invoice(&pool, path.into_inner()).await?))
}

fn totals_update(update: &mut SqlUpdate, mut items: Vec<InvoiceItem>) -> Result<InvoiceTotals, ApiError> {
    let totals = apply_totals(&mut items);
    let items = serde_json::to_value(&items).map_err(|e| {
        error!(error = %e, "Failed to serialize invoice items");
        ApiError::Internal
    })?;
    update
        .set("items", items)
        .set("subtotal", totals.subtotal)
        .set("discount", totals.discount)
        .set("tax", totals.tax)
        .set("total", totals.total);
    Ok(totals)
}

/// Update invoice
///
/// Sending `items` replaces all items and recomputes the totals.
#[utoipa::path(
    put,
    path = "/api/invoices/{id}",
    params(("id", Path, description = "Invoice ID")),
    request_body = UpdateInvoice,
    responses(
        (status = 200, description = "Invoice updated", body = Invoice),
        (status = 400, description = "Invalid data or empty update"),
        (status = 404, description = "Invoice not found"),
        (status = 409, description = "Invoice number already used")
    ),
    tag = "Invoice",
    security(("bearer_auth" = []))
)]
pub async fn update_invoice(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<UpdateInvoice>,
) -> ApiResult {
    body.validate()?;
    let id = path.into_inner();
    let b = body.into_inner();

    let mut update = SqlUpdate::new("invoices");
    update
        .set_some("number", b.number.map(|s| s.trim().to_string()))
        .set_some("created_date", b.created_date)
        .set_some("due_date", b.due_date)
        .set_some("applicant_name", b.applicant_name)
        .set_some("recipient_name", b.recipient_name)
        .set_some("notes", b.notes)
        .set_some("terms", b.terms)
        .set_some("header_image", b.header_image)
        .set_some("show_bank_details", b.show_bank_details)
        .set_some("bank_name", b.bank_name)
        .set_some("account_number", b.account_number)
        .set_some("account_holder", b.account_holder)
        .set_some("transfer_method", b.transfer_method)
        .set_some("signature_name", b.signature_name)
        .set_some("signature_position", b.signature_position)
        .set_some("signature_location", b.signature_location)
        .set_some("status", b.status.map(|s| s.as_ref().to_string()));
    if let Some(items) = b.items {
        totals_update(&mut update, items)?;
    }

    if update.is_empty() {
        return Err(ApiError::bad_request("No fields provided for update"));
    }

    let current = fetch_invoice(&pool, id).await?;
    let created = b.created_date.unwrap_or(current.created_date);
    if let Some(due) = b.due_date.or(current.due_date) {
        if due < created {
            return Err(ApiError::field("due_date", "Due date must not be before the invoice date"));
        }
    }

    update
        .execute(id, pool.get_ref())
        .await
        .map_err(duplicate_number)?;
    dashboard_cache::invalidate();

    Ok(ok_with_message(fetch_invoice(&pool, id).await?, "Invoice updated"))
}

/// Delete invoice
#[utoipa::path(
    delete,
    path = "/api/invoices/{id}",
    params(("id", Path, description = "Invoice ID"), DeleteQuery),
    responses(
        (status = 200, description = "Invoice deleted"),
        (status = 400, description = "Already deleted"),
        (status = 403, description = "Force delete requires admin"),
        (status = 404, description = "Invoice not found")
    ),
    tag = "Invoice",
    security(("bearer_auth" = []))
)]
pub async fn delete_invoice(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DeleteQuery>,
) -> ApiResult {
    if query.force {
        auth.require_admin()?;
    }
    let id = path.into_inner();
    let outcome = delete_row(&pool, "invoices", Marker::DeletedAt, id, query.force, "Invoice").await?;
    info!(invoice_id = id, ?outcome, "Invoice deleted");
    dashboard_cache::invalidate();
    Ok(done(outcome.message("Invoice")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use crate::test_support::{api_app, bearer, read_json};
    use actix_web::{http::StatusCode, test as atest};

    #[test]
    fn retention_makes_room_for_one_more() {
        assert_eq!(retention_overflow(99, 100), 0);
        assert_eq!(retention_overflow(100, 100), 1);
        assert_eq!(retention_overflow(103, 100), 4);
        assert_eq!(retention_overflow(5_000, 0), 0);
    }

    #[test]
    fn at_limit_flag() {
        assert!(RetentionMeta::new(100, 100).is_at_limit);
        assert!(!RetentionMeta::new(99, 100).is_at_limit);
        assert!(!RetentionMeta::new(99, 0).is_at_limit);
    }

    #[test]
    fn items_update_sets_recomputed_totals() {
        let mut update = SqlUpdate::new("invoices");
        let items = vec![InvoiceItem {
            description: "Batubara".into(),
            quantity: 2.0,
            price: 500.0,
            discount: 10.0,
            tax: 0.0,
            total: 1.0,
        }];
        let totals = totals_update(&mut update, items).unwrap();
        assert_eq!(totals.total, 900.0);
        assert_eq!(
            update.columns(),
            vec!["items", "subtotal", "discount", "tax", "total"]
        );
    }

    #[actix_web::test]
    async fn create_validates_items() {
        let app = api_app!();
        let req = atest::TestRequest::post()
            .uri("/api/invoices")
            .insert_header(bearer(Role::User))
            .set_json(json!({
                "number": "INV-1",
                "created_date": "2025-01-15",
                "applicant_name": "PT Tambang",
                "recipient_name": "PT Energi",
                "items": [{"description": "Batubara", "quantity": 1.0, "price": 10.0, "discount": 150.0}]
            }))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn create_rejects_due_date_before_invoice_date() {
        let app = api_app!();
        let req = atest::TestRequest::post()
            .uri("/api/invoices")
            .insert_header(bearer(Role::User))
            .set_json(json!({
                "number": "INV-1",
                "created_date": "2025-01-15",
                "due_date": "2025-01-01",
                "applicant_name": "PT Tambang",
                "recipient_name": "PT Energi"
            }))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(read_json(resp).await["details"]["due_date"].is_array());
    }

    #[actix_web::test]
    async fn list_rejects_reversed_date_range() {
        let app = api_app!();
        let req = atest::TestRequest::get()
            .uri("/api/invoices?date_from=2025-02-01&date_to=2025-01-01")
            .insert_header(bearer(Role::User))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
