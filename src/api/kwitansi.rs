use crate::{
    api::{ApiResult, created, done, ok, ok_with_message, paginated},
    auth::auth::AuthUser,
    domain::terbilang,
    error::ApiError,
    model::kwitansi::Kwitansi,
    utils::{
        db_utils::{SqlUpdate, like_pattern},
        pagination::Page,
        soft_delete::{DeleteQuery, Marker, delete_row},
    },
};
use actix_web::web;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateKwitansi {
    #[schema(example = "KW-2025-001")]
    #[validate(length(min = 1, max = 64, message = "Number is required"))]
    pub number: String,
    #[schema(example = "2025-01-31", format = "date", value_type = String)]
    pub date: NaiveDate,
    #[validate(length(min = 1, max = 255, message = "Recipient name is required"))]
    pub recipient_name: String,
    #[schema(example = 1500000.0)]
    #[validate(range(min = 0.0, message = "Amount must not be negative"))]
    pub amount: f64,
    #[validate(length(min = 1, message = "Purpose is required"))]
    pub purpose: String,
    #[validate(length(min = 1, max = 255, message = "Payer name is required"))]
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
    /// Data URL of the letterhead image.
    pub header_image: Option<String>,
    pub employee_id: Option<u64>,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct UpdateKwitansi {
    #[validate(length(min = 1, max = 64, message = "Number must not be empty"))]
    pub number: Option<String>,
    #[schema(format = "date", value_type = Option<String>)]
    pub date: Option<NaiveDate>,
    #[validate(length(min = 1, max = 255, message = "Recipient name must not be empty"))]
    pub recipient_name: Option<String>,
    #[validate(range(min = 0.0, message = "Amount must not be negative"))]
    pub amount: Option<f64>,
    #[validate(length(min = 1, message = "Purpose must not be empty"))]
    pub purpose: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Payer name must not be empty"))]
    pub payer_name: Option<String>,
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
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct KwitansiQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub payroll_run_id: Option<u64>,
    pub employee_id: Option<u64>,
    pub created_by: Option<u64>,
    /// Matches number, recipient or purpose.
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TerbilangQuery {
    #[param(example = 1500000)]
    pub amount: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Terbilang {
    pub amount: f64,
    #[schema(example = "satu juta lima ratus ribu rupiah")]
    pub words: String,
}

async fn fetch_kwitansi(pool: &MySqlPool, id: u64) -> Result<Kwitansi, ApiError> {
    sqlx::query_as::<_, Kwitansi>("SELECT * FROM kwitansi WHERE id = ? AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Kwitansi not found"))
}

fn duplicate_number(e: sqlx::Error) -> ApiError {
    match ApiError::from(e) {
        ApiError::Conflict(_) => ApiError::conflict("A kwitansi with this number already exists"),
        other => other,
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, query: &KwitansiQuery) {
    qb.push(" WHERE deleted_at IS NULL");
    if let Some(run_id) = query.payroll_run_id {
        qb.push(" AND payroll_run_id = ").push_bind(run_id);
    }
    if let Some(employee_id) = query.employee_id {
        qb.push(" AND employee_id = ").push_bind(employee_id);
    }
    if let Some(created_by) = query.created_by {
        qb.push(" AND created_by = ").push_bind(created_by);
    }
    if let Some(term) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = like_pattern(term);
        qb.push(" AND (number LIKE ")
            .push_bind(pattern.clone())
            .push(" OR recipient_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR purpose LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

/// List kwitansi
#[utoipa::path(
    get,
    path = "/api/kwitansi",
    params(KwitansiQuery),
    responses((status = 200, description = "Paginated kwitansi", body = [Kwitansi])),
    tag = "Kwitansi",
    security(("bearer_auth" = []))
)]
pub async fn list_kwitansi(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<KwitansiQuery>,
) -> ApiResult {
    let page = Page::new(query.page, query.limit);

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM kwitansi");
    push_filters(&mut count, &query);
    let total: i64 = count.build_query_scalar().fetch_one(pool.get_ref()).await?;

    let mut data = QueryBuilder::<MySql>::new("SELECT * FROM kwitansi");
    push_filters(&mut data, &query);
    data.push(" ORDER BY date DESC, id DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());

    let rows = data
        .build_query_as::<Kwitansi>()
        .fetch_all(pool.get_ref())
        .await?;

    Ok(paginated(rows, page.meta(total)))
}

/// Amount in words
#[utoipa::path(
    get,
    path = "/api/kwitansi/terbilang",
    params(TerbilangQuery),
    responses(
        (status = 200, description = "Amount spelled out in Indonesian", body = Terbilang),
        (status = 400, description = "Negative or missing amount")
    ),
    tag = "Kwitansi",
    security(("bearer_auth" = []))
)]
pub async fn terbilang_amount(_auth: AuthUser, query: web::Query<TerbilangQuery>) -> ApiResult {
    if !query.amount.is_finite() || query.amount < 0.0 {
        return Err(ApiError::field("amount", "Amount must not be negative"));
    }
    Ok(ok(Terbilang {
        amount: query.amount,
        words: terbilang::rupiah(query.amount),
    }))
}

/// Create kwitansi
///
/// `amount_in_words` is derived from `amount`.
#[utoipa::path(
    post,
    path = "/api/kwitansi",
    request_body = CreateKwitansi,
    responses(
        (status = 201, description = "Kwitansi created", body = Kwitansi),
        (status = 400, description = "Invalid data"),
        (status = 409, description = "Number already used")
    ),
    tag = "Kwitansi",
    security(("bearer_auth" = []))
)]
pub async fn create_kwitansi(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateKwitansi>,
) -> ApiResult {
    payload.validate()?;
    let p = payload.into_inner();

    let result = sqlx::query(
        r#"
        INSERT INTO kwitansi
        (number, date, recipient_name, amount, amount_in_words, purpose, payer_name,
         account_number, account_name, bank_name, transfer_method, place, receipt_date,
         signature_name, signature_position, stamp, header_image, employee_id, created_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(p.number.trim())
    .bind(p.date)
    .bind(p.recipient_name.trim())
    .bind(p.amount)
    .bind(terbilang::rupiah(p.amount))
    .bind(&p.purpose)
    .bind(p.payer_name.trim())
    .bind(&p.account_number)
    .bind(&p.account_name)
    .bind(&p.bank_name)
    .bind(&p.transfer_method)
    .bind(&p.place)
    .bind(&p.receipt_date)
    .bind(&p.signature_name)
    .bind(&p.signature_position)
    .bind(&p.stamp)
    .bind(&p.header_image)
    .bind(p.employee_id)
    .bind(auth.user_id)
    .execute(pool.get_ref())
    .await
    .map_err(duplicate_number)?;

    let kwitansi = fetch_kwitansi(&pool, result.last_insert_id()).await?;
    info!(kwitansi_id = kwitansi.id, number = %kwitansi.number, "Kwitansi created");
    Ok(created(kwitansi, "Kwitansi created"))
}

/// Get kwitansi
#[utoipa::path(
    get,
    path = "/api/kwitansi/{id}",
    params(("id", Path, description = "Kwitansi ID")),
    responses(
        (status = 200, description = "Kwitansi", body = Kwitansi),
        (status = 404, description = "Kwitansi not found")
    ),
    tag = "Kwitansi",
    security(("bearer_auth" = []))
)]
pub async fn get_kwitansi(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult {
    Ok(ok(fetch_kwitansi(&pool, path.into_inner()).await?))
}

/// Update kwitansi
#[utoipa::path(
    put,
    path = "/api/kwitansi/{id}",
    params(("id", Path, description = "Kwitansi ID")),
    request_body = UpdateKwitansi,
    responses(
        (status = 200, description = "Kwitansi updated", body = Kwitansi),
        (status = 400, description = "Invalid data or empty update"),
        (status = 404, description = "Kwitansi not found"),
        (status = 409, description = "Number already used")
    ),
    tag = "Kwitansi",
    security(("bearer_auth" = []))
)]
pub async fn update_kwitansi(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<UpdateKwitansi>,
) -> ApiResult {
    body.validate()?;
    let id = path.into_inner();
    let b = body.into_inner();

    let mut update = SqlUpdate::new("kwitansi");
    update
        .set_some("number", b.number.map(|s| s.trim().to_string()))
        .set_some("date", b.date)
        .set_some("recipient_name", b.recipient_name)
        .set_some("amount", b.amount)
        .set_some("amount_in_words", b.amount.map(terbilang::rupiah))
        .set_some("purpose", b.purpose)
        .set_some("payer_name", b.payer_name)
        .set_some("account_number", b.account_number)
        .set_some("account_name", b.account_name)
        .set_some("bank_name", b.bank_name)
        .set_some("transfer_method", b.transfer_method)
        .set_some("place", b.place)
        .set_some("receipt_date", b.receipt_date)
        .set_some("signature_name", b.signature_name)
        .set_some("signature_position", b.signature_position)
        .set_some("stamp", b.stamp)
        .set_some("header_image", b.header_image);

    if update.is_empty() {
        return Err(ApiError::bad_request("No fields provided for update"));
    }

    fetch_kwitansi(&pool, id).await?;
    update
        .execute(id, pool.get_ref())
        .await
        .map_err(duplicate_number)?;

    Ok(ok_with_message(
        fetch_kwitansi(&pool, id).await?,
        "Kwitansi updated",
    ))
}

/// Delete kwitansi
#[utoipa::path(
    delete,
    path = "/api/kwitansi/{id}",
    params(("id", Path, description = "Kwitansi ID"), DeleteQuery),
    responses(
        (status = 200, description = "Kwitansi deleted"),
        (status = 400, description = "Already deleted"),
        (status = 403, description = "Force delete requires admin"),
        (status = 404, description = "Kwitansi not found")
    ),
    tag = "Kwitansi",
    security(("bearer_auth" = []))
)]
pub async fn delete_kwitansi(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DeleteQuery>,
) -> ApiResult {
    if query.force {
        auth.require_admin()?;
    }
    let id = path.into_inner();
    let outcome = delete_row(&pool, "kwitansi", Marker::DeletedAt, id, query.force, "Kwitansi").await?;
    info!(kwitansi_id = id, ?outcome, "Kwitansi deleted");
    Ok(done(outcome.message("Kwitansi")))
}

#[cfg(test)]
mod tests {
    use crate::model::role::Role;
    use crate::test_support::{api_app, bearer, read_json};
    use actix_web::{http::StatusCode, test as atest};
    use serde_json::json;

    #[actix_web::test]
    async fn terbilang_spells_out_amounts() {
        let app = api_app!();
        let req = atest::TestRequest::get()
            .uri("/api/kwitansi/terbilang?amount=1500000")
            .insert_header(bearer(Role::User))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = read_json(resp).await;
        assert_eq!(body["data"]["words"], "satu juta lima ratus ribu rupiah");
    }

    #[actix_web::test]
    async fn terbilang_rejects_negative_amounts() {
        let app = api_app!();
        let req = atest::TestRequest::get()
            .uri("/api/kwitansi/terbilang?amount=-5")
            .insert_header(bearer(Role::User))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn create_validates_before_database() {
        let app = api_app!();
        let req = atest::TestRequest::post()
            .uri("/api/kwitansi")
            .insert_header(bearer(Role::User))
            .set_json(json!({
                "number": "",
                "date": "2025-01-31",
                "recipient_name": "Budi",
                "amount": -1.0,
                "purpose": "Gaji",
                "payer_name": "PT Tambang"
            }))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = read_json(resp).await;
        assert!(body["details"]["number"].is_array());
        assert!(body["details"]["amount"].is_array());
    }

    #[actix_web::test]
    async fn bad_dates_are_rejected() {
        let app = api_app!();
        let req = atest::TestRequest::post()
            .uri("/api/kwitansi")
            .insert_header(bearer(Role::User))
            .set_json(json!({
                "number": "KW-1",
                "date": "31/01/2025",
                "recipient_name": "Budi",
                "amount": 1.0,
                "purpose": "Gaji",
                "payer_name": "PT Tambang"
            }))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn empty_update_is_rejected() {
        let app = api_app!();
        let req = atest::TestRequest::put()
            .uri("/api/kwitansi/4")
            .insert_header(bearer(Role::User))
            .set_json(json!({}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
