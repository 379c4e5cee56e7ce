use crate::{
    api::{ApiResult, created, done, ok, ok_with_message, paginated},
    auth::auth::AuthUser,
    error::ApiError,
    model::buyer::Buyer,
    utils::{
        dashboard_cache,
        db_utils::{SqlUpdate, like_pattern},
        pagination::Page,
        soft_delete::{DeleteQuery, Marker, delete_row},
    },
};
use actix_web::web;
use serde::Deserialize;
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateBuyer {
    #[schema(example = "PT. Energi Nusantara")]
    #[validate(length(min = 1, max = 255, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "Email is not valid"))]
    pub email: Option<String>,
    #[validate(length(max = 64, message = "Phone must be at most 64 characters"))]
    pub phone: Option<String>,
    pub address: Option<String>,
    pub company: Option<String>,
    #[schema(example = 800000.0)]
    #[validate(range(min = 0.0, message = "Price per ton must not be negative"))]
    pub default_price_per_ton: Option<f64>,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct UpdateBuyer {
    #[validate(length(min = 1, max = 255, message = "Name must not be empty"))]
    pub name: Option<String>,
    #[validate(email(message = "Email is not valid"))]
    pub email: Option<String>,
    #[validate(length(max = 64, message = "Phone must be at most 64 characters"))]
    pub phone: Option<String>,
    pub address: Option<String>,
    pub company: Option<String>,
    #[validate(range(min = 0.0, message = "Price per ton must not be negative"))]
    pub default_price_per_ton: Option<f64>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BuyerQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// Matches name, company or email.
    pub search: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
}

pub(crate) async fn fetch_buyer(pool: &MySqlPool, id: u64) -> Result<Buyer, ApiError> {
    sqlx::query_as::<_, Buyer>("SELECT * FROM buyers WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Buyer not found"))
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, query: &BuyerQuery) {
    qb.push(" WHERE 1 = 1");

    if !query.include_inactive {
        qb.push(" AND active = TRUE");
    }

    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let like = like_pattern(search);
        qb.push(" AND (name LIKE ")
            .push_bind(like.clone())
            .push(" OR company LIKE ")
            .push_bind(like.clone())
            .push(" OR email LIKE ")
            .push_bind(like)
            .push(")");
    }
}

/// List buyers
#[utoipa::path(
    get,
    path = "/api/buyers",
    params(BuyerQuery),
    responses(
        (status = 200, description = "Paginated buyer list", body = [Buyer]),
        (status = 503, description = "Database connection not available")
    ),
    tag = "Buyer",
    security(("bearer_auth" = []))
)]
pub async fn list_buyers(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<BuyerQuery>,
) -> ApiResult {
    let page = Page::new(query.page, query.limit);

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM buyers");
    push_filters(&mut count, &query);
    let total: i64 = count.build_query_scalar().fetch_one(pool.get_ref()).await?;

    let mut data = QueryBuilder::<MySql>::new("SELECT * FROM buyers");
    push_filters(&mut data, &query);
    data.push(" ORDER BY name ASC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());

    let buyers = data
        .build_query_as::<Buyer>()
        .fetch_all(pool.get_ref())
        .await?;

    Ok(paginated(buyers, page.meta(total)))
}

/// Create buyer
#[utoipa::path(
    post,
    path = "/api/buyers",
    request_body = CreateBuyer,
    responses(
        (status = 201, description = "Buyer created", body = Buyer),
        (status = 400, description = "Invalid data")
    ),
    tag = "Buyer",
    security(("bearer_auth" = []))
)]
pub async fn create_buyer(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateBuyer>,
) -> ApiResult {
    payload.validate()?;
    let p = payload.into_inner();

    let result = sqlx::query(
        r#"
        INSERT INTO buyers (name, email, phone, address, company, default_price_per_ton)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(p.name.trim())
    .bind(p.email.map(|e| e.trim().to_lowercase()))
    .bind(&p.phone)
    .bind(&p.address)
    .bind(&p.company)
    .bind(p.default_price_per_ton)
    .execute(pool.get_ref())
    .await?;

    let buyer = fetch_buyer(&pool, result.last_insert_id()).await?;
    info!(buyer_id = buyer.id, "Buyer created");
    dashboard_cache::invalidate();

    Ok(created(buyer, "Buyer created"))
}

/// Get buyer
#[utoipa::path(
    get,
    path = "/api/buyers/{id}",
    params(("id", Path, description = "Buyer ID")),
    responses(
        (status = 200, description = "Buyer", body = Buyer),
        (status = 404, description = "Buyer not found")
    ),
    tag = "Buyer",
    security(("bearer_auth" = []))
)]
pub async fn get_buyer(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult {
    Ok(ok(fetch_buyer(&pool, path.into_inner()).await?))
}

/// Update buyer
#[utoipa::path(
    put,
    path = "/api/buyers/{id}",
    params(("id", Path, description = "Buyer ID")),
    request_body = UpdateBuyer,
    responses(
        (status = 200, description = "Buyer updated", body = Buyer),
        (status = 400, description = "Invalid data or empty update"),
        (status = 404, description = "Buyer not found")
    ),
    tag = "Buyer",
    security(("bearer_auth" = []))
)]
pub async fn update_buyer(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<UpdateBuyer>,
) -> ApiResult {
    body.validate()?;
    let id = path.into_inner();
    let b = body.into_inner();

    let mut update = SqlUpdate::new("buyers");
    update
        .set_some("name", b.name.map(|s| s.trim().to_string()))
        .set_some("email", b.email.map(|e| e.trim().to_lowercase()))
        .set_some("phone", b.phone)
        .set_some("address", b.address)
        .set_some("company", b.company)
        .set_some("default_price_per_ton", b.default_price_per_ton)
        .set_some("active", b.active);

    if update.is_empty() {
        return Err(ApiError::bad_request("No fields provided for update"));
    }

    fetch_buyer(&pool, id).await?;
    update.execute(id, pool.get_ref()).await?;
    dashboard_cache::invalidate();

    Ok(ok_with_message(fetch_buyer(&pool, id).await?, "Buyer updated"))
}

/// Delete buyer
///
/// Deactivates the buyer. `force=true` (admin) removes the row; production
/// reports keep their stored buyer name.
#[utoipa::path(
    delete,
    path = "/api/buyers/{id}",
    params(("id", Path, description = "Buyer ID"), DeleteQuery),
    responses(
        (status = 200, description = "Buyer deleted"),
        (status = 400, description = "Already inactive"),
        (status = 403, description = "Force delete requires admin"),
        (status = 404, description = "Buyer not found")
    ),
    tag = "Buyer",
    security(("bearer_auth" = []))
)]
pub async fn delete_buyer(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DeleteQuery>,
) -> ApiResult {
    if query.force {
        auth.require_admin()?;
    }
    let id = path.into_inner();
    let outcome = delete_row(&pool, "buyers", Marker::ActiveFlag, id, query.force, "Buyer").await?;
    info!(buyer_id = id, ?outcome, "Buyer deleted");
    dashboard_cache::invalidate();
    Ok(done(outcome.message("Buyer")))
}

#[cfg(test)]
mod tests {
    use crate::model::role::Role;
    use crate::test_support::{api_app, bearer, read_json};
    use actix_web::{http::StatusCode, test as atest};
    use serde_json::json;

    #[actix_web::test]
    async fn create_rejects_bad_email_and_price() {
        let app = api_app!();
        let req = atest::TestRequest::post()
            .uri("/api/buyers")
            .insert_header(bearer(Role::User))
            .set_json(json!({
                "name": "PT. Energi Nusantara",
                "email": "not-an-email",
                "default_price_per_ton": -5.0
            }))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = read_json(resp).await;
        assert!(body["details"]["email"].is_array());
        assert!(body["details"]["default_price_per_ton"].is_array());
    }

    #[actix_web::test]
    async fn empty_update_is_rejected() {
        let app = api_app!();
        let req = atest::TestRequest::put()
            .uri("/api/buyers/3")
            .insert_header(bearer(Role::User))
            .set_json(json!({}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn force_delete_needs_admin() {
        let app = api_app!();
        let req = atest::TestRequest::delete()
            .uri("/api/buyers/3?force=true")
            .insert_header(bearer(Role::User))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn list_reports_unreachable_database() {
        let app = api_app!();
        let req = atest::TestRequest::get()
            .uri("/api/buyers?include_inactive=true")
            .insert_header(bearer(Role::User))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
