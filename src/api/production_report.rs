use std::str::FromStr;

use crate::{
    api::{ApiResult, created, done, ok, ok_with_message, paginated},
    auth::auth::AuthUser,
    config::Config,
    domain::workflow::{can_move_production, production_targets, transition_error},
    error::ApiError,
    model::production_report::{ProductionReport, ProductionStatus},
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
use tracing::{error, info};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateProductionReport {
    #[schema(example = "2025-01-06", format = "date", value_type = String)]
    pub date: NaiveDate,
    #[schema(example = "KT 1234 AB")]
    #[validate(length(min = 1, max = 32, message = "Plate number is required"))]
    pub plate_number: String,
    pub buyer_id: Option<u64>,
    /// Defaults to the buyer's name when `buyer_id` is given.
    #[validate(length(min = 1, max = 255, message = "Buyer name must not be empty"))]
    pub buyer_name: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Destination is required"))]
    pub destination: String,
    #[schema(example = 30.5)]
    #[validate(range(exclusive_min = 0.0, message = "Gross weight must be greater than 0"))]
    pub gross_ton: f64,
    #[schema(example = 10.2)]
    #[validate(range(exclusive_min = 0.0, message = "Tare weight must be greater than 0"))]
    pub tare_ton: f64,
    pub source_file: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct UpdateProductionReport {
    #[schema(format = "date", value_type = Option<String>)]
    pub date: Option<NaiveDate>,
    #[validate(length(min = 1, max = 32, message = "Plate number must not be empty"))]
    pub plate_number: Option<String>,
    pub buyer_id: Option<u64>,
    #[validate(length(min = 1, max = 255, message = "Buyer name must not be empty"))]
    pub buyer_name: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Destination must not be empty"))]
    pub destination: Option<String>,
    #[validate(range(exclusive_min = 0.0, message = "Gross weight must be greater than 0"))]
    pub gross_ton: Option<f64>,
    #[validate(range(exclusive_min = 0.0, message = "Tare weight must be greater than 0"))]
    pub tare_ton: Option<f64>,
    pub source_file: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProductionStatusChange {
    pub status: ProductionStatus,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProductionQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<ProductionStatus>,
    pub buyer_id: Option<u64>,
    /// Matches plate number, buyer or destination.
    pub search: Option<String>,
    pub created_by: Option<u64>,
    #[param(value_type = Option<String>, format = "date")]
    pub date_from: Option<NaiveDate>,
    #[param(value_type = Option<String>, format = "date")]
    pub date_to: Option<NaiveDate>,
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProductionSummaryQuery {
    pub buyer_id: Option<u64>,
    #[param(value_type = Option<String>, format = "date")]
    pub date_from: Option<NaiveDate>,
    #[param(value_type = Option<String>, format = "date")]
    pub date_to: Option<NaiveDate>,
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct BuyerProduction {
    pub buyer_id: Option<u64>,
    pub buyer_name: String,
    pub trips: i64,
    pub gross_ton: f64,
    pub tare_ton: f64,
    pub net_ton: f64,
    /// Buyer's default price, if one is set.
    pub price_per_ton: Option<f64>,
    #[sqlx(skip)]
    pub revenue: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductionSummary {
    pub trips: i64,
    pub gross_ton: f64,
    pub tare_ton: f64,
    pub net_ton: f64,
    /// Net tonnage priced at each buyer's default price, or the company default.
    pub estimated_revenue: f64,
    pub default_price_per_ton: f64,
    pub buyers: Vec<BuyerProduction>,
}

pub fn net_ton(gross_ton: f64, tare_ton: f64) -> Result<f64, ApiError> {
    if tare_ton > gross_ton {
        return Err(ApiError::field(
            "tare_ton",
            "Tare weight must not exceed gross weight",
        ));
    }
    Ok(gross_ton - tare_ton)
}

async fn fetch_report(pool: &MySqlPool, id: u64) -> Result<ProductionReport, ApiError> {
    sqlx::query_as::<_, ProductionReport>(
        "SELECT * FROM production_reports WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Production report not found"))
}

async fn buyer_name(pool: &MySqlPool, buyer_id: u64) -> Result<String, ApiError> {
    sqlx::query_scalar::<_, String>("SELECT name FROM buyers WHERE id = ? AND active = TRUE")
        .bind(buyer_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::field("buyer_id", "Unknown or inactive buyer"))
}

fn parse_status(raw: &str) -> Result<ProductionStatus, ApiError> {
    ProductionStatus::from_str(raw).map_err(|_| {
        error!(status = raw, "Unknown production status stored");
        ApiError::Internal
    })
}

fn check_range(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<(), ApiError> {
    match (from, to) {
        (Some(from), Some(to)) if to < from => Err(ApiError::field(
            "date_to",
            "date_to must not be before date_from",
        )),
        _ => Ok(()),
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, query: &ProductionQuery) {
    qb.push(" WHERE 1 = 1");
    if !query.include_deleted {
        qb.push(" AND deleted_at IS NULL");
    }
    if let Some(status) = query.status {
        qb.push(" AND status = ").push_bind(status.as_ref().to_string());
    }
    if let Some(buyer_id) = query.buyer_id {
        qb.push(" AND buyer_id = ").push_bind(buyer_id);
    }
    if let Some(created_by) = query.created_by {
        qb.push(" AND created_by = ").push_bind(created_by);
    }
    if let Some(from) = query.date_from {
        qb.push(" AND date >= ").push_bind(from);
    }
    if let Some(to) = query.date_to {
        qb.push(" AND date <= ").push_bind(to);
    }
    if let Some(term) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = like_pattern(term);
        qb.push(" AND (plate_number LIKE ")
            .push_bind(pattern.clone())
            .push(" OR buyer_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR destination LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

/// List production reports
#[utoipa::path(
    get,
    path = "/api/production-reports",
    params(ProductionQuery),
    responses((status = 200, description = "Paginated production reports", body = [ProductionReport])),
    tag = "Production",
    security(("bearer_auth" = []))
)]
pub async fn list_reports(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<ProductionQuery>,
) -> ApiResult {
    check_range(query.date_from, query.date_to)?;
    let page = Page::new(query.page, query.limit);

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM production_reports");
    push_filters(&mut count, &query);
    let total: i64 = count.build_query_scalar().fetch_one(pool.get_ref()).await?;

    let mut data = QueryBuilder::<MySql>::new("SELECT * FROM production_reports");
    push_filters(&mut data, &query);
    data.push(" ORDER BY date DESC, id DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());

    let rows = data
        .build_query_as::<ProductionReport>()
        .fetch_all(pool.get_ref())
        .await?;

    Ok(paginated(rows, page.meta(total)))
}

/// Create production report
///
/// `net_ton` is `gross_ton − tare_ton`.
#[utoipa::path(
    post,
    path = "/api/production-reports",
    request_body = CreateProductionReport,
    responses(
        (status = 201, description = "Report created", body = ProductionReport),
        (status = 400, description = "Invalid data, tare above gross or unknown buyer")
    ),
    tag = "Production",
    security(("bearer_auth" = []))
)]
pub async fn create_report(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateProductionReport>,
) -> ApiResult {
    payload.validate()?;
    let p = payload.into_inner();
    let net = net_ton(p.gross_ton, p.tare_ton)?;

    let buyer = match (p.buyer_name, p.buyer_id) {
        (Some(name), _) => name.trim().to_string(),
        (None, Some(id)) => buyer_name(&pool, id).await?,
        (None, None) => {
            return Err(ApiError::field("buyer_name", "Buyer name or buyer id is required"));
        }
    };

    let result = sqlx::query(
        r#"
        INSERT INTO production_reports
        (date, plate_number, buyer_id, buyer_name, destination, gross_ton, tare_ton, net_ton,
         source_file, notes, status, created_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(p.date)
    .bind(p.plate_number.trim().to_uppercase())
    .bind(p.buyer_id)
    .bind(&buyer)
    .bind(p.destination.trim())
    .bind(p.gross_ton)
    .bind(p.tare_ton)
    .bind(net)
    .bind(&p.source_file)
    .bind(&p.notes)
    .bind(ProductionStatus::Draft.as_ref())
    .bind(auth.user_id)
    .execute(pool.get_ref())
    .await?;

    let report = fetch_report(&pool, result.last_insert_id()).await?;
    info!(report_id = report.id, net_ton = report.net_ton, "Production report created");
    dashboard_cache::invalidate();
    Ok(created(report, "Production report created"))
}

/// Get production report
#[utoipa::path(
    get,
    path = "/api/production-reports/{id}",
    params(("id", Path, description = "Report ID")),
    responses(
        (status = 200, description = "Production report", body = ProductionReport),
        (status = 404, description = "Report not found")
    ),
    tag = "Production",
    security(("bearer_auth" = []))
)]
pub async fn get_report(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult {
    Ok(ok(fetch_report(&pool, path.into_inner()).await?))
}

/// Update production report
///
/// Net weight is recomputed whenever a weight changes.
#[utoipa::path(
    put,
    path = "/api/production-reports/{id}",
    params(("id", Path, description = "Report ID")),
    request_body = UpdateProductionReport,
    responses(
        (status = 200, description = "Report updated", body = ProductionReport),
        (status = 400, description = "Invalid data or empty update"),
        (status = 404, description = "Report not found")
    ),
    tag = "Production",
    security(("bearer_auth" = []))
)]
pub async fn update_report(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<UpdateProductionReport>,
) -> ApiResult {
    body.validate()?;
    let id = path.into_inner();
    let b = body.into_inner();

    let mut update = SqlUpdate::new("production_reports");
    update
        .set_some("date", b.date)
        .set_some("plate_number", b.plate_number.map(|s| s.trim().to_uppercase()))
        .set_some("buyer_id", b.buyer_id)
        .set_some("buyer_name", b.buyer_name)
        .set_some("destination", b.destination)
        .set_some("gross_ton", b.gross_ton)
        .set_some("tare_ton", b.tare_ton)
        .set_some("source_file", b.source_file)
        .set_some("notes", b.notes);

    if update.is_empty() {
        return Err(ApiError::bad_request("No fields provided for update"));
    }

    let current = fetch_report(&pool, id).await?;
    if b.gross_ton.is_some() || b.tare_ton.is_some() {
        let net = net_ton(
            b.gross_ton.unwrap_or(current.gross_ton),
            b.tare_ton.unwrap_or(current.tare_ton),
        )?;
        update.set("net_ton", net);
    }
    update.execute(id, pool.get_ref()).await?;
    dashboard_cache::invalidate();

    Ok(ok_with_message(
        fetch_report(&pool, id).await?,
        "Production report updated",
    ))
}

/// Change production report status
///
/// Follows the report workflow; APPROVED needs the approver role.
#[utoipa::path(
    patch,
    path = "/api/production-reports/{id}/status",
    params(("id", Path, description = "Report ID")),
    request_body = ProductionStatusChange,
    responses(
        (status = 200, description = "Status changed", body = ProductionReport),
        (status = 400, description = "Transition not allowed"),
        (status = 403, description = "Approver role required"),
        (status = 404, description = "Report not found")
    ),
    tag = "Production",
    security(("bearer_auth" = []))
)]
pub async fn change_report_status(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<ProductionStatusChange>,
) -> ApiResult {
    let id = path.into_inner();
    let target = body.status;
    if target == ProductionStatus::Approved {
        auth.require_approver()?;
    }

    let report = fetch_report(&pool, id).await?;
    let current = parse_status(&report.status)?;
    if !can_move_production(current, target) {
        return Err(ApiError::bad_request(transition_error(
            current,
            target,
            production_targets(current),
        )));
    }

    let mut update = SqlUpdate::new("production_reports");
    update.set("status", target.as_ref());
    if target == ProductionStatus::Approved {
        update.set("approved_by", auth.user_id);
    }
    update.execute(id, pool.get_ref()).await?;

    info!(report_id = id, from = %current, to = %target, "Production report status changed");
    dashboard_cache::invalidate();
    Ok(ok_with_message(
        fetch_report(&pool, id).await?,
        format!("Status changed to {target}"),
    ))
}

/// Delete production report
#[utoipa::path(
    delete,
    path = "/api/production-reports/{id}",
    params(("id", Path, description = "Report ID"), DeleteQuery),
    responses(
        (status = 200, description = "Report deleted"),
        (status = 400, description = "Already deleted"),
        (status = 403, description = "Force delete requires admin"),
        (status = 404, description = "Report not found")
    ),
    tag = "Production",
    security(("bearer_auth" = []))
)]
pub async fn delete_report(
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
        "production_reports",
        Marker::DeletedAt,
        id,
        query.force,
        "Production report",
    )
    .await?;
    info!(report_id = id, ?outcome, "Production report deleted");
    dashboard_cache::invalidate();
    Ok(done(outcome.message("Production report")))
}

/// Production summary
///
/// Tonnage per buyer and revenue estimated from buyer prices.
#[utoipa::path(
    get,
    path = "/api/production-reports/summary",
    params(ProductionSummaryQuery),
    responses((status = 200, description = "Tonnage and revenue summary", body = ProductionSummary)),
    tag = "Production",
    security(("bearer_auth" = []))
)]
pub async fn production_summary(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<ProductionSummaryQuery>,
) -> ApiResult {
    check_range(query.date_from, query.date_to)?;

    let mut qb = QueryBuilder::<MySql>::new(
        r#"
        SELECT pr.buyer_id, pr.buyer_name, COUNT(*) AS trips,
               CAST(SUM(pr.gross_ton) AS DOUBLE) AS gross_ton,
               CAST(SUM(pr.tare_ton) AS DOUBLE) AS tare_ton,
               CAST(SUM(pr.net_ton) AS DOUBLE) AS net_ton,
               MAX(b.default_price_per_ton) AS price_per_ton
        FROM production_reports pr
        LEFT JOIN buyers b ON b.id = pr.buyer_id
        WHERE pr.deleted_at IS NULL
        "#,
    );
    if let Some(buyer_id) = query.buyer_id {
        qb.push(" AND pr.buyer_id = ").push_bind(buyer_id);
    }
    if let Some(from) = query.date_from {
        qb.push(" AND pr.date >= ").push_bind(from);
    }
    if let Some(to) = query.date_to {
        qb.push(" AND pr.date <= ").push_bind(to);
    }
    qb.push(" GROUP BY pr.buyer_id, pr.buyer_name ORDER BY net_ton DESC");

    let rows = qb
        .build_query_as::<BuyerProduction>()
        .fetch_all(pool.get_ref())
        .await?;

    Ok(ok(summarize(rows, config.default_price_per_ton)))
}

fn summarize(rows: Vec<BuyerProduction>, default_price: f64) -> ProductionSummary {
    let mut summary = ProductionSummary {
        trips: 0,
        gross_ton: 0.0,
        tare_ton: 0.0,
        net_ton: 0.0,
        estimated_revenue: 0.0,
        default_price_per_ton: default_price,
        buyers: Vec::with_capacity(rows.len()),
    };
    for mut buyer in rows {
        buyer.revenue = (buyer.net_ton * buyer.price_per_ton.unwrap_or(default_price)).round();
        summary.trips += buyer.trips;
        summary.gross_ton += buyer.gross_ton;
        summary.tare_ton += buyer.tare_ton;
        summary.net_ton += buyer.net_ton;
        summary.estimated_revenue += buyer.revenue;
        summary.buyers.push(buyer);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use crate::test_support::{api_app, bearer, read_json};
    use actix_web::{http::StatusCode, test as atest};
    use serde_json::json;

    fn buyer(name: &str, net: f64, price: Option<f64>) -> BuyerProduction {
        BuyerProduction {
            buyer_id: None,
            buyer_name: name.into(),
            trips: 2,
            gross_ton: net + 20.0,
            tare_ton: 20.0,
            net_ton: net,
            price_per_ton: price,
            revenue: 0.0,
        }
    }

    #[test]
    fn net_is_gross_minus_tare() {
        assert_eq!(net_ton(30.5, 10.5).unwrap(), 20.0);
        assert_eq!(net_ton(10.0, 10.0).unwrap(), 0.0);
        assert!(net_ton(10.0, 10.5).is_err());
    }

    #[test]
    fn revenue_falls_back_to_default_price() {
        let summary = summarize(
            vec![
                buyer("PT A", 40.0, Some(900_000.0)),
                buyer("PT B", 10.0, None),
            ],
            800_000.0,
        );
        assert_eq!(summary.trips, 4);
        assert_eq!(summary.net_ton, 50.0);
        assert_eq!(summary.tare_ton, 40.0);
        assert_eq!(summary.buyers[0].revenue, 36_000_000.0);
        assert_eq!(summary.buyers[1].revenue, 8_000_000.0);
        assert_eq!(summary.estimated_revenue, 44_000_000.0);
    }

    #[actix_web::test]
    async fn create_validates_weights() {
        let app = api_app!();
        let req = atest::TestRequest::post()
            .uri("/api/production-reports")
            .insert_header(bearer(Role::User))
            .set_json(json!({
                "date": "2025-01-06",
                "plate_number": "KT 1234 AB",
                "buyer_name": "PT Energi",
                "destination": "Jetty",
                "gross_ton": 10.0,
                "tare_ton": 12.0
            }))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(read_json(resp).await["details"]["tare_ton"].is_array());
    }

    #[actix_web::test]
    async fn create_needs_a_buyer() {
        let app = api_app!();
        let req = atest::TestRequest::post()
            .uri("/api/production-reports")
            .insert_header(bearer(Role::User))
            .set_json(json!({
                "date": "2025-01-06",
                "plate_number": "KT 1234 AB",
                "destination": "Jetty",
                "gross_ton": 30.0,
                "tare_ton": 10.0
            }))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(read_json(resp).await["details"]["buyer_name"].is_array());
    }

    #[actix_web::test]
    async fn user_cannot_approve() {
        let app = api_app!();
        let req = atest::TestRequest::patch()
            .uri("/api/production-reports/1/status")
            .insert_header(bearer(Role::User))
            .set_json(json!({"status": "APPROVED"}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn summary_rejects_reversed_range() {
        let app = api_app!();
        let req = atest::TestRequest::get()
            .uri("/api/production-reports/summary?date_from=2025-02-01&date_to=2025-01-01")
            .insert_header(bearer(Role::User))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
