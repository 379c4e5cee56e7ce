use crate::{
    api::{ApiResult, Envelope},
    auth::auth::AuthUser,
    config::Config,
    domain::calendar::period_bounds,
    error::ApiError,
    utils::dashboard_cache,
};
use actix_web::{HttpResponse, web};
use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::{debug, error};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DashboardQuery {
    /// `YYYY-MM`, defaults to the current month.
    #[param(example = "2025-01")]
    pub period: Option<String>,
    /// Limits employee and payroll figures to one site; `ALL` or empty means every site.
    pub site: Option<String>,
}

/// Production and cost figures of approved records.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Kpi {
    pub total_tons: f64,
    pub trips: i64,
    /// Net tons priced at each buyer's default price, or the configured price.
    pub estimated_revenue: f64,
    pub total_expenses: f64,
    pub realized_price_per_ton: f64,
    pub cash_cost_per_ton: f64,
    pub cash_margin_per_ton: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Finance {
    pub kas_kecil_total: f64,
    pub kas_besar_total: f64,
    pub payroll_net: f64,
    pub invoiced_total: f64,
    pub invoices_paid: f64,
    pub kwitansi_total: f64,
    pub kwitansi_count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Workforce {
    pub active_employees: i64,
    pub payroll_runs: i64,
    pub paid_lines: i64,
}

/// Records waiting for someone to act on them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PendingApprovals {
    pub kas_kecil: i64,
    pub kas_besar: i64,
    pub production_reports: i64,
    pub payroll_runs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct CostCategory {
    pub name: String,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DashboardSummary {
    #[schema(example = "2025-01")]
    pub period: String,
    pub site: Option<String>,
    #[schema(value_type = String, format = "date")]
    pub period_start: NaiveDate,
    #[schema(value_type = String, format = "date")]
    pub period_end: NaiveDate,
    pub kpi: Kpi,
    pub finance: Finance,
    pub workforce: Workforce,
    pub pending: PendingApprovals,
    /// Kas besar spending of the period by sub category, largest first.
    pub cost_breakdown: Vec<CostCategory>,
    #[schema(value_type = String)]
    pub last_updated: NaiveDateTime,
}

fn site_filter(site: Option<&str>) -> Option<String> {
    site.map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("all"))
        .map(str::to_string)
}

/// Per-ton figures; all zero when nothing was produced.
pub fn kpi(total_tons: f64, trips: i64, revenue: f64, expenses: f64) -> Kpi {
    let per_ton = |v: f64| if total_tons > 0.0 { (v / total_tons).round() } else { 0.0 };
    Kpi {
        total_tons,
        trips,
        estimated_revenue: revenue.round(),
        total_expenses: expenses,
        realized_price_per_ton: per_ton(revenue),
        cash_cost_per_ton: per_ton(expenses),
        cash_margin_per_ton: per_ton(revenue - expenses),
    }
}

async fn sum_in_period(
    pool: &MySqlPool,
    sql: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(i64, f64), sqlx::Error> {
    sqlx::query_as::<_, (i64, f64)>(sql)
        .bind(start)
        .bind(end)
        .fetch_one(pool)
        .await
}

async fn build_summary(
    pool: &MySqlPool,
    default_price: f64,
    period: String,
    site: Option<String>,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<DashboardSummary, sqlx::Error> {
    let (trips, total_tons, revenue) = sqlx::query_as::<_, (i64, f64, f64)>(
        r#"
        SELECT COUNT(*),
               CAST(COALESCE(SUM(p.net_ton), 0) AS DOUBLE),
               CAST(COALESCE(SUM(p.net_ton * COALESCE(b.default_price_per_ton, ?)), 0) AS DOUBLE)
        FROM production_reports p
        LEFT JOIN buyers b ON b.id = p.buyer_id
        WHERE p.deleted_at IS NULL AND p.status = 'APPROVED' AND p.date BETWEEN ? AND ?
        "#,
    )
    .bind(default_price)
    .bind(start)
    .bind(end)
    .fetch_one(pool)
    .await?;

    let (_, approved_kecil) = sum_in_period(
        pool,
        "SELECT COUNT(*), CAST(COALESCE(SUM(total), 0) AS DOUBLE) FROM kas_kecil_expenses \
         WHERE deleted_at IS NULL AND status = 'APPROVED' AND date BETWEEN ? AND ?",
        start,
        end,
    )
    .await?;
    let (_, approved_besar) = sum_in_period(
        pool,
        "SELECT COUNT(*), CAST(COALESCE(SUM(total), 0) AS DOUBLE) FROM kas_besar_expenses \
         WHERE deleted_at IS NULL AND status = 'APPROVED' AND date BETWEEN ? AND ?",
        start,
        end,
    )
    .await?;

    let (_, kas_kecil_total) = sum_in_period(
        pool,
        "SELECT COUNT(*), CAST(COALESCE(SUM(total), 0) AS DOUBLE) FROM kas_kecil_expenses \
         WHERE deleted_at IS NULL AND status <> 'REJECTED' AND date BETWEEN ? AND ?",
        start,
        end,
    )
    .await?;
    let (_, kas_besar_total) = sum_in_period(
        pool,
        "SELECT COUNT(*), CAST(COALESCE(SUM(total), 0) AS DOUBLE) FROM kas_besar_expenses \
         WHERE deleted_at IS NULL AND status <> 'REJECTED' AND date BETWEEN ? AND ?",
        start,
        end,
    )
    .await?;
    let (_, invoiced_total) = sum_in_period(
        pool,
        "SELECT COUNT(*), CAST(COALESCE(SUM(total), 0) AS DOUBLE) FROM invoices \
         WHERE deleted_at IS NULL AND status <> 'CANCELLED' AND created_date BETWEEN ? AND ?",
        start,
        end,
    )
    .await?;
    let (_, invoices_paid) = sum_in_period(
        pool,
        "SELECT COUNT(*), CAST(COALESCE(SUM(total), 0) AS DOUBLE) FROM invoices \
         WHERE deleted_at IS NULL AND status = 'PAID' AND created_date BETWEEN ? AND ?",
        start,
        end,
    )
    .await?;
    let (kwitansi_count, kwitansi_total) = sum_in_period(
        pool,
        "SELECT COUNT(*), CAST(COALESCE(SUM(amount), 0) AS DOUBLE) FROM kwitansi \
         WHERE deleted_at IS NULL AND date BETWEEN ? AND ?",
        start,
        end,
    )
    .await?;

    let mut employees = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM employees WHERE active = TRUE");
    if let Some(site) = &site {
        employees.push(" AND site = ").push_bind(site.clone());
    }
    let active_employees: i64 = employees.build_query_scalar().fetch_one(pool).await?;

    // Runs whose period overlaps the month.
    let mut payroll = QueryBuilder::<MySql>::new(
        r#"
        SELECT COUNT(DISTINCT pr.id),
               CAST(COALESCE(SUM(CASE WHEN pr.status IN ('APPROVED', 'PAID') THEN pl.net ELSE 0 END), 0) AS DOUBLE),
               CAST(COALESCE(SUM(CASE WHEN pl.status = 'PAID' THEN 1 ELSE 0 END), 0) AS SIGNED)
        FROM payroll_runs pr
        JOIN payroll_lines pl ON pl.payroll_run_id = pr.id
        JOIN employees e ON e.id = pl.employee_id
        WHERE pr.deleted_at IS NULL
        "#,
    );
    payroll
        .push(" AND pr.period_start <= ")
        .push_bind(end)
        .push(" AND pr.period_end >= ")
        .push_bind(start);
    if let Some(site) = &site {
        payroll.push(" AND e.site = ").push_bind(site.clone());
    }
    let (payroll_runs, payroll_net, paid_lines) = payroll
        .build_query_as::<(i64, f64, i64)>()
        .fetch_one(pool)
        .await?;

    let (pending_kecil, pending_besar, pending_production, pending_payroll) =
        sqlx::query_as::<_, (i64, i64, i64, i64)>(
            r#"
            SELECT
              (SELECT COUNT(*) FROM kas_kecil_expenses WHERE deleted_at IS NULL AND status IN ('SUBMITTED', 'REVIEWED')),
              (SELECT COUNT(*) FROM kas_besar_expenses WHERE deleted_at IS NULL AND status IN ('SUBMITTED', 'REVIEWED')),
              (SELECT COUNT(*) FROM production_reports WHERE deleted_at IS NULL AND status IN ('SUBMITTED', 'REVIEWED')),
              (SELECT COUNT(*) FROM payroll_runs WHERE deleted_at IS NULL AND status = 'SUBMITTED')
            "#,
        )
        .fetch_one(pool)
        .await?;

    let cost_breakdown = sqlx::query_as::<_, CostCategory>(
        r#"
        SELECT sub_category AS name, CAST(SUM(total) AS DOUBLE) AS total
        FROM kas_besar_expenses
        WHERE deleted_at IS NULL AND status <> 'REJECTED' AND date BETWEEN ? AND ?
        GROUP BY sub_category
        ORDER BY total DESC
        LIMIT 10
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(DashboardSummary {
        period,
        site,
        period_start: start,
        period_end: end,
        kpi: kpi(total_tons, trips, revenue, approved_kecil + approved_besar),
        finance: Finance {
            kas_kecil_total,
            kas_besar_total,
            payroll_net,
            invoiced_total,
            invoices_paid,
            kwitansi_total,
            kwitansi_count,
        },
        workforce: Workforce {
            active_employees,
            payroll_runs,
            paid_lines,
        },
        pending: PendingApprovals {
            kas_kecil: pending_kecil,
            kas_besar: pending_besar,
            production_reports: pending_production,
            payroll_runs: pending_payroll,
        },
        cost_breakdown,
        last_updated: Local::now().naive_local(),
    })
}

/// Dashboard summary
///
/// Figures for one month, cached for `DASHBOARD_CACHE_TTL_SECS` and dropped
/// whenever a record changes.
#[utoipa::path(
    get,
    path = "/api/dashboard/summary",
    params(DashboardQuery),
    responses(
        (status = 200, description = "Dashboard figures of the period", body = DashboardSummary),
        (status = 400, description = "Invalid period"),
        (status = 503, description = "Database connection not available")
    ),
    tag = "Dashboard",
    security(("bearer_auth" = []))
)]
pub async fn dashboard_summary(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<DashboardQuery>,
) -> ApiResult {
    let query = query.into_inner();
    let period = query
        .period
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| Local::now().format("%Y-%m").to_string());
    let (start, end) = period_bounds(&period)
        .ok_or_else(|| ApiError::field("period", "Period must be in YYYY-MM format"))?;
    let site = site_filter(query.site.as_deref());

    let key = dashboard_cache::key(&period, site.as_deref());
    if let Some(cached) = dashboard_cache::get(&key).await {
        debug!(%key, "Dashboard summary served from cache");
        return Ok(HttpResponse::Ok().json(Envelope::new(cached).meta(json!({ "cached": true }))));
    }

    let generation = dashboard_cache::generation();
    let summary = build_summary(&pool, config.default_price_per_ton, period, site, start, end).await?;
    let value = serde_json::to_value(&summary).map_err(|e| {
        error!(error = %e, "Failed to serialize dashboard summary");
        ApiError::Internal
    })?;
    dashboard_cache::put(key, value.clone(), generation).await;

    Ok(HttpResponse::Ok().json(Envelope::new(value).meta(json!({ "cached": false }))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use crate::test_support::{api_app, bearer, read_json};
    use actix_web::{http::StatusCode, test as atest};

    #[test]
    fn kpi_per_ton_figures() {
        let k = kpi(100.0, 4, 80_000_000.0, 30_000_000.0);
        assert_eq!(k.realized_price_per_ton, 800_000.0);
        assert_eq!(k.cash_cost_per_ton, 300_000.0);
        assert_eq!(k.cash_margin_per_ton, 500_000.0);
    }

    #[test]
    fn kpi_without_production_is_zero_per_ton() {
        let k = kpi(0.0, 0, 0.0, 1_000.0);
        assert_eq!(k.cash_cost_per_ton, 0.0);
        assert_eq!(k.total_expenses, 1_000.0);
    }

    #[test]
    fn all_site_means_no_filter() {
        assert_eq!(site_filter(Some("ALL")), None);
        assert_eq!(site_filter(Some("  ")), None);
        assert_eq!(site_filter(Some(" Site A ")), Some("Site A".to_string()));
    }

    #[actix_web::test]
    async fn invalid_period_is_rejected() {
        let app = api_app!();
        let req = atest::TestRequest::get()
            .uri("/api/dashboard/summary?period=2025-13")
            .insert_header(bearer(Role::User))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(read_json(resp).await["details"]["period"].is_array());
    }

    #[actix_web::test]
    async fn cached_summary_skips_the_database() {
        let key = dashboard_cache::key("1998-07", Some("cached-site"));
        dashboard_cache::put(key, json!({"period": "1998-07"}), dashboard_cache::generation()).await;

        let app = api_app!();
        let req = atest::TestRequest::get()
            .uri("/api/dashboard/summary?period=1998-07&site=cached-site")
            .insert_header(bearer(Role::User))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = read_json(resp).await;
        assert_eq!(body["data"]["period"], "1998-07");
        assert_eq!(body["meta"]["cached"], true);
    }
}
