use std::str::FromStr;

use crate::{
    api::{ApiResult, created, done, ok, ok_with_message},
    auth::auth::AuthUser,
    error::ApiError,
    model::pay_component::{CalcBasis, CalcMethod, ComponentKind, PayComponent},
    utils::{
        db_utils::SqlUpdate,
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
pub struct CreatePayComponent {
    #[schema(example = "Tunjangan Transport")]
    #[validate(length(min = 1, max = 255, message = "Name is required"))]
    pub name: String,
    pub kind: ComponentKind,
    #[serde(default)]
    pub taxable: bool,
    pub method: CalcMethod,
    pub basis: Option<CalcBasis>,
    #[validate(range(min = 0.0, message = "Rate must not be negative"))]
    pub rate: Option<f64>,
    #[validate(range(min = 0.0, message = "Amount must not be negative"))]
    pub amount: Option<f64>,
    #[validate(range(min = 0.0, message = "Minimum cap must not be negative"))]
    pub cap_min: Option<f64>,
    #[validate(range(min = 0.0, message = "Maximum cap must not be negative"))]
    pub cap_max: Option<f64>,
    #[serde(default)]
    pub sort_order: i32,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct UpdatePayComponent {
    #[validate(length(min = 1, max = 255, message = "Name must not be empty"))]
    pub name: Option<String>,
    pub kind: Option<ComponentKind>,
    pub taxable: Option<bool>,
    pub method: Option<CalcMethod>,
    pub basis: Option<CalcBasis>,
    #[validate(range(min = 0.0, message = "Rate must not be negative"))]
    pub rate: Option<f64>,
    #[validate(range(min = 0.0, message = "Amount must not be negative"))]
    pub amount: Option<f64>,
    #[validate(range(min = 0.0, message = "Minimum cap must not be negative"))]
    pub cap_min: Option<f64>,
    #[validate(range(min = 0.0, message = "Maximum cap must not be negative"))]
    pub cap_max: Option<f64>,
    pub sort_order: Option<i32>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PayComponentQuery {
    pub kind: Option<ComponentKind>,
    #[serde(default)]
    pub include_inactive: bool,
}

/// Checks the fields each calculation method depends on.
pub fn check_method(
    method: CalcMethod,
    rate: Option<f64>,
    amount: Option<f64>,
    cap_min: Option<f64>,
    cap_max: Option<f64>,
) -> Result<(), ApiError> {
    match method {
        CalcMethod::Flat if amount.is_none() => {
            return Err(ApiError::field("amount", "FLAT components need an amount"));
        }
        CalcMethod::PerDay if rate.is_none() => {
            return Err(ApiError::field("rate", "PER_DAY components need a rate"));
        }
        CalcMethod::Percentage => match rate {
            None => return Err(ApiError::field("rate", "PERCENTAGE components need a rate")),
            Some(r) if r > 100.0 => {
                return Err(ApiError::field("rate", "Percentage must not exceed 100"));
            }
            _ => {}
        },
        _ => {}
    }
    if let (Some(min), Some(max)) = (cap_min, cap_max) {
        if min > max {
            return Err(ApiError::field(
                "cap_min",
                "Minimum cap must not exceed the maximum cap",
            ));
        }
    }
    Ok(())
}

pub(crate) async fn fetch_component(pool: &MySqlPool, id: u64) -> Result<PayComponent, ApiError> {
    sqlx::query_as::<_, PayComponent>("SELECT * FROM pay_components WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Pay component not found"))
}

/// List pay components
#[utoipa::path(
    get,
    path = "/api/pay-components",
    params(PayComponentQuery),
    responses((status = 200, description = "Components ordered by sort order", body = [PayComponent])),
    tag = "Pay Component",
    security(("bearer_auth" = []))
)]
pub async fn list_components(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<PayComponentQuery>,
) -> ApiResult {
    let mut qb = QueryBuilder::<MySql>::new("SELECT * FROM pay_components WHERE 1 = 1");
    if !query.include_inactive {
        qb.push(" AND active = TRUE");
    }
    if let Some(kind) = query.kind {
        qb.push(" AND kind = ").push_bind(kind.as_ref().to_string());
    }
    qb.push(" ORDER BY sort_order ASC, name ASC");

    let components = qb
        .build_query_as::<PayComponent>()
        .fetch_all(pool.get_ref())
        .await?;
    Ok(ok(components))
}

/// Create pay component
#[utoipa::path(
    post,
    path = "/api/pay-components",
    request_body = CreatePayComponent,
    responses(
        (status = 201, description = "Component created", body = PayComponent),
        (status = 400, description = "Invalid data")
    ),
    tag = "Pay Component",
    security(("bearer_auth" = []))
)]
pub async fn create_component(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreatePayComponent>,
) -> ApiResult {
    payload.validate()?;
    let p = payload.into_inner();
    check_method(p.method, p.rate, p.amount, p.cap_min, p.cap_max)?;
    let basis = p.basis.unwrap_or(CalcBasis::DailyWage);

    let result = sqlx::query(
        r#"
        INSERT INTO pay_components
        (name, kind, taxable, method, basis, rate, amount, cap_min, cap_max, sort_order, created_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(p.name.trim())
    .bind(p.kind.as_ref())
    .bind(p.taxable)
    .bind(p.method.as_ref())
    .bind(basis.as_ref())
    .bind(p.rate)
    .bind(p.amount)
    .bind(p.cap_min)
    .bind(p.cap_max)
    .bind(p.sort_order)
    .bind(auth.user_id)
    .execute(pool.get_ref())
    .await?;

    let component = fetch_component(&pool, result.last_insert_id()).await?;
    info!(component_id = component.id, "Pay component created");
    Ok(created(component, "Pay component created"))
}

/// Get pay component
#[utoipa::path(
    get,
    path = "/api/pay-components/{id}",
    params(("id", Path, description = "Pay component ID")),
    responses(
        (status = 200, description = "Pay component", body = PayComponent),
        (status = 404, description = "Pay component not found")
    ),
    tag = "Pay Component",
    security(("bearer_auth" = []))
)]
pub async fn get_component(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult {
    Ok(ok(fetch_component(&pool, path.into_inner()).await?))
}

/// Update pay component
///
/// The merged component must still satisfy the method rules.
#[utoipa::path(
    put,
    path = "/api/pay-components/{id}",
    params(("id", Path, description = "Pay component ID")),
    request_body = UpdatePayComponent,
    responses(
        (status = 200, description = "Pay component updated", body = PayComponent),
        (status = 400, description = "Invalid data"),
        (status = 404, description = "Pay component not found")
    ),
    tag = "Pay Component",
    security(("bearer_auth" = []))
)]
pub async fn update_component(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<UpdatePayComponent>,
) -> ApiResult {
    body.validate()?;
    let id = path.into_inner();
    let b = body.into_inner();

    let mut update = SqlUpdate::new("pay_components");
    update
        .set_some("name", b.name.map(|s| s.trim().to_string()))
        .set_some("kind", b.kind.map(|k| k.as_ref().to_string()))
        .set_some("taxable", b.taxable)
        .set_some("method", b.method.map(|m| m.as_ref().to_string()))
        .set_some("basis", b.basis.map(|v| v.as_ref().to_string()))
        .set_some("rate", b.rate)
        .set_some("amount", b.amount)
        .set_some("cap_min", b.cap_min)
        .set_some("cap_max", b.cap_max)
        .set_some("sort_order", b.sort_order)
        .set_some("active", b.active);

    if update.is_empty() {
        return Err(ApiError::bad_request("No fields provided for update"));
    }

    let current = fetch_component(&pool, id).await?;
    let method = match b.method {
        Some(m) => m,
        None => CalcMethod::from_str(&current.method).map_err(|_| ApiError::Internal)?,
    };
    check_method(
        method,
        b.rate.or(current.rate),
        b.amount.or(current.amount),
        b.cap_min.or(current.cap_min),
        b.cap_max.or(current.cap_max),
    )?;

    update.execute(id, pool.get_ref()).await?;
    Ok(ok_with_message(
        fetch_component(&pool, id).await?,
        "Pay component updated",
    ))
}

/// Delete pay component
///
/// Deactivates the component. `force=true` (admin) removes it, only while no
/// payroll line uses it.
#[utoipa::path(
    delete,
    path = "/api/pay-components/{id}",
    params(("id", Path, description = "Pay component ID"), DeleteQuery),
    responses(
        (status = 200, description = "Pay component deleted"),
        (status = 400, description = "Component in use or already inactive"),
        (status = 404, description = "Pay component not found")
    ),
    tag = "Pay Component",
    security(("bearer_auth" = []))
)]
pub async fn delete_component(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DeleteQuery>,
) -> ApiResult {
    let id = path.into_inner();
    if query.force {
        auth.require_admin()?;
        let uses: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM payroll_line_components WHERE pay_component_id = ?",
        )
        .bind(id)
        .fetch_one(pool.get_ref())
        .await?;
        if uses > 0 {
            return Err(ApiError::bad_request(format!(
                "Pay component is used by {uses} payroll line(s); deactivate it instead"
            )));
        }
    }

    let outcome = delete_row(&pool, "pay_components", Marker::ActiveFlag, id, query.force, "Pay component").await?;
    info!(component_id = id, ?outcome, "Pay component deleted");
    Ok(done(outcome.message("Pay component")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use crate::test_support::{api_app, bearer, read_json};
    use actix_web::{http::StatusCode, test as atest};
    use serde_json::json;

    #[test]
    fn method_rules() {
        assert!(check_method(CalcMethod::Flat, None, Some(1.0), None, None).is_ok());
        assert!(check_method(CalcMethod::Flat, Some(1.0), None, None, None).is_err());
        assert!(check_method(CalcMethod::PerDay, None, None, None, None).is_err());
        assert!(check_method(CalcMethod::Percentage, Some(101.0), None, None, None).is_err());
        assert!(check_method(CalcMethod::Percentage, Some(2.0), None, Some(10.0), Some(5.0)).is_err());
        assert!(check_method(CalcMethod::Percentage, Some(2.0), None, Some(5.0), Some(10.0)).is_ok());
    }

    #[actix_web::test]
    async fn unknown_method_is_bad_request() {
        let app = api_app!();
        let req = atest::TestRequest::post()
            .uri("/api/pay-components")
            .insert_header(bearer(Role::User))
            .set_json(json!({"name": "Bonus", "kind": "EARNING", "method": "WEEKLY"}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn flat_without_amount_is_rejected() {
        let app = api_app!();
        let req = atest::TestRequest::post()
            .uri("/api/pay-components")
            .insert_header(bearer(Role::User))
            .set_json(json!({"name": "Bonus", "kind": "EARNING", "method": "FLAT"}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(read_json(resp).await["details"]["amount"].is_array());
    }
}
