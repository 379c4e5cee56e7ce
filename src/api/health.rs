use actix_web::{HttpResponse, Responder, web};
use once_cell::sync::Lazy;
use serde::Serialize;
use sqlx::MySqlPool;
use std::time::Instant;
use tracing::warn;
use utoipa::ToSchema;

use crate::db;

static STARTED: Lazy<Instant> = Lazy::new(Instant::now);

/// Starts the uptime clock; called once at boot.
pub fn mark_started() {
    Lazy::force(&STARTED);
}

#[derive(Serialize, ToSchema)]
pub struct Health {
    #[schema(example = "healthy")]
    pub status: &'static str,
    #[schema(example = "connected")]
    pub database: &'static str,
    pub uptime_secs: u64,
    #[schema(example = "0.1.0")]
    pub version: &'static str,
}

/// Health check
///
/// Pings the database; 503 while it is unreachable.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service and database are up", body = Health),
        (status = 503, description = "Database unreachable", body = Health)
    ),
    tag = "Health"
)]
pub async fn health(pool: web::Data<MySqlPool>) -> impl Responder {
    let uptime_secs = STARTED.elapsed().as_secs();
    let version = env!("CARGO_PKG_VERSION");

    match db::ping(&pool).await {
        Ok(()) => HttpResponse::Ok().json(Health {
            status: "healthy",
            database: "connected",
            uptime_secs,
            version,
        }),
        Err(e) => {
            warn!(error = %e, "Health check failed");
            HttpResponse::ServiceUnavailable().json(Health {
                status: "unhealthy",
                database: "disconnected",
                uptime_secs,
                version,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{lazy_pool, read_json};
    use actix_web::{App, http::StatusCode, test as atest};

    #[actix_web::test]
    async fn unreachable_database_is_unhealthy() {
        mark_started();
        let app = atest::init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .route("/health", web::get().to(health)),
        )
        .await;
        let req = atest::TestRequest::get().uri("/health").to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = read_json(resp).await;
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["database"], "disconnected");
    }
}
