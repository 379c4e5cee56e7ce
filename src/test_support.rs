//! Shared helpers for handler tests. The pool points at a closed port, so any
//! test that reaches the database sees it as unavailable.

use std::time::Duration;

use actix_web::{HttpResponse, body::to_bytes, dev::ServiceResponse, test};
use serde_json::Value;
use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;

use crate::auth::jwt::generate_access_token;
use crate::config::Config;
use crate::model::role::Role;

pub fn lazy_pool() -> MySqlPool {
    MySqlPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(1))
        .connect_lazy(&Config::for_tests().database_url)
        .expect("test database url parses")
}

pub fn bearer(role: Role) -> (&'static str, String) {
    let config = Config::for_tests();
    let token = generate_access_token(1, "tester@example.com".into(), role, &config.jwt_secret, 300)
        .expect("token signs");
    ("Authorization", format!("Bearer {token}"))
}

pub async fn read_json(resp: ServiceResponse) -> Value {
    test::read_body_json(resp).await
}

pub async fn read_body_json(resp: HttpResponse) -> Value {
    let bytes = to_bytes(resp.into_body()).await.expect("body reads");
    serde_json::from_slice(&bytes).expect("body is json")
}

/// Test service with the protected API mounted under `/api`, without the auth
/// middleware and rate limiter; handlers still authenticate through `AuthUser`.
macro_rules! api_app {
    () => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new($crate::test_support::lazy_pool()))
                .app_data(actix_web::web::Data::new($crate::config::Config::for_tests()))
                .app_data($crate::routes::json_config())
                .app_data($crate::routes::query_config())
                .app_data($crate::routes::path_config())
                .service(actix_web::web::scope("/api").configure($crate::routes::api_routes)),
        )
        .await
    };
}
pub(crate) use api_app;
