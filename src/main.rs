use actix_web::middleware::{Logger, NormalizePath};
use actix_web::web::Data;
use actix_web::{App, HttpServer};
use anyhow::Context;
use dotenvy::dotenv;

mod api;
mod auth;
mod config;
mod db;
mod docs;
mod domain;
mod error;
mod model;
mod models;
mod routes;
#[cfg(test)]
mod test_support;
mod utils;

use config::Config;
use db::init_db;

use crate::docs::ApiDoc;
use crate::routes::Limiters;
use crate::utils::dashboard_cache;
use tracing::{info, warn};
use tracing_appender::rolling;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("LOG_LEVEL is not a valid log filter")?;

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    info!(addr = %config.server_addr, "Server starting...");
    api::health::mark_started();
    dashboard_cache::init(config.dashboard_cache_ttl_secs);

    let pool = init_db(&config)?;

    if config.run_migrations {
        if let Err(e) = db::run_migrations(&pool).await {
            warn!(error = %e, "Migrations skipped; database unavailable");
        } else if let Err(e) = db::seed_admin(&pool, &config).await {
            warn!(error = %e, "Admin seeding failed");
        }
    }

    let limiters = Limiters::from_config(&config)?;
    let server_addr = config.server_addr.clone();

    HttpServer::new(move || {
        let config = config.clone();
        let limiters = limiters.clone();
        App::new()
            .wrap(Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // wildcard matches the JS/CSS assets
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(Data::new(pool.clone()))
            .app_data(Data::new(config.clone()))
            .app_data(routes::json_config())
            .app_data(routes::query_config())
            .app_data(routes::path_config())
            .configure(move |cfg| routes::configure(cfg, &config, &limiters))
    })
    .bind(&server_addr)
    .with_context(|| format!("Failed to bind {server_addr}"))?
    .run()
    .await
    .context("Server error")
}
