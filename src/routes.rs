use crate::{
    api::{
        buyer, dashboard, employee, health, invoice, kas_besar, kas_kecil, kwitansi,
        pay_component, payroll, production_report, user,
    },
    auth::{handlers, middleware::auth_middleware},
    config::Config,
    error::extractor_error,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use anyhow::{Context, Result};
use std::sync::Arc;

type Limiter = Arc<Governor<PeerIpKeyExtractor, NoOpMiddleware>>;

fn build_limiter(requests_per_min: u32) -> Result<Limiter> {
    let burst = requests_per_min.max(1);
    let per_ms = (60_000 / u64::from(burst)).max(1);
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(burst)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .context("Invalid rate limit settings")?;
    Ok(Arc::new(Governor::new(&cfg)))
}

/// Per-IP limiters, built once so every worker shares the same quotas.
#[derive(Clone)]
pub struct Limiters {
    login: Limiter,
    refresh: Limiter,
    protected: Limiter,
}

impl Limiters {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            login: build_limiter(config.rate_login_per_min)?,
            refresh: build_limiter(config.rate_refresh_per_min)?,
            protected: build_limiter(config.rate_protected_per_min)?,
        })
    }
}

pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(4 * 1024 * 1024)
        .error_handler(|err, _| extractor_error(err.to_string()))
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _| extractor_error(err.to_string()))
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|err, _| extractor_error(err.to_string()))
}

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config, limiters: &Limiters) {
    cfg.service(web::resource("/health").route(web::get().to(health::health)));

    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/login")
                    .wrap(limiters.login.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(limiters.refresh.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(limiters.login.clone())
                    .route(web::post().to(handlers::logout)),
            ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware))
            .wrap(limiters.protected.clone())
            .configure(api_routes),
    );
}

/// Resources under the API prefix. Fixed segments are registered before `/{id}`.
pub fn api_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/employees")
            .service(
                web::resource("")
                    .route(web::get().to(employee::list_employees))
                    .route(web::post().to(employee::create_employee)),
            )
            .service(
                web::resource("/{id}")
                    .route(web::get().to(employee::get_employee))
                    .route(web::put().to(employee::update_employee))
                    .route(web::delete().to(employee::delete_employee)),
            ),
    )
    .service(
        web::scope("/pay-components")
            .service(
                web::resource("")
                    .route(web::get().to(pay_component::list_components))
                    .route(web::post().to(pay_component::create_component)),
            )
            .service(
                web::resource("/{id}")
                    .route(web::get().to(pay_component::get_component))
                    .route(web::put().to(pay_component::update_component))
                    .route(web::delete().to(pay_component::delete_component)),
            ),
    )
    .service(
        web::scope("/payroll")
            .service(
                web::resource("")
                    .route(web::get().to(payroll::list_payroll))
                    .route(web::post().to(payroll::create_payroll)),
            )
            .service(web::resource("/preview").route(web::post().to(payroll::preview_payroll)))
            .service(web::resource("/import").route(web::post().to(payroll::import_payroll)))
            .service(
                web::resource("/{id}")
                    .route(web::get().to(payroll::get_payroll))
                    .route(web::put().to(payroll::update_payroll))
                    .route(web::delete().to(payroll::delete_payroll)),
            )
            .service(
                web::resource("/{id}/status")
                    .route(web::patch().to(payroll::change_payroll_status)),
            )
            .service(web::resource("/{id}/export").route(web::get().to(payroll::export_payroll))),
    )
    .service(
        web::scope("/kwitansi")
            .service(
                web::resource("")
                    .route(web::get().to(kwitansi::list_kwitansi))
                    .route(web::post().to(kwitansi::create_kwitansi)),
            )
            .service(web::resource("/terbilang").route(web::get().to(kwitansi::terbilang_amount)))
            .service(
                web::resource("/{id}")
                    .route(web::get().to(kwitansi::get_kwitansi))
                    .route(web::put().to(kwitansi::update_kwitansi))
                    .route(web::delete().to(kwitansi::delete_kwitansi)),
            ),
    )
    .service(
        web::scope("/invoices")
            .service(
                web::resource("")
                    .route(web::get().to(invoice::list_invoices))
                    .route(web::post().to(invoice::create_invoice)),
            )
            .service(
                web::resource("/{id}")
                    .route(web::get().to(invoice::get_invoice))
                    .route(web::put().to(invoice::update_invoice))
                    .route(web::delete().to(invoice::delete_invoice)),
            ),
    )
    .service(
        web::scope("/kas-kecil")
            .service(
                web::resource("")
                    .route(web::get().to(kas_kecil::list_kas_kecil))
                    .route(web::post().to(kas_kecil::create_kas_kecil)),
            )
            .service(
                web::resource("/{id}")
                    .route(web::get().to(kas_kecil::get_kas_kecil))
                    .route(web::put().to(kas_kecil::update_kas_kecil))
                    .route(web::delete().to(kas_kecil::delete_kas_kecil)),
            )
            .service(
                web::resource("/{id}/restore").route(web::patch().to(kas_kecil::restore_kas_kecil)),
            ),
    )
    .service(
        web::scope("/kas-besar")
            .service(
                web::resource("")
                    .route(web::get().to(kas_besar::list_kas_besar))
                    .route(web::post().to(kas_besar::create_kas_besar)),
            )
            .service(web::resource("/stats").route(web::get().to(kas_besar::kas_besar_stats)))
            .service(
                web::resource("/{id}")
                    .route(web::get().to(kas_besar::get_kas_besar))
                    .route(web::put().to(kas_besar::update_kas_besar))
                    .route(web::delete().to(kas_besar::delete_kas_besar)),
            )
            .service(
                web::resource("/{id}/status")
                    .route(web::patch().to(kas_besar::change_kas_besar_status)),
            ),
    )
    .service(
        web::scope("/production-reports")
            .service(
                web::resource("")
                    .route(web::get().to(production_report::list_reports))
                    .route(web::post().to(production_report::create_report)),
            )
            .service(
                web::resource("/summary")
                    .route(web::get().to(production_report::production_summary)),
            )
            .service(
                web::resource("/{id}")
                    .route(web::get().to(production_report::get_report))
                    .route(web::put().to(production_report::update_report))
                    .route(web::delete().to(production_report::delete_report)),
            )
            .service(
                web::resource("/{id}/status")
                    .route(web::patch().to(production_report::change_report_status)),
            ),
    )
    .service(
        web::scope("/buyers")
            .service(
                web::resource("")
                    .route(web::get().to(buyer::list_buyers))
                    .route(web::post().to(buyer::create_buyer)),
            )
            .service(
                web::resource("/{id}")
                    .route(web::get().to(buyer::get_buyer))
                    .route(web::put().to(buyer::update_buyer))
                    .route(web::delete().to(buyer::delete_buyer)),
            ),
    )
    .service(
        web::scope("/users").service(
            web::resource("")
                .route(web::get().to(user::list_users))
                .route(web::post().to(user::create_user)),
        ),
    )
    .service(
        web::scope("/dashboard")
            .service(web::resource("/summary").route(web::get().to(dashboard::dashboard_summary))),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::read_json;
    use actix_web::{App, http::StatusCode, test as atest};

    #[test]
    fn zero_rate_limits_still_build() {
        let mut config = Config::for_tests();
        config.rate_login_per_min = 0;
        assert!(Limiters::from_config(&config).is_ok());
    }

    #[actix_web::test]
    async fn protected_scope_requires_a_token() {
        let config = Config::for_tests();
        let limiters = Limiters::from_config(&config).unwrap();
        let app = atest::init_service(
            App::new()
                .app_data(web::Data::new(crate::test_support::lazy_pool()))
                .app_data(web::Data::new(config.clone()))
                .configure(|cfg| configure(cfg, &config, &limiters)),
        )
        .await;
        let req = atest::TestRequest::get()
            .uri("/api/dashboard/summary")
            .peer_addr("127.0.0.1:40000".parse().unwrap())
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(read_json(resp).await["success"], false);
    }

    #[actix_web::test]
    async fn malformed_json_is_an_envelope() {
        let app = crate::test_support::api_app!();
        let req = atest::TestRequest::post()
            .uri("/api/buyers")
            .insert_header(crate::test_support::bearer(crate::model::role::Role::User))
            .insert_header(("Content-Type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = read_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Invalid request");
    }
}
