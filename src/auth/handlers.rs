use std::str::FromStr;

use crate::{
    api::{ApiResult, ok},
    auth::{
        auth::bearer_token,
        jwt::{generate_access_token, generate_refresh_token, verify_token},
        password::verify_password,
    },
    config::Config,
    error::ApiError,
    model::role::Role,
    models::{Claims, LoginReqDto, LoginResponse, SessionUser, TokenPair, TokenType, UserSql},
};
use actix_web::{HttpRequest, HttpResponse, web};
use sqlx::{MySql, MySqlPool, Transaction};
use tracing::{debug, error, info, instrument};
use validator::Validate;

fn token_error(e: jsonwebtoken::errors::Error) -> ApiError {
    error!(error = %e, "Failed to sign token");
    ApiError::Internal
}

/// Signs a new access/refresh pair and stores the refresh token id.
async fn issue_tokens(
    tx: &mut Transaction<'_, MySql>,
    user_id: u64,
    email: &str,
    role: Role,
    config: &Config,
) -> Result<TokenPair, ApiError> {
    let access_token = generate_access_token(
        user_id,
        email.to_string(),
        role,
        &config.jwt_secret,
        config.access_token_ttl,
    )
    .map_err(token_error)?;

    let (refresh_token, refresh_claims) = generate_refresh_token(
        user_id,
        email.to_string(),
        role,
        &config.jwt_secret,
        config.refresh_token_ttl,
    )
    .map_err(token_error)?;

    debug!(user_id, jti = %refresh_claims.jti, "Storing refresh token");

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, jti, expires_at)
        VALUES (?, ?, FROM_UNIXTIME(?))
        "#,
    )
    .bind(user_id)
    .bind(&refresh_claims.jti)
    .bind(refresh_claims.exp as i64)
    .execute(&mut **tx)
    .await?;

    Ok(TokenPair {
        access_token,
        refresh_token,
        token_type: "Bearer",
        expires_in: config.access_token_ttl,
    })
}

/// Login
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Tokens issued", body = LoginResponse),
        (status = 400, description = "Invalid data"),
        (status = 401, description = "Invalid credentials"),
        (status = 503, description = "Database connection not available")
    ),
    tag = "Auth"
)]
#[instrument(name = "auth_login", skip(pool, config, user), fields(email = %user.email))]
pub async fn login(
    user: web::Json<LoginReqDto>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> ApiResult {
    info!("Login request received");
    user.validate()?;

    let email = user.email.trim().to_lowercase();

    let db_user = sqlx::query_as::<_, UserSql>(
        r#"
        SELECT id, name, email, password, role, active
        FROM users
        WHERE email = ?
        "#,
    )
    .bind(&email)
    .fetch_optional(pool.get_ref())
    .await?;

    let db_user = match db_user {
        Some(u) if u.active => u,
        Some(_) => {
            info!("Login refused: account disabled");
            return Err(ApiError::unauthorized("Invalid credentials"));
        }
        None => {
            info!("Invalid credentials: user not found");
            return Err(ApiError::unauthorized("Invalid credentials"));
        }
    };

    if let Err(e) = verify_password(&user.password, &db_user.password) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let role = Role::from_str(&db_user.role).map_err(|_| {
        error!(user_id = db_user.id, role = %db_user.role, "Unknown role stored for user");
        ApiError::Internal
    })?;

    let mut tx = pool.begin().await?;
    let tokens = issue_tokens(&mut tx, db_user.id, &db_user.email, role, &config).await?;
    tx.commit().await?;

    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = ?")
        .bind(db_user.id)
        .execute(pool.get_ref())
        .await
    {
        // login still succeeds
        error!(error = %e, "Failed to update last_login_at");
    }

    info!(user_id = db_user.id, "Login successful");

    Ok(ok(LoginResponse {
        tokens,
        user: SessionUser {
            id: db_user.id,
            name: db_user.name,
            email: db_user.email,
            role,
        },
    }))
}

fn refresh_claims(req: &HttpRequest, config: &Config) -> Result<Claims, ApiError> {
    let token = bearer_token(req).ok_or_else(|| ApiError::unauthorized("Missing token"))?;
    let claims = verify_token(token, &config.jwt_secret)
        .map_err(|_| ApiError::unauthorized("Invalid or expired token"))?;
    if claims.token_type != TokenType::Refresh {
        return Err(ApiError::unauthorized("Refresh token required"));
    }
    Ok(claims)
}

/// Refresh tokens
///
/// Send the refresh token as the bearer token. The old refresh token is revoked.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "New token pair", body = TokenPair),
        (status = 401, description = "Refresh token invalid, expired or revoked")
    ),
    tag = "Auth",
    security(("bearer_auth" = []))
)]
pub async fn refresh_token(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> ApiResult {
    let claims = refresh_claims(&req, &config)?;

    let mut tx = pool.begin().await?;

    let record = sqlx::query_as::<_, (u64, u64, bool)>(
        r#"
        SELECT id, user_id, revoked
        FROM refresh_tokens
        WHERE jti = ? AND expires_at > NOW()
        FOR UPDATE
        "#,
    )
    .bind(&claims.jti)
    .fetch_optional(&mut *tx)
    .await?;

    let (record_id, user_id) = match record {
        Some((id, user_id, false)) => (id, user_id),
        _ => return Err(ApiError::unauthorized("Refresh token revoked or unknown")),
    };

    // role may have changed since the token was issued
    let account = sqlx::query_as::<_, (String, bool)>("SELECT role, active FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
    let role = match account {
        Some((role, true)) => Role::from_str(&role).map_err(|_| ApiError::Internal)?,
        _ => return Err(ApiError::unauthorized("Account disabled")),
    };

    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = ?")
        .bind(record_id)
        .execute(&mut *tx)
        .await?;

    let tokens = issue_tokens(&mut tx, user_id, &claims.sub, role, &config).await?;
    tx.commit().await?;

    Ok(ok(tokens))
}

/// Logout
///
/// Revokes the refresh token sent as the bearer token. Always answers 204.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Logged out")),
    tag = "Auth",
    security(("bearer_auth" = []))
)]
pub async fn logout(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> HttpResponse {
    let claims = match refresh_claims(&req, &config) {
        Ok(c) => c,
        Err(_) => return HttpResponse::NoContent().finish(),
    };

    if let Err(e) = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE jti = ?")
        .bind(&claims.jti)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to revoke refresh token");
    }

    HttpResponse::NoContent().finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{lazy_pool, read_json};
    use actix_web::{App, http::StatusCode, test as atest};

    #[actix_web::test]
    async fn login_rejects_invalid_email_before_touching_the_database() {
        let app = atest::init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(Config::for_tests()))
                .route("/auth/login", web::post().to(login)),
        )
        .await;

        let req = atest::TestRequest::post()
            .uri("/auth/login")
            .set_json(serde_json::json!({"email": "not-an-email", "password": ""}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body = read_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["details"]["email"].is_array());
        assert!(body["details"]["password"].is_array());
    }

    #[actix_web::test]
    async fn login_reports_unreachable_database_as_503() {
        let app = atest::init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(Config::for_tests()))
                .route("/auth/login", web::post().to(login)),
        )
        .await;

        let req = atest::TestRequest::post()
            .uri("/auth/login")
            .set_json(serde_json::json!({"email": "a@b.co", "password": "pw"}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn refresh_requires_a_refresh_token() {
        let config = Config::for_tests();
        let access =
            generate_access_token(1, "a@b.co".into(), Role::User, &config.jwt_secret, 60).unwrap();
        let app = atest::init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(config))
                .route("/auth/refresh", web::post().to(refresh_token)),
        )
        .await;

        let req = atest::TestRequest::post()
            .uri("/auth/refresh")
            .insert_header(("Authorization", format!("Bearer {access}")))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn logout_without_token_is_no_content() {
        let app = atest::init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(Config::for_tests()))
                .route("/auth/logout", web::post().to(logout)),
        )
        .await;

        let req = atest::TestRequest::post().uri("/auth/logout").to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }
}
