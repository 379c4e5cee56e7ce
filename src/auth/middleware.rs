use crate::auth::auth::{AuthUser, bearer_token};
use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::error::ApiError;
use crate::models::TokenType;
use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, ResponseError,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    web::Data,
};

fn reject(req: ServiceRequest, err: ApiError) -> Result<ServiceResponse<BoxBody>, Error> {
    let resp = err.error_response();
    Ok(req.into_response(resp.map_into_boxed_body()))
}

/// Validates the bearer access token and stores the caller as `AuthUser` in the request extensions.
pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let secret = match req.app_data::<Data<Config>>() {
        Some(config) => config.jwt_secret.clone(),
        None => {
            tracing::error!("Config missing from app data");
            return reject(req, ApiError::Internal);
        }
    };

    let token = match bearer_token(req.request()) {
        Some(t) => t.to_string(),
        None => {
            return reject(
                req,
                ApiError::unauthorized("Missing or malformed Authorization header"),
            );
        }
    };

    let claims = match verify_token(&token, &secret) {
        Ok(c) if c.token_type == TokenType::Access => c,
        Ok(_) => return reject(req, ApiError::unauthorized("Access token required")),
        Err(e) => {
            tracing::debug!(error = %e, "Rejected token");
            return reject(req, ApiError::unauthorized("Invalid or expired token"));
        }
    };

    req.extensions_mut().insert(AuthUser {
        user_id: claims.user_id,
        email: claims.sub,
        role: claims.role,
    });

    next.call(req).await
}
