use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::error::ApiError;
use crate::{model::role::Role, models::TokenType};
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, web::Data};
use futures::future::{Ready, ready};

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub email: String,
    pub role: Role,
}

/// Extracts the bearer token of a request, if any.
pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

fn authenticate(req: &HttpRequest) -> Result<AuthUser, ApiError> {
    if let Some(user) = req.extensions().get::<AuthUser>() {
        return Ok(user.clone());
    }

    let token = bearer_token(req).ok_or_else(|| ApiError::unauthorized("Missing token"))?;

    let config = req.app_data::<Data<Config>>().ok_or_else(|| {
        tracing::error!("Config missing from app data");
        ApiError::Internal
    })?;

    let claims = verify_token(token, &config.jwt_secret)
        .map_err(|_| ApiError::unauthorized("Invalid token"))?;

    if claims.token_type != TokenType::Access {
        return Err(ApiError::unauthorized("Access token required"));
    }

    Ok(AuthUser {
        user_id: claims.user_id,
        email: claims.sub,
        role: claims.role,
    })
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(ApiError::forbidden("Admin only"))
        }
    }

    pub fn require_approver(&self) -> Result<(), ApiError> {
        if self.role.can_approve() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Approver or admin only"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::{generate_access_token, generate_refresh_token};
    use actix_web::test::TestRequest;

    fn config() -> Data<Config> {
        Data::new(Config::for_tests())
    }

    #[actix_web::test]
    async fn reads_access_token_from_header() {
        let cfg = config();
        let token =
            generate_access_token(9, "ops@example.com".into(), Role::User, &cfg.jwt_secret, 60)
                .unwrap();
        let req = TestRequest::default()
            .app_data(cfg)
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_http_request();

        let user = AuthUser::extract(&req).await.unwrap();
        assert_eq!(user.user_id, 9);
        assert_eq!(user.role, Role::User);
        assert!(user.require_admin().is_err());
        assert!(user.require_approver().is_err());
    }

    #[actix_web::test]
    async fn refresh_token_is_not_an_access_token() {
        let cfg = config();
        let (token, _) =
            generate_refresh_token(9, "ops@example.com".into(), Role::Admin, &cfg.jwt_secret, 60)
                .unwrap();
        let req = TestRequest::default()
            .app_data(cfg)
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_http_request();

        assert!(matches!(
            AuthUser::extract(&req).await,
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[actix_web::test]
    async fn missing_header_is_unauthorized() {
        let req = TestRequest::default().app_data(config()).to_http_request();
        assert!(matches!(
            AuthUser::extract(&req).await,
            Err(ApiError::Unauthorized(_))
        ));
    }
}
