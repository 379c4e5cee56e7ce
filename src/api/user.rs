use crate::{
    api::{ApiResult, created, paginated},
    auth::{auth::AuthUser, password::hash_password},
    error::ApiError,
    model::{role::Role, user::User},
    utils::{db_utils::like_pattern, pagination::Page},
};
use actix_web::web;
use serde::Deserialize;
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::{error, info};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

const USER_COLUMNS: &str = "SELECT id, name, email, role, active, last_login_at, created_at FROM users";

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateUser {
    #[schema(example = "Siti Rahma")]
    #[validate(length(min = 1, max = 255, message = "Name is required"))]
    pub name: String,
    #[schema(example = "siti@example.com")]
    #[validate(email(message = "Email is not valid"))]
    pub email: String,
    #[validate(length(min = 8, max = 128, message = "Password must be 8 to 128 characters"))]
    pub password: String,
    /// Defaults to `user`.
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// Matches name or email.
    pub search: Option<String>,
    #[param(value_type = Option<String>)]
    pub role: Option<Role>,
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, query: &UserQuery) {
    qb.push(" WHERE 1 = 1");

    if let Some(role) = query.role {
        qb.push(" AND role = ").push_bind(role.as_ref().to_string());
    }

    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let like = like_pattern(search);
        qb.push(" AND (name LIKE ")
            .push_bind(like.clone())
            .push(" OR email LIKE ")
            .push_bind(like)
            .push(")");
    }
}

/// List users (admin)
#[utoipa::path(
    get,
    path = "/api/users",
    params(UserQuery),
    responses(
        (status = 200, description = "Paginated user list", body = [User]),
        (status = 403, description = "Admin only")
    ),
    tag = "User",
    security(("bearer_auth" = []))
)]
pub async fn list_users(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<UserQuery>,
) -> ApiResult {
    auth.require_admin()?;
    let page = Page::new(query.page, query.limit);

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM users");
    push_filters(&mut count, &query);
    let total: i64 = count.build_query_scalar().fetch_one(pool.get_ref()).await?;

    let mut data = QueryBuilder::<MySql>::new(USER_COLUMNS);
    push_filters(&mut data, &query);
    data.push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());

    let users = data
        .build_query_as::<User>()
        .fetch_all(pool.get_ref())
        .await?;

    Ok(paginated(users, page.meta(total)))
}

/// Create user (admin)
#[utoipa::path(
    post,
    path = "/api/users",
    request_body = CreateUser,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 400, description = "Invalid data"),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Email already registered")
    ),
    tag = "User",
    security(("bearer_auth" = []))
)]
pub async fn create_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateUser>,
) -> ApiResult {
    auth.require_admin()?;
    payload.validate()?;
    let p = payload.into_inner();

    let hashed = hash_password(&p.password).map_err(|e| {
        error!(error = %e, "Password hashing failed");
        ApiError::Internal
    })?;
    let role = p.role.unwrap_or(Role::User);

    let result = sqlx::query("INSERT INTO users (name, email, password, role) VALUES (?, ?, ?, ?)")
        .bind(p.name.trim())
        .bind(p.email.trim().to_lowercase())
        .bind(hashed)
        .bind(role.as_ref())
        .execute(pool.get_ref())
        .await
        .map_err(|e| match ApiError::from(e) {
            ApiError::Conflict(_) => ApiError::conflict("A user with this email already exists"),
            other => other,
        })?;

    let id = result.last_insert_id();
    let user = sqlx::query_as::<_, User>(&format!("{USER_COLUMNS} WHERE id = ?"))
        .bind(id)
        .fetch_one(pool.get_ref())
        .await?;

    info!(user_id = id, role = %role, created_by = auth.user_id, "User created");
    Ok(created(user, "User created"))
}

#[cfg(test)]
mod tests {
    use crate::model::role::Role;
    use crate::test_support::{api_app, bearer, read_json};
    use actix_web::{http::StatusCode, test as atest};
    use serde_json::json;

    #[actix_web::test]
    async fn listing_is_admin_only() {
        let app = api_app!();
        let req = atest::TestRequest::get()
            .uri("/api/users")
            .insert_header(bearer(Role::Approver))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn create_validates_email_and_password() {
        let app = api_app!();
        let req = atest::TestRequest::post()
            .uri("/api/users")
            .insert_header(bearer(Role::Admin))
            .set_json(json!({"name": "Siti", "email": "siti", "password": "short"}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = read_json(resp).await;
        assert!(body["details"]["email"].is_array());
        assert!(body["details"]["password"].is_array());
    }

    #[actix_web::test]
    async fn unknown_role_is_bad_request() {
        let app = api_app!();
        let req = atest::TestRequest::post()
            .uri("/api/users")
            .insert_header(bearer(Role::Admin))
            .set_json(json!({
                "name": "Siti",
                "email": "siti@example.com",
                "password": "long-enough",
                "role": "root"
            }))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn user_role_cannot_create_users() {
        let app = api_app!();
        let req = atest::TestRequest::post()
            .uri("/api/users")
            .insert_header(bearer(Role::User))
            .set_json(json!({"name": "Siti", "email": "siti@example.com", "password": "long-enough"}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
