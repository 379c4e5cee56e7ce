use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use derive_more::Display;
use serde::Serialize;
use serde_json::{Value, json};
use validator::ValidationErrors;

/// MySQL SQLSTATE for integrity constraint violations (duplicate key, bad FK).
const SQLSTATE_INTEGRITY: &str = "23000";

#[derive(Debug, Display)]
pub enum ApiError {
    #[display(fmt = "Invalid data")]
    Validation(ValidationErrors),

    #[display(fmt = "{}", _0)]
    BadRequest(String),

    #[display(fmt = "{}", _0)]
    Unauthorized(String),

    #[display(fmt = "{}", _0)]
    Forbidden(String),

    #[display(fmt = "{}", _0)]
    NotFound(String),

    #[display(fmt = "{}", _0)]
    Conflict(String),

    #[display(fmt = "Database connection not available")]
    Unavailable,

    #[display(fmt = "Internal Server Error")]
    Internal,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a Value>,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ApiError::Conflict(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ApiError::Forbidden(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        ApiError::Unauthorized(msg.into())
    }

    /// Single-field validation failure with the same `details` shape validator produces.
    pub fn field(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        let message: String = message.into();
        let mut err = validator::ValidationError::new("invalid");
        err.message = Some(message.into());
        errors.add(field, err);
        ApiError::Validation(errors)
    }

    fn details(&self) -> Option<Value> {
        match self {
            ApiError::Validation(errors) => serde_json::to_value(errors).ok(),
            _ => None,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let details = self.details();
        HttpResponse::build(self.status_code()).json(ErrorBody {
            success: false,
            error: self.to_string(),
            details: details.as_ref(),
        })
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::Validation(errors)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => ApiError::not_found("Record not found"),
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => {
                tracing::warn!(error = %e, "Database unavailable");
                ApiError::Unavailable
            }
            sqlx::Error::Database(db_err)
                if db_err.code().as_deref() == Some(SQLSTATE_INTEGRITY) =>
            {
                tracing::info!(error = %e, "Integrity constraint violated");
                if db_err.message().contains("Duplicate") {
                    ApiError::conflict("Record with the same unique key already exists")
                } else {
                    ApiError::bad_request("Referenced record does not exist or is still in use")
                }
            }
            _ => {
                tracing::error!(error = %e, "Database error");
                ApiError::Internal
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        tracing::error!(error = %e, "Unexpected error");
        ApiError::Internal
    }
}

/// Turns actix extractor failures (bad JSON, query or path) into the 400 envelope.
pub fn extractor_error(message: String) -> actix_web::Error {
    let body = json!({
        "success": false,
        "error": "Invalid request",
        "details": message,
    });
    actix_web::error::InternalError::from_response(
        message,
        HttpResponse::BadRequest().json(body),
    )
    .into()
}
