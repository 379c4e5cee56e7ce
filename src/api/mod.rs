use actix_web::HttpResponse;
use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::utils::pagination::Pagination;

pub mod buyer;
pub mod dashboard;
pub mod employee;
pub mod health;
pub mod invoice;
pub mod kas_besar;
pub mod kas_kecil;
pub mod kwitansi;
pub mod pay_component;
pub mod payroll;
pub mod production_report;
pub mod user;

pub type ApiResult = Result<HttpResponse, ApiError>;

/// Success envelope shared by every endpoint.
#[derive(Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            message: None,
            pagination: None,
            meta: None,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

pub fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(Envelope::new(data))
}

pub fn ok_with_message<T: Serialize>(data: T, message: impl Into<String>) -> HttpResponse {
    HttpResponse::Ok().json(Envelope::new(data).message(message))
}

pub fn created<T: Serialize>(data: T, message: impl Into<String>) -> HttpResponse {
    HttpResponse::Created().json(Envelope::new(data).message(message))
}

pub fn paginated<T: Serialize>(data: Vec<T>, pagination: Pagination) -> HttpResponse {
    HttpResponse::Ok().json(Envelope::new(data).pagination(pagination))
}

/// `{ success: true, data: null, message }` for deletes and similar.
pub fn done(message: impl Into<String>) -> HttpResponse {
    HttpResponse::Ok().json(Envelope::new(Value::Null).message(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::read_body_json;
    use crate::utils::pagination::Page;
    use serde_json::json;

    #[actix_web::test]
    async fn paginated_envelope_shape() {
        let resp = paginated(vec![1, 2], Page::new(Some(1), Some(2)).meta(5));
        let body = read_body_json(resp).await;
        assert_eq!(
            body,
            json!({
                "success": true,
                "data": [1, 2],
                "pagination": {"page": 1, "limit": 2, "total": 5, "total_pages": 3}
            })
        );
    }

    #[actix_web::test]
    async fn done_has_null_data_and_message() {
        let body = read_body_json(done("Buyer deleted")).await;
        assert_eq!(body["data"], Value::Null);
        assert_eq!(body["message"], "Buyer deleted");
    }
}
