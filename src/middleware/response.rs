use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::json;

/// Wraps handler output in the `{ "success": true, "data": ... }` envelope
#[derive(Debug)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub status_code: StatusCode,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { data, status_code: StatusCode::OK }
    }

    pub fn created(data: T) -> Self {
        Self { data, status_code: StatusCode::CREATED }
    }
}

impl ApiResponse<()> {
    pub fn no_content() -> Self {
        Self { data: (), status_code: StatusCode::NO_CONTENT }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        if self.status_code == StatusCode::NO_CONTENT {
            return self.status_code.into_response();
        }

        let data = match serde_json::to_value(&self.data) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to serialize response data: {}", e);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": true, "message": "Failed to serialize response data", "code": "INTERNAL_SERVER_ERROR" })),
                )
                    .into_response();
            }
        };

        (self.status_code, Json(json!({ "success": true, "data": data }))).into_response()
    }
}

pub type ApiResult<T> = Result<ApiResponse<T>, crate::error::ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_keeps_its_status() {
        let response = ApiResponse::created(json!({"id": 1})).into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(ApiResponse::no_content().into_response().status(), StatusCode::NO_CONTENT);
    }
}
