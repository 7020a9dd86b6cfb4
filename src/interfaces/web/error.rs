use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::core::error::CoreError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Core errors crossing the HTTP boundary. One mapping, used by every
/// handler; internal detail is never leaked for auth failures.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            CoreError::Validation(details) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "validation failed", "details": details })),
            )
                .into_response(),
            CoreError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("{what} not found") })),
            )
                .into_response(),
            CoreError::Conflict(details) => (
                StatusCode::CONFLICT,
                Json(json!({ "error": details })),
            )
                .into_response(),
            CoreError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "unauthorized" })),
            )
                .into_response(),
            CoreError::Forbidden => (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "forbidden" })),
            )
                .into_response(),
            CoreError::RateLimited { retry_after_secs } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "error": "rate limit exceeded" })),
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
            CoreError::Transient(details) => {
                tracing::error!("transient failure reached the API boundary: {details}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "temporary storage failure, retry" })),
                )
                    .into_response()
            }
            CoreError::Fatal(details) => {
                tracing::error!("invariant violation reached the API boundary: {details}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (CoreError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (CoreError::NotFound("agent a1".into()), StatusCode::NOT_FOUND),
            (CoreError::Conflict("dup".into()), StatusCode::CONFLICT),
            (CoreError::Unauthorized, StatusCode::UNAUTHORIZED),
            (CoreError::Forbidden, StatusCode::FORBIDDEN),
            (
                CoreError::RateLimited { retry_after_secs: 30 },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (CoreError::Transient("io".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let response = ApiError(CoreError::RateLimited { retry_after_secs: 42 }).into_response();
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "42"
        );
    }
}
