use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use verso_core::error::VersoError;

/// JSON API error type for REST endpoints.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

impl From<VersoError> for ApiError {
    fn from(err: VersoError) -> Self {
        let status = match &err {
            VersoError::NotFound(_) => StatusCode::NOT_FOUND,
            VersoError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            VersoError::Forbidden(_) => StatusCode::FORBIDDEN,
            VersoError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            VersoError::Conflict(_) => StatusCode::CONFLICT,
            _ => {
                tracing::error!("api error: {err}");
                return Self::internal("internal server error");
            }
        };
        Self::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_status_codes() {
        let cases = [
            (VersoError::NotFound("poem 3".into()), StatusCode::NOT_FOUND),
            (VersoError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (VersoError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (VersoError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (VersoError::Conflict("x".into()), StatusCode::CONFLICT),
            (VersoError::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = ApiError::from(VersoError::Storage("/var/lib/verso.db locked".into()));
        assert!(!err.message.contains("verso.db"));
    }
}
