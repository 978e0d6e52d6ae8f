use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("GIPHY is not configured on this server")]
    NotConfigured,

    #[error("Upstream returned status {0}")]
    UpstreamStatus(u16),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Too many requests")]
    RateLimited,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::NotConfigured => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ServerError::UpstreamStatus(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            // The reqwest error text carries the request URL, key included.
            ServerError::Upstream(_) => (StatusCode::BAD_GATEWAY, "Upstream request failed".to_string()),
            ServerError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
