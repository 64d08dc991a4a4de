use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Wraps any handler failure into a well-formed 5xx response rather than
/// letting it propagate into a panic. Handlers should return
/// `Result<_, ApiError>` and use `?` freely.
pub struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "request handler failed");
        (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
