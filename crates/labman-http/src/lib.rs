//! The observation HTTP surface: a small read-mostly API over the
//! session, plus a static asset directory for any client-side plotting
//! page.

mod error;
mod handlers;
mod state;

pub use state::AppState;

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::routing::{get, post};
use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Build the router. `static_dir`, if given, is served at `/static` as a
/// fallback for anything not matched by an API route.
pub fn router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let mut router = Router::new()
        .route("/", get(handlers::main_page))
        .route("/api/logged_last_values", get(handlers::logged_last_values))
        .route("/api/get_parameters", get(handlers::get_parameters))
        .route("/api/data_from_ts", post(handlers::data_from_ts))
        .route("/api/server_current_ts", get(handlers::server_current_ts))
        .route("/plot/{fignum}", get(handlers::plot_figure));

    if let Some(dir) = static_dir {
        router = router.nest_service("/static", ServeDir::new(dir));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Bind and serve the observation HTTP surface until the listener errs or
/// the process is torn down.
pub async fn serve(addr: SocketAddr, state: AppState, static_dir: Option<PathBuf>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "observation HTTP surface listening");
    axum::serve(listener, router(state, static_dir)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use labman_clock::FixedClock;
    use labman_session::{OpenMode, Session};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let session = Session::open(None, OpenMode::CreateIfMissing, false, Arc::new(FixedClock::new(1000.0))).unwrap();
        AppState::new(Arc::new(session))
    }

    #[tokio::test]
    async fn main_page_returns_ok() {
        let app = router(test_state(), None);
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn logged_last_values_returns_empty_list_for_fresh_session() {
        let app = router(test_state(), None);
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/logged_last_values")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let values: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(values, serde_json::json!([]));
    }

    #[tokio::test]
    async fn data_from_ts_accepts_a_json_post_body() {
        let app = router(test_state(), None);
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/data_from_ts")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(
                        serde_json::json!({"name": "temp", "last_ts": 0.0}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let values: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(values, serde_json::json!([]));
    }
}
