use std::sync::Arc;

use labman_session::Session;

/// Shared state every HTTP handler reads from. Cheap to clone: it's just
/// an `Arc`, matching the app-state pattern axum route handlers expect.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
}

impl AppState {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}
