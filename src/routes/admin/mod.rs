pub mod analytics;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().nest("/analytics", analytics::router())
}
