pub mod admin;
pub mod health;

use axum::extract::DefaultBodyLimit;
use axum::response::IntoResponse;
use axum::Router;
use tower_http::services::{ServeDir, ServeFile};

use crate::middleware::{page_view, request_id};
use crate::response::AppError;
use crate::state::AppState;

/// Settings documents are tiny; 64 KiB is plenty.
const MAX_BODY_SIZE: usize = 64 * 1024;

/// Site pages come from `STATIC_DIR`. Unknown paths are answered by
/// `index.html` with status 200 so client-side routes count as page views.
pub fn build_router(state: AppState) -> Router {
    let static_dir = state.config().static_dir.clone();
    let index = format!("{}/index.html", static_dir.trim_end_matches('/'));
    let site = Router::new()
        .fallback_service(ServeDir::new(&static_dir).fallback(ServeFile::new(index)));

    build_router_with_site(state, site)
}

/// Mounts the analytics API next to a host-supplied site router. Only the
/// site router is wrapped by the collection middleware.
pub fn build_router_with_site(state: AppState, site: Router<AppState>) -> Router {
    let api_routes = Router::new()
        .nest("/admin", admin::router())
        .fallback(api_not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE));

    let health_routes = health::router().fallback(api_not_found);

    let site = site.layer(axum::middleware::from_fn_with_state(
        state.clone(),
        page_view::collect_page_views,
    ));

    Router::new()
        .nest("/api", api_routes)
        .nest("/health", health_routes)
        .merge(site)
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .with_state(state)
}

// 未匹配的 API 路径不能落入站点回退，否则会被当作页面访问
async fn api_not_found() -> impl IntoResponse {
    AppError::not_found("Not found")
}
