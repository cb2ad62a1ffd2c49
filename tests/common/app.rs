use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use chrono::NaiveDate;
use tempfile::TempDir;

use page_analytics::analytics::clock::{Clock, FixedClock};
use page_analytics::config::{AnalyticsConfig, Config, WorkerConfig};
use page_analytics::routes::{build_router, build_router_with_site};
use page_analytics::state::AppState;
use page_analytics::store::Store;

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub config: Config,
    pub clock: Arc<FixedClock>,
    _temp_dir: TempDir,
}

impl TestApp {
    pub fn store(&self) -> &Store {
        self.state.store()
    }
}

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 17).expect("valid date")
}

pub fn test_config(temp_dir: &TempDir, sampling_rate: u32) -> Config {
    let sled_path = temp_dir.path().join("analytics-test.sled");
    let static_dir = temp_dir.path().join("static");

    // 直接构造 Config，避免使用 set_var 造成多线程测试环境变量竞态
    Config {
        host: std::net::IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)),
        port: 3000,
        log_level: "info".to_string(),
        enable_file_logs: false,
        log_dir: "./logs".to_string(),
        sled_path: sled_path.to_string_lossy().to_string(),
        jwt_secret: format!("integration-test-jwt-secret-{}", uuid::Uuid::new_v4()),
        jwt_expires_in_hours: 24,
        admin_jwt_secret: format!("integration-test-admin-secret-{}", uuid::Uuid::new_v4()),
        cors_origin: "http://localhost:5173".to_string(),
        static_dir: static_dir.to_string_lossy().to_string(),
        worker: WorkerConfig {
            is_leader: false,
            aggregation_cron: "0 * * * * *".to_string(),
            retention_cron: "0 15 * * * *".to_string(),
        },
        analytics: AnalyticsConfig {
            batch_size: 50,
            lease_secs: 60,
            drain_secs: 15,
            default_sampling_rate: sampling_rate,
            default_retention_days: 365,
        },
    }
}

/// A small host site: a few pages plus an image, everything else 404.
pub fn test_site() -> Router<AppState> {
    Router::new()
        .route("/", get(|| async { "home" }))
        .route("/about-us", get(|| async { "about" }))
        .route("/blog/:slug", get(|| async { "post" }).post(|| async { "posted" }))
        .route("/admin/content", get(|| async { "admin" }))
        .route("/logo.png", get(|| async { "png" }))
        .route("/moved", get(|| async { axum::response::Redirect::permanent("/about-us") }))
        .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .fallback(|| async { (StatusCode::NOT_FOUND, "no such page") })
}

fn assemble(temp_dir: TempDir, config: Config, site: Option<Router<AppState>>) -> TestApp {
    let store = Arc::new(Store::open(&config.sled_path).expect("open store"));
    store.run_migrations().expect("run migrations");

    let clock = Arc::new(FixedClock::at_date(today()));
    let state = AppState::new(store, &config, clock.clone() as Arc<dyn Clock>)
        .expect("build state")
        .with_rng_seed(7);

    let app = match site {
        Some(site) => build_router_with_site(state.clone(), site),
        None => build_router(state.clone()),
    };

    TestApp {
        app,
        state,
        config,
        clock,
        _temp_dir: temp_dir,
    }
}

/// Every eligible view is recorded (sampling rate 1).
pub async fn spawn_test_app() -> TestApp {
    spawn_with_rate(1).await
}

pub async fn spawn_with_rate(sampling_rate: u32) -> TestApp {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(&temp_dir, sampling_rate);
    assemble(temp_dir, config, Some(test_site()))
}

/// Default static-file site with an `index.html` and one asset.
pub async fn spawn_static_app() -> TestApp {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(&temp_dir, 1);
    std::fs::create_dir_all(&config.static_dir).expect("static dir");
    std::fs::write(
        format!("{}/index.html", config.static_dir),
        "<!doctype html><title>site</title>",
    )
    .expect("write index");
    std::fs::write(format!("{}/app.js", config.static_dir), "console.log(1)").expect("write js");
    assemble(temp_dir, config, None)
}
