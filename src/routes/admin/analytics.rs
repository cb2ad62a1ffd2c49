use std::collections::BTreeSet;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::analytics::report::{Granularity, Period, ReportBuilder, ReportQuery, ReportRow};
use crate::analytics::settings::AnalyticsSettings;
use crate::auth::AdminAuthUser;
use crate::constants::{DEFAULT_REPORT_PAGE_SIZE, MAX_REPORT_PAGE_SIZE, PRUNE_PREVIEW_LIMIT};
use crate::extractors::{JsonBody, QueryParams};
use crate::response::{ok, paginated, AppError, PaginatedResponse};
use crate::state::AppState;
use crate::status::StatusReport;
use crate::workers::view_aggregation::{self, DrainSummary};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/report", get(report))
        .route("/settings", get(get_settings).put(update_settings))
        .route("/flush", post(flush_all))
        .route("/flush-excluded", get(preview_flush_excluded).post(flush_excluded))
        .route("/status", get(status))
        .route("/run", post(run_aggregation))
}

/// Every field is parsed leniently; unusable values fall back to defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportParams {
    period: Option<String>,
    filter: Option<String>,
    top: Option<String>,
    page: Option<String>,
    per_page: Option<String>,
}

impl ReportParams {
    fn query(&self) -> ReportQuery {
        ReportQuery::from_params(
            parse_opt(&self.period),
            self.filter.as_deref(),
            parse_opt(&self.top),
        )
    }

    fn page(&self) -> u64 {
        parse_opt::<u64>(&self.page).unwrap_or(1).max(1)
    }

    fn per_page(&self) -> u64 {
        parse_opt::<u64>(&self.per_page)
            .unwrap_or(DEFAULT_REPORT_PAGE_SIZE)
            .clamp(1, MAX_REPORT_PAGE_SIZE)
    }
}

fn parse_opt<T: std::str::FromStr>(raw: &Option<String>) -> Option<T> {
    raw.as_deref().and_then(|s| s.trim().parse().ok())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportView {
    period: Period,
    effective_days: u32,
    granularity: Granularity,
    sampling_rate: u32,
    date_from: String,
    date_to: String,
    filter: Option<String>,
    top: usize,
    rows: PaginatedResponse<ReportRow>,
}

async fn report(
    _admin: AdminAuthUser,
    State(state): State<AppState>,
    QueryParams(params): QueryParams<ReportParams>,
) -> Result<impl IntoResponse, AppError> {
    let query = params.query();
    let page = params.page();
    let per_page = params.per_page();

    let active = state.settings().current();
    let today = state.clock().today();
    let store = state.store_arc();
    let build_query = query.clone();
    let report = tokio::task::spawn_blocking(move || {
        ReportBuilder::new(&store, &active.settings, today).build(&build_query)
    })
    .await
    .map_err(|e| AppError::internal(&format!("report task failed: {e}")))??;

    let total = report.rows.len() as u64;
    // 超大页码只会得到空页
    let offset = usize::try_from((page - 1).saturating_mul(per_page)).unwrap_or(usize::MAX);
    let rows: Vec<ReportRow> = report
        .rows
        .into_iter()
        .skip(offset)
        .take(per_page as usize)
        .collect();

    let view = ReportView {
        period: report.period,
        effective_days: report.effective_days,
        granularity: report.granularity,
        sampling_rate: report.sampling_rate,
        date_from: report.date_from,
        date_to: report.date_to,
        filter: query.filter,
        top: query.top,
        rows: PaginatedResponse {
            data: rows,
            total,
            page,
            per_page,
            total_pages: total.div_ceil(per_page),
        },
    };

    // 报表每次重新计算，不允许缓存
    Ok(([(header::CACHE_CONTROL, "max-age=0")], ok(view)))
}

async fn get_settings(
    _admin: AdminAuthUser,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ok(state.settings().current().settings.clone())
}

async fn update_settings(
    admin: AdminAuthUser,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<AnalyticsSettings>,
) -> Result<impl IntoResponse, AppError> {
    let saved = state.store().save_analytics_settings(&body)?;
    state.settings().replace(saved.clone());

    tracing::info!(
        admin_id = %admin.admin_id,
        action = "update_analytics_settings",
        sampling_rate = saved.sampling_rate,
        retention_days = saved.retention_days,
        "Analytics settings updated"
    );
    Ok(ok(saved))
}

async fn flush_all(
    admin: AdminAuthUser,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let store = state.store_arc();
    let removed = tokio::task::spawn_blocking(move || store.truncate_counters())
        .await
        .map_err(|e| AppError::internal(&format!("flush task failed: {e}")))??;

    tracing::info!(admin_id = %admin.admin_id, action = "flush_all", rows_removed = removed, "Counters truncated");
    Ok(ok(serde_json::json!({ "rowsRemoved": removed })))
}

/// Stored paths that the current rules would exclude. Role rules do not
/// apply here; only path-level rules can be evaluated after the fact.
fn excluded_stored_paths(state: &AppState) -> Result<BTreeSet<String>, AppError> {
    let active = state.settings().current();
    let paths = state.store().distinct_counter_paths()?;
    Ok(paths
        .into_iter()
        .filter(|path| active.rules.is_path_excluded(path))
        .collect())
}

async fn preview_flush_excluded(
    _admin: AdminAuthUser,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let excluded = excluded_stored_paths(&state)?;
    let total = excluded.len() as u64;
    let listed: Vec<String> = excluded.into_iter().take(PRUNE_PREVIEW_LIMIT).collect();
    Ok(paginated(listed, total, 1, PRUNE_PREVIEW_LIMIT as u64))
}

async fn flush_excluded(
    admin: AdminAuthUser,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let excluded = excluded_stored_paths(&state)?;
    let paths_removed = excluded.len();
    let rows_removed = if excluded.is_empty() {
        0
    } else {
        let store = state.store_arc();
        tokio::task::spawn_blocking(move || store.delete_counters_for_paths(&excluded))
            .await
            .map_err(|e| AppError::internal(&format!("flush task failed: {e}")))??
    };

    tracing::info!(
        admin_id = %admin.admin_id,
        action = "flush_excluded",
        paths_removed,
        rows_removed,
        "Excluded paths flushed"
    );
    Ok(ok(serde_json::json!({
        "pathsRemoved": paths_removed,
        "rowsRemoved": rows_removed,
    })))
}

async fn status(
    _admin: AdminAuthUser,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let active = state.settings().current();
    let report = StatusReport::collect(state.store(), &active.settings, state.clock().now())?;
    Ok(ok(report))
}

async fn run_aggregation(
    admin: AdminAuthUser,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let store = state.store_arc();
    let clock = state.clock_arc();
    let cfg = state.config().analytics.aggregation();

    let summary: DrainSummary = tokio::task::spawn_blocking(move || {
        let summary = view_aggregation::drain(&store, clock.as_ref(), &cfg)?;
        store.record_worker_run(
            crate::workers::WorkerName::ViewAggregation.as_str(),
            clock.now(),
        )?;
        Ok::<_, crate::store::StoreError>(summary)
    })
    .await
    .map_err(|e| AppError::internal(&format!("aggregation task failed: {e}")))??;

    tracing::info!(
        admin_id = %admin.admin_id,
        action = "run_aggregation",
        batches = summary.batches,
        claimed = summary.claimed,
        "Manual aggregation finished"
    );
    Ok(ok(summary))
}
