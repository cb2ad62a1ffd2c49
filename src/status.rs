//! Read-only diagnostic snapshot shared by `GET /api/admin/analytics/status`
//! and the `page-analytics status` command.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analytics::path::AssetPolicy;
use crate::analytics::settings::AnalyticsSettings;
use crate::constants::ROLE_AUTHENTICATED;
use crate::store::{Store, StoreError};
use crate::workers::WorkerName;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub queue_depth: usize,
    pub leased_items: usize,
    pub counter_rows: usize,
    pub last_aggregation_run: Option<DateTime<Utc>>,
    pub last_retention_run: Option<DateTime<Utc>>,
    pub sampling_rate: u32,
    pub retention_days: u32,
    pub exclude_admin_paths: bool,
    pub excluded_roles: Vec<String>,
    pub excluded_paths: Vec<String>,
    pub asset_policy: AssetPolicy,
    pub hints: Vec<String>,
}

impl StatusReport {
    pub fn collect(
        store: &Store,
        settings: &AnalyticsSettings,
        now: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        let mut report = Self {
            queue_depth: store.queue_depth(),
            leased_items: store.leased_items(now)?,
            counter_rows: store.count_counter_rows(),
            last_aggregation_run: store.last_worker_run(WorkerName::ViewAggregation.as_str())?,
            last_retention_run: store.last_worker_run(WorkerName::RetentionPrune.as_str())?,
            sampling_rate: settings.sampling_rate,
            retention_days: settings.retention_days,
            exclude_admin_paths: settings.exclude_admin_paths,
            excluded_roles: settings.excluded_roles.clone(),
            excluded_paths: settings.pattern_lines().map(str::to_string).collect(),
            asset_policy: settings.asset_policy,
            hints: Vec::new(),
        };
        report.hints = report.derive_hints();
        Ok(report)
    }

    fn derive_hints(&self) -> Vec<String> {
        let mut hints = Vec::new();

        match (self.queue_depth, self.counter_rows) {
            (q, 0) if q > 0 && self.last_aggregation_run.is_none() => hints.push(
                "Views are queued but the aggregation worker has never run. \
                 Start a server with WORKER_LEADER=true or POST /api/admin/analytics/run."
                    .to_string(),
            ),
            (q, 0) if q > 0 => hints.push(
                "Views are queued but no daily counters exist. \
                 The aggregation worker may be failing; check the view_aggregation logs."
                    .to_string(),
            ),
            (0, 0) => hints.push(
                "Nothing recorded yet. Only GET requests answered with 200 by site pages are \
                 counted; check that exclusion rules are not filtering all traffic."
                    .to_string(),
            ),
            _ => {}
        }

        if self.excluded_roles.iter().any(|r| r == ROLE_AUTHENTICATED) {
            hints.push(
                "Signed-in visitors are excluded; browse anonymously to test collection."
                    .to_string(),
            );
        }

        hints
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let when = |at: Option<DateTime<Utc>>| {
            at.map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        };
        let list = |items: &[String]| {
            if items.is_empty() {
                "(none)".to_string()
            } else {
                items.join(", ")
            }
        };

        let _ = writeln!(out, "Queue depth:        {}", self.queue_depth);
        let _ = writeln!(out, "Leased items:       {}", self.leased_items);
        let _ = writeln!(out, "Daily counter rows: {}", self.counter_rows);
        let _ = writeln!(out, "Last aggregation:   {}", when(self.last_aggregation_run));
        let _ = writeln!(out, "Last retention:     {}", when(self.last_retention_run));
        let _ = writeln!(out, "Sampling rate:      1/{}", self.sampling_rate);
        let _ = writeln!(out, "Retention days:     {}", self.retention_days);
        let _ = writeln!(out, "Exclude admin:      {}", self.exclude_admin_paths);
        let _ = writeln!(out, "Excluded roles:     {}", list(&self.excluded_roles));
        let _ = writeln!(out, "Excluded paths:     {}", list(&self.excluded_paths));
        for hint in &self.hints {
            let _ = writeln!(out, "hint: {hint}");
        }
        out
    }
}
