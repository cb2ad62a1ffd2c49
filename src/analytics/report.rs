//! Time-series reports over the daily counters.
//!
//! Stored counts are already scaled by the sampling rate at write time, so
//! nothing here multiplies by the rate again; it is reported for display only.

use std::collections::HashMap;

use chrono::{Datelike, Days, NaiveDate};
use serde::Serialize;

use crate::analytics::event::DATE_FORMAT;
use crate::analytics::settings::AnalyticsSettings;
use crate::constants::{
    ALLOWED_PERIODS, ALLOWED_TOP, DEFAULT_PERIOD, DEFAULT_TOP, MAX_RETENTION_DAYS,
};
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Week,
    Month,
    Quarter,
    /// The whole retention window.
    Max,
}

impl Period {
    /// Unknown values fall back to the 7-day view.
    pub fn from_query(raw: Option<i64>) -> Self {
        let days = raw
            .and_then(|d| u32::try_from(d).ok())
            .filter(|d| ALLOWED_PERIODS.contains(d))
            .unwrap_or(DEFAULT_PERIOD);
        match days {
            0 => Self::Max,
            30 => Self::Month,
            90 => Self::Quarter,
            _ => Self::Week,
        }
    }

    pub fn as_query(self) -> u32 {
        match self {
            Self::Week => 7,
            Self::Month => 30,
            Self::Quarter => 90,
            Self::Max => 0,
        }
    }

    pub fn effective_days(self, retention_days: u32) -> u32 {
        match self {
            Self::Max => retention_days.clamp(1, MAX_RETENTION_DAYS),
            other => other.as_query(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    pub fn for_period(period: Period, effective_days: u32) -> Self {
        match period {
            Period::Max => Self::Monthly,
            _ if effective_days > 30 => Self::Weekly,
            _ => Self::Daily,
        }
    }
}

/// Contiguous, inclusive index range into the daily label sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub label: String,
    pub start: usize,
    pub end: usize,
}

/// Every day from `today - (days - 1)` through `today`, ascending. Fails
/// when the window would reach before the earliest representable date.
pub fn date_labels(today: NaiveDate, days: u32) -> Result<Vec<NaiveDate>, StoreError> {
    let days = u64::from(days.max(1));
    (0..days)
        .rev()
        .map(|offset| {
            today.checked_sub_days(Days::new(offset)).ok_or_else(|| {
                StoreError::Validation(format!(
                    "a {days}-day window ending {today} is out of range"
                ))
            })
        })
        .collect()
}

pub fn buckets(labels: &[NaiveDate], granularity: Granularity) -> Vec<Bucket> {
    match granularity {
        Granularity::Daily => labels
            .iter()
            .enumerate()
            .map(|(idx, day)| Bucket {
                label: day.format(DATE_FORMAT).to_string(),
                start: idx,
                end: idx,
            })
            .collect(),
        Granularity::Weekly => (0..labels.len())
            .step_by(7)
            .map(|start| {
                let end = (start + 6).min(labels.len() - 1);
                Bucket {
                    label: range_label(labels[start], labels[end]),
                    start,
                    end,
                }
            })
            .collect(),
        Granularity::Monthly => {
            let mut out: Vec<Bucket> = Vec::new();
            for (idx, day) in labels.iter().enumerate() {
                match out.last_mut() {
                    Some(bucket) if same_month(labels[bucket.start], *day) => bucket.end = idx,
                    _ => out.push(Bucket {
                        label: String::new(),
                        start: idx,
                        end: idx,
                    }),
                }
            }
            for bucket in &mut out {
                bucket.label = range_label(labels[bucket.start], labels[bucket.end]);
            }
            out
        }
    }
}

fn same_month(a: NaiveDate, b: NaiveDate) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

fn range_label(first: NaiveDate, last: NaiveDate) -> String {
    format!(
        "{} – {}",
        first.format(DATE_FORMAT),
        last.format(DATE_FORMAT)
    )
}

pub fn bucket_values(daily: &[u64], buckets: &[Bucket]) -> Vec<u64> {
    buckets
        .iter()
        .map(|bucket| daily[bucket.start..=bucket.end].iter().sum())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportQuery {
    pub period: Period,
    pub filter: Option<String>,
    pub top: usize,
}

impl ReportQuery {
    pub fn new(period: Period) -> Self {
        Self {
            period,
            filter: None,
            top: DEFAULT_TOP,
        }
    }

    /// Blank filters are dropped; `top` outside the allowed set falls back to the default.
    pub fn from_params(period: Option<i64>, filter: Option<&str>, top: Option<usize>) -> Self {
        let filter = filter
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string);
        let top = top
            .filter(|t| ALLOWED_TOP.contains(t))
            .unwrap_or(DEFAULT_TOP);
        Self {
            period: Period::from_query(period),
            filter,
            top,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub rank: usize,
    pub path: String,
    pub period_total: u64,
    pub chart_labels: Vec<String>,
    pub chart_values: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub period: Period,
    pub effective_days: u32,
    pub granularity: Granularity,
    /// Informational; stored counts already include the sampling weight.
    pub sampling_rate: u32,
    pub date_from: String,
    pub date_to: String,
    pub rows: Vec<ReportRow>,
}

pub struct ReportBuilder<'a> {
    store: &'a Store,
    settings: &'a AnalyticsSettings,
    today: NaiveDate,
}

impl<'a> ReportBuilder<'a> {
    pub fn new(store: &'a Store, settings: &'a AnalyticsSettings, today: NaiveDate) -> Self {
        Self {
            store,
            settings,
            today,
        }
    }

    pub fn build(&self, query: &ReportQuery) -> Result<Report, StoreError> {
        let effective_days = query.period.effective_days(self.settings.retention_days);
        let labels = date_labels(self.today, effective_days)?;
        let date_from = labels[0];
        let granularity = Granularity::for_period(query.period, effective_days);

        let mut report = Report {
            period: query.period,
            effective_days,
            granularity,
            sampling_rate: self.settings.sampling_rate,
            date_from: date_from.format(DATE_FORMAT).to_string(),
            date_to: self.today.format(DATE_FORMAT).to_string(),
            rows: Vec::new(),
        };

        // 排名窗口与展示窗口一致，保证行内总数与排名一致
        let top_paths = self.store.sum_views_by_path(
            query.filter.as_deref(),
            date_from,
            self.today,
            Some(query.top),
        )?;
        if top_paths.is_empty() {
            return Ok(report);
        }

        let paths: Vec<String> = top_paths.iter().map(|(path, _)| path.clone()).collect();
        let series = self.store.daily_series(&paths, date_from, self.today)?;

        let day_index: HashMap<NaiveDate, usize> = labels
            .iter()
            .enumerate()
            .map(|(idx, day)| (*day, idx))
            .collect();
        let mut dense: HashMap<&str, Vec<u64>> = paths
            .iter()
            .map(|path| (path.as_str(), vec![0u64; labels.len()]))
            .collect();
        for counter in &series {
            if let (Some(values), Some(idx)) = (
                dense.get_mut(counter.path.as_str()),
                day_index.get(&counter.date),
            ) {
                values[*idx] += counter.view_count;
            }
        }

        let bucket_plan = buckets(&labels, granularity);
        let chart_labels: Vec<String> = bucket_plan.iter().map(|b| b.label.clone()).collect();

        report.rows = paths
            .iter()
            .enumerate()
            .map(|(rank, path)| {
                let values_full = dense.get(path.as_str()).cloned().unwrap_or_default();
                let chart_values = bucket_values(&values_full, &bucket_plan);
                ReportRow {
                    rank: rank + 1,
                    path: path.clone(),
                    period_total: values_full.iter().sum(),
                    chart_labels: chart_labels.clone(),
                    chart_values,
                }
            })
            .collect();

        Ok(report)
    }
}
