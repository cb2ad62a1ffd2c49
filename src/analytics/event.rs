use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analytics::path::truncate_path;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One sampled page view waiting in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewEvent {
    pub path: String,
    pub date: NaiveDate,
    pub weight: u32,
}

/// Queue wire format: `{"path": "/x", "date": "YYYY-MM-DD", "sampling_rate": N}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewPayload {
    pub path: String,
    pub date: String,
    pub sampling_rate: u32,
}

impl ViewEvent {
    pub fn new(path: &str, date: NaiveDate, weight: u32) -> Self {
        Self {
            path: truncate_path(path).to_string(),
            date,
            weight: weight.max(1),
        }
    }

    pub fn to_payload(&self) -> ViewPayload {
        ViewPayload {
            path: self.path.clone(),
            date: self.date.format(DATE_FORMAT).to_string(),
            sampling_rate: self.weight,
        }
    }

    /// Lenient decode of a queued item. `None` means the item is garbage:
    /// `path`/`date` missing, not strings, or an unparsable date. A missing or
    /// non-numeric `sampling_rate` counts as 1.
    pub fn from_wire(value: &Value) -> Option<Self> {
        let path = value.get("path")?.as_str()?;
        let date = value.get("date")?.as_str()?;
        let date = NaiveDate::parse_from_str(date.trim(), DATE_FORMAT).ok()?;
        let weight = value
            .get("sampling_rate")
            .and_then(weight_from_value)
            .unwrap_or(1);
        Some(Self::new(path, date, weight))
    }
}

fn weight_from_value(value: &Value) -> Option<u32> {
    let raw = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    Some(raw.clamp(1, i64::from(u32::MAX)) as u32)
}
