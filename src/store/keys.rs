use chrono::NaiveDate;

use crate::analytics::event::DATE_FORMAT;

pub const SCHEMA_VERSION_KEY: &str = "_meta:version";
const DAILY_SEPARATOR: char = '|';
/// Sorts after the separator, closing a per-date range.
const DAILY_RANGE_END: char = '~';

pub fn daily_counter_key(date: NaiveDate, path: &str) -> String {
    format!("{}{}{}", date.format(DATE_FORMAT), DAILY_SEPARATOR, path)
}

/// Half-open key range covering every counter dated `from..=to`.
pub fn daily_counter_range(from: NaiveDate, to: NaiveDate) -> (String, String) {
    (
        format!("{}{}", from.format(DATE_FORMAT), DAILY_SEPARATOR),
        format!("{}{}", to.format(DATE_FORMAT), DAILY_RANGE_END),
    )
}

/// Every counter dated strictly before `cutoff`.
pub fn daily_counter_prefix_before(cutoff: NaiveDate) -> String {
    format!("{}{}", cutoff.format(DATE_FORMAT), DAILY_SEPARATOR)
}

pub fn parse_daily_counter_key(raw: &[u8]) -> Option<(NaiveDate, String)> {
    let text = std::str::from_utf8(raw).ok()?;
    let (date, path) = text.split_once(DAILY_SEPARATOR)?;
    let date = NaiveDate::parse_from_str(date, DATE_FORMAT).ok()?;
    Some((date, path.to_string()))
}

pub fn queue_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

pub fn queue_id(raw: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = raw.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

pub fn settings_key() -> &'static str {
    "settings:analytics"
}

pub fn worker_last_run_key(worker: &str) -> String {
    format!("worker:{}:last_run", worker)
}

pub fn encode_u64(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

pub fn decode_u64(raw: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = raw.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}
