//! Page-view collection and reporting core.
//!
//! Everything under this module is free of HTTP and scheduler concerns: the
//! request path calls [`path`] and [`sampling`], the queue carries
//! [`event::ViewEvent`] payloads, and [`report`] turns stored daily counters
//! back into per-path time series.

pub mod clock;
pub mod event;
pub mod path;
pub mod report;
pub mod sampling;
pub mod settings;
