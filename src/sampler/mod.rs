//! Sampler tasks: signal-quality, location, cell-scan, and the example
//! extension slot.
//!
//! Shared structure across all of them (spec.md §4.4): each iteration
//! `try_lock`s its own critical-section mutex — skipping the iteration if
//! busy rather than blocking — takes one measurement, formats a single-line
//! JSON payload with a timestamp, and publishes it on
//! `<appTopicHeader>/<IMEI>/<TaskName>`.

pub mod cell_scan;
pub mod example;
pub mod location;
pub mod signal_quality;

use chrono::Utc;

/// `HH:MM:SS.mmm` timestamp used in every outbound JSON payload.
pub fn timestamp_now() -> String {
    Utc::now().format("%H:%M:%S%.3f").to_string()
}
