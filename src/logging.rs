//! Logging setup.
//!
//! Severity-filtered, timestamped, serialised writer, built on
//! `tracing`/`tracing-subscriber` in the style of the teacher's
//! `setup_logging_env()` — except here the level must be changeable at
//! runtime (`SET_LOG_LEVEL` over MQTT), so initialization hands back a
//! `tracing_subscriber::reload::Handle` instead of the teacher's one-shot
//! `FmtSubscriber::builder()...init()`.

use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::reload;
use tracing_subscriber::{fmt, prelude::*};

/// `LOG_LEVEL` config values: 0=trace .. 5=fatal. `tracing` has no distinct
/// fatal level, so 5 maps to `ERROR` (the most severe level `tracing` has).
pub fn level_from_config(level: i64) -> LevelFilter {
    match level {
        0 => LevelFilter::TRACE,
        1 => LevelFilter::DEBUG,
        2 => LevelFilter::INFO,
        3 => LevelFilter::WARN,
        4 | 5 => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

pub type ReloadHandle = reload::Handle<LevelFilter, tracing_subscriber::Registry>;

/// Installs the global subscriber and returns a handle that `SET_LOG_LEVEL`
/// can use to change the filter without restarting the process.
pub fn init(initial_level: LevelFilter) -> ReloadHandle {
    let (filter, handle) = reload::Layer::new(initial_level);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true),
        )
        .init();

    handle
}

/// Applies a `SET_LOG_LEVEL` command, clamped at the call site by
/// `get_param_value` to `[0, 5]` before reaching here.
pub fn set_level(handle: &ReloadHandle, level: i64) {
    let new_filter = level_from_config(level);
    let _ = handle.modify(|filter| *filter = new_filter);
    tracing::info!(level = ?new_filter, "log level updated");
}

/// Used only to size `Level` conversions in tests; production code always
/// goes through `LevelFilter`.
#[allow(dead_code)]
pub fn level_filter_to_level(filter: LevelFilter) -> Option<Level> {
    filter.into_level()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_config_levels() {
        assert_eq!(level_from_config(0), LevelFilter::TRACE);
        assert_eq!(level_from_config(5), LevelFilter::ERROR);
        assert_eq!(level_from_config(99), LevelFilter::INFO);
    }
}
