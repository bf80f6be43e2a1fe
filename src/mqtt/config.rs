//! MQTT client configuration, loaded from the flat `ConfigStore`.
//!
//! Field-for-field doc density here mirrors the teacher's
//! `mqtt::config::MqttConfig` (heavy `///` docs per field) since this struct
//! plays the same "central connection configuration" role in this crate.

use crate::config::ConfigStore;
use crate::error::ConfigError;
use crate::modem::MqttSecurityParams;

/// Wire mode: plain MQTT over the modem's client, or MQTT-SN with
/// topic-id registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttMode {
    Mqtt,
    MqttSn,
}

/// Everything needed to open and maintain one broker connection.
///
/// Security fields are carried through untouched to
/// `ModemDriver::mqtt_connect` — this crate does not terminate TLS itself,
/// the modem does (`SPEC_FULL.md` §4.3 ambient addition).
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker hostname or IP, as configured by `MQTT_BROKER_NAME`.
    pub broker_name: String,

    /// Optional broker credentials (`MQTT_USERNAME` / `MQTT_PASSWORD`).
    pub username: Option<String>,
    pub password: Option<String>,

    /// Client identifier presented at connect (`MQTT_CLIENTID`).
    pub client_id: String,

    /// `MQTT` or `MQTT-SN` (`MQTT_TYPE`).
    pub mode: MqttMode,

    /// Whether the modem's keep-alive pinging is enabled (`MQTT_KEEPALIVE`).
    pub keep_alive: bool,

    /// Inactivity timeout in seconds (`MQTT_TIMEOUT`).
    pub timeout_secs: u32,

    /// TLS/security parameters, populated only when `MQTT_SECURITY` is TRUE.
    pub security: MqttSecurityParams,
}

impl MqttConfig {
    pub fn from_store(store: &ConfigStore) -> Result<Self, ConfigError> {
        let mode = match store.get("MQTT_TYPE") {
            Some("MQTT-SN") => MqttMode::MqttSn,
            _ => MqttMode::Mqtt,
        };

        let security = if store.get_bool_true("MQTT_SECURITY") {
            MqttSecurityParams {
                enabled: true,
                cert_valid_level: store.get_i64("SECURITY_CERT_VALID_LEVEL", 0).ok(),
                tls_version: store.get_owned("SECURITY_TLS_VERSION"),
                cipher_suite: store.get_owned("SECURITY_CIPHER_SUITE"),
                client_name: store.get_owned("SECURITY_CLIENT_NAME"),
                client_key: store.get_owned("SECURITY_CLIENT_KEY"),
                server_name_indication: store.get_owned("SECURITY_SERVER_NAME_IND"),
            }
        } else {
            MqttSecurityParams::default()
        };

        Ok(Self {
            broker_name: store.get_required("MQTT_BROKER_NAME")?.to_string(),
            username: store.get_owned("MQTT_USERNAME"),
            password: store.get_owned("MQTT_PASSWORD"),
            client_id: store
                .get_owned("MQTT_CLIENTID")
                .unwrap_or_else(|| "cell-telemetry-agent".to_string()),
            mode,
            keep_alive: store.get_bool_true("MQTT_KEEPALIVE"),
            timeout_secs: store.get_i64("MQTT_TIMEOUT", 60)? as u32,
            security,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mqtt_sn_mode_and_security() {
        let store = ConfigStore::parse(
            "MQTT_BROKER_NAME test.example\nMQTT_TYPE MQTT-SN\nMQTT_SECURITY TRUE\nSECURITY_TLS_VERSION TLS1.2\n",
        );
        let cfg = MqttConfig::from_store(&store).unwrap();
        assert_eq!(cfg.mode, MqttMode::MqttSn);
        assert!(cfg.security.enabled);
        assert_eq!(cfg.security.tls_version.as_deref(), Some("TLS1.2"));
    }

    #[test]
    fn missing_broker_name_is_an_error() {
        let store = ConfigStore::parse("");
        assert!(MqttConfig::from_store(&store).is_err());
    }
}
