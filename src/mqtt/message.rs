//! Outbound/inbound message shapes and the MQTT-SN short-name registry.
//!
//! `Destination` is the Rust tightening of the original's `mqttMsg_t` union
//! noted as a REDESIGN in `SPEC_FULL.md` §7/§3: exactly one of `Topic` /
//! `ShortName` is representable at all, instead of two optional fields whose
//! "exactly one set" invariant had to be maintained by convention.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

pub use crate::modem::{MqttDestination as Destination, MqttQos};

/// One item queued for publish. The MQTT worker owns it end to end: built by
/// `publish()`, drained and freed by the connection loop after the modem
/// call returns (or the item is dropped on shutdown).
#[derive(Debug, Clone)]
pub struct OutboundItem {
    pub id: u64,
    pub destination: Destination,
    pub payload: String,
    pub qos: MqttQos,
    pub retain: bool,
}

/// A handler invoked with the parsed parameter list of one inbound command.
pub type CommandHandler = Arc<dyn Fn(&[String]) + Send + Sync>;

/// Binds a topic name to its QoS, its MQTT-SN short-name (once registered),
/// and the table of commands it understands.
pub struct Subscription {
    pub topic: String,
    pub qos: MqttQos,
    pub short_name: Option<u16>,
    pub handlers: HashMap<String, CommandHandler>,
}

/// Subscription registry and short-name cache, owned exclusively by the
/// MQTT worker (spec.md §5 ownership: "mutated only by the MQTT worker;
/// readers (publish path) consult them under a single reader").
#[derive(Default)]
pub struct SubscriptionRegistry {
    by_topic: RwLock<HashMap<String, Subscription>>,
    short_names: RwLock<HashMap<String, u16>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn insert(&self, sub: Subscription) {
        self.by_topic.write().await.insert(sub.topic.clone(), sub);
    }

    pub async fn remove(&self, topic: &str) {
        self.by_topic.write().await.remove(topic);
        self.short_names.write().await.remove(topic);
    }

    pub async fn handler(&self, topic: &str, command: &str) -> Option<CommandHandler> {
        let topics = self.by_topic.read().await;
        topics.get(topic)?.handlers.get(command).cloned()
    }

    pub async fn topic_for_short_name(&self, short_name: u16) -> Option<String> {
        let topics = self.by_topic.read().await;
        topics
            .values()
            .find(|s| s.short_name == Some(short_name))
            .map(|s| s.topic.clone())
    }

    pub async fn cached_short_name(&self, topic: &str) -> Option<u16> {
        self.short_names.read().await.get(topic).copied()
    }

    pub async fn cache_short_name(&self, topic: &str, short_name: u16) {
        self.short_names
            .write()
            .await
            .insert(topic.to_string(), short_name);
    }
}

/// Monotonic id generator for outbound items.
#[derive(Default)]
pub struct IdGenerator(AtomicU64);

impl IdGenerator {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// `<appTopicHeader>/<IMEI>/<suffix>` (spec.md §6 MQTT topic layout).
pub fn topic(header: &str, imei: &str, suffix: &str) -> String {
    format!("{header}/{imei}/{suffix}")
}

pub mod suffix {
    pub const APP_CONTROL: &str = "AppControl";
    pub const SIGNAL_QUALITY: &str = "SignalQuality";
    pub const SIGNAL_QUALITY_CONTROL: &str = "SignalQualityControl";
    pub const LOCATION: &str = "Location";
    pub const LOCATION_CONTROL: &str = "LocationControl";
    pub const CELL_SCAN: &str = "CellScan";
    pub const CELL_SCAN_CONTROL: &str = "CellScanControl";
    pub const NETWORK_SCAN: &str = "NetworkScan";
    pub const INFORMATION: &str = "Information";
    pub const EXAMPLE_CONTROL: &str = "ExampleControl";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_follows_template() {
        assert_eq!(
            topic("U-BLOX", "490154203237518", suffix::SIGNAL_QUALITY),
            "U-BLOX/490154203237518/SignalQuality"
        );
    }

    #[tokio::test]
    async fn short_name_lookup_resolves_by_id() {
        let registry = SubscriptionRegistry::new();
        registry
            .insert(Subscription {
                topic: "U-BLOX/IMEI/AppControl".to_string(),
                qos: MqttQos::AtLeastOnce,
                short_name: Some(7),
                handlers: HashMap::new(),
            })
            .await;
        assert_eq!(
            registry.topic_for_short_name(7).await,
            Some("U-BLOX/IMEI/AppControl".to_string())
        );
        assert_eq!(registry.topic_for_short_name(9).await, None);
    }
}
