//! MQTT/MQTT-SN client: connection state machine, publish queue, short-name
//! registry, and inbound command dispatch.
//!
//! Generalizes the teacher's `mqtt` module (`mqtt_handler`, `message_manager`,
//! `config`) from a direct `rumqttc` broker client into a client driven
//! through the `ModemDriver` boundary — see `client.rs`'s module docs for
//! the full grounding note.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod message;

pub use client::MqttHandle;
pub use config::MqttConfig;
pub use message::{topic, Destination, OutboundItem};
