//! Error types for the telemetry agent.
//!
//! Each subsystem gets its own `thiserror` enum at the boundary it owns;
//! `main.rs` aggregates everything through `color_eyre::Result` the way the
//! teacher layers `ControllerError` under `color_eyre::eyre::Result`.

use thiserror::Error;

/// Errors raised while loading or querying the flat-file configuration store.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("required configuration key '{0}' is missing")]
    MissingKey(String),

    #[error("configuration key '{key}' has an invalid value '{value}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Errors surfaced by the modem driver boundary.
///
/// Mirrors the "every driver call returns a negative integer" taxonomy from
/// the original firmware: `Driver(code)` is the AT-level failure path, the
/// other variants are the Rust-native shape of its expected conditions.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ModemError {
    #[error("modem driver error {0}")]
    Driver(i32),

    #[error("not registered on the network")]
    NotRegistered,

    #[error("device error, radio parameters unavailable")]
    DeviceError,

    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("no more scan results")]
    ScanComplete,
}

/// Errors from the task spine (init/start/stop/queue operations).
#[derive(Debug, Error)]
pub enum SpineError {
    #[error("task {0:?} is not initialised")]
    NotInitialised(crate::task::TaskId),

    #[error("task {0:?} is already running")]
    AlreadyRunning(crate::task::TaskId),

    #[error("task {0:?} command queue is full")]
    QueueFull(crate::task::TaskId),

    #[error("task {0:?} command queue is closed")]
    QueueClosed(crate::task::TaskId),

    #[error("timed out waiting for task {0:?} to stop")]
    StopTimeout(crate::task::TaskId),
}

/// Errors from the MQTT client task.
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("mqtt event queue is not valid")]
    QueueInvalid,

    #[error("mqtt task is not running")]
    NotRunning,

    #[error("cellular network is not available")]
    NetworkUnavailable,

    #[error("not connected to broker")]
    NotConnected,

    #[error(transparent)]
    Modem(#[from] ModemError),
}

/// Errors from inbound command dispatch (unknown topic/command, bad payload).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),

    #[error("unknown command '{command}' on topic '{topic}'")]
    UnknownCommand { topic: String, command: String },

    #[error("empty payload")]
    EmptyPayload,
}
