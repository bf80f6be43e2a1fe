//! Shared application context.
//!
//! Replaces the original firmware's global mutable flags (`gExitApp`,
//! `gIsNetworkUp`, `gIsMQTTConnected`, `gAppStatus`) with one `Arc<AppContext>`
//! constructed once at startup and cloned into every task, per the redesign
//! direction in the spec's design notes. Writes stay unsynchronised (atomics,
//! last-writer-wins where spec calls for it); reads are lock-free.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

/// Observable application phase, written by one task at a time (diagnostic
/// only — last-writer-wins is acceptable, per spec).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AppState {
    InitDevice = 0,
    Registering = 1,
    Registered = 2,
    MqttConnecting = 3,
    MqttConnected = 4,
    MqttDisconnected = 5,
    CopsQuery = 6,
    LocationMeas = 7,
    RegistrationDenied = 8,
    RegistrationUnknown = 9,
    Shutdown = 10,
    Error = 11,
    Manual = 12,
}

impl AppState {
    fn from_u8(v: u8) -> AppState {
        match v {
            0 => AppState::InitDevice,
            1 => AppState::Registering,
            2 => AppState::Registered,
            3 => AppState::MqttConnecting,
            4 => AppState::MqttConnected,
            5 => AppState::MqttDisconnected,
            6 => AppState::CopsQuery,
            7 => AppState::LocationMeas,
            8 => AppState::RegistrationDenied,
            9 => AppState::RegistrationUnknown,
            10 => AppState::Shutdown,
            11 => AppState::Error,
            _ => AppState::Manual,
        }
    }
}

/// Cached modem identity and operator info.
///
/// Populated once after modem open; operator fields are cleared whenever
/// registration is lost (mirrors `clearOperatorInfo()` in the original
/// registration task).
#[derive(Debug, Clone, Default)]
pub struct ModemInfo {
    pub manufacturer: String,
    pub model: String,
    pub firmware: String,
    pub imei: String,
    pub imsi: String,
    pub iccid: String,
    pub operator_name: String,
    pub operator_mcc: i32,
    pub operator_mnc: i32,
}

impl ModemInfo {
    pub fn clear_operator_info(&mut self) {
        self.operator_name = "Unknown".to_string();
        self.operator_mcc = 0;
        self.operator_mnc = 0;
    }
}

/// Shared, process-wide state handed to every task at construction.
///
/// `exit`, `network_up`, `network_signal_valid` and `mqtt_connected` are the
/// redesigned atomic-bool replacements for the original's global flags.
/// `app_state` is a tagged `AtomicU8` cell rather than a `Mutex<AppState>` —
/// spec explicitly allows unsynchronised last-writer-wins here.
pub struct AppContext {
    pub exit: AtomicBool,
    pub network_up: AtomicBool,
    pub network_signal_valid: AtomicBool,
    pub mqtt_connected: AtomicBool,
    app_state: AtomicU8,
    pub network_up_counter: AtomicU32,
    pub network_denied_counter: AtomicU32,
    pub modem_info: RwLock<ModemInfo>,
    pub topic_header: RwLock<String>,
    /// Set by the cell-scan sampler while a scan is in flight so the
    /// supervisor's housekeeping loop skips its tick (`pauseMainLoop` in
    /// `original_source/tasks/cellScanTask.c`).
    pub housekeeping_paused: AtomicBool,
    /// Accumulated process exit code, set by `EXIT_APP code` (spec.md §4.7,
    /// §4.6 "exit with accumulated exit code").
    exit_code: AtomicI32,
}

impl AppContext {
    pub fn new(topic_header: String) -> Arc<Self> {
        Arc::new(Self {
            exit: AtomicBool::new(false),
            network_up: AtomicBool::new(false),
            network_signal_valid: AtomicBool::new(false),
            mqtt_connected: AtomicBool::new(false),
            app_state: AtomicU8::new(AppState::Manual as u8),
            network_up_counter: AtomicU32::new(0),
            network_denied_counter: AtomicU32::new(0),
            modem_info: RwLock::new(ModemInfo::default()),
            topic_header: RwLock::new(topic_header),
            housekeeping_paused: AtomicBool::new(false),
            exit_code: AtomicI32::new(0),
        })
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Relaxed)
    }

    pub fn request_exit_with_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::Relaxed);
        self.request_exit();
    }

    pub fn pause_housekeeping(&self, paused: bool) {
        self.housekeeping_paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_housekeeping_paused(&self) -> bool {
        self.housekeeping_paused.load(Ordering::Relaxed)
    }

    pub fn app_state(&self) -> AppState {
        AppState::from_u8(self.app_state.load(Ordering::Relaxed))
    }

    pub fn set_app_state(&self, state: AppState) {
        self.app_state.store(state as u8, Ordering::Relaxed);
    }

    /// `IS_NETWORK_AVAILABLE` from the original: registration *and* a usable
    /// radio signal.
    pub fn is_network_available(&self) -> bool {
        self.network_up.load(Ordering::Relaxed) && self.network_signal_valid.load(Ordering::Relaxed)
    }

    pub fn is_exiting(&self) -> bool {
        self.exit.load(Ordering::Relaxed)
    }

    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_available_requires_both_flags() {
        let ctx = AppContext::new("test".to_string());
        assert!(!ctx.is_network_available());
        ctx.network_up.store(true, Ordering::Relaxed);
        assert!(!ctx.is_network_available());
        ctx.network_signal_valid.store(true, Ordering::Relaxed);
        assert!(ctx.is_network_available());
    }

    #[test]
    fn app_state_roundtrips() {
        let ctx = AppContext::new("test".to_string());
        ctx.set_app_state(AppState::MqttConnected);
        assert_eq!(ctx.app_state(), AppState::MqttConnected);
    }
}
