//! The modem driver boundary.
//!
//! Per the spec, the modem driver itself — "opens a serial device, runs AT
//! commands, exposes registration status URCs, returns radio measurements,
//! GNSS fixes, and operator scan results" — is an external collaborator, not
//! part of this crate's subsystem. `ModemDriver` is the trait boundary the
//! task spine depends on (`Arc<dyn ModemDriver>`), following the same
//! pluggable-provider shape the pack's `CredentialsProvider` trait uses for
//! its own external collaborator (an auth backend): an `async_trait` with a
//! `Send + Sync` bound so it can be shared across tasks.
//!
//! [`simulated::SimulatedModem`] is the reference implementation used by the
//! binary when no real transport is wired in, and by every test in this
//! crate.

pub mod simulated;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ModemError;

/// Supported cellular module types (spec.md §6 CLI surface). `SaraR5` also
/// matches the `SARA-R510` prefix per the preserved Open Question in
/// `SPEC_FULL.md` §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellModuleType {
    SaraU201,
    SaraR5,
    SaraR422,
    SaraR412M03B,
    SaraR412M02B,
    SaraR410M03B,
    SaraR410M02B,
    LaraR6,
    LenaR8,
}

impl CellModuleType {
    /// Prefix match, preserving the original's `strncmp(argv[2], "SARA-R5", 7)`
    /// behaviour where `SARA-R510` is classified as `SaraR5`.
    pub fn parse_prefix(s: &str) -> Option<Self> {
        const TABLE: &[(&str, CellModuleType)] = &[
            ("SARA-U201", CellModuleType::SaraU201),
            ("SARA-R422", CellModuleType::SaraR422),
            ("SARA-R412M-03B", CellModuleType::SaraR412M03B),
            ("SARA-R412M-02B", CellModuleType::SaraR412M02B),
            ("SARA-R410M-03B", CellModuleType::SaraR410M03B),
            ("SARA-R410M-02B", CellModuleType::SaraR410M02B),
            ("SARA-R5", CellModuleType::SaraR5),
            ("LARA-R6", CellModuleType::LaraR6),
            ("LENA-R8", CellModuleType::LenaR8),
        ];

        // Longer/more specific prefixes are listed before their shorter
        // relatives (e.g. SARA-R412M-03B before SARA-R5) so the match stays
        // unambiguous; SARA-R5 is deliberately last among the SARA-R4xx
        // family so it only catches the genuinely-R5 names.
        TABLE
            .iter()
            .find(|(prefix, _)| s.starts_with(prefix))
            .map(|(_, ty)| *ty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GnssModuleType {
    M8,
    M9,
    M10,
}

impl GnssModuleType {
    pub fn parse_prefix(s: &str) -> Option<Self> {
        if s.starts_with("M10") {
            Some(GnssModuleType::M10)
        } else if s.starts_with("M9") {
            Some(GnssModuleType::M9)
        } else if s.starts_with("M8") {
            Some(GnssModuleType::M8)
        } else {
            None
        }
    }
}

/// Parameters needed to open the cellular device and bring up the packet
/// data interface.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub serial_device: String,
    pub cell_module: CellModuleType,
    pub gnss_module: GnssModuleType,
    pub apn: Option<String>,
    pub mno_profile: Option<String>,
    pub urat: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModemIdentity {
    pub manufacturer: String,
    pub model: String,
    pub firmware: String,
    pub imei: String,
    pub imsi: String,
    pub iccid: String,
}

/// PS-domain registration status, mirroring `networkStatusCallback`'s filter
/// for `U_CELL_NET_REG_DOMAIN_PS` events only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationEvent {
    Up,
    DownDenied,
    DownOther,
}

#[derive(Debug, Clone, Default)]
pub struct RadioParameters {
    pub rsrp: i32,
    pub rsrq: i32,
    pub rssi: i32,
    pub snr: i32,
    pub rxqual: i32,
    pub logical_cell_id: i32,
    pub physical_cell_id: i32,
    pub earfcn: i32,
}

impl RadioParameters {
    /// `gIsNetworkSignalValid` from `signalQualityTask.c`: radio parameters
    /// that are all non-sentinel indicate the network is actually visible.
    pub fn is_valid(&self) -> bool {
        self.rsrp != 0 && self.rsrq != i32::MAX && self.rssi != 0 && self.rxqual != -1
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GnssFix {
    pub altitude_mm: i32,
    pub latitude_1e7: i32,
    pub longitude_1e7: i32,
    pub accuracy_mm: i32,
    pub speed_mm_per_sec: i32,
    pub time_utc: i64,
}

#[derive(Debug, Clone)]
pub struct ScanResult {
    pub operator_name: String,
    pub rat: i32,
    pub mcc_mnc: String,
}

/// A predicate, checked periodically by long-running modem calls, that
/// returns false once the caller should abandon the operation. Replaces the
/// original's `bool (*pKeepGoingCallback)(void*)` C function pointer.
pub type KeepGoing = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct MqttSecurityParams {
    pub enabled: bool,
    pub cert_valid_level: Option<i64>,
    pub tls_version: Option<String>,
    pub cipher_suite: Option<String>,
    pub client_name: Option<String>,
    pub client_key: Option<String>,
    pub server_name_indication: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MqttConnectParams {
    pub broker_name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub inactivity_timeout_secs: u32,
    pub keep_alive: bool,
    pub use_mqtt_sn: bool,
    pub security: MqttSecurityParams,
}

/// Exactly one of `Topic`/`ShortName` is ever constructed — the Rust
/// tightening of the original's `mqttMsg_t` union (see `SPEC_FULL.md` §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttDestination {
    Topic(String),
    ShortName(u16),
}

/// Reused directly from the teacher's MQTT dependency rather than hand-rolled
/// — `rumqttc::QoS` already names exactly the three MQTT QoS levels this
/// driver boundary needs.
pub use rumqttc::QoS as MqttQos;

#[derive(Debug, Clone)]
pub struct InboundMqttMessage {
    pub destination: MqttDestination,
    pub payload: String,
}

/// The AT-level operations the task spine and MQTT client depend on.
///
/// `Send + Sync` so a single `Arc<dyn ModemDriver>` can be shared by every
/// task; each call is expected to serialise internally against concurrent
/// use the way the real AT command channel would.
#[async_trait]
pub trait ModemDriver: Send + Sync {
    async fn open(&self, cfg: &DeviceConfig) -> Result<(), ModemError>;
    async fn close(&self) -> Result<(), ModemError>;

    async fn identity(&self) -> Result<ModemIdentity, ModemError>;

    /// Brings the packet-data interface up with the given timeout, polling
    /// `keep_going` so a COPS query or app shutdown can abort the attempt.
    async fn network_interface_up(
        &self,
        apn: Option<&str>,
        timeout_secs: u32,
        keep_going: KeepGoing,
    ) -> Result<(), ModemError>;

    async fn network_interface_down(&self) -> Result<(), ModemError>;

    /// A stream of PS-domain registration status transitions.
    async fn registration_events(&self) -> tokio::sync::mpsc::Receiver<RegistrationEvent>;

    async fn operator_info(&self) -> Result<(String, i32, i32), ModemError>;

    async fn network_time_utc(&self) -> Result<i64, ModemError>;

    async fn radio_parameters(&self) -> Result<RadioParameters, ModemError>;

    async fn gnss_fix(&self, keep_going: KeepGoing) -> Result<GnssFix, ModemError>;

    /// Streams discovered operators to `results` as they're found, honouring
    /// `keep_going` for mid-scan cancellation. Returns the count discovered.
    async fn scan_operators(
        &self,
        results: tokio::sync::mpsc::Sender<ScanResult>,
        keep_going: KeepGoing,
    ) -> Result<usize, ModemError>;

    async fn mqtt_connect(&self, params: &MqttConnectParams) -> Result<(), ModemError>;
    async fn mqtt_disconnect(&self) -> Result<(), ModemError>;
    async fn mqtt_is_connected(&self) -> bool;

    /// Registers a topic string for MQTT-SN and returns its short-name id.
    /// For plain MQTT this is a no-op returning `None`.
    async fn mqtt_register_topic(&self, topic: &str) -> Result<Option<u16>, ModemError>;

    async fn mqtt_subscribe(&self, topic: &str, qos: MqttQos) -> Result<Option<u16>, ModemError>;
    async fn mqtt_unsubscribe(&self, topic: &str) -> Result<(), ModemError>;

    /// Publishes and returns the modem error code on failure (0 on success),
    /// matching the original's raw-errno publish-recovery heuristic ("error
    /// 34 == no network service").
    async fn mqtt_publish(
        &self,
        destination: &MqttDestination,
        payload: &str,
        qos: MqttQos,
        retain: bool,
    ) -> i32;

    /// Number of inbound messages currently buffered by the modem.
    async fn mqtt_downlink_count(&self) -> u32;

    async fn mqtt_poll_inbound(&self, max: u32) -> Result<Vec<InboundMqttMessage>, ModemError>;
}
