//! A simulated [`ModemDriver`], standing in for real AT-command hardware.
//!
//! Grounded on the teacher's `MQTTConnection` state machine for the shape of
//! "pretend the transport succeeded, advance internal state, let the caller
//! observe it" — except here there is no broker to simulate against, so this
//! driver fabricates plausible radio/GNSS/scan data and a registration event
//! stream the way a bench test double would. It is the default driver wired
//! up by `main.rs` and is exercised directly by this crate's unit tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::error::ModemError;

use super::{
    DeviceConfig, GnssFix, InboundMqttMessage, KeepGoing, ModemDriver, ModemIdentity,
    MqttConnectParams, MqttDestination, MqttQos, RadioParameters, RegistrationEvent, ScanResult,
};

pub struct SimulatedModem {
    open: AtomicBool,
    network_up: AtomicBool,
    mqtt_connected: AtomicBool,
    downlink: Mutex<Vec<InboundMqttMessage>>,
    registration_tx: Mutex<Option<mpsc::Sender<RegistrationEvent>>>,
    scan_counter: AtomicU32,
}

impl Default for SimulatedModem {
    fn default() -> Self {
        Self {
            open: AtomicBool::new(false),
            network_up: AtomicBool::new(false),
            mqtt_connected: AtomicBool::new(false),
            downlink: Mutex::new(Vec::new()),
            registration_tx: Mutex::new(None),
            scan_counter: AtomicU32::new(0),
        }
    }
}

impl SimulatedModem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Test/demo hook: pushes an inbound message as if received over the
    /// modem's MQTT client, so dispatch logic can be exercised end to end.
    pub async fn inject_inbound(&self, msg: InboundMqttMessage) {
        self.downlink.lock().await.push(msg);
    }

    async fn require_open(&self) -> Result<(), ModemError> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ModemError::DeviceError)
        }
    }
}

#[async_trait]
impl ModemDriver for SimulatedModem {
    async fn open(&self, _cfg: &DeviceConfig) -> Result<(), ModemError> {
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    async fn close(&self) -> Result<(), ModemError> {
        self.open.store(false, Ordering::Release);
        self.network_up.store(false, Ordering::Release);
        self.mqtt_connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn identity(&self) -> Result<ModemIdentity, ModemError> {
        self.require_open().await?;
        Ok(ModemIdentity {
            manufacturer: "u-blox".to_string(),
            model: "SARA-R510".to_string(),
            firmware: "L0.0.00.00.05.08".to_string(),
            imei: "000000000000000".to_string(),
            imsi: "001010000000000".to_string(),
            iccid: "89000000000000000000".to_string(),
        })
    }

    async fn network_interface_up(
        &self,
        _apn: Option<&str>,
        _timeout_secs: u32,
        keep_going: KeepGoing,
    ) -> Result<(), ModemError> {
        self.require_open().await?;
        if !keep_going() {
            return Err(ModemError::Cancelled);
        }
        self.network_up.store(true, Ordering::Release);

        if let Some(tx) = self.registration_tx.lock().await.as_ref() {
            let _ = tx.send(RegistrationEvent::Up).await;
        }

        Ok(())
    }

    async fn network_interface_down(&self) -> Result<(), ModemError> {
        self.network_up.store(false, Ordering::Release);
        Ok(())
    }

    async fn registration_events(&self) -> mpsc::Receiver<RegistrationEvent> {
        let (tx, rx) = mpsc::channel(8);
        *self.registration_tx.lock().await = Some(tx);
        rx
    }

    async fn operator_info(&self) -> Result<(String, i32, i32), ModemError> {
        self.require_open().await?;
        if !self.network_up.load(Ordering::Acquire) {
            return Err(ModemError::NotRegistered);
        }
        Ok(("Simulated Telecom".to_string(), 310, 410))
    }

    async fn network_time_utc(&self) -> Result<i64, ModemError> {
        self.require_open().await?;
        // A plausible mid-2026 epoch timestamp; real devices source this
        // from the network clock.
        Ok(1_780_000_000)
    }

    async fn radio_parameters(&self) -> Result<RadioParameters, ModemError> {
        self.require_open().await?;
        if !self.network_up.load(Ordering::Acquire) {
            return Ok(RadioParameters {
                rsrp: 0,
                rsrq: i32::MAX,
                rssi: 0,
                snr: 0,
                rxqual: -1,
                logical_cell_id: -1,
                physical_cell_id: -1,
                earfcn: -1,
            });
        }
        Ok(RadioParameters {
            rsrp: -95,
            rsrq: -11,
            rssi: -70,
            snr: 12,
            rxqual: 0,
            logical_cell_id: 12345,
            physical_cell_id: 42,
            earfcn: 5780,
        })
    }

    async fn gnss_fix(&self, keep_going: KeepGoing) -> Result<GnssFix, ModemError> {
        self.require_open().await?;
        if !keep_going() {
            return Err(ModemError::Cancelled);
        }
        Ok(GnssFix {
            altitude_mm: 12_000,
            latitude_1e7: 377749000,
            longitude_1e7: -1224194000,
            accuracy_mm: 3_500,
            speed_mm_per_sec: 0,
            time_utc: self.network_time_utc().await.unwrap_or(0),
        })
    }

    async fn scan_operators(
        &self,
        results: mpsc::Sender<ScanResult>,
        keep_going: KeepGoing,
    ) -> Result<usize, ModemError> {
        self.require_open().await?;
        const CANDIDATES: &[(&str, &str)] = &[
            ("Simulated Telecom", "310410"),
            ("Simulated Mobile", "310260"),
            ("Simulated Wireless", "311480"),
        ];

        let mut sent = 0;
        for (name, mcc_mnc) in CANDIDATES {
            if !keep_going() {
                return Err(ModemError::Cancelled);
            }
            let _ = results
                .send(ScanResult {
                    operator_name: name.to_string(),
                    rat: 7,
                    mcc_mnc: mcc_mnc.to_string(),
                })
                .await;
            sent += 1;
        }
        self.scan_counter.fetch_add(1, Ordering::AcqRel);
        Ok(sent)
    }

    async fn mqtt_connect(&self, _params: &MqttConnectParams) -> Result<(), ModemError> {
        self.require_open().await?;
        if !self.network_up.load(Ordering::Acquire) {
            return Err(ModemError::NotRegistered);
        }
        self.mqtt_connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn mqtt_disconnect(&self) -> Result<(), ModemError> {
        self.mqtt_connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn mqtt_is_connected(&self) -> bool {
        self.mqtt_connected.load(Ordering::Acquire)
    }

    async fn mqtt_register_topic(&self, _topic: &str) -> Result<Option<u16>, ModemError> {
        if !self.mqtt_connected.load(Ordering::Acquire) {
            return Err(ModemError::NotRegistered);
        }
        Ok(None)
    }

    async fn mqtt_subscribe(&self, _topic: &str, _qos: MqttQos) -> Result<Option<u16>, ModemError> {
        if !self.mqtt_connected.load(Ordering::Acquire) {
            return Err(ModemError::NotRegistered);
        }
        Ok(None)
    }

    async fn mqtt_unsubscribe(&self, _topic: &str) -> Result<(), ModemError> {
        Ok(())
    }

    async fn mqtt_publish(
        &self,
        _destination: &MqttDestination,
        _payload: &str,
        _qos: MqttQos,
        _retain: bool,
    ) -> i32 {
        if !self.mqtt_connected.load(Ordering::Acquire) {
            // 34: "no network service" — the reconnect-trigger code the
            // original publish-error handler special-cases.
            return 34;
        }
        0
    }

    async fn mqtt_downlink_count(&self) -> u32 {
        self.downlink.lock().await.len() as u32
    }

    async fn mqtt_poll_inbound(&self, max: u32) -> Result<Vec<InboundMqttMessage>, ModemError> {
        let mut guard = self.downlink.lock().await;
        let take = (max as usize).min(guard.len());
        Ok(guard.drain(0..take).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::{CellModuleType, GnssModuleType};

    fn device_config() -> DeviceConfig {
        DeviceConfig {
            serial_device: "/dev/ttyUSB0".to_string(),
            cell_module: CellModuleType::SaraR5,
            gnss_module: GnssModuleType::M8,
            apn: Some("internet".to_string()),
            mno_profile: None,
            urat: None,
        }
    }

    #[tokio::test]
    async fn mqtt_connect_requires_network_up() {
        let modem = SimulatedModem::new();
        modem.open(&device_config()).await.unwrap();
        let params = MqttConnectParams {
            broker_name: "test.broker".to_string(),
            username: None,
            password: None,
            client_id: "agent".to_string(),
            inactivity_timeout_secs: 60,
            keep_alive: true,
            use_mqtt_sn: false,
            security: Default::default(),
        };
        assert!(matches!(
            modem.mqtt_connect(&params).await,
            Err(ModemError::NotRegistered)
        ));

        let keep_going: KeepGoing = Arc::new(|| true);
        modem
            .network_interface_up(Some("internet"), 30, keep_going)
            .await
            .unwrap();
        assert!(modem.mqtt_connect(&params).await.is_ok());
    }

    #[tokio::test]
    async fn publish_without_connection_reports_error_34() {
        let modem = SimulatedModem::new();
        modem.open(&device_config()).await.unwrap();
        let code = modem
            .mqtt_publish(
                &MqttDestination::Topic("a/b".to_string()),
                "{}",
                MqttQos::AtLeastOnce,
                false,
            )
            .await;
        assert_eq!(code, 34);
    }

    #[tokio::test]
    async fn scan_operators_respects_cancellation() {
        let modem = SimulatedModem::new();
        modem.open(&device_config()).await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let keep_going: KeepGoing = Arc::new(|| false);
        let result = modem.scan_operators(tx, keep_going).await;
        assert!(matches!(result, Err(ModemError::Cancelled)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn inbound_messages_drain_once() {
        let modem = SimulatedModem::new();
        modem
            .inject_inbound(InboundMqttMessage {
                destination: MqttDestination::Topic("a/b".to_string()),
                payload: "hello".to_string(),
            })
            .await;
        assert_eq!(modem.mqtt_downlink_count().await, 1);
        let drained = modem.mqtt_poll_inbound(10).await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(modem.mqtt_downlink_count().await, 0);
    }
}
