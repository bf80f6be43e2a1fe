//! Signal-quality sampler.
//!
//! Grounded on `original_source/tasks/signalQualityTask.c`: reads RSRP,
//! RSRQ, RSSI, SNR, RxQual, logical/physical cell id and EARFCN, computes
//! `gIsNetworkSignalValid`, and publishes one JSON line per measurement.
//! "Not registered"/"device error" are expected conditions, logged and not
//! treated as failures.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::context::AppContext;
use crate::modem::{ModemDriver, MqttQos, RadioParameters};
use crate::mqtt::{topic, Destination, MqttHandle};
use crate::task::{TaskCommand, TaskDescriptor};

use super::timestamp_now;

/// `measure_now` lets the housekeeping loop force an out-of-cadence sample
/// (spec.md §4.6: "enqueue a 'measure now' command to signal-quality" every
/// housekeeping tick).
pub async fn run(
    descriptor: Arc<TaskDescriptor>,
    ctx: Arc<AppContext>,
    modem: Arc<dyn ModemDriver>,
    mqtt: Arc<MqttHandle>,
    mut commands: mpsc::Receiver<TaskCommand>,
    topic_header: String,
    imei: String,
) {
    let _guard = crate::task::RunningGuard::enter(&descriptor);
    let topic_name = topic(&topic_header, &imei, crate::mqtt::message::suffix::SIGNAL_QUALITY);

    loop {
        if ctx.is_exiting() || descriptor.stop_requested.load(Ordering::Acquire) {
            break;
        }

        while let Ok(cmd) = commands.try_recv() {
            match cmd {
                TaskCommand::MeasureNow => measure_and_publish(&descriptor, &ctx, &modem, &mqtt, &topic_name).await,
                TaskCommand::StartTask { dwell_secs } => {
                    if let Some(secs) = dwell_secs {
                        descriptor
                            .set_dwell(std::time::Duration::from_secs(secs))
                            .await;
                    }
                }
                TaskCommand::StopTask => {}
                _ => {}
            }
        }

        measure_and_publish(&descriptor, &ctx, &modem, &mqtt, &topic_name).await;
        descriptor.dwell_sleep(&ctx).await;
    }
}

async fn measure_and_publish(
    descriptor: &Arc<TaskDescriptor>,
    ctx: &Arc<AppContext>,
    modem: &Arc<dyn ModemDriver>,
    mqtt: &Arc<MqttHandle>,
    topic_name: &str,
) {
    let Ok(_held) = descriptor.lock.try_lock() else {
        debug!("signal quality sampler busy, skipping iteration");
        return;
    };

    let radio = match modem.radio_parameters().await {
        Ok(r) => r,
        Err(crate::error::ModemError::NotRegistered) => {
            debug!("signal quality: not registered, skipping");
            ctx.network_signal_valid.store(false, Ordering::Release);
            return;
        }
        Err(crate::error::ModemError::DeviceError) => {
            warn!("signal quality: device error reading radio parameters");
            ctx.network_signal_valid.store(false, Ordering::Release);
            return;
        }
        Err(e) => {
            warn!(error = %e, "signal quality: unexpected modem error");
            return;
        }
    };

    ctx.network_signal_valid
        .store(radio.is_valid(), Ordering::Release);

    let info = ctx.modem_info.read().await;
    let payload = format_payload(&radio, &info);
    drop(info);

    if let Err(e) = mqtt
        .publish(
            Destination::Topic(topic_name.to_string()),
            payload,
            MqttQos::AtLeastOnce,
            false,
        )
        .await
    {
        debug!(error = %e, "signal quality publish skipped");
    }
}

fn format_payload(radio: &RadioParameters, info: &crate::context::ModemInfo) -> String {
    format!(
        "{{\"Timestamp\":\"{ts}\",\"CellQuality\":{{\"RSRP\":{rsrp},\"RSRQ\":{rsrq},\"RSSI\":{rssi},\"SNR\":{snr},\"RxQual\":{rxqual}}},\"CellInfo\":{{\"LogicalCellID\":\"0x{lcid:08x}\",\"PhysicalCellID\":{pcid},\"EARFCN\":{earfcn},\"PLMN\":{plmn:03}{mnc:02},\"Operator\":\"{op}\"}}}}",
        ts = timestamp_now(),
        rsrp = radio.rsrp,
        rsrq = radio.rsrq,
        rssi = radio.rssi,
        snr = radio.snr,
        rxqual = radio.rxqual,
        lcid = radio.logical_cell_id,
        pcid = radio.physical_cell_id,
        earfcn = radio.earfcn,
        plmn = info.operator_mcc,
        mnc = info.operator_mnc,
        op = info.operator_name,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_payload_with_hex_cell_id() {
        let radio = RadioParameters {
            rsrp: -95,
            rsrq: -10,
            rssi: -75,
            snr: 12,
            rxqual: 0,
            logical_cell_id: 0x01AB2F40,
            physical_cell_id: 123,
            earfcn: 6400,
        };
        let info = crate::context::ModemInfo {
            operator_name: "Testnet".to_string(),
            operator_mcc: 1,
            operator_mnc: 1,
            ..Default::default()
        };
        let payload = format_payload(&radio, &info);
        assert!(payload.contains("\"RSRP\":-95"));
        assert!(payload.contains("\"LogicalCellID\":\"0x01ab2f40\""));
        assert!(payload.contains("\"PLMN\":00101"));
        assert!(payload.contains("\"Operator\":\"Testnet\""));
    }
}
