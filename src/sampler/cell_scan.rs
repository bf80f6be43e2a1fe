//! Cell-scan operator.
//!
//! Grounded on `original_source/tasks/cellScanTask.c`: a one-shot operator
//! scan triggered by command, publishing one JSON message per discovered
//! operator, pausing the supervisor's housekeeping loop for the scan's
//! duration (`pauseMainLoop`) and setting app state to `CopsQuery`. A second
//! `START_CELL_SCAN` while a scan is running cancels it instead of starting
//! a new one (`queueNetworkScan`'s toggle logic).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::context::{AppContext, AppState};
use crate::modem::{KeepGoing, ModemDriver, MqttQos};
use crate::mqtt::{topic, Destination, MqttHandle};
use crate::task::{TaskCommand, TaskDescriptor};

use super::timestamp_now;

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
    let topic_name = topic(&topic_header, &imei, crate::mqtt::message::suffix::CELL_SCAN);

    let scanning = Arc::new(AtomicBool::new(false));
    let cancel = Arc::new(AtomicBool::new(false));

    // Unlike the cadence-driven samplers, cell scan is purely command-driven
    // and has no dwell of its own to re-check `is_exiting`/`stop_requested`
    // between. `select!` races the inbox against a short tick so the loop
    // still wakes on its own when no command ever arrives — without this
    // the descriptor's sender, owned by the live `TaskSpine`, would never
    // close and the worker would block on `recv()` forever past shutdown.
    const IDLE_TICK: Duration = Duration::from_millis(200);

    loop {
        if ctx.is_exiting() || descriptor.stop_requested.load(Ordering::Acquire) {
            break;
        }

        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(TaskCommand::StartCellScan) => {
                        if scanning.load(Ordering::Acquire) {
                            info!("cell scan already running, requesting cancellation");
                            cancel.store(true, Ordering::Release);
                            continue;
                        }

                        scanning.store(true, Ordering::Release);
                        cancel.store(false, Ordering::Release);

                        let descriptor = descriptor.clone();
                        let ctx = ctx.clone();
                        let modem = modem.clone();
                        let mqtt = mqtt.clone();
                        let topic_name = topic_name.clone();
                        let scanning = scanning.clone();
                        let cancel = cancel.clone();

                        tokio::spawn(async move {
                            run_one_scan(descriptor, ctx, modem, mqtt, topic_name, scanning, cancel).await;
                        });
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            _ = sleep(IDLE_TICK) => {}
        }
    }
}

async fn run_one_scan(
    descriptor: Arc<TaskDescriptor>,
    ctx: Arc<AppContext>,
    modem: Arc<dyn ModemDriver>,
    mqtt: Arc<MqttHandle>,
    topic_name: String,
    scanning: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
) {
    let Ok(_held) = descriptor.lock.try_lock() else {
        warn!("cell scan: descriptor busy, dropping request");
        scanning.store(false, Ordering::Release);
        return;
    };

    ctx.pause_housekeeping(true);
    ctx.set_app_state(AppState::CopsQuery);

    let ctx_for_keepgoing = ctx.clone();
    let descriptor_for_keepgoing = descriptor.clone();
    let cancel_for_keepgoing = cancel.clone();
    let keep_going: KeepGoing = Arc::new(move || {
        !ctx_for_keepgoing.is_exiting()
            && !descriptor_for_keepgoing.stop_requested.load(Ordering::Acquire)
            && !cancel_for_keepgoing.load(Ordering::Acquire)
    });

    let (tx, mut rx) = mpsc::channel(8);
    let modem_for_scan = modem.clone();
    let scan_handle = tokio::spawn(async move { modem_for_scan.scan_operators(tx, keep_going).await });

    while let Some(result) = rx.recv().await {
        let payload = format!(
            "{{\"Timestamp\":\"{ts}\",\"CellScan\":{{\"Name\":\"{name}\",\"ubxlibRAT\":\"{rat}\",\"MCCMNC\":\"{mccmnc}\"}}}}",
            ts = timestamp_now(),
            name = result.operator_name,
            rat = result.rat,
            mccmnc = result.mcc_mnc,
        );
        if let Err(e) = mqtt
            .publish(
                Destination::Topic(topic_name.clone()),
                payload,
                MqttQos::AtLeastOnce,
                false,
            )
            .await
        {
            warn!(error = %e, "cell scan publish skipped");
        }
    }

    match scan_handle.await {
        Ok(Ok(count)) => info!(count, "cell scan complete"),
        Ok(Err(crate::error::ModemError::Cancelled)) => info!("Cancelled"),
        Ok(Err(e)) => warn!(error = %e, "cell scan ended with error"),
        Err(e) => warn!(error = %e, "cell scan task panicked"),
    }

    ctx.set_app_state(AppState::Registered);
    ctx.pause_housekeeping(false);
    scanning.store(false, Ordering::Release);
}
