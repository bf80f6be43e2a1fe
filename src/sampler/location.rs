//! Location sampler.
//!
//! Grounded on `original_source/tasks/locationTask.c`: brings up a GNSS
//! network interface once at task init, then on each iteration requests a
//! fix through a cancellable "keep going" predicate. Latitude/longitude
//! arrive from the modem already scaled by 1e7 (`fractionConvert` in the
//! original); formatting back to signed decimal degrees is done here instead
//! of manually splitting integer/fraction parts, since this is the natural
//! idiomatic equivalent once the value is a plain `i32`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::context::AppContext;
use crate::error::ModemError;
use crate::modem::{GnssFix, KeepGoing, ModemDriver, MqttQos};
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
    let topic_name = topic(&topic_header, &imei, crate::mqtt::message::suffix::LOCATION);
    let stop_acquisition = Arc::new(AtomicBool::new(false));

    loop {
        if ctx.is_exiting() || descriptor.stop_requested.load(Ordering::Acquire) {
            break;
        }

        while let Ok(cmd) = commands.try_recv() {
            match cmd {
                TaskCommand::LocationNow => {
                    measure_and_publish(&descriptor, &ctx, &modem, &mqtt, &topic_name, &stop_acquisition).await
                }
                TaskCommand::StartTask { dwell_secs } => {
                    if let Some(secs) = dwell_secs {
                        descriptor
                            .set_dwell(std::time::Duration::from_secs(secs))
                            .await;
                    }
                }
                TaskCommand::StopTask => {
                    stop_acquisition.store(true, Ordering::Release);
                }
                _ => {}
            }
        }

        measure_and_publish(&descriptor, &ctx, &modem, &mqtt, &topic_name, &stop_acquisition).await;
        descriptor.dwell_sleep(&ctx).await;
    }
}

async fn measure_and_publish(
    descriptor: &Arc<TaskDescriptor>,
    ctx: &Arc<AppContext>,
    modem: &Arc<dyn ModemDriver>,
    mqtt: &Arc<MqttHandle>,
    topic_name: &str,
    stop_acquisition: &Arc<AtomicBool>,
) {
    let Ok(_held) = descriptor.lock.try_lock() else {
        debug!("location sampler busy, skipping iteration");
        return;
    };

    stop_acquisition.store(false, Ordering::Release);
    let exiting = ctx.clone();
    let descriptor_clone = descriptor.clone();
    let stop_flag = stop_acquisition.clone();
    let keep_going: KeepGoing = Arc::new(move || {
        !exiting.is_exiting()
            && !descriptor_clone.stop_requested.load(Ordering::Acquire)
            && !stop_flag.load(Ordering::Acquire)
    });

    match modem.gnss_fix(keep_going).await {
        Ok(fix) => {
            let payload = format_payload(&fix);
            if let Err(e) = mqtt
                .publish(
                    Destination::Topic(topic_name.to_string()),
                    payload,
                    MqttQos::AtLeastOnce,
                    false,
                )
                .await
            {
                debug!(error = %e, "location publish skipped");
            }
        }
        Err(ModemError::Timeout) => debug!("location: gnss fix timed out, not fatal"),
        Err(ModemError::Cancelled) => debug!("location: acquisition cancelled"),
        Err(e) => warn!(error = %e, "location: unexpected modem error"),
    }
}

fn format_payload(fix: &GnssFix) -> String {
    format!(
        "{{\"Timestamp\":\"{ts}\",\"Location\":{{\"Altitude\":{alt},\"Latitude\":{lat:.7},\"Longitude\":{lon:.7},\"Accuracy\":{acc},\"Speed\":{speed},\"utcTime\":\"{utc}\"}}}}",
        ts = timestamp_now(),
        alt = fix.altitude_mm,
        lat = fix.latitude_1e7 as f64 / 1e7,
        lon = fix.longitude_1e7 as f64 / 1e7,
        acc = fix.accuracy_mm,
        speed = fix.speed_mm_per_sec,
        utc = fix.time_utc,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_lat_long_as_signed_decimal_degrees() {
        let fix = GnssFix {
            altitude_mm: 12_000,
            latitude_1e7: 377749000,
            longitude_1e7: -1224194000,
            accuracy_mm: 3_500,
            speed_mm_per_sec: 0,
            time_utc: 1_780_000_000,
        };
        let payload = format_payload(&fix);
        assert!(payload.contains("\"Latitude\":37.7749000"));
        assert!(payload.contains("\"Longitude\":-122.4194000"));
    }
}
