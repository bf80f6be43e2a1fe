//! Extension slot: a sampler with no cellular measurement of its own,
//! demonstrating how a new sampler plugs into the spine (own
//! `TaskDescriptor`, own dwell, own command inbox, own `ExampleControl`
//! subscription) without touching any other module. Spec.md §2 lists this
//! slot explicitly ("signal-quality, location, cell-scan, plus an example
//! slot") but assigns it no payload of its own — it publishes a heartbeat.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::context::AppContext;
use crate::modem::{ModemDriver, MqttQos};
use crate::mqtt::{topic, Destination, MqttHandle};
use crate::task::{TaskCommand, TaskDescriptor};

use super::timestamp_now;

pub async fn run(
    descriptor: Arc<TaskDescriptor>,
    ctx: Arc<AppContext>,
    _modem: Arc<dyn ModemDriver>,
    mqtt: Arc<MqttHandle>,
    mut commands: mpsc::Receiver<TaskCommand>,
    topic_header: String,
    imei: String,
) {
    let _guard = crate::task::RunningGuard::enter(&descriptor);
    let topic_name = topic(&topic_header, &imei, "Example");

    loop {
        if ctx.is_exiting() || descriptor.stop_requested.load(Ordering::Acquire) {
            break;
        }

        while let Ok(cmd) = commands.try_recv() {
            if let TaskCommand::StartTask { dwell_secs: Some(secs) } = cmd {
                descriptor.set_dwell(std::time::Duration::from_secs(secs)).await;
            }
        }

        if let Ok(_held) = descriptor.lock.try_lock() {
            let payload = format!("{{\"Timestamp\":\"{}\",\"Heartbeat\":true}}", timestamp_now());
            if let Err(e) = mqtt
                .publish(Destination::Topic(topic_name.clone()), payload, MqttQos::AtMostOnce, false)
                .await
            {
                debug!(error = %e, "example sampler publish skipped");
            }
        }

        descriptor.dwell_sleep(&ctx).await;
    }
}
