//! Startup sequencing, housekeeping loop, interrupt handling and orderly
//! shutdown — grounded on `original_source/common/appInit.c`
//! (`startupFramework`, `runApplicationLoop`, `dwellAppLoop`, `finalize`,
//! `pauseMainLoop`, `setAppDwellTime`/`setAppLogLevel`) and
//! `original_source/cellular_tracker/src/main.c` (the `AppControl` callback
//! table and `networkUpBackUpHandler`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::cli::Args;
use crate::config::ConfigStore;
use crate::context::{AppContext, AppState};
use crate::logging::ReloadHandle;
use crate::modem::{DeviceConfig, ModemDriver};
use crate::mqtt::config::MqttConfig;
use crate::mqtt::message::{suffix, CommandHandler};
use crate::mqtt::{topic, Destination, MqttHandle};
use crate::ntp::NtpClient;
use crate::registration::RegistrationManager;
use crate::sampler;
use crate::task::{TaskCommand, TaskId, TaskSpine};

/// Housekeeping dwell clamp (spec.md §4.6: "default 5 s, minimum 5 s, max
/// 60 s").
const HOUSEKEEPING_MIN_MS: i64 = 5_000;
const HOUSEKEEPING_MAX_MS: i64 = 60_000;
const HOUSEKEEPING_DEFAULT_MS: i64 = 5_000;

/// `stopAndWait` iteration counts (2 s each) used at shutdown for the
/// non-explicit-stop tasks; registration gets its own 30 s budget
/// (spec.md §4.6).
const SAMPLER_STOP_ITERATIONS: u32 = 10;

pub async fn run(
    args: Args,
    config: ConfigStore,
    log_handle: ReloadHandle,
    modem: Arc<dyn ModemDriver>,
    ntp: Arc<dyn NtpClient>,
) -> i32 {
    let topic_header = config
        .get_owned("APP_TOPIC_HEADER")
        .or_else(|| hostname())
        .unwrap_or_else(|| "cell-telemetry-agent".to_string());

    let ctx = AppContext::new(topic_header.clone());
    ctx.set_app_state(AppState::InitDevice);

    let initial_dwell_ms = config
        .get_i64("APP_DWELL_TIME", HOUSEKEEPING_DEFAULT_MS)
        .unwrap_or(HOUSEKEEPING_DEFAULT_MS)
        .clamp(HOUSEKEEPING_MIN_MS, HOUSEKEEPING_MAX_MS);
    let housekeeping_dwell = Arc::new(tokio::sync::Mutex::new(Duration::from_millis(
        initial_dwell_ms as u64,
    )));

    if let Ok(level) = config.get_i64("LOG_LEVEL", 2) {
        crate::logging::set_level(&log_handle, level);
    }

    if config.get_bool("UBXLIB_LOGGING", false) {
        crate::logging::set_level(&log_handle, 0);
        info!("UBXLIB_LOGGING enabled, forcing trace-level logging");
    }

    if config.contains("TEST_STARTUP") {
        info!("TEST_STARTUP present, exiting after configuration load");
        return crate::cli::EXIT_TEST_STARTUP;
    }

    let device_config = DeviceConfig {
        serial_device: args.serial_device.clone(),
        cell_module: args.cell_module,
        gnss_module: args.gnss_module,
        apn: config.get_owned("APN"),
        mno_profile: config.get_owned("MNOPROFILE"),
        urat: config.get_owned("URAT"),
    };

    if let Err(e) = modem.open(&device_config).await {
        warn!(error = %e, "failed to open modem");
        return crate::cli::EXIT_STARTUP_FAILURE;
    }

    let identity = match modem.identity().await {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "failed to query modem identity");
            return crate::cli::EXIT_STARTUP_FAILURE;
        }
    };

    {
        let mut info = ctx.modem_info.write().await;
        info.manufacturer = identity.manufacturer.clone();
        info.model = identity.model.clone();
        info.firmware = identity.firmware.clone();
        info.imei = identity.imei.clone();
        info.imsi = identity.imsi.clone();
        info.iccid = identity.iccid.clone();
    }
    let imei = identity.imei.clone();

    let mqtt_config = match MqttConfig::from_store(&config) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "invalid mqtt configuration");
            return crate::cli::EXIT_STARTUP_FAILURE;
        }
    };

    let spine = Arc::new(TaskSpine::new(Duration::from_secs(5)));
    spine.init_all();

    install_interrupt_handler(ctx.clone());

    // Registration: run to completion of the initial bring-up, then poll
    // readiness ("networkIsUp") every 1s (runTask semantics, spec.md §4.1).
    let registration_manager = Arc::new(RegistrationManager::new(
        spine.descriptor(TaskId::Registration).clone(),
        ctx.clone(),
        modem.clone(),
        ntp,
        device_config.apn.clone(),
    ));
    {
        let manager = registration_manager.clone();
        spine.spawn(async move { manager.run().await });
    }
    while !ctx.network_up.load(Ordering::Acquire) && !ctx.is_exiting() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    // MQTT: spawn the connection-loop task, then poll readiness
    // ("mqttIsConnected").
    let (mqtt, mqtt_join) = MqttHandle::spawn(
        modem.clone(),
        ctx.clone(),
        spine.descriptor(TaskId::Mqtt).clone(),
        mqtt_config,
    );
    spine.spawn(async move {
        let _ = mqtt_join.await;
    });
    while !ctx.mqtt_connected.load(Ordering::Acquire) && !ctx.is_exiting() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    subscribe_app_control(
        &mqtt,
        &topic_header,
        &imei,
        ctx.clone(),
        log_handle,
        housekeeping_dwell.clone(),
    )
    .await;

    subscribe_sampler_controls(&spine, &mqtt, &topic_header, &imei).await;

    spawn_sampler_tasks(&spine, &ctx, &modem, &mqtt, &topic_header, &imei);

    let info_pending = AtomicBool::new(true);
    housekeeping_loop(
        &ctx,
        &spine,
        &mqtt,
        &housekeeping_dwell,
        &info_pending,
        &topic_header,
        &imei,
    )
    .await;

    shutdown(&ctx, &spine, &modem).await;

    ctx.exit_code()
}

async fn subscribe_app_control(
    mqtt: &Arc<MqttHandle>,
    topic_header: &str,
    imei: &str,
    ctx: Arc<AppContext>,
    log_handle: ReloadHandle,
    housekeeping_dwell: Arc<tokio::sync::Mutex<Duration>>,
) {
    let app_control_topic = topic(topic_header, imei, suffix::APP_CONTROL);

    let mut handlers: std::collections::HashMap<String, CommandHandler> = std::collections::HashMap::new();

    {
        let dwell = housekeeping_dwell.clone();
        handlers.insert(
            "SET_DWELL_TIME".to_string(),
            Arc::new(move |params: &[String]| {
                let ms = crate::mqtt::dispatch::get_param_value(
                    params,
                    0,
                    HOUSEKEEPING_MIN_MS,
                    HOUSEKEEPING_MAX_MS,
                    HOUSEKEEPING_DEFAULT_MS,
                );
                let dwell = dwell.clone();
                tokio::spawn(async move {
                    *dwell.lock().await = Duration::from_millis(ms as u64);
                });
                info!(ms, "housekeeping dwell time updated");
            }),
        );
    }

    {
        let log_handle = log_handle.clone();
        handlers.insert(
            "SET_LOG_LEVEL".to_string(),
            Arc::new(move |params: &[String]| {
                let level = crate::mqtt::dispatch::get_param_value(params, 0, 0, 5, 2);
                crate::logging::set_level(&log_handle, level);
            }),
        );
    }

    {
        let ctx = ctx.clone();
        handlers.insert(
            "EXIT_APP".to_string(),
            Arc::new(move |params: &[String]| {
                let code = crate::mqtt::dispatch::get_param_value(params, 0, i32::MIN as i64, i32::MAX as i64, 0);
                ctx.request_exit_with_code(code as i32);
            }),
        );
    }

    mqtt.subscribe_async(app_control_topic, crate::modem::MqttQos::AtLeastOnce, handlers)
        .await;
}

/// Per-sampler control topics (spec.md §2, §4.7, §6): `…/SignalQualityControl`,
/// `…/LocationControl`, `…/CellScanControl`, `…/ExampleControl`. Each handler
/// enqueues the corresponding `TaskCommand` onto that task's inbox via
/// `spine.send_task_message` — the dispatcher itself never touches sampler
/// state directly, matching the "broker -> inbound dispatch -> per-topic
/// command table -> target task's queue -> worker" path.
async fn subscribe_sampler_controls(
    spine: &Arc<TaskSpine>,
    mqtt: &Arc<MqttHandle>,
    topic_header: &str,
    imei: &str,
) {
    let targets: [(TaskId, &str, Option<(&str, TaskCommand)>); 4] = [
        (
            TaskId::SignalQuality,
            suffix::SIGNAL_QUALITY_CONTROL,
            Some(("MEASURE_NOW", TaskCommand::MeasureNow)),
        ),
        (
            TaskId::Location,
            suffix::LOCATION_CONTROL,
            Some(("LOCATION_NOW", TaskCommand::LocationNow)),
        ),
        (
            TaskId::CellScan,
            suffix::CELL_SCAN_CONTROL,
            Some(("START_CELL_SCAN", TaskCommand::StartCellScan)),
        ),
        (TaskId::Example, suffix::EXAMPLE_CONTROL, None),
    ];

    for (id, suffix_name, primary) in targets {
        let handlers = sampler_control_handlers(spine, id, primary);
        let topic_name = topic(topic_header, imei, suffix_name);
        mqtt.subscribe_async(topic_name, crate::modem::MqttQos::AtLeastOnce, handlers)
            .await;
    }
}

/// `START_TASK <dwellSecs>` / `STOP_TASK` are common to every sampler
/// control topic; `primary` adds the task's own one-shot/triggering command
/// (`MEASURE_NOW`, `LOCATION_NOW`, `START_CELL_SCAN`) where it has one.
fn sampler_control_handlers(
    spine: &Arc<TaskSpine>,
    id: TaskId,
    primary: Option<(&str, TaskCommand)>,
) -> std::collections::HashMap<String, CommandHandler> {
    let mut handlers: std::collections::HashMap<String, CommandHandler> = std::collections::HashMap::new();

    if let Some((name, cmd)) = primary {
        let spine = spine.clone();
        handlers.insert(
            name.to_string(),
            Arc::new(move |_params: &[String]| {
                if let Err(e) = spine.send_task_message(id, cmd) {
                    warn!(task = id.name(), error = %e, "failed to enqueue sampler command");
                }
            }),
        );
    }

    {
        let spine = spine.clone();
        handlers.insert(
            "START_TASK".to_string(),
            Arc::new(move |params: &[String]| {
                let dwell_secs = params.first().and_then(|s| s.parse::<u64>().ok());
                if let Err(e) = spine.send_task_message(id, TaskCommand::StartTask { dwell_secs }) {
                    warn!(task = id.name(), error = %e, "failed to enqueue sampler command");
                }
            }),
        );
    }

    {
        let spine = spine.clone();
        handlers.insert(
            "STOP_TASK".to_string(),
            Arc::new(move |_params: &[String]| {
                if let Err(e) = spine.send_task_message(id, TaskCommand::StopTask) {
                    warn!(task = id.name(), error = %e, "failed to enqueue sampler command");
                }
            }),
        );
    }

    handlers
}

fn spawn_sampler_tasks(
    spine: &Arc<TaskSpine>,
    ctx: &Arc<AppContext>,
    modem: &Arc<dyn ModemDriver>,
    mqtt: &Arc<MqttHandle>,
    topic_header: &str,
    imei: &str,
) {
    macro_rules! spawn_sampler {
        ($id:expr, $module:ident) => {{
            let descriptor = spine.descriptor($id).clone();
            let ctx = ctx.clone();
            let modem = modem.clone();
            let mqtt = mqtt.clone();
            let rx = spine.take_receiver($id).expect("sampler receiver taken once");
            let topic_header = topic_header.to_string();
            let imei = imei.to_string();
            spine.spawn(async move {
                sampler::$module::run(descriptor, ctx, modem, mqtt, rx, topic_header, imei).await;
            });
        }};
    }

    spawn_sampler!(TaskId::SignalQuality, signal_quality);
    spawn_sampler!(TaskId::Location, location);
    spawn_sampler!(TaskId::CellScan, cell_scan);
    spawn_sampler!(TaskId::Example, example);
}

async fn housekeeping_loop(
    ctx: &Arc<AppContext>,
    spine: &Arc<TaskSpine>,
    mqtt: &Arc<MqttHandle>,
    dwell: &Arc<tokio::sync::Mutex<Duration>>,
    info_pending: &AtomicBool,
    topic_header: &str,
    imei: &str,
) {
    loop {
        if ctx.is_exiting() {
            break;
        }

        let _ = spine.send_task_message(TaskId::SignalQuality, TaskCommand::MeasureNow);

        if ctx.network_up.load(Ordering::Acquire) && info_pending.load(Ordering::Acquire) {
            if publish_information(ctx, mqtt, topic_header, imei).await.is_ok() {
                info_pending.store(false, Ordering::Release);
            }
        }

        let _ = spine.send_task_message(TaskId::Location, TaskCommand::LocationNow);

        let target = *dwell.lock().await;
        tick_sleep(target, ctx).await;
    }
}

async fn tick_sleep(target: Duration, ctx: &Arc<AppContext>) {
    const TICK: Duration = Duration::from_millis(100);
    let mut elapsed = Duration::ZERO;
    while elapsed < target {
        if ctx.is_exiting() {
            return;
        }
        let step = std::cmp::min(TICK, target - elapsed);
        tokio::time::sleep(step).await;
        elapsed += step;
    }
}

async fn publish_information(
    ctx: &Arc<AppContext>,
    mqtt: &Arc<MqttHandle>,
    topic_header: &str,
    imei: &str,
) -> Result<(), crate::error::MqttError> {
    let info = ctx.modem_info.read().await;
    let payload = format!(
        "{{\"Timestamp\":\"{ts}\",\"Module\":{{\"Manufacturer\":\"{man}\",\"Model\":\"{model}\",\"Version\":\"{fw}\"}},\"SIM\":{{\"IMSI\":\"{imsi}\",\"CCID\":\"{iccid}\"}},\"Application\":{{\"NetworkUpCounter\":{counter}}}}}",
        ts = sampler::timestamp_now(),
        man = info.manufacturer,
        model = info.model,
        fw = info.firmware,
        imsi = info.imsi,
        iccid = info.iccid,
        counter = ctx.network_up_counter.load(Ordering::Acquire),
    );
    drop(info);

    mqtt.publish(
        Destination::Topic(topic(topic_header, imei, suffix::INFORMATION)),
        payload,
        crate::modem::MqttQos::AtLeastOnce,
        true,
    )
    .await
}

fn install_interrupt_handler(ctx: Arc<AppContext>) {
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupt received, shutting down");
        ctx.request_exit();

        // Second press force-terminates (spec.md §4.6: "first press sets
        // the exit flag and restores the default handler so a second press
        // force-terminates").
        let _ = tokio::signal::ctrl_c().await;
        warn!("second interrupt received, forcing termination");
        std::process::exit(130);
    });
}

async fn shutdown(ctx: &Arc<AppContext>, spine: &Arc<TaskSpine>, modem: &Arc<dyn ModemDriver>) {
    ctx.set_app_state(AppState::Shutdown);

    for id in [TaskId::Mqtt, TaskId::SignalQuality, TaskId::Location, TaskId::CellScan, TaskId::Example] {
        if let Err(e) = spine.stop_and_wait(id, SAMPLER_STOP_ITERATIONS).await {
            warn!(task = id.name(), error = %e, "task did not stop in time");
        }
    }

    if let Err(e) = spine
        .stop_and_wait(TaskId::Registration, RegistrationManager::SHUTDOWN_STOP_ITERATIONS)
        .await
    {
        warn!(error = %e, "registration task did not stop in time");
    }

    spine.shutdown_tracker().await;

    let _ = modem.close().await;
    info!(exit_code = ctx.exit_code(), "shutdown complete");
}

fn hostname() -> Option<String> {
    std::env::var("HOSTNAME").ok().or_else(|| {
        std::fs::read_to_string("/etc/hostname")
            .ok()
            .map(|s| s.trim().to_string())
    })
}
