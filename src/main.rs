#![crate_name = "cell_telemetry_agent"]

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod modem;
pub mod mqtt;
pub mod ntp;
pub mod registration;
pub mod sampler;
pub mod supervisor;
pub mod task;

use std::sync::Arc;

use color_eyre::eyre::Result;

use modem::simulated::SimulatedModem;
use ntp::SystemNtpClient;

fn main() -> Result<()> {
    setup()?;

    let argv: Vec<String> = std::env::args().skip(1).collect();

    let args = match cli::parse(&argv) {
        cli::ParseOutcome::Help => {
            print!("{}", cli::display_help());
            return Ok(());
        }
        cli::ParseOutcome::Error(reason) => {
            eprintln!("{reason}\n\n{}", cli::display_help());
            std::process::exit(cli::EXIT_BAD_PARAMETERS);
        }
        cli::ParseOutcome::Run(args) => args,
    };

    let config = match config::ConfigStore::load(&args.config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(cli::EXIT_STARTUP_FAILURE);
        }
    };

    let log_handle = logging::init(logging::level_from_config(
        config.get_i64("LOG_LEVEL", 2).unwrap_or(2),
    ));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let modem: Arc<dyn modem::ModemDriver> = SimulatedModem::new();
    let ntp_client: Arc<dyn ntp::NtpClient> = Arc::new(SystemNtpClient);

    let exit_code = runtime.block_on(supervisor::run(args, config, log_handle, modem, ntp_client));

    std::process::exit(exit_code);
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}
