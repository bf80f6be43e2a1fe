//! Command-line argument parsing.
//!
//! A hand-rolled argv walk mirroring
//! `original_source/cellular_tracker/src/main.c`'s `parseCommandLine`,
//! deliberately not a `clap`-derived parser: the teacher itself has no CLI
//! surface (it's a GUI application), and spec.md §1 scopes CLI parsing out
//! as an external collaborator — matching the original's manual style here
//! keeps that boundary honest about being "given", not engineered.

use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_FILENAME;
use crate::modem::{CellModuleType, GnssModuleType};

#[derive(Debug, Clone)]
pub struct Args {
    pub serial_device: String,
    pub cell_module: CellModuleType,
    pub gnss_module: GnssModuleType,
    pub config_path: PathBuf,
}

/// Process exit codes spec.md §6 assigns to CLI-level failures.
pub const EXIT_BAD_PARAMETERS: i32 = -1;
pub const EXIT_STARTUP_FAILURE: i32 = -2;
pub const EXIT_TEST_STARTUP: i32 = -3;

#[derive(Debug)]
pub enum ParseOutcome {
    Run(Args),
    Help,
    Error(String),
}

pub fn parse(argv: &[String]) -> ParseOutcome {
    if argv.iter().any(|a| a == "-h" || a == "--help") {
        return ParseOutcome::Help;
    }

    if argv.len() < 3 {
        return ParseOutcome::Error(format!(
            "expected at least 3 arguments, got {}",
            argv.len()
        ));
    }

    let serial_device = argv[0].clone();
    if !is_valid_serial_device(&serial_device) {
        return ParseOutcome::Error(format!("invalid serial device token '{serial_device}'"));
    }

    let cell_module = match CellModuleType::parse_prefix(&argv[1]) {
        Some(m) => m,
        None => return ParseOutcome::Error(format!("unknown cell module type '{}'", argv[1])),
    };

    let gnss_module = match GnssModuleType::parse_prefix(&argv[2]) {
        Some(m) => m,
        None => return ParseOutcome::Error(format!("unknown gnss module type '{}'", argv[2])),
    };

    let config_path = argv
        .get(3)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));

    ParseOutcome::Run(Args {
        serial_device,
        cell_module,
        gnss_module,
        config_path,
    })
}

/// POSIX build requires a `/dev/…` prefix (spec.md §6). This crate targets
/// POSIX hosts; the Windows `COM<n>` validation branch the original carries
/// is not built here.
fn is_valid_serial_device(token: &str) -> bool {
    token.starts_with("/dev/")
}

pub fn display_help() -> &'static str {
    "usage: cell-telemetry-agent <serial-device> <cellModuleType> <gnssModuleType> [configPath]\n\n\
     cellModuleType: SARA-U201 | SARA-R5 | SARA-R422 | SARA-R412M-03B | SARA-R412M-02B | \
     SARA-R410M-03B | SARA-R410M-02B | LARA-R6 | LENA-R8\n\
     gnssModuleType: M8 | M9 | M10\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn parses_minimal_valid_invocation() {
        let outcome = parse(&argv("/dev/ttyUSB0 SARA-R5 M8"));
        match outcome {
            ParseOutcome::Run(args) => {
                assert_eq!(args.cell_module, CellModuleType::SaraR5);
                assert_eq!(args.gnss_module, GnssModuleType::M8);
                assert_eq!(args.config_path, PathBuf::from(DEFAULT_CONFIG_FILENAME));
            }
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn sara_r510_matches_sara_r5_prefix() {
        let outcome = parse(&argv("/dev/ttyUSB0 SARA-R510 M10"));
        assert!(matches!(
            outcome,
            ParseOutcome::Run(Args { cell_module: CellModuleType::SaraR5, .. })
        ));
    }

    #[test]
    fn help_flag_short_circuits() {
        assert!(matches!(parse(&argv("-h")), ParseOutcome::Help));
    }

    #[test]
    fn rejects_bad_serial_device_token() {
        let outcome = parse(&argv("COM3 SARA-R5 M8"));
        assert!(matches!(outcome, ParseOutcome::Error(_)));
    }

    #[test]
    fn too_few_arguments_is_an_error() {
        assert!(matches!(parse(&argv("/dev/ttyUSB0")), ParseOutcome::Error(_)));
    }
}
