//! rupdi - UPDI programmer and debugger
//!
//! Programs and debugs tinyAVR-0/1 parts over their single-wire UPDI
//! interface.
//!
//! # Architecture
//!
//! Every programmer implements the `rupdi_core::Target` capability trait:
//! - **EDBG probes** (nEDBG, EDBG, Atmel-ICE, PICkit 4) - the probe firmware
//!   speaks UPDI; we send AVR8 protocol commands over USB HID. Programming
//!   and live debugging.
//! - **Serial adapters** - a USB-serial bridge wired to the UPDI pin; the
//!   host speaks the UPDI instruction set itself. Programming only.
//! - **Dummy** - an in-memory part for dry runs.
//!
//! The commands below only see `&mut dyn Target`.

mod cli;
mod commands;
mod programmers;

use clap::Parser;
use cli::{Cli, Commands, TargetArgs};
use commands::memory::Segment;
use commands::progress::IndicatifProgress;
use programmers::SessionKind;
use rupdi_core::chip::{ChipDatabase, ChipDescriptor};
use rupdi_core::{CancelToken, Target};
use signal_hook::consts::signal::SIGINT;
use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let db = match load_chip_database(cli.chip_db.as_deref()) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to load chip database: {}", e);
            std::process::exit(1);
        }
    };

    log::debug!("Loaded {} chip definitions", db.len());

    let result = match cli.command {
        Commands::ListProgrammers => {
            commands::list_programmers();
            Ok(())
        }
        Commands::ListChips { filter } => {
            commands::list_chips(&db, filter.as_deref());
            Ok(())
        }
        Commands::Info { target } => with_target(&db, &target, SessionKind::Program, |t, chip| {
            commands::info::run_info(t, chip, &db)
        }),
        Commands::ReadFlash {
            target,
            output,
            address,
            length,
        } => with_target(&db, &target, SessionKind::Program, |t, chip| {
            commands::memory::run_read(t, chip, Segment::Flash, &output, address, length)
        }),
        Commands::WriteFlash {
            target,
            input,
            address,
            verify,
        } => with_target(&db, &target, SessionKind::Program, |t, chip| {
            commands::memory::run_write(t, chip, Segment::Flash, &input, address, verify)
        }),
        Commands::Erase {
            target,
            mode,
            address,
        } => with_target(&db, &target, SessionKind::Program, |t, _| {
            commands::erase::run_erase(t, mode.into(), address)
        }),
        Commands::ReadFuses { target } => {
            with_target(&db, &target, SessionKind::Program, |t, _| {
                commands::fuses::run_read_fuses(t)
            })
        }
        Commands::WriteFuses { target, fuses } => {
            with_target(&db, &target, SessionKind::Program, |t, _| {
                commands::fuses::run_write_fuses(t, &fuses)
            })
        }
        Commands::ReadEeprom { target, output } => {
            with_target(&db, &target, SessionKind::Program, |t, chip| {
                commands::memory::run_read(t, chip, Segment::Eeprom, &output, 0, None)
            })
        }
        Commands::WriteEeprom {
            target,
            input,
            address,
            verify,
        } => with_target(&db, &target, SessionKind::Program, |t, chip| {
            commands::memory::run_write(t, chip, Segment::Eeprom, &input, address, verify)
        }),
        Commands::ReadUserrow { target, output } => {
            with_target(&db, &target, SessionKind::Program, |t, chip| {
                commands::memory::run_read(t, chip, Segment::UserRow, &output, 0, None)
            })
        }
        Commands::WriteUserrow {
            target,
            input,
            verify,
        } => with_target(&db, &target, SessionKind::Program, |t, chip| {
            commands::memory::run_write(t, chip, Segment::UserRow, &input, 0, verify)
        }),
        Commands::Debug { target, action } => {
            with_target(&db, &target, SessionKind::Debug, |t, _| {
                commands::debug::run_debug(t, &action)
            })
        }
        Commands::DecodeUpdi { input } => commands::decode::run_decode_updi(&input),
        Commands::DecodeCmd { bytes } => commands::decode::run_decode_cmd(&bytes),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Open the selected programmer and run `f` in a session on it
///
/// Ctrl-C cancels the session's polling loops so the target is still
/// closed cleanly; a second Ctrl-C terminates the process.
fn with_target<F>(
    db: &ChipDatabase,
    args: &TargetArgs,
    kind: SessionKind,
    f: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnOnce(&mut dyn Target, &ChipDescriptor) -> Result<(), Box<dyn std::error::Error>>,
{
    let chip = db.find(&args.chip).ok_or_else(|| {
        format!(
            "Unknown chip: {}\nUse 'rupdi list-chips' to see known parts",
            args.chip
        )
    })?;

    let mut target = programmers::open_target(&args.programmer, chip, kind)?;
    target.set_progress(Box::new(IndicatifProgress::new()));

    let cancel = CancelToken::new();
    let default_id = signal_hook::flag::register_conditional_default(SIGINT, cancel.flag())?;
    let sig_id = signal_hook::flag::register(SIGINT, cancel.flag())?;

    let result = run_session(target.as_mut(), chip, cancel, f);

    signal_hook::low_level::unregister(sig_id);
    signal_hook::low_level::unregister(default_id);
    result
}

/// Run `f` on an open target, then close it
///
/// The close runs even when `f` fails or is cancelled; a close failure is
/// only reported when `f` succeeded.
fn run_session<F>(
    target: &mut dyn Target,
    chip: &ChipDescriptor,
    cancel: CancelToken,
    f: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnOnce(&mut dyn Target, &ChipDescriptor) -> Result<(), Box<dyn std::error::Error>>,
{
    target.set_cancel_token(cancel);

    let result = f(target, chip);
    match target.close() {
        Err(e) if result.is_ok() => Err(e.into()),
        Err(e) => {
            log::warn!("Failed to close target: {}", e);
            result
        }
        Ok(()) => result,
    }
}

/// Load the built-in chip table plus an optional file or directory of RON definitions
fn load_chip_database(path: Option<&Path>) -> Result<ChipDatabase, Box<dyn std::error::Error>> {
    let mut db = ChipDatabase::builtin()?;

    if let Some(path) = path {
        let count = if path.is_dir() {
            db.load_dir(path)?
        } else {
            db.load_file(path)?
        };
        log::info!("Loaded {} chip definitions from {:?}", count, path);
    }

    Ok(db)
}
