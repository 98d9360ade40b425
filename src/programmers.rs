//! Programmer registration and dispatch
//!
//! This module provides a centralized registry for all programmers, with support
//! for feature-gated inclusion and dynamic help text generation.

use rupdi_core::chip::ChipDescriptor;
use rupdi_core::Target;

/// Information about a programmer
pub struct ProgrammerInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names/aliases
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
    /// Whether the programmer can drive the on-chip debugger
    pub debug: bool,
}

/// What the session is opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// NVM programming
    Program,
    /// Live debugging
    Debug,
}

/// Get information about all available programmers (enabled at compile time)
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_programmers() -> Vec<ProgrammerInfo> {
    let mut programmers = Vec::new();

    #[cfg(feature = "dummy")]
    programmers.push(ProgrammerInfo {
        name: "dummy",
        aliases: &[],
        description: "In-memory tinyAVR emulator for dry runs (vtarget=<mV>)",
        debug: true,
    });

    #[cfg(feature = "edbg")]
    programmers.push(ProgrammerInfo {
        name: "edbg",
        aliases: &["nedbg", "atmelice", "pickit4", "snap"],
        description: "EDBG-class USB HID probes (index=<n>,serial=<sn>,clock=<kHz>,vmin=<mV>)",
        debug: true,
    });

    #[cfg(feature = "serial")]
    programmers.push(ProgrammerInfo {
        name: "serial",
        aliases: &["serialupdi", "uart"],
        description: "USB-serial adapter wired to UPDI (dev=<port>,baud=<rate>)",
        debug: false,
    });

    programmers
}

/// Generate help text listing all available programmers
pub fn programmer_help() -> String {
    let programmers = available_programmers();

    if programmers.is_empty() {
        return "No programmers available (recompile with programmer features enabled)".to_string();
    }

    let mut help = String::from("Available programmers:\n");

    for p in &programmers {
        let status = if p.debug { "" } else { " [programming only]" };
        help.push_str(&format!("  {:8} - {}{}\n", p.name, p.description, status));
    }

    help
}

/// Generate a short list of programmer names for CLI help
pub fn programmer_names_short() -> String {
    let programmers = available_programmers();
    let names: Vec<&str> = programmers.iter().map(|p| p.name).collect();
    names.join(", ")
}

/// Resolve a programmer name or alias to its primary name
pub fn find_programmer(name: &str) -> Option<&'static str> {
    let name = name.to_lowercase();
    available_programmers()
        .into_iter()
        .find(|p| p.name == name || p.aliases.contains(&name.as_str()))
        .map(|p| p.name)
}

/// Parse a programmer string into name and options
///
/// Format: "name" or "name:option1=value1,option2=value2"
pub fn parse_programmer_string(s: &str) -> (&str, Vec<(&str, &str)>) {
    if let Some((name, opts)) = s.split_once(':') {
        let options: Vec<_> = opts
            .split(',')
            .filter_map(|opt| opt.split_once('='))
            .collect();
        (name, options)
    } else {
        (s, Vec::new())
    }
}

fn unknown_programmer_error(name: &str) -> Box<dyn std::error::Error> {
    let mut msg = format!("Unknown programmer: {}\n\n", name);
    msg.push_str(&programmer_help());
    msg.push_str("\nUse 'rupdi list-programmers' for more details");
    msg.into()
}

/// Open the programmer named in `programmer` and connect to `chip`
///
/// The programmer string can be just the name (e.g., "edbg") or include
/// parameters (e.g., "serial:dev=/dev/ttyUSB0,baud=115200").
#[allow(unused_variables)]
pub fn open_target(
    programmer: &str,
    chip: &ChipDescriptor,
    kind: SessionKind,
) -> Result<Box<dyn Target>, Box<dyn std::error::Error>> {
    let (name, options) = parse_programmer_string(programmer);

    let canonical_name = match find_programmer(name) {
        Some(n) => n,
        None => return Err(unknown_programmer_error(name)),
    };

    match canonical_name {
        #[cfg(feature = "dummy")]
        "dummy" => {
            let config = rupdi_dummy::parse_options(&options)
                .map_err(|e| format!("Invalid dummy parameters: {}", e))?;
            log::info!("Using dummy target ({})", chip.name);
            Ok(Box::new(rupdi_dummy::DummyTarget::new(chip.clone(), config)))
        }

        #[cfg(feature = "edbg")]
        "edbg" => {
            use rupdi_edbg::{EdbgMode, HidEngine};

            let mut config = rupdi_edbg::parse_options(&options)
                .map_err(|e| format!("Invalid edbg parameters: {}", e))?;
            config.mode = match kind {
                SessionKind::Program => EdbgMode::Program,
                SessionKind::Debug => EdbgMode::Debug,
            };

            log::info!("Opening EDBG probe...");
            let engine = HidEngine::open_usb(chip.clone(), config).map_err(|e| {
                format!(
                    "Failed to open EDBG probe: {}\n\
                     Make sure the probe is connected and you have permissions.",
                    e
                )
            })?;
            Ok(Box::new(engine))
        }

        #[cfg(feature = "serial")]
        "serial" => {
            use rupdi_serial::SerialEngine;

            if kind == SessionKind::Debug {
                return Err("The serial programmer cannot debug; use an EDBG probe".into());
            }
            let config = rupdi_serial::parse_options(&options)
                .map_err(|e| format!("Invalid serial parameters: {}", e))?;
            if config.device.is_none() {
                return Err("serial requires a port.\n\
                    Usage: serial:dev=/dev/ttyUSB0[,baud=115200]"
                    .into());
            }

            log::info!("Opening serial UPDI adapter...");
            let engine = SerialEngine::open_port(chip.clone(), config)
                .map_err(|e| format!("Failed to open serial port: {}", e))?;
            Ok(Box::new(engine))
        }

        _ => Err(unknown_programmer_error(name)),
    }
}
