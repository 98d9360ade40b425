//! CLI argument parsing

use crate::programmers;
use clap::{Args, Parser, Subcommand, ValueEnum};
use rupdi_core::EraseMode;
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
pub fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a fuse assignment of the form `OFFSET=VALUE`
pub fn parse_fuse_assignment(s: &str) -> Result<(u8, u8), String> {
    let (offset, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected OFFSET=VALUE, got '{}'", s))?;
    let offset = parse_hex_u32(offset)?;
    let value = parse_hex_u32(value)?;
    let offset = u8::try_from(offset).map_err(|_| format!("Fuse offset out of range: {}", offset))?;
    let value = u8::try_from(value).map_err(|_| format!("Fuse value out of range: {}", value))?;
    Ok((offset, value))
}

/// Generate dynamic help text for the programmer argument
fn programmer_help() -> String {
    format!(
        "Programmer to use, optionally with options as name:key=value,... [available: {}]",
        programmers::programmer_names_short()
    )
}

#[derive(Parser)]
#[command(name = "rupdi")]
#[command(author, version, about = "UPDI programmer and debugger for tinyAVR parts", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Extra chip definitions (RON file or directory of .ron files)
    #[arg(long, global = true)]
    pub chip_db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Programmer and target selection shared by every command that talks to a part
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    #[arg(short, long, help = programmer_help())]
    pub programmer: String,

    /// Target part name
    #[arg(short, long, default_value = "ATtiny817")]
    pub chip: String,
}

/// Erase granularity as accepted on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseKind {
    /// Whole chip, including EEPROM unless EESAVE is set
    Chip,
    /// Application section
    App,
    /// Boot section
    Boot,
    /// Whole EEPROM
    Eeprom,
    /// One application flash page
    AppPage,
    /// One boot flash page
    BootPage,
    /// One EEPROM page
    EepromPage,
    /// User row
    UserRow,
}

impl From<EraseKind> for EraseMode {
    fn from(kind: EraseKind) -> Self {
        match kind {
            EraseKind::Chip => EraseMode::Chip,
            EraseKind::App => EraseMode::App,
            EraseKind::Boot => EraseMode::Boot,
            EraseKind::Eeprom => EraseMode::Eeprom,
            EraseKind::AppPage => EraseMode::AppPage,
            EraseKind::BootPage => EraseMode::BootPage,
            EraseKind::EepromPage => EraseMode::EepromPage,
            EraseKind::UserRow => EraseMode::UserSignature,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// List supported programmers and connected EDBG probes
    ListProgrammers,

    /// List known chips
    ListChips {
        /// Only show chips whose name contains this string
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Identify the target: signature, serial number, voltage and fuses
    Info {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Read flash contents to a binary file
    ReadFlash {
        #[command(flatten)]
        target: TargetArgs,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Start offset within flash
        #[arg(short, long, value_parser = parse_hex_u32, default_value = "0")]
        address: u32,

        /// Number of bytes to read (default: to the end of flash)
        #[arg(short, long, value_parser = parse_hex_u32)]
        length: Option<u32>,
    },

    /// Write a binary file to flash
    WriteFlash {
        #[command(flatten)]
        target: TargetArgs,

        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Start offset within flash (page aligned)
        #[arg(short, long, value_parser = parse_hex_u32, default_value = "0")]
        address: u32,

        /// Read back and compare after writing
        #[arg(long)]
        verify: bool,
    },

    /// Erase part or all of the target
    Erase {
        #[command(flatten)]
        target: TargetArgs,

        /// What to erase
        #[arg(short, long, value_enum, default_value = "chip")]
        mode: EraseKind,

        /// Page address for the page modes
        #[arg(short, long, value_parser = parse_hex_u32, default_value = "0")]
        address: u32,
    },

    /// Read and decode the fuse bytes
    ReadFuses {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Write fuse bytes
    WriteFuses {
        #[command(flatten)]
        target: TargetArgs,

        /// Fuse assignments as OFFSET=VALUE (repeatable)
        #[arg(short, long = "fuse", value_parser = parse_fuse_assignment, required = true)]
        fuses: Vec<(u8, u8)>,
    },

    /// Read EEPROM contents to a binary file
    ReadEeprom {
        #[command(flatten)]
        target: TargetArgs,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Write a binary file to EEPROM
    WriteEeprom {
        #[command(flatten)]
        target: TargetArgs,

        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Start offset within EEPROM
        #[arg(short, long, value_parser = parse_hex_u32, default_value = "0")]
        address: u32,

        /// Read back and compare after writing
        #[arg(long)]
        verify: bool,
    },

    /// Read the user row to a binary file
    ReadUserrow {
        #[command(flatten)]
        target: TargetArgs,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Write a binary file to the user row
    WriteUserrow {
        #[command(flatten)]
        target: TargetArgs,

        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Read back and compare after writing
        #[arg(long)]
        verify: bool,
    },

    /// Live debugging (EDBG probes and the dummy target)
    Debug {
        #[command(flatten)]
        target: TargetArgs,

        #[command(subcommand)]
        action: DebugCommands,
    },

    /// Decode a captured UPDI line (binary file) into instructions
    DecodeUpdi {
        /// Capture file holding the raw line bytes
        input: PathBuf,
    },

    /// Decode an AVR8 protocol command given as hex bytes
    DecodeCmd {
        /// Command bytes, e.g. 12 01 00 01 05
        #[arg(required = true, num_args = 1..)]
        bytes: Vec<String>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum DebugCommands {
    /// Reset the core and stop at the reset vector
    Reset,

    /// Single-step instructions
    Step {
        /// Number of instructions
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,
    },

    /// Run until the program counter reaches an address
    RunTo {
        /// Flash byte address
        #[arg(value_parser = parse_hex_u32)]
        address: u32,
    },

    /// Dump the register file, PC, SP and SREG
    Regs,

    /// Set a hardware breakpoint, run until it hits, then clear it
    Break {
        /// Flash byte address
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// Hardware breakpoint slot (1-3)
        #[arg(short, long, default_value = "1")]
        slot: u8,
    },
}
