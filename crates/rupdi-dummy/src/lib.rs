//! rupdi-dummy - In-memory UPDI target for testing
//!
//! This crate provides a dummy target that emulates a tinyAVR's memories and
//! a minimal debug core in memory. It's useful for exercising the CLI and
//! higher-level code without real hardware.

use std::collections::BTreeSet;

use rupdi_core::chip::ChipDescriptor;
use rupdi_core::error::{Error, Result};
use rupdi_core::memory::{EraseMode, FUSES_LEN, SERIAL_NUMBER_LEN, SP_ADDRESS, SREG_ADDRESS};
use rupdi_core::{CancelToken, NoProgress, Progress, Target};

/// Number of hardware breakpoint slots
const HW_BREAKPOINTS: usize = 3;

/// Last SRAM address on tinyAVR-0/1 parts
const RAMEND: u16 = 0x3FFF;

/// Configuration for the dummy target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DummyConfig {
    /// Reported target voltage in mV
    pub voltage_mv: u16,
    /// Initial fuse values
    pub fuses: [u8; FUSES_LEN],
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            voltage_mv: 3300,
            fuses: [0x00, 0x00, 0x02, 0xFF, 0x00, 0xF6, 0x07, 0x00, 0x00, 0xFF, 0xC5],
        }
    }
}

/// Parse options from key=value pairs
pub fn parse_options(options: &[(&str, &str)]) -> Result<DummyConfig> {
    let mut config = DummyConfig::default();

    for (key, value) in options {
        match *key {
            "vtarget" => {
                config.voltage_mv = value
                    .parse()
                    .map_err(|_| Error::InvalidArgument(format!("vtarget: {}", value)))?;
            }
            _ => {
                return Err(Error::InvalidArgument(format!("unknown option: {}", key)));
            }
        }
    }

    Ok(config)
}

/// Dummy UPDI target
///
/// Flash programming only clears bits, as on real flash, so writing over
/// unerased data shows up when the result is read back.
pub struct DummyTarget {
    chip: ChipDescriptor,
    config: DummyConfig,
    flash: Vec<u8>,
    eeprom: Vec<u8>,
    user_row: Vec<u8>,
    fuses: [u8; FUSES_LEN],
    /// 64 KiB data space; SP and SREG live at their I/O addresses
    data: Vec<u8>,
    registers: [u8; 32],
    pc: u32,
    running: bool,
    hw_breakpoints: [Option<u32>; HW_BREAKPOINTS],
    sw_breakpoints: BTreeSet<u32>,
    progress: Box<dyn Progress>,
    cancel: CancelToken,
    closed: bool,
}

impl DummyTarget {
    /// Create a blank target for `chip`
    pub fn new(chip: ChipDescriptor, config: DummyConfig) -> Self {
        let fuses = config.fuses;
        let mut data = vec![0u8; 0x1_0000];
        data[SP_ADDRESS as usize..SP_ADDRESS as usize + 2].copy_from_slice(&RAMEND.to_le_bytes());

        log::info!("dummy: emulating {}", chip.name);
        Self {
            flash: vec![0xFF; chip.flash_size as usize],
            eeprom: vec![0xFF; chip.eeprom_size as usize],
            user_row: vec![0xFF; chip.user_row_size() as usize],
            fuses,
            data,
            registers: [0; 32],
            pc: 0,
            running: false,
            hw_breakpoints: [None; HW_BREAKPOINTS],
            sw_breakpoints: BTreeSet::new(),
            progress: Box::new(NoProgress),
            cancel: CancelToken::new(),
            closed: false,
            chip,
            config,
        }
    }

    /// Create a target with pre-filled flash
    pub fn with_flash(chip: ChipDescriptor, config: DummyConfig, image: &[u8]) -> Self {
        let mut target = Self::new(chip, config);
        let len = image.len().min(target.flash.len());
        target.flash[..len].copy_from_slice(&image[..len]);
        target
    }

    /// Flash contents
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// EEPROM contents
    pub fn eeprom(&self) -> &[u8] {
        &self.eeprom
    }

    /// Whether the emulated core is running
    pub fn is_running(&self) -> bool {
        self.running
    }

    fn require_open(&self, operation: &'static str) -> Result<()> {
        if self.closed {
            return Err(Error::PreconditionViolated {
                operation,
                requires: "open target",
            });
        }
        Ok(())
    }

    fn require_halted(&self, operation: &'static str) -> Result<()> {
        self.require_open(operation)?;
        if self.running {
            return Err(Error::PreconditionViolated {
                operation,
                requires: "stopped core",
            });
        }
        Ok(())
    }

    fn range(segment: &str, address: u32, len: usize, size: usize) -> Result<std::ops::Range<usize>> {
        let start = address as usize;
        if start + len > size {
            return Err(Error::InvalidArgument(format!(
                "{} range 0x{:X}+{} exceeds {} bytes",
                segment, address, len, size
            )));
        }
        Ok(start..start + len)
    }

    fn even(what: &str, address: u32) -> Result<u32> {
        if address % 2 != 0 {
            return Err(Error::InvalidArgument(format!(
                "{}: address 0x{:X} is not word aligned",
                what, address
            )));
        }
        Ok(address)
    }

    fn check_fuse_offsets(offsets: &[u8]) -> Result<()> {
        match offsets.iter().find(|&&o| o as usize >= FUSES_LEN) {
            Some(bad) => Err(Error::InvalidArgument(format!("fuse offset {}", bad))),
            None => Ok(()),
        }
    }

    /// Nearest breakpoint past the program counter
    fn next_breakpoint(&self) -> Option<u32> {
        self.hw_breakpoints
            .iter()
            .flatten()
            .chain(self.sw_breakpoints.iter())
            .copied()
            .filter(|&a| a > self.pc)
            .min()
    }
}

impl Target for DummyTarget {
    fn device_signature(&mut self) -> Result<[u8; 3]> {
        self.require_open("device_signature")?;
        Ok(self.chip.signature)
    }

    fn device_serial_number(&mut self) -> Result<Vec<u8>> {
        self.require_open("device_serial_number")?;
        Ok((0..SERIAL_NUMBER_LEN as u8).map(|i| 0x30 + i).collect())
    }

    fn read_flash(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        self.require_halted("read_flash")?;
        let range = Self::range("flash", address, len, self.flash.len())?;
        self.progress.start("Reading flash", len);
        let out = self.flash[range].to_vec();
        self.progress.update(len);
        self.progress.finish();
        Ok(out)
    }

    fn write_flash(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.require_halted("write_flash")?;
        let page = self.chip.flash_page_size as usize;
        if address as usize % page != 0 {
            return Err(Error::InvalidArgument(format!(
                "flash write at 0x{:X} is not page aligned ({} bytes)",
                address, page
            )));
        }
        let padded = data.len().div_ceil(page) * page;
        let range = Self::range("flash", address, padded, self.flash.len())?;

        self.progress.start("Writing flash", data.len());
        for (i, slot) in self.flash[range].iter_mut().enumerate() {
            // programming can only change 1 -> 0
            *slot &= data.get(i).copied().unwrap_or(0xFF);
        }
        self.progress.update(data.len());
        self.progress.finish();
        log::debug!("dummy: wrote {} bytes of flash at 0x{:X}", data.len(), address);
        Ok(())
    }

    fn erase_target(&mut self, address: u32, mode: EraseMode) -> Result<()> {
        self.require_halted("erase_target")?;
        let flash_page = self.chip.flash_page_size as usize;
        let eeprom_page = self.chip.eeprom_page_size as usize;
        match mode {
            EraseMode::Chip => {
                self.flash.fill(0xFF);
                self.eeprom.fill(0xFF);
            }
            EraseMode::App => self.flash.fill(0xFF),
            EraseMode::Eeprom => self.eeprom.fill(0xFF),
            EraseMode::AppPage => {
                let start = address as usize / flash_page * flash_page;
                let range = Self::range("flash", start as u32, flash_page, self.flash.len())?;
                self.flash[range].fill(0xFF);
            }
            EraseMode::EepromPage => {
                let start = address as usize / eeprom_page * eeprom_page;
                let range = Self::range("eeprom", start as u32, eeprom_page, self.eeprom.len())?;
                self.eeprom[range].fill(0xFF);
            }
            EraseMode::UserSignature => self.user_row.fill(0xFF),
            EraseMode::Boot | EraseMode::BootPage => {
                return Err(Error::InvalidArgument(format!(
                    "erase {}: no boot section",
                    mode.name()
                )));
            }
        }
        log::debug!("dummy: erased {}", mode.name());
        Ok(())
    }

    fn read_fuses(&mut self, offsets: &[u8]) -> Result<Vec<u8>> {
        self.require_halted("read_fuses")?;
        Self::check_fuse_offsets(offsets)?;
        Ok(offsets.iter().map(|&o| self.fuses[o as usize]).collect())
    }

    fn write_fuses(&mut self, offsets: &[u8], values: &[u8]) -> Result<()> {
        self.require_halted("write_fuses")?;
        if offsets.len() != values.len() {
            return Err(Error::InvalidArgument(format!(
                "{} fuse offsets but {} values",
                offsets.len(),
                values.len()
            )));
        }
        Self::check_fuse_offsets(offsets)?;
        for (&o, &v) in offsets.iter().zip(values) {
            self.fuses[o as usize] = v;
        }
        Ok(())
    }

    fn read_eeprom(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        self.require_halted("read_eeprom")?;
        let range = Self::range("eeprom", address, len, self.eeprom.len())?;
        Ok(self.eeprom[range].to_vec())
    }

    fn write_eeprom(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.require_halted("write_eeprom")?;
        let range = Self::range("eeprom", address, data.len(), self.eeprom.len())?;
        self.eeprom[range].copy_from_slice(data);
        Ok(())
    }

    fn read_user_row(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        self.require_halted("read_user_row")?;
        let range = Self::range("user row", address, len, self.user_row.len())?;
        Ok(self.user_row[range].to_vec())
    }

    fn write_user_row(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.require_halted("write_user_row")?;
        let range = Self::range("user row", address, data.len(), self.user_row.len())?;
        self.user_row[range].copy_from_slice(data);
        Ok(())
    }

    fn target_voltage(&mut self) -> Result<f32> {
        self.require_open("target_voltage")?;
        Ok(self.config.voltage_mv as f32 / 1000.0)
    }

    fn reset(&mut self) -> Result<()> {
        self.require_open("reset")?;
        self.pc = 0;
        self.running = false;
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        self.require_halted("run")?;
        self.cancel.check()?;
        match self.next_breakpoint() {
            Some(address) => self.pc = address,
            None => self.running = true,
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.require_open("stop")?;
        self.running = false;
        Ok(())
    }

    fn step(&mut self) -> Result<()> {
        self.require_halted("step")?;
        self.pc = (self.pc + 2) % self.chip.flash_size;
        Ok(())
    }

    fn run_to_address(&mut self, address: u32) -> Result<()> {
        self.require_halted("run_to_address")?;
        self.pc = Self::even("run_to_address", address)?;
        Ok(())
    }

    fn program_counter(&mut self) -> Result<u32> {
        self.require_halted("program_counter")?;
        Ok(self.pc)
    }

    fn set_program_counter(&mut self, address: u32) -> Result<()> {
        self.require_halted("set_program_counter")?;
        self.pc = Self::even("set_program_counter", address)?;
        Ok(())
    }

    fn read_sram(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        self.require_halted("read_sram")?;
        let range = Self::range("data space", address, len, self.data.len())?;
        Ok(self.data[range].to_vec())
    }

    fn write_sram(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.require_halted("write_sram")?;
        let range = Self::range("data space", address, data.len(), self.data.len())?;
        self.data[range].copy_from_slice(data);
        Ok(())
    }

    fn read_registers(&mut self, first: u8, len: usize) -> Result<Vec<u8>> {
        self.require_halted("read_registers")?;
        let range = Self::range("register file", first as u32, len, self.registers.len())?;
        Ok(self.registers[range].to_vec())
    }

    fn write_registers(&mut self, first: u8, values: &[u8]) -> Result<()> {
        self.require_halted("write_registers")?;
        let range = Self::range("register file", first as u32, values.len(), self.registers.len())?;
        self.registers[range].copy_from_slice(values);
        Ok(())
    }

    fn stack_pointer(&mut self) -> Result<u16> {
        let sp = self.read_sram(SP_ADDRESS, 2)?;
        Ok(u16::from_le_bytes([sp[0], sp[1]]))
    }

    fn set_stack_pointer(&mut self, sp: u16) -> Result<()> {
        self.write_sram(SP_ADDRESS, &sp.to_le_bytes())
    }

    fn status_register(&mut self) -> Result<u8> {
        Ok(self.read_sram(SREG_ADDRESS, 1)?[0])
    }

    fn set_status_register(&mut self, value: u8) -> Result<()> {
        self.write_sram(SREG_ADDRESS, &[value])
    }

    fn set_hw_breakpoint(&mut self, num: u8, address: u32) -> Result<()> {
        self.require_open("set_hw_breakpoint")?;
        let slot = self.hw_slot(num)?;
        *slot = Some(Self::even("set_hw_breakpoint", address)?);
        Ok(())
    }

    fn clear_hw_breakpoint(&mut self, num: u8) -> Result<()> {
        self.require_open("clear_hw_breakpoint")?;
        *self.hw_slot(num)? = None;
        Ok(())
    }

    fn set_sw_breakpoints(&mut self, addresses: &[u32]) -> Result<()> {
        self.require_open("set_sw_breakpoints")?;
        for &a in addresses {
            self.sw_breakpoints.insert(Self::even("set_sw_breakpoints", a)?);
        }
        Ok(())
    }

    fn clear_sw_breakpoints(&mut self, addresses: &[u32]) -> Result<()> {
        self.require_open("clear_sw_breakpoints")?;
        for a in addresses {
            self.sw_breakpoints.remove(a);
        }
        Ok(())
    }

    fn clear_all_sw_breakpoints(&mut self) -> Result<()> {
        self.require_open("clear_all_sw_breakpoints")?;
        self.sw_breakpoints.clear();
        Ok(())
    }

    fn set_progress(&mut self, progress: Box<dyn Progress>) {
        self.progress = progress;
    }

    fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = token;
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            log::info!("dummy: closed");
        }
        Ok(())
    }
}

impl DummyTarget {
    /// Hardware breakpoint slots are numbered from 1
    fn hw_slot(&mut self, num: u8) -> Result<&mut Option<u32>> {
        match num as usize {
            n @ 1..=HW_BREAKPOINTS => Ok(&mut self.hw_breakpoints[n - 1]),
            _ => Err(Error::InvalidArgument(format!(
                "hardware breakpoint {} (slots 1..={})",
                num, HW_BREAKPOINTS
            ))),
        }
    }
}
