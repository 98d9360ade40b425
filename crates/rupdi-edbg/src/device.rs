//! HID debug engine
//!
//! [`HidEngine`] drives one EDBG-class probe over a [`HidTransport`]. It
//! owns the transport until [`HidEngine::close`], tracks the nested session
//! flags and refuses any operation whose prerequisite flag is not set before
//! a single report goes out.

use std::time::Duration;

use rupdi_core::chip::ChipDescriptor;
use rupdi_core::error::{Error, Result};
use rupdi_core::memory::{
    EraseMode, MemType, EEPROM_BASE, FUSES_BASE, FUSES_LEN, SERIAL_NUMBER_BASE,
    SERIAL_NUMBER_LEN, SIGNATURE_BASE, SP_ADDRESS, SREG_ADDRESS, USERROW_BASE,
};
use rupdi_core::probe::{ProbeInfo, KNOWN_PROBES};
use rupdi_core::{CancelToken, MessageListener, NoProgress, Progress, SessionState, Target};

use crate::decode::decode_command;
use crate::error::EdbgError;
use crate::protocol::{
    self, BreakEvent, Event, Response, ResponseAssembler, ToolInfo, AVR8_CONFIG_FUNCTION,
    AVR8_CONFIG_VARIANT, AVR8_CTXT_CONFIG, AVR8_CTXT_PHYSICAL, AVR8_FUNC_DEBUGGING,
    AVR8_FUNC_PROGRAMMING, AVR8_PHY_INTERFACE, AVR8_PHY_INTF_PDI_1W, AVR8_PHY_XM_PDI_CLK,
    AVR8_QUERY_COMMANDS, AVR8_VARIANT_UPDI, AVR_CMD, AVR_EVT, AVR_RSP, CMD_RESPONSE_PENDING,
    DISCOVERY_SERIAL_NUMBER, DISCOVERY_TOOL_NAME, HK_CONTEXT_ANALOG, HK_CONTEXT_CONFIG,
    HOUSEKEEPING_ANALOG_VTREF, HOUSEKEEPING_CONFIG_HWREV, MAX_MEMORY_CHUNK,
};
use crate::transport::usb::UsbHid;
use crate::transport::HidTransport;

/// AVR_RSP polls allowed before a pending response is abandoned
const MAX_RESPONSE_POLLS: usize = 64;

/// Hardware breakpoint slots accepted by HW_BREAK_SET
const HW_BREAKPOINT_SLOTS: u8 = 3;

/// General purpose registers
const REGFILE_SIZE: usize = 32;

/// Size of the 16-bit data space
const DATA_SPACE_SIZE: u32 = 0x1_0000;

/// What the engine does with the target after activating the physical layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdbgMode {
    /// Enter NVM programming mode
    Program,
    /// Attach the on-chip debugger and stop the core
    Debug,
}

impl EdbgMode {
    fn function(self) -> u8 {
        match self {
            EdbgMode::Program => AVR8_FUNC_PROGRAMMING,
            EdbgMode::Debug => AVR8_FUNC_DEBUGGING,
        }
    }
}

/// Polling parameters of the break-event wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakWaitConfig {
    /// Event polls without any event before giving up
    pub budget: u32,
    /// Sleep after a poll that returned no event
    pub idle_sleep: Duration,
    /// Sleep after a debug message character
    pub message_sleep: Duration,
}

impl Default for BreakWaitConfig {
    fn default() -> Self {
        Self {
            budget: 20,
            idle_sleep: Duration::from_millis(50),
            message_sleep: Duration::from_millis(10),
        }
    }
}

/// Configuration options for opening an EDBG probe
#[derive(Debug, Clone)]
pub struct EdbgConfig {
    /// Index among matching probes
    pub index: usize,
    /// USB serial number to match
    pub serial: Option<String>,
    /// UPDI clock in kHz
    pub clock_khz: u16,
    /// Refuse to connect below this target voltage; 0 skips the check
    pub min_target_voltage_mv: u16,
    /// Programming or debugging session
    pub mode: EdbgMode,
    /// Bounded break wait used by attach, reset, stop and step
    pub break_wait: BreakWaitConfig,
    /// Break wait budget for run and run-to; `None` waits until cancelled
    pub run_budget: Option<u32>,
    /// Timeout of a single HID report transfer
    pub report_timeout: Duration,
    /// Probes recognised during enumeration
    pub probes: Vec<ProbeInfo>,
}

impl Default for EdbgConfig {
    fn default() -> Self {
        Self {
            index: 0,
            serial: None,
            clock_khz: 500,
            min_target_voltage_mv: 1000,
            mode: EdbgMode::Program,
            break_wait: BreakWaitConfig::default(),
            run_budget: None,
            report_timeout: Duration::from_secs(1),
            probes: KNOWN_PROBES.to_vec(),
        }
    }
}

/// Parse options from key=value pairs
pub fn parse_options(options: &[(&str, &str)]) -> crate::error::Result<EdbgConfig> {
    let mut config = EdbgConfig::default();

    for (key, value) in options {
        match *key {
            "index" | "device" => {
                config.index = value
                    .parse()
                    .map_err(|_| EdbgError::InvalidParameter(format!("index: {}", value)))?;
            }
            "serial" => {
                config.serial = Some(value.to_string());
            }
            "clock" => {
                config.clock_khz = value
                    .parse()
                    .ok()
                    .filter(|&khz: &u16| khz > 0)
                    .ok_or_else(|| EdbgError::InvalidParameter(format!("clock: {}", value)))?;
            }
            "mode" => match value.to_lowercase().as_str() {
                "program" | "prog" => config.mode = EdbgMode::Program,
                "debug" => config.mode = EdbgMode::Debug,
                _ => {
                    return Err(EdbgError::InvalidParameter(format!("mode: {}", value)));
                }
            },
            "vmin" => {
                config.min_target_voltage_mv = value
                    .parse()
                    .map_err(|_| EdbgError::InvalidParameter(format!("vmin: {}", value)))?;
            }
            "timeout" => {
                let ms: u64 = value
                    .parse()
                    .map_err(|_| EdbgError::InvalidParameter(format!("timeout: {}", value)))?;
                config.report_timeout = Duration::from_millis(ms);
            }
            "budget" => {
                config.break_wait.budget = value
                    .parse()
                    .map_err(|_| EdbgError::InvalidParameter(format!("budget: {}", value)))?;
            }
            "runbudget" => {
                config.run_budget = match *value {
                    "none" => None,
                    v => Some(v.parse().map_err(|_| {
                        EdbgError::InvalidParameter(format!("runbudget: {}", value))
                    })?),
                };
            }
            _ => {
                return Err(EdbgError::InvalidParameter(format!(
                    "unknown option: {}",
                    key
                )));
            }
        }
    }

    Ok(config)
}

/// Check that `len` bytes at `address` fit in a segment of `size` bytes
fn check_range(segment: &str, address: u32, len: usize, size: u32) -> Result<()> {
    if address as u64 + len as u64 > size as u64 {
        return Err(Error::InvalidArgument(format!(
            "{} range 0x{:X}+{} exceeds {} bytes",
            segment, address, len, size
        )));
    }
    Ok(())
}

/// Flash is word addressed on the wire
fn word_address(what: &str, address: u32) -> Result<u32> {
    if address % 2 != 0 {
        return Err(Error::InvalidArgument(format!(
            "{}: address 0x{:X} is not word aligned",
            what, address
        )));
    }
    Ok(address >> 1)
}

/// UPDI engine for EDBG, nEDBG and Atmel-ICE class probes
pub struct HidEngine<T: HidTransport> {
    transport: T,
    chip: ChipDescriptor,
    config: EdbgConfig,
    /// Sequence number of the next frame
    seq: u16,
    state: SessionState,
    listener: Option<Box<dyn MessageListener>>,
    progress: Box<dyn Progress>,
    cancel: CancelToken,
    last_break: Option<BreakEvent>,
}

impl HidEngine<UsbHid> {
    /// Open the configured USB probe and connect to the target
    pub fn open_usb(chip: ChipDescriptor, mut config: EdbgConfig) -> crate::error::Result<Self> {
        let usb = UsbHid::open(
            &config.probes,
            config.index,
            config.serial.as_deref(),
            config.report_timeout,
        )?;
        if !usb.info().has_vref {
            log::debug!("edbg: {} cannot measure VTREF, skipping check", usb.info().name);
            config.min_target_voltage_mv = 0;
        }
        Ok(Self::open(usb, chip, config)?)
    }
}

impl<T: HidTransport> HidEngine<T> {
    /// Bind an engine to a transport without talking to the probe
    pub fn new(transport: T, chip: ChipDescriptor, config: EdbgConfig) -> Self {
        Self {
            transport,
            chip,
            config,
            seq: 0,
            state: SessionState::new(),
            listener: None,
            progress: Box::new(NoProgress),
            cancel: CancelToken::new(),
            last_break: None,
        }
    }

    /// Bind an engine to a transport and run the connect sequence
    ///
    /// Whatever was set up before a failing step is unwound again.
    pub fn open(transport: T, chip: ChipDescriptor, config: EdbgConfig) -> Result<Self> {
        let mut engine = Self::new(transport, chip, config);
        if let Err(e) = engine.connect() {
            log::debug!("edbg: connect failed: {}", e);
            let _ = engine.close();
            return Err(e);
        }
        Ok(engine)
    }

    /// Voltage check, session, configuration, physical activation, then
    /// programming mode or a stopped debug attach
    pub fn connect(&mut self) -> Result<()> {
        let min_mv = self.config.min_target_voltage_mv;
        if min_mv > 0 {
            let measured_mv = self.target_voltage_mv()?;
            log::info!(
                "edbg: target voltage {:.2} V",
                measured_mv as f32 / 1000.0
            );
            if measured_mv < min_mv {
                return Err(EdbgError::LowVoltage {
                    measured_mv,
                    min_mv,
                }
                .into());
            }
        }

        self.start_session()?;
        self.set_variant_updi()?;
        self.set_physical_interface_updi()?;
        self.set_clock_khz(self.config.clock_khz)?;
        self.set_device_info()?;
        self.activate_physical(true)?;
        self.set_function(self.config.mode)?;

        match self.config.mode {
            EdbgMode::Program => self.enter_program_mode()?,
            EdbgMode::Debug => self.attach(true)?,
        }

        log::info!(
            "edbg: connected to {} ({:?} mode, {} kHz)",
            self.chip.name,
            self.config.mode,
            self.config.clock_khz
        );
        Ok(())
    }

    /// Current session flags
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Descriptor of the target chip
    pub fn chip(&self) -> &ChipDescriptor {
        &self.chip
    }

    /// Most recent break event
    pub fn last_break(&self) -> Option<BreakEvent> {
        self.last_break
    }

    // ------------------------------------------------------------------
    // Framing
    // ------------------------------------------------------------------

    /// Send one command frame and return the decoded response
    pub fn send_command(&mut self, command: &[u8]) -> Result<Response> {
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("edbg: {}", decode_command(command));
        }

        let frame = protocol::wrap_frame(self.seq, command);
        self.seq = self.seq.wrapping_add(1);

        for report in protocol::fragments(&frame)? {
            self.transport.write_report(&report)?;
            let reply = self.transport.read_report()?;
            if reply.first() != Some(&AVR_CMD) {
                return Err(Error::Protocol(format!(
                    "command fragment not accepted: {:02X?}",
                    &reply[..reply.len().min(4)]
                )));
            }
            if reply.get(1) == Some(&CMD_RESPONSE_PENDING) {
                return self.collect_response();
            }
        }

        Ok(Response::Ok)
    }

    fn collect_response(&mut self) -> Result<Response> {
        let mut assembler = ResponseAssembler::new();
        for _ in 0..MAX_RESPONSE_POLLS {
            let reply = self.transport.exchange(&[AVR_RSP])?;
            if assembler.push(&reply)? {
                return protocol::parse_response(&assembler.into_frame());
            }
        }
        Err(Error::Timeout("response"))
    }

    fn command(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        Ok(self.send_command(command)?.into_bytes())
    }

    // ------------------------------------------------------------------
    // Probe queries
    // ------------------------------------------------------------------

    fn discovery_string(&mut self, context: u8) -> Result<String> {
        let bytes = self.command(&protocol::discovery_query(context))?;
        Ok(String::from_utf8_lossy(&bytes)
            .trim_end_matches('\0')
            .to_string())
    }

    /// Probe name, e.g. "nEDBG CMSIS-DAP"
    pub fn tool_name(&mut self) -> Result<String> {
        self.discovery_string(DISCOVERY_TOOL_NAME)
    }

    /// Probe serial number
    pub fn tool_serial(&mut self) -> Result<String> {
        self.discovery_string(DISCOVERY_SERIAL_NUMBER)
    }

    /// Probe hardware and firmware revision
    pub fn tool_info(&mut self) -> Result<ToolInfo> {
        let data = self.command(&protocol::housekeeping_get(
            HK_CONTEXT_CONFIG,
            HOUSEKEEPING_CONFIG_HWREV,
            5,
        ))?;
        ToolInfo::from_bytes(&data)
            .ok_or_else(|| Error::Protocol(format!("short tool info ({} bytes)", data.len())))
    }

    /// Target supply voltage in millivolts
    pub fn target_voltage_mv(&mut self) -> Result<u16> {
        let data = self.command(&protocol::housekeeping_get(
            HK_CONTEXT_ANALOG,
            HOUSEKEEPING_ANALOG_VTREF,
            2,
        ))?;
        match data.as_slice() {
            [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
            _ => Err(Error::Protocol("short VTREF reading".into())),
        }
    }

    /// Command IDs supported by the EDBG control handler
    pub fn query_edbg_commands(&mut self) -> Result<Vec<u8>> {
        self.command(&protocol::edbg_query_commands())
    }

    /// Command IDs supported by the AVR8 handler
    pub fn query_avr8_commands(&mut self) -> Result<Vec<u8>> {
        self.state.require_session("query_avr8_commands")?;
        self.command(&protocol::avr8_query(AVR8_QUERY_COMMANDS))
    }

    /// Raw target ID read through the physical layer
    pub fn get_id(&mut self) -> Result<Vec<u8>> {
        self.state.require_physical("get_id")?;
        self.command(&protocol::get_id())
    }

    // ------------------------------------------------------------------
    // Session and configuration
    // ------------------------------------------------------------------

    pub fn start_session(&mut self) -> Result<()> {
        self.command(&protocol::start_session())?;
        self.state.start_session();
        log::debug!("edbg: session started");
        Ok(())
    }

    pub fn end_session(&mut self) -> Result<()> {
        self.state.require_session("end_session")?;
        self.command(&protocol::end_session())?;
        self.state.end_session();
        log::debug!("edbg: session ended");
        Ok(())
    }

    pub fn set_variant_updi(&mut self) -> Result<()> {
        self.state.require_session("set_variant")?;
        self.command(&protocol::avr8_set(
            AVR8_CTXT_CONFIG,
            AVR8_CONFIG_VARIANT,
            &[AVR8_VARIANT_UPDI],
        ))?;
        Ok(())
    }

    pub fn set_physical_interface_updi(&mut self) -> Result<()> {
        self.state.require_session("set_interface")?;
        self.command(&protocol::avr8_set(
            AVR8_CTXT_PHYSICAL,
            AVR8_PHY_INTERFACE,
            &[AVR8_PHY_INTF_PDI_1W],
        ))?;
        Ok(())
    }

    pub fn set_clock_khz(&mut self, khz: u16) -> Result<()> {
        self.state.require_session("set_clock")?;
        self.command(&protocol::avr8_set(
            AVR8_CTXT_PHYSICAL,
            AVR8_PHY_XM_PDI_CLK,
            &khz.to_le_bytes(),
        ))?;
        Ok(())
    }

    /// Load the chip's memory layout into the probe's device context
    pub fn set_device_info(&mut self) -> Result<()> {
        self.state.require_session("set_device_info")?;
        let prog_base = u16::try_from(self.chip.prog_base).map_err(|_| {
            Error::InvalidArgument(format!("prog base 0x{:X}", self.chip.prog_base))
        })?;
        let flash_page = u8::try_from(self.chip.flash_page_size).map_err(|_| {
            Error::InvalidArgument(format!("flash page size {}", self.chip.flash_page_size))
        })?;
        let cmd = protocol::set_device_info(
            prog_base,
            flash_page,
            self.chip.eeprom_page_size,
            self.chip.nvm_base,
            self.chip.ocd_base,
        );
        self.command(&cmd)?;
        Ok(())
    }

    pub fn set_function(&mut self, mode: EdbgMode) -> Result<()> {
        self.state.require_session("set_function")?;
        self.command(&protocol::avr8_set(
            AVR8_CTXT_CONFIG,
            AVR8_CONFIG_FUNCTION,
            &[mode.function()],
        ))?;
        Ok(())
    }

    pub fn activate_physical(&mut self, reset: bool) -> Result<()> {
        let mut next = self.state;
        next.activate_physical("activate_physical")?;
        self.command(&protocol::activate_physical(reset))?;
        self.state = next;
        log::debug!("edbg: physical interface active");
        Ok(())
    }

    pub fn deactivate_physical(&mut self) -> Result<()> {
        self.state.require_physical("deactivate_physical")?;
        self.command(&protocol::deactivate_physical())?;
        self.state.deactivate_physical();
        log::debug!("edbg: physical interface inactive");
        Ok(())
    }

    /// Attach the debugger; with `stop` the core halts and the break is awaited
    pub fn attach(&mut self, stop: bool) -> Result<()> {
        let mut next = self.state;
        next.attach("attach")?;
        self.command(&protocol::attach(stop))?;
        self.state = next;
        log::debug!("edbg: debugger attached");
        if stop {
            self.break_wait(Some(self.config.break_wait.budget))?;
        }
        Ok(())
    }

    pub fn detach(&mut self) -> Result<()> {
        self.state.require_debug("detach")?;
        self.command(&protocol::detach())?;
        self.state.detach();
        log::debug!("edbg: debugger detached");
        Ok(())
    }

    pub fn enter_program_mode(&mut self) -> Result<()> {
        let mut next = self.state;
        next.enter_program("enter_program_mode")?;
        self.command(&protocol::prog_mode_enter())?;
        self.state = next;
        log::debug!("edbg: programming mode entered");
        Ok(())
    }

    pub fn exit_program_mode(&mut self) -> Result<()> {
        self.state.require_program("exit_program_mode")?;
        self.command(&protocol::prog_mode_leave())?;
        self.state.leave_program();
        log::debug!("edbg: programming mode left");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Break events
    // ------------------------------------------------------------------

    fn notify(&mut self, text: &str) {
        if let Some(listener) = self.listener.as_mut() {
            listener.message(text);
        }
    }

    /// Poll for events until the target reports a break
    ///
    /// Debug output characters are collected into lines and handed to the
    /// message listener; each one restarts the budget. With `budget` set to
    /// `None` only the cancel token ends the wait.
    pub fn break_wait(&mut self, budget: Option<u32>) -> Result<BreakEvent> {
        let wait = self.config.break_wait;
        let mut remaining = budget;
        let mut line = Vec::new();

        loop {
            self.cancel.check()?;
            if let Some(n) = remaining {
                if n == 0 {
                    break;
                }
                remaining = Some(n - 1);
            }

            let reply = self.transport.exchange(&[AVR_EVT])?;
            match protocol::event_payload(&reply).and_then(protocol::decode_event) {
                Some(Event::Break(event)) => {
                    log::debug!("edbg: {}", event);
                    self.last_break = Some(event);
                    return Ok(event);
                }
                Some(Event::Idr(c)) => {
                    line.push(c);
                    if c == b'\n' {
                        let text = String::from_utf8_lossy(&line).into_owned();
                        self.notify(&text);
                        line.clear();
                    }
                    remaining = budget;
                    std::thread::sleep(wait.message_sleep);
                }
                other => {
                    if let Some(Event::Other(id)) = other {
                        log::trace!("edbg: ignoring event 0x{:02X}", id);
                    }
                    std::thread::sleep(wait.idle_sleep);
                }
            }
        }

        self.notify("timeout\n");
        Err(Error::Timeout("break wait"))
    }

    fn change_run_state(
        &mut self,
        operation: &'static str,
        command: &[u8],
        budget: Option<u32>,
    ) -> Result<()> {
        self.state.require_debug(operation)?;
        self.command(command)?;
        self.break_wait(budget)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Memory
    // ------------------------------------------------------------------

    fn read_memory(&mut self, memtype: MemType, address: u32, len: usize) -> Result<Vec<u8>> {
        let data = self.command(&protocol::memory_read(memtype, address, len as u32))?;
        if data.len() != len {
            return Err(Error::Protocol(format!(
                "{} read at 0x{:X}: expected {} bytes, got {}",
                memtype.name(),
                address,
                len,
                data.len()
            )));
        }
        Ok(data)
    }

    fn read_tiled(
        &mut self,
        phase: &str,
        memtype: MemType,
        address: u32,
        len: usize,
    ) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        self.progress.start(phase, len);
        while out.len() < len {
            let chunk = (len - out.len()).min(MAX_MEMORY_CHUNK);
            let data = self.read_memory(memtype, address + out.len() as u32, chunk)?;
            out.extend_from_slice(&data);
            self.progress.update(out.len());
        }
        self.progress.finish();
        Ok(out)
    }

    fn write_tiled(
        &mut self,
        phase: &str,
        memtype: MemType,
        address: u32,
        data: &[u8],
        chunk: usize,
    ) -> Result<()> {
        let mut done = 0;
        self.progress.start(phase, data.len());
        for block in data.chunks(chunk) {
            let cmd = protocol::memory_write(memtype, address + done as u32, block);
            self.command(&cmd)?;
            done += block.len();
            self.progress.update(done);
        }
        self.progress.finish();
        Ok(())
    }
}

impl<T: HidTransport> Target for HidEngine<T> {
    fn device_signature(&mut self) -> Result<[u8; 3]> {
        self.state.require_debug_or_program("device_signature")?;
        let data = self.read_memory(MemType::Signature, SIGNATURE_BASE, 3)?;
        Ok([data[0], data[1], data[2]])
    }

    fn device_serial_number(&mut self) -> Result<Vec<u8>> {
        self.state.require_debug_or_program("device_serial_number")?;
        self.read_memory(MemType::Signature, SERIAL_NUMBER_BASE, SERIAL_NUMBER_LEN)
    }

    fn read_flash(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        self.state.require_debug_or_program("read_flash")?;
        check_range("flash", address, len, self.chip.flash_size)?;
        self.read_tiled("Reading flash", MemType::FlashPage, address, len)
    }

    fn write_flash(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.state.require_program("write_flash")?;
        let page = self.chip.flash_page_size as usize;
        if address as usize % page != 0 {
            return Err(Error::InvalidArgument(format!(
                "flash write at 0x{:X} is not page aligned ({} bytes)",
                address, page
            )));
        }
        let padded_len = data.len().div_ceil(page) * page;
        check_range("flash", address, padded_len, self.chip.flash_size)?;

        let mut buf = data.to_vec();
        buf.resize(padded_len, 0xFF);
        log::debug!(
            "edbg: writing {} flash pages at 0x{:05X}",
            padded_len / page,
            address
        );
        // pages are a power of two, so capped chunks never straddle one
        let chunk = page.min(MAX_MEMORY_CHUNK);
        self.write_tiled("Writing flash", MemType::FlashPage, address, &buf, chunk)
    }

    fn erase_target(&mut self, address: u32, mode: EraseMode) -> Result<()> {
        self.state.require_program("erase_target")?;
        self.command(&protocol::erase(mode, address))?;
        log::debug!("edbg: erased {} at 0x{:X}", mode.name(), address);
        Ok(())
    }

    fn read_fuses(&mut self, offsets: &[u8]) -> Result<Vec<u8>> {
        self.state.require_program("read_fuses")?;
        let mut values = Vec::with_capacity(offsets.len());
        for &off in offsets {
            check_range("fuse", off as u32, 1, FUSES_LEN as u32)?;
            let data = self.read_memory(MemType::Fuses, FUSES_BASE + off as u32, 1)?;
            values.push(data[0]);
        }
        Ok(values)
    }

    fn write_fuses(&mut self, offsets: &[u8], values: &[u8]) -> Result<()> {
        if offsets.len() != values.len() {
            return Err(Error::InvalidArgument(format!(
                "{} fuse offsets but {} values",
                offsets.len(),
                values.len()
            )));
        }
        self.state.require_program("write_fuses")?;
        for &off in offsets {
            check_range("fuse", off as u32, 1, FUSES_LEN as u32)?;
        }
        for (&off, &value) in offsets.iter().zip(values) {
            let cmd = protocol::memory_write(MemType::Fuses, FUSES_BASE + off as u32, &[value]);
            self.command(&cmd)?;
        }
        Ok(())
    }

    fn read_eeprom(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        self.state.require_debug_or_program("read_eeprom")?;
        check_range("EEPROM", address, len, self.chip.eeprom_size)?;
        self.read_tiled("Reading EEPROM", MemType::Eeprom, EEPROM_BASE + address, len)
    }

    fn write_eeprom(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.state.require_debug_or_program("write_eeprom")?;
        check_range("EEPROM", address, data.len(), self.chip.eeprom_size)?;
        self.write_tiled(
            "Writing EEPROM",
            MemType::Eeprom,
            EEPROM_BASE + address,
            data,
            MAX_MEMORY_CHUNK,
        )
    }

    fn read_user_row(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        self.state.require_program("read_user_row")?;
        check_range("user row", address, len, self.chip.user_row_size())?;
        if len == 0 {
            return Ok(Vec::new());
        }
        self.read_memory(MemType::UserSignature, USERROW_BASE + address, len)
    }

    fn write_user_row(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.state.require_program("write_user_row")?;
        check_range("user row", address, data.len(), self.chip.user_row_size())?;
        let cmd = protocol::memory_write(MemType::UserSignature, USERROW_BASE + address, data);
        self.command(&cmd)?;
        Ok(())
    }

    fn target_voltage(&mut self) -> Result<f32> {
        Ok(self.target_voltage_mv()? as f32 / 1000.0)
    }

    fn reset(&mut self) -> Result<()> {
        let budget = Some(self.config.break_wait.budget);
        self.change_run_state("reset", &protocol::reset(), budget)
    }

    fn run(&mut self) -> Result<()> {
        let budget = self.config.run_budget;
        self.change_run_state("run", &protocol::run(), budget)
    }

    fn stop(&mut self) -> Result<()> {
        let budget = Some(self.config.break_wait.budget);
        self.change_run_state("stop", &protocol::stop(), budget)
    }

    fn step(&mut self) -> Result<()> {
        let budget = Some(self.config.break_wait.budget);
        self.change_run_state("step", &protocol::step(), budget)
    }

    fn run_to_address(&mut self, address: u32) -> Result<()> {
        let word = word_address("run_to_address", address)?;
        let budget = self.config.run_budget;
        self.change_run_state("run_to_address", &protocol::run_to_address(word), budget)
    }

    fn program_counter(&mut self) -> Result<u32> {
        self.state.require_debug("program_counter")?;
        match self.send_command(&protocol::pc_read())? {
            Response::Pc(word) => Ok(word * 2),
            other => Err(Error::Protocol(format!(
                "PC_READ answered with {:?}",
                other
            ))),
        }
    }

    fn set_program_counter(&mut self, address: u32) -> Result<()> {
        self.state.require_debug("set_program_counter")?;
        let word = word_address("set_program_counter", address)?;
        self.command(&protocol::pc_write(word))?;
        Ok(())
    }

    fn read_sram(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        self.state.require_debug("read_sram")?;
        check_range("data space", address, len, DATA_SPACE_SIZE)?;
        self.read_tiled("Reading SRAM", MemType::Sram, address, len)
    }

    fn write_sram(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.state.require_debug("write_sram")?;
        check_range("data space", address, data.len(), DATA_SPACE_SIZE)?;
        self.write_tiled("Writing SRAM", MemType::Sram, address, data, MAX_MEMORY_CHUNK)
    }

    fn read_registers(&mut self, first: u8, len: usize) -> Result<Vec<u8>> {
        self.state.require_debug("read_registers")?;
        check_range("register file", first as u32, len, REGFILE_SIZE as u32)?;
        self.read_memory(MemType::Regfile, first as u32, len)
    }

    fn write_registers(&mut self, first: u8, values: &[u8]) -> Result<()> {
        self.state.require_debug("write_registers")?;
        check_range("register file", first as u32, values.len(), REGFILE_SIZE as u32)?;
        self.command(&protocol::memory_write(MemType::Regfile, first as u32, values))?;
        Ok(())
    }

    fn stack_pointer(&mut self) -> Result<u16> {
        let data = self.read_sram(SP_ADDRESS, 2)?;
        Ok(u16::from_le_bytes([data[0], data[1]]))
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
        self.state.require_debug("set_hw_breakpoint")?;
        if !(1..=HW_BREAKPOINT_SLOTS).contains(&num) {
            return Err(Error::InvalidArgument(format!(
                "hardware breakpoint slot {}",
                num
            )));
        }
        let word = word_address("set_hw_breakpoint", address)?;
        self.command(&protocol::hw_break_set(num, word))?;
        Ok(())
    }

    fn clear_hw_breakpoint(&mut self, num: u8) -> Result<()> {
        self.state.require_debug("clear_hw_breakpoint")?;
        if !(1..=HW_BREAKPOINT_SLOTS).contains(&num) {
            return Err(Error::InvalidArgument(format!(
                "hardware breakpoint slot {}",
                num
            )));
        }
        self.command(&protocol::hw_break_clear(num))?;
        Ok(())
    }

    fn set_sw_breakpoints(&mut self, addresses: &[u32]) -> Result<()> {
        self.state.require_debug("set_sw_breakpoints")?;
        let words = addresses
            .iter()
            .map(|&a| word_address("set_sw_breakpoints", a))
            .collect::<Result<Vec<_>>>()?;
        if words.is_empty() {
            return Ok(());
        }
        self.command(&protocol::sw_break_set(&words))?;
        Ok(())
    }

    fn clear_sw_breakpoints(&mut self, addresses: &[u32]) -> Result<()> {
        self.state.require_debug("clear_sw_breakpoints")?;
        let words = addresses
            .iter()
            .map(|&a| word_address("clear_sw_breakpoints", a))
            .collect::<Result<Vec<_>>>()?;
        if words.is_empty() {
            return Ok(());
        }
        self.command(&protocol::sw_break_clear(&words))?;
        Ok(())
    }

    fn clear_all_sw_breakpoints(&mut self) -> Result<()> {
        self.state.require_debug("clear_all_sw_breakpoints")?;
        self.command(&protocol::sw_break_clear_all())?;
        Ok(())
    }

    fn set_message_listener(&mut self, listener: Box<dyn MessageListener>) {
        self.listener = Some(listener);
    }

    fn set_progress(&mut self, progress: Box<dyn Progress>) {
        self.progress = progress;
    }

    fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = token;
    }

    fn close(&mut self) -> Result<()> {
        HidEngine::close(self)
    }
}

impl<T: HidTransport> HidEngine<T> {
    fn unwind_step(&mut self, step: &str, command: &[u8], first: &mut Option<Error>) {
        if let Err(e) = self.command(command) {
            log::warn!("edbg: {} failed during close: {}", step, e);
            first.get_or_insert(e);
        }
    }

    /// Leave programming or debug mode, deactivate the physical layer and
    /// end the session, continuing past failures
    ///
    /// Returns the first failure after every step has been attempted.
    pub fn close(&mut self) -> Result<()> {
        let mut first = None;

        if self.state.program_active() {
            self.unwind_step("leave programming mode", &protocol::prog_mode_leave(), &mut first);
            self.state.leave_program();
        }
        if self.state.debug_active() {
            self.unwind_step("detach", &protocol::detach(), &mut first);
            self.state.detach();
        }
        if self.state.physical_active() {
            self.unwind_step("deactivate physical", &protocol::deactivate_physical(), &mut first);
            self.state.deactivate_physical();
        }
        if self.state.session_active() {
            self.unwind_step("end session", &protocol::end_session(), &mut first);
            self.state.end_session();
            log::info!("edbg: session closed");
        }

        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<T: HidTransport> Drop for HidEngine<T> {
    fn drop(&mut self) {
        if self.state.session_active() {
            let _ = self.close();
        }
    }
}
