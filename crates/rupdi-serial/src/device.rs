//! Serial UPDI engine
//!
//! [`SerialEngine`] speaks the UPDI instruction set directly over a
//! [`SerialLine`]. Every memory operation brings the link up with a double
//! break, enters NVM programming mode, runs, and resets the part out of
//! programming mode again.

use std::time::Duration;

use rupdi_core::chip::ChipDescriptor;
use rupdi_core::error::{Error, Result};
use rupdi_core::memory::{
    EraseMode, EEPROM_BASE, FUSES_BASE, FUSES_LEN, SERIAL_NUMBER_BASE, SERIAL_NUMBER_LEN,
    SIGNATURE_BASE, USERROW_BASE,
};
use rupdi_core::{CancelToken, NoProgress, Progress, SessionState, Target};

use crate::error::SerialError;
use crate::protocol::{
    self, pesig_name, CtrlA, CtrlB, DataSize, KeyStatus, NvmCommand, NvmStatus, PtrMode,
    SysCtrlA, SysStatus, ACK, CS_ASI_KEY_STATUS, CS_ASI_RESET_REQ, CS_ASI_SYS_CTRLA,
    CS_ASI_SYS_STATUS, CS_CTRLA, CS_CTRLB, CS_STATUSA, CS_STATUSB, KEY_CHIP_ERASE, KEY_LEN,
    KEY_NVM_PROG, KEY_USER_ROW, NVMCTRL_ADDRH, NVMCTRL_ADDRL, NVMCTRL_CTRLA, NVMCTRL_DATAL,
    NVMCTRL_STATUS, RESET_SIGNATURE, SIB_LEN, STATUSB_PESIG,
};
use crate::transport::serial::SerialPortLine;
use crate::transport::SerialLine;

/// Largest block moved by one repeated LD or ST
pub const MAX_BLOCK: usize = 256;

/// Size of the 16-bit data space
const DATA_SPACE_SIZE: u32 = 0x1_0000;

/// Configuration options for a serial UPDI adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Serial device path (e.g. /dev/ttyUSB0, COM3)
    pub device: Option<String>,
    /// Line rate
    pub baud: u32,
    /// Time allowed for the echo of a sent instruction
    pub echo_timeout: Duration,
    /// Time allowed for response bytes
    pub read_timeout: Duration,
    /// Double-break link recovery attempts
    pub link_retries: u32,
    /// SYS_STATUS polls while waiting for programming mode
    pub prog_mode_polls: u32,
    /// Polls of other control/status register bits
    pub register_polls: u32,
    /// NVMCTRL STATUS polls while the controller is busy
    pub nvm_polls: u32,
    /// SYS_STATUS polls while waiting for the lock bit to clear after erase
    pub erase_polls: u32,
    /// Sleep between polls
    pub poll_sleep: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: None,
            baud: 57600,
            echo_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_millis(100),
            link_retries: 5,
            prog_mode_polls: 100,
            register_polls: 100,
            nvm_polls: 10,
            erase_polls: 100,
            poll_sleep: Duration::ZERO,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> crate::error::Result<T> {
    value
        .parse()
        .map_err(|_| SerialError::InvalidParameter(format!("{}: {}", key, value)))
}

/// Parse options from key=value pairs
pub fn parse_options(options: &[(&str, &str)]) -> crate::error::Result<SerialConfig> {
    let mut config = SerialConfig::default();

    for (key, value) in options {
        match *key {
            "dev" | "port" => {
                config.device = Some(value.to_string());
            }
            "baud" => {
                config.baud = parse_number::<u32>(key, value)
                    .ok()
                    .filter(|&b| b > 0)
                    .ok_or_else(|| SerialError::InvalidParameter(format!("baud: {}", value)))?;
            }
            "timeout" => {
                config.read_timeout = Duration::from_millis(parse_number(key, value)?);
            }
            "echotimeout" => {
                config.echo_timeout = Duration::from_millis(parse_number(key, value)?);
            }
            "retries" => {
                config.link_retries = parse_number(key, value)?;
            }
            "nvmpolls" => {
                config.nvm_polls = parse_number(key, value)?;
            }
            "regpolls" => {
                config.register_polls = parse_number(key, value)?;
                config.prog_mode_polls = config.register_polls;
            }
            "erasepolls" => {
                config.erase_polls = parse_number(key, value)?;
            }
            _ => {
                return Err(SerialError::InvalidParameter(format!(
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

/// UPDI engine for a UART wired as a single-wire UPDI line
pub struct SerialEngine<L: SerialLine> {
    line: L,
    chip: ChipDescriptor,
    config: SerialConfig,
    state: SessionState,
    progress: Box<dyn Progress>,
    cancel: CancelToken,
    closed: bool,
}

impl SerialEngine<SerialPortLine> {
    /// Open the configured serial device
    ///
    /// The target is not touched until the first operation.
    pub fn open_port(chip: ChipDescriptor, config: SerialConfig) -> crate::error::Result<Self> {
        let device = config
            .device
            .clone()
            .ok_or_else(|| SerialError::InvalidParameter("dev: serial device required".into()))?;
        let line = SerialPortLine::open(&device, config.baud)?;
        Ok(Self::new(line, chip, config))
    }
}

impl<L: SerialLine> SerialEngine<L> {
    /// Bind an engine to a line
    pub fn new(line: L, chip: ChipDescriptor, config: SerialConfig) -> Self {
        Self {
            line,
            chip,
            config,
            state: SessionState::new(),
            progress: Box::new(NoProgress),
            cancel: CancelToken::new(),
            closed: false,
        }
    }

    /// Current link flags
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Descriptor of the target chip
    pub fn chip(&self) -> &ChipDescriptor {
        &self.chip
    }

    fn require_open(&self, operation: &'static str) -> Result<()> {
        if self.closed {
            return Err(Error::PreconditionViolated {
                operation,
                requires: "open line",
            });
        }
        Ok(())
    }

    fn poll_sleep(&self) {
        if !self.config.poll_sleep.is_zero() {
            std::thread::sleep(self.config.poll_sleep);
        }
    }

    // ------------------------------------------------------------------
    // Line access
    // ------------------------------------------------------------------

    /// Send bytes and verify their echo
    pub fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.line.write(data)?;
        let mut echo = vec![0u8; data.len()];
        let n = self.line.read(&mut echo, self.config.echo_timeout)?;
        if n < data.len() {
            return Err(Error::Timeout("echo"));
        }
        if echo != data {
            return Err(Error::Protocol(format!(
                "echo mismatch: sent {:02X?}, read {:02X?}",
                data, echo
            )));
        }
        Ok(())
    }

    /// Read `len` response bytes
    pub fn get_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let n = self.line.read(&mut buf, self.config.read_timeout)?;
        if n < len {
            return Err(Error::Timeout("response"));
        }
        Ok(buf)
    }

    fn get_ack(&mut self) -> Result<()> {
        let reply = self.get_bytes(1)?[0];
        if reply != ACK {
            return Err(Error::Protocol(format!(
                "expected ACK, got 0x{:02X}",
                reply
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Instructions
    // ------------------------------------------------------------------

    /// Load `size` bytes from a data-space address
    pub fn lds(&mut self, address: u16, size: DataSize) -> Result<Vec<u8>> {
        self.send_bytes(&protocol::lds(address, size))?;
        self.get_bytes(size.len())
    }

    /// Load one byte from a data-space address
    pub fn lds_byte(&mut self, address: u16) -> Result<u8> {
        Ok(self.lds(address, DataSize::Byte)?[0])
    }

    /// Store one byte or word to a data-space address
    pub fn sts(&mut self, address: u16, data: &[u8]) -> Result<()> {
        let size = DataSize::for_len(data.len()).ok_or_else(|| {
            Error::InvalidArgument(format!("sts: {} byte operand", data.len()))
        })?;
        self.send_bytes(&protocol::sts(address, size))?;
        self.get_ack()?;
        self.send_bytes(data)?;
        self.get_ack()
    }

    /// Load `len` bytes through the pointer register
    pub fn ld(&mut self, ptr: PtrMode, size: DataSize, len: usize) -> Result<Vec<u8>> {
        self.send_bytes(&protocol::ld(ptr, size))?;
        self.get_bytes(len)
    }

    /// Store one byte or word through the pointer register
    pub fn st(&mut self, ptr: PtrMode, data: &[u8]) -> Result<()> {
        if DataSize::for_len(data.len()).is_none() {
            return Err(Error::InvalidArgument(format!(
                "st: {} byte operand",
                data.len()
            )));
        }
        self.send_bytes(&protocol::st(ptr, data))?;
        self.get_ack()
    }

    /// Load a control/status register
    pub fn ldcs(&mut self, register: u8) -> Result<u8> {
        self.send_bytes(&protocol::ldcs(register))?;
        Ok(self.get_bytes(1)?[0])
    }

    /// Store a control/status register
    pub fn stcs(&mut self, register: u8, value: u8) -> Result<()> {
        self.send_bytes(&protocol::stcs(register, value))
    }

    /// Run the next instruction `count` times in total
    pub fn repeat(&mut self, count: usize) -> Result<()> {
        if count == 0 || count > MAX_BLOCK {
            return Err(Error::InvalidArgument(format!("repeat: count {}", count)));
        }
        self.send_bytes(&protocol::repeat((count - 1) as u8))
    }

    /// Send a 64-bit key
    pub fn key(&mut self, key: &[u8; KEY_LEN]) -> Result<()> {
        self.send_bytes(&protocol::key(key))
    }

    // ------------------------------------------------------------------
    // Link and mode control
    // ------------------------------------------------------------------

    /// Bring the link up with double breaks until STATUSB reports no error
    pub fn init(&mut self) -> Result<()> {
        for attempt in 1..=self.config.link_retries {
            self.cancel.check()?;
            match self.try_link() {
                Ok(0) => {
                    self.state.start_session();
                    self.state.activate_physical("init")?;
                    return Ok(());
                }
                Ok(code) => {
                    log::warn!("updi: link attempt {}: {}", attempt, pesig_name(code));
                }
                Err(e) => {
                    log::warn!("updi: link attempt {}: {}", attempt, e);
                }
            }
        }
        Err(Error::Timeout("link init"))
    }

    fn try_link(&mut self) -> Result<u8> {
        self.line.send_double_break()?;
        self.stcs(CS_CTRLB, CtrlB::CCDETDIS.bits())?;
        self.stcs(CS_CTRLA, CtrlA::IBDLY.bits())?;
        self.ldcs(CS_STATUSA)?;
        let code = self.ldcs(CS_STATUSB)? & STATUSB_PESIG;
        if code == 0 {
            let revision = self.ldcs(CS_STATUSA)? >> 4;
            self.ldcs(CS_STATUSB)?;
            log::debug!("updi: link up, UPDI revision {}", revision);
        }
        Ok(code)
    }

    fn reset_pulse(&mut self) -> Result<()> {
        self.stcs(CS_ASI_RESET_REQ, RESET_SIGNATURE)?;
        self.stcs(CS_ASI_RESET_REQ, 0x00)
    }

    /// Poll a control/status register until `mask` is fully set or clear
    fn poll_cs(
        &mut self,
        register: u8,
        mask: u8,
        set: bool,
        polls: u32,
        what: &'static str,
    ) -> Result<()> {
        for _ in 0..polls {
            self.cancel.check()?;
            let value = self.ldcs(register)? & mask;
            let reached = if set { value == mask } else { value == 0 };
            if reached {
                return Ok(());
            }
            self.poll_sleep();
        }
        Err(Error::Timeout(what))
    }

    /// Send the programming key and reset the part into NVM programming mode
    pub fn enter_prog_mode(&mut self) -> Result<()> {
        let mut next = self.state;
        next.enter_program("enter_prog_mode")?;

        let entered = self.key(&KEY_NVM_PROG).and_then(|_| {
            self.reset_pulse()?;
            self.poll_cs(
                CS_ASI_SYS_STATUS,
                SysStatus::NVMPROG.bits(),
                true,
                self.config.prog_mode_polls,
                "NVM programming mode",
            )
        });
        if let Err(e) = entered {
            // a latched key or a held reset must not outlive the failure
            if let Err(exit_err) = self.exit_prog_mode() {
                log::warn!("updi: releasing target after failed entry: {}", exit_err);
            }
            return Err(e);
        }

        self.state = next;
        log::debug!("updi: in NVM programming mode");
        Ok(())
    }

    /// Reset the part out of NVM programming mode
    pub fn exit_prog_mode(&mut self) -> Result<()> {
        self.state.leave_program();
        self.reset_pulse()?;
        self.ldcs(CS_ASI_SYS_STATUS)?;
        log::debug!("updi: left NVM programming mode");
        Ok(())
    }

    /// Link up, enter programming mode, run `action`, leave programming mode
    fn with_nvm<R>(
        &mut self,
        operation: &'static str,
        action: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        self.require_open(operation)?;
        self.init()?;
        self.enter_prog_mode()?;
        let result = action(self);
        let exit = self.exit_prog_mode();
        match (result, exit) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), exit) => {
                if let Err(exit_err) = exit {
                    log::warn!("updi: leaving programming mode after {}: {}", operation, exit_err);
                }
                Err(e)
            }
        }
    }

    /// Read the 16-byte system information block
    pub fn read_system_info_block(&mut self) -> Result<[u8; SIB_LEN]> {
        self.require_open("read_system_info_block")?;
        self.init()?;
        self.send_bytes(&protocol::read_sib())?;
        let data = self.get_bytes(SIB_LEN)?;
        let mut sib = [0u8; SIB_LEN];
        sib.copy_from_slice(&data);
        log::debug!("updi: SIB {:?}", String::from_utf8_lossy(&sib));
        Ok(sib)
    }

    // ------------------------------------------------------------------
    // NVM controller
    // ------------------------------------------------------------------

    fn nvm_register(&self, offset: u16) -> u16 {
        self.chip.nvm_base + offset
    }

    fn nvm_command(&mut self, command: NvmCommand) -> Result<()> {
        log::trace!("updi: NVM command {:?}", command);
        self.sts(self.nvm_register(NVMCTRL_CTRLA), &[command as u8])
    }

    /// Poll NVMCTRL STATUS until neither busy flag is set
    ///
    /// Returns the number of polls it took.
    pub fn wait_nvm_ready(&mut self) -> Result<u32> {
        for poll in 1..=self.config.nvm_polls {
            self.cancel.check()?;
            let status = NvmStatus::from_bits_truncate(
                self.lds_byte(self.nvm_register(NVMCTRL_STATUS))?,
            );
            if status.contains(NvmStatus::WRERROR) {
                return Err(Error::Protocol("NVM write error".into()));
            }
            if !status.intersects(NvmStatus::FBUSY | NvmStatus::EEBUSY) {
                return Ok(poll);
            }
            self.poll_sleep();
        }
        Err(Error::Timeout("NVM busy"))
    }

    // ------------------------------------------------------------------
    // Memory access
    // ------------------------------------------------------------------

    fn check_block(address: u32, len: usize) -> Result<()> {
        if len > MAX_BLOCK {
            return Err(Error::InvalidArgument(format!(
                "block of {} bytes exceeds {}",
                len, MAX_BLOCK
            )));
        }
        check_range("data space", address, len, DATA_SPACE_SIZE)
    }

    /// Read up to 256 bytes of data space with a repeated `LD *(ptr++)`
    pub fn read_memory(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        Self::check_block(address, len)?;
        if len == 0 {
            return Ok(Vec::new());
        }
        self.st(PtrMode::Pointer, &(address as u16).to_le_bytes())?;
        self.repeat(len)?;
        self.ld(PtrMode::PostInc, DataSize::Byte, len)
    }

    /// Write up to 256 bytes of data space with a repeated `ST *(ptr++)`
    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.write_block(address, data, DataSize::Byte)
    }

    fn write_block(&mut self, address: u32, data: &[u8], size: DataSize) -> Result<()> {
        let step = size.len();
        let count = data.len() / step;
        if data.len() % step != 0 || count > MAX_BLOCK {
            return Err(Error::InvalidArgument(format!(
                "block of {} bytes in {}-byte units",
                data.len(),
                step
            )));
        }
        check_range("data space", address, data.len(), DATA_SPACE_SIZE)?;
        if count == 0 {
            return Ok(());
        }

        self.st(PtrMode::Pointer, &(address as u16).to_le_bytes())?;
        self.repeat(count)?;
        let mut units = data.chunks(step);
        if let Some(first) = units.next() {
            self.st(PtrMode::PostInc, first)?;
        }
        for unit in units {
            self.send_bytes(unit)?;
            self.get_ack()?;
        }
        Ok(())
    }

    fn read_tiled(&mut self, phase: &str, base: u32, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        self.progress.start(phase, len);
        while out.len() < len {
            let chunk = (len - out.len()).min(MAX_BLOCK);
            let data = self.read_memory(base + out.len() as u32, chunk)?;
            out.extend_from_slice(&data);
            self.progress.update(out.len());
        }
        self.progress.finish();
        Ok(out)
    }

    /// Chip erase through the NVM controller, then one page-buffer cycle per
    /// flash page
    fn program_flash(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let page = self.chip.flash_page_size as usize;

        self.wait_nvm_ready()?;
        self.nvm_command(NvmCommand::ChipErase)?;
        self.wait_nvm_ready()?;

        self.progress.start("Writing flash", data.len());
        for (i, chunk) in data.chunks(page).enumerate() {
            let mut buf = chunk.to_vec();
            buf.resize(page, 0xFF);
            let target = self.chip.prog_base + address + (i * page) as u32;

            self.nvm_command(NvmCommand::PageBufferClear)?;
            self.wait_nvm_ready()?;
            self.write_block(target, &buf, DataSize::Word)?;
            self.nvm_command(NvmCommand::WritePage)?;
            self.wait_nvm_ready()?;

            self.progress.update(((i + 1) * page).min(data.len()));
        }
        self.progress.finish();
        Ok(())
    }

    /// EEPROM erase, then page-buffer cycles that never cross a page boundary
    fn program_eeprom(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let page = self.chip.eeprom_page_size as usize;

        self.wait_nvm_ready()?;
        self.nvm_command(NvmCommand::EepromErase)?;

        self.progress.start("Writing EEPROM", data.len());
        let mut done = 0;
        while done < data.len() {
            let offset = address as usize + done;
            let len = (page - offset % page).min(data.len() - done);

            self.wait_nvm_ready()?;
            self.nvm_command(NvmCommand::PageBufferClear)?;
            self.write_memory(EEPROM_BASE + offset as u32, &data[done..done + len])?;
            self.nvm_command(NvmCommand::WritePage)?;

            done += len;
            self.progress.update(done);
        }
        self.wait_nvm_ready()?;
        self.progress.finish();
        Ok(())
    }

    fn program_fuses(&mut self, offsets: &[u8], values: &[u8]) -> Result<()> {
        for (&offset, &value) in offsets.iter().zip(values) {
            self.poll_cs(
                CS_ASI_SYS_STATUS,
                SysStatus::NVMPROG.bits(),
                true,
                self.config.register_polls,
                "NVM programming mode",
            )?;
            let [lo, hi] = ((FUSES_BASE + offset as u32) as u16).to_le_bytes();
            self.sts(self.nvm_register(NVMCTRL_ADDRL), &[lo])?;
            self.sts(self.nvm_register(NVMCTRL_ADDRH), &[hi])?;
            self.sts(self.nvm_register(NVMCTRL_DATAL), &[value])?;
            self.nvm_command(NvmCommand::WriteFuse)?;
            self.wait_nvm_ready()?;
            log::debug!("updi: fuse {} = 0x{:02X}", offset, value);
        }
        Ok(())
    }

    /// User row key, reset into user-row programming, buffered write,
    /// finalise, then reset out again
    fn program_user_row(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let polls = self.config.register_polls;

        self.key(&KEY_USER_ROW)?;
        self.poll_cs(
            CS_ASI_KEY_STATUS,
            KeyStatus::UROWWRITE.bits(),
            true,
            polls,
            "user row key",
        )?;

        self.stcs(CS_ASI_RESET_REQ, RESET_SIGNATURE)?;
        self.ldcs(CS_ASI_SYS_STATUS)?;
        self.stcs(CS_ASI_RESET_REQ, 0x00)?;
        self.poll_cs(
            CS_ASI_SYS_STATUS,
            SysStatus::UROWPROG.bits(),
            true,
            polls,
            "user row programming",
        )?;

        self.write_memory(USERROW_BASE + address, data)?;

        self.stcs(CS_ASI_SYS_CTRLA, SysCtrlA::UROWWRITE_FINAL.bits())?;
        self.poll_cs(
            CS_ASI_SYS_STATUS,
            SysStatus::UROWPROG.bits(),
            false,
            polls,
            "user row write",
        )?;
        self.stcs(CS_ASI_KEY_STATUS, KeyStatus::UROWWRITE.bits())?;

        self.stcs(CS_ASI_RESET_REQ, RESET_SIGNATURE)?;
        self.ldcs(CS_ASI_SYS_STATUS)?;
        self.stcs(CS_ASI_RESET_REQ, 0x00)?;
        self.poll_cs(
            CS_ASI_SYS_STATUS,
            SysStatus::RSTSYS.bits(),
            false,
            polls,
            "reset release",
        )
    }

    /// Erase flash and EEPROM with the chip erase key, unlocking the part
    pub fn erase_chip(&mut self) -> Result<()> {
        self.key(&KEY_CHIP_ERASE)?;
        let status = KeyStatus::from_bits_truncate(self.ldcs(CS_ASI_KEY_STATUS)?);
        if !status.contains(KeyStatus::CHIPERASE) {
            return Err(Error::Protocol("chip erase key not accepted".into()));
        }
        self.reset_pulse()?;
        self.poll_cs(
            CS_ASI_SYS_STATUS,
            SysStatus::LOCKSTATUS.bits(),
            false,
            self.config.erase_polls,
            "chip erase",
        )?;
        log::info!("updi: chip erased");
        Ok(())
    }

    /// Leave programming mode if needed and release the line
    ///
    /// Later operations are refused.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut result = Ok(());
        if self.state.program_active() {
            if let Err(e) = self.exit_prog_mode() {
                log::warn!("updi: leave programming mode failed during close: {}", e);
                result = Err(e);
            }
        }
        self.state.end_session();
        log::info!("updi: line closed");
        result
    }
}

impl<L: SerialLine> Target for SerialEngine<L> {
    fn device_signature(&mut self) -> Result<[u8; 3]> {
        let data = self.with_nvm("device_signature", |e| e.read_memory(SIGNATURE_BASE, 3))?;
        Ok([data[0], data[1], data[2]])
    }

    fn device_serial_number(&mut self) -> Result<Vec<u8>> {
        self.with_nvm("device_serial_number", |e| {
            e.read_memory(SERIAL_NUMBER_BASE, SERIAL_NUMBER_LEN)
        })
    }

    fn read_flash(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        check_range("flash", address, len, self.chip.flash_size)?;
        let base = self.chip.prog_base + address;
        self.with_nvm("read_flash", |e| e.read_tiled("Reading flash", base, len))
    }

    /// Chip erase, then program `data` page by page
    ///
    /// Empty `data` is a no-op: nothing is erased and the line stays idle.
    fn write_flash(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let page = self.chip.flash_page_size as usize;
        if address as usize % page != 0 {
            return Err(Error::InvalidArgument(format!(
                "flash write at 0x{:X} is not page aligned ({} bytes)",
                address, page
            )));
        }
        let padded = data.len().div_ceil(page) * page;
        check_range("flash", address, padded, self.chip.flash_size)?;
        if data.is_empty() {
            return Ok(());
        }
        self.with_nvm("write_flash", |e| e.program_flash(address, data))
    }

    fn erase_target(&mut self, address: u32, mode: EraseMode) -> Result<()> {
        if mode != EraseMode::Chip || address != 0 {
            return Err(Error::InvalidArgument(format!(
                "erase {} at 0x{:X}: only a chip erase at address 0 is supported",
                mode.name(),
                address
            )));
        }
        self.with_nvm("erase_target", |e| e.erase_chip())
    }

    fn read_fuses(&mut self, offsets: &[u8]) -> Result<Vec<u8>> {
        if let Some(&bad) = offsets.iter().find(|&&o| o as usize >= FUSES_LEN) {
            return Err(Error::InvalidArgument(format!("fuse offset {}", bad)));
        }
        let fuses = self.with_nvm("read_fuses", |e| e.read_memory(FUSES_BASE, FUSES_LEN))?;
        Ok(offsets.iter().map(|&o| fuses[o as usize]).collect())
    }

    fn write_fuses(&mut self, offsets: &[u8], values: &[u8]) -> Result<()> {
        if offsets.len() != values.len() {
            return Err(Error::InvalidArgument(format!(
                "{} fuse offsets but {} values",
                offsets.len(),
                values.len()
            )));
        }
        if let Some(&bad) = offsets.iter().find(|&&o| o as usize >= FUSES_LEN) {
            return Err(Error::InvalidArgument(format!("fuse offset {}", bad)));
        }
        self.with_nvm("write_fuses", |e| e.program_fuses(offsets, values))
    }

    fn read_eeprom(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        check_range("eeprom", address, len, self.chip.eeprom_size)?;
        self.with_nvm("read_eeprom", |e| {
            e.wait_nvm_ready()?;
            e.read_tiled("Reading EEPROM", EEPROM_BASE + address, len)
        })
    }

    fn write_eeprom(&mut self, address: u32, data: &[u8]) -> Result<()> {
        check_range("eeprom", address, data.len(), self.chip.eeprom_size)?;
        self.with_nvm("write_eeprom", |e| e.program_eeprom(address, data))
    }

    fn read_user_row(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        check_range("user row", address, len, self.chip.user_row_size())?;
        self.with_nvm("read_user_row", |e| {
            e.read_memory(USERROW_BASE + address, len)
        })
    }

    fn write_user_row(&mut self, address: u32, data: &[u8]) -> Result<()> {
        check_range("user row", address, data.len(), self.chip.user_row_size())?;
        self.with_nvm("write_user_row", |e| e.program_user_row(address, data))
    }

    fn set_progress(&mut self, progress: Box<dyn Progress>) {
        self.progress = progress;
    }

    fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = token;
    }

    fn close(&mut self) -> Result<()> {
        SerialEngine::close(self)
    }
}

impl<L: SerialLine> Drop for SerialEngine<L> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use rupdi_core::chip::ChipDatabase;

    use super::*;
    use crate::sim::SimTarget;

    fn attiny817() -> ChipDescriptor {
        ChipDatabase::builtin()
            .unwrap()
            .find("attiny817")
            .unwrap()
            .clone()
    }

    fn open() -> (SerialEngine<SimTarget>, SimTarget) {
        let chip = attiny817();
        let sim = SimTarget::new(&chip);
        let engine = SerialEngine::new(sim.clone(), chip, SerialConfig::default());
        (engine, sim)
    }

    #[test]
    fn test_parse_options() {
        let config = parse_options(&[
            ("dev", "/dev/ttyUSB0"),
            ("baud", "115200"),
            ("timeout", "50"),
            ("nvmpolls", "20"),
        ])
        .unwrap();
        assert_eq!(config.device.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.baud, 115200);
        assert_eq!(config.read_timeout, Duration::from_millis(50));
        assert_eq!(config.nvm_polls, 20);

        assert!(parse_options(&[("baud", "0")]).is_err());
        assert!(parse_options(&[("baud", "fast")]).is_err());
        assert!(matches!(
            parse_options(&[("parity", "odd")]),
            Err(SerialError::InvalidParameter(msg)) if msg == "unknown option: parity"
        ));
    }

    #[test]
    fn test_default_config() {
        let config = SerialConfig::default();
        assert_eq!(config.baud, 57600);
        assert_eq!(config.echo_timeout, Duration::from_millis(500));
        assert_eq!(config.read_timeout, Duration::from_millis(100));
        assert_eq!(config.link_retries, 5);
        assert_eq!(config.nvm_polls, 10);
    }

    #[test]
    fn test_signature_and_serial() {
        let (mut engine, sim) = open();
        let chip = engine.chip().clone();
        assert_eq!(engine.device_signature().unwrap(), chip.signature);
        assert_eq!(sim.breaks(), 1);
        assert!(!engine.state().program_active());
        assert!(!sim.sys_status().contains(SysStatus::NVMPROG));

        let serial = engine.device_serial_number().unwrap();
        assert_eq!(serial.len(), SERIAL_NUMBER_LEN);
        assert_eq!(serial[0], 0xA0);
    }

    #[test]
    fn test_link_recovery_retries() {
        let (mut engine, sim) = open();
        sim.push_pesig(2);
        sim.push_pesig(4);
        engine.init().unwrap();
        assert_eq!(sim.breaks(), 3);
        assert!(engine.state().physical_active());
    }

    #[test]
    fn test_link_recovery_gives_up() {
        let (mut engine, sim) = open();
        for _ in 0..5 {
            sim.push_pesig(7);
        }
        assert_eq!(engine.init(), Err(Error::Timeout("link init")));
        assert_eq!(sim.breaks(), 5);
    }

    #[test]
    fn test_echo_corruption_is_a_protocol_error() {
        let (mut engine, sim) = open();
        engine.init().unwrap();
        sim.corrupt_echo(2);
        let err = engine.sts(0x1008, &[0x12]).unwrap_err();
        assert!(matches!(err, Error::Protocol(msg) if msg.starts_with("echo mismatch")));
        // the data phase never went out
        assert_eq!(sim.data(0x1008), 0x00);
    }

    #[test]
    fn test_nvm_busy_clears_after_exact_poll_count() {
        let (mut engine, sim) = open();
        engine.init().unwrap();

        sim.start_busy(4);
        let before = sim.status_reads();
        assert_eq!(engine.wait_nvm_ready(), Ok(5));
        assert_eq!(sim.status_reads() - before, 5);

        sim.start_busy(20);
        let before = sim.status_reads();
        assert_eq!(engine.wait_nvm_ready(), Err(Error::Timeout("NVM busy")));
        assert_eq!(sim.status_reads() - before, 10);
    }

    #[test]
    fn test_flash_write_pads_last_page() {
        let (mut engine, sim) = open();
        sim.set_busy_polls(3);
        let data: Vec<u8> = (0..208).map(|i| (i * 7) as u8).collect();
        engine.write_flash(0, &data).unwrap();

        assert_eq!(sim.page_writes(), 4);
        let flash = engine.read_flash(0, 256).unwrap();
        assert_eq!(&flash[..208], &data[..]);
        assert!(flash[208..].iter().all(|&b| b == 0xFF));
        assert!(!engine.state().program_active());
    }

    #[test]
    fn test_flash_write_checks_alignment_and_size() {
        let (mut engine, sim) = open();
        assert!(matches!(
            engine.write_flash(0x10, &[0; 16]),
            Err(Error::InvalidArgument(_))
        ));
        let too_big = vec![0u8; engine.chip().flash_size as usize + 1];
        assert!(matches!(
            engine.write_flash(0, &too_big),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(sim.bytes_written(), 0);
    }

    #[test]
    fn test_empty_flash_write_keeps_contents() {
        let (mut engine, sim) = open();
        sim.load_flash(0, &[0x12, 0x34]);
        engine.write_flash(0, &[]).unwrap();
        assert_eq!(sim.bytes_written(), 0);
        assert_eq!(sim.breaks(), 0);
        assert_eq!(&sim.flash()[..2], &[0x12, 0x34]);
    }

    #[test]
    fn test_failed_prog_mode_entry_releases_target() {
        let chip = attiny817();
        let sim = SimTarget::new(&chip);
        let config = SerialConfig {
            prog_mode_polls: 3,
            ..SerialConfig::default()
        };
        let mut engine = SerialEngine::new(sim.clone(), chip, config);
        sim.refuse_prog_mode();

        assert_eq!(
            engine.write_flash(0, &[1, 2, 3, 4]),
            Err(Error::Timeout("NVM programming mode"))
        );
        // one reset to enter, one to leave
        assert_eq!(sim.resets(), 2);
        assert!(!sim.sys_status().contains(SysStatus::RSTSYS));
        assert!(!engine.state().program_active());
        assert_eq!(sim.page_writes(), 0);
    }

    #[test]
    fn test_flash_write_times_out_when_nvm_stays_busy() {
        let (mut engine, sim) = open();
        sim.set_busy_polls(u32::MAX);
        assert_eq!(
            engine.write_flash(0, &[1, 2, 3, 4]),
            Err(Error::Timeout("NVM busy"))
        );
        assert_eq!(sim.page_writes(), 0);
        assert!(!engine.state().program_active());
    }

    #[test]
    fn test_fuses() {
        let (mut engine, sim) = open();
        engine.write_fuses(&[0, 5], &[0x7E, 0xC4]).unwrap();
        assert_eq!(sim.fuse(0), 0x7E);
        assert_eq!(engine.read_fuses(&[5, 0]).unwrap(), vec![0xC4, 0x7E]);
    }

    #[test]
    fn test_fuse_length_mismatch_writes_nothing() {
        let (mut engine, sim) = open();
        assert!(matches!(
            engine.write_fuses(&[0, 1], &[0x00]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            engine.read_fuses(&[11]),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(sim.bytes_written(), 0);
    }

    #[test]
    fn test_eeprom_write_splits_at_pages() {
        let (mut engine, sim) = open();
        let data: Vec<u8> = (0..40).collect();
        engine.write_eeprom(0x10, &data).unwrap();
        // 0x10..0x20, 0x20..0x38 with 32-byte pages
        assert_eq!(sim.page_writes(), 2);
        assert_eq!(engine.read_eeprom(0x10, 40).unwrap(), data);
        assert_eq!(sim.eeprom()[0], 0xFF);
    }

    #[test]
    fn test_user_row() {
        let (mut engine, sim) = open();
        engine.write_user_row(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(engine.read_user_row(4, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(sim.user_row()[0], 0xFF);
        assert!(!sim.sys_status().contains(SysStatus::UROWPROG));

        let size = engine.chip().user_row_size();
        assert!(matches!(
            engine.write_user_row(size, &[0]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_chip_erase() {
        let (mut engine, sim) = open();
        sim.load_flash(0, &[0x00; 32]);
        sim.set_lock_polls(3);
        engine.erase_target(0, EraseMode::Chip).unwrap();
        assert!(sim.flash().iter().all(|&b| b == 0xFF));

        assert!(matches!(
            engine.erase_target(0x40, EraseMode::Chip),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            engine.erase_target(0, EraseMode::AppPage),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_chip_erase_times_out_while_locked() {
        let (mut engine, sim) = open();
        sim.set_lock_polls(u32::MAX);
        assert_eq!(
            engine.erase_target(0, EraseMode::Chip),
            Err(Error::Timeout("chip erase"))
        );
    }

    #[test]
    fn test_system_info_block() {
        let (mut engine, _sim) = open();
        let sib = engine.read_system_info_block().unwrap();
        assert_eq!(&sib, b"tinyAVR P:0D:1-3");
    }

    #[test]
    fn test_block_limits() {
        let (mut engine, _sim) = open();
        engine.init().unwrap();
        assert!(matches!(
            engine.read_memory(0x8000, 257),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            engine.write_memory(0xFFFF, &[0, 0]),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(engine.read_memory(0x8000, 0), Ok(Vec::new()));
    }

    #[test]
    fn test_debug_ops_unsupported() {
        let (mut engine, _sim) = open();
        assert!(matches!(engine.step(), Err(Error::Unsupported(_))));
        assert!(matches!(engine.read_sram(0x3800, 4), Err(Error::Unsupported(_))));
        assert!(matches!(engine.target_voltage(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_close_refuses_later_operations() {
        let (mut engine, _sim) = open();
        engine.close().unwrap();
        assert_eq!(
            engine.device_signature(),
            Err(Error::PreconditionViolated {
                operation: "device_signature",
                requires: "open line",
            })
        );
        assert_eq!(engine.close(), Ok(()));
    }

    #[test]
    fn test_cancelled_poll() {
        let (mut engine, sim) = open();
        let token = CancelToken::new();
        engine.set_cancel_token(token.clone());
        engine.init().unwrap();
        sim.start_busy(100);
        token.cancel();
        assert_eq!(engine.wait_nvm_ready(), Err(Error::Cancelled));
    }
}
