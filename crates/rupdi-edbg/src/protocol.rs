//! EDBG protocol constants, framing and command builders
//!
//! The probe speaks the Atmel AVR communication protocol tunnelled through
//! 64-byte vendor HID reports. A command frame is
//! `[SOF, version, seq_lo, seq_hi, handler, command...]`. It is split into
//! fragments of at most 60 bytes, each prefixed with
//! `[AVR_CMD, index << 4 | count, len_hi, len_lo]`. Responses are fetched
//! with `AVR_RSP` polls and events with `AVR_EVT` polls.

use rupdi_core::error::{Error, Result};
use rupdi_core::memory::{EraseMode, MemType};

// HID report geometry
pub const REPORT_SIZE: usize = 64;
pub const FRAGMENT_HEADER: usize = 4;
pub const FRAGMENT_PAYLOAD: usize = REPORT_SIZE - FRAGMENT_HEADER;
/// Fragment index and count share one byte as nibbles
pub const MAX_FRAGMENTS: usize = 15;

// Inner frame
pub const SOF: u8 = 0x0E;
pub const PROTOCOL_VERSION: u8 = 0x00;
pub const FRAME_HEADER: usize = 4;

// Vendor report IDs
pub const AVR_CMD: u8 = 0x80;
pub const AVR_RSP: u8 = 0x81;
pub const AVR_EVT: u8 = 0x82;

/// Second byte of an AVR_CMD reply once the command has been queued
pub const CMD_RESPONSE_PENDING: u8 = 0x01;

// Sub-protocol handler IDs
pub const HANDLER_DISCOVERY: u8 = 0x00;
pub const HANDLER_HOUSEKEEPING: u8 = 0x01;
pub const HANDLER_AVRISP: u8 = 0x11;
pub const HANDLER_AVR8: u8 = 0x12;
pub const HANDLER_AVR32: u8 = 0x13;
pub const HANDLER_TPI: u8 = 0x14;
pub const HANDLER_EDBG_CTRL: u8 = 0x20;

// Response IDs (shared by every handler)
pub const RSP_OK: u8 = 0x80;
pub const RSP_LIST: u8 = 0x81;
pub const RSP_EVENT: u8 = 0x82;
pub const RSP_PC: u8 = 0x83;
pub const RSP_DATA: u8 = 0x84;
pub const RSP_FAILED: u8 = 0xA0;

// Event IDs
pub const EVT_AVR8_BREAK: u8 = 0x40;
pub const EVT_AVR8_IDR: u8 = 0x41;

// DISCOVERY
pub const CMD_DISCOVERY_QUERY: u8 = 0x00;
pub const DISCOVERY_COMMAND_HANDLERS: u8 = 0x00;
pub const DISCOVERY_TOOL_NAME: u8 = 0x80;
pub const DISCOVERY_SERIAL_NUMBER: u8 = 0x81;
pub const DISCOVERY_MNF_DATE: u8 = 0x82;

// HOUSEKEEPING
pub const CMD_HOUSEKEEPING_QUERY: u8 = 0x00;
pub const CMD_HOUSEKEEPING_SET: u8 = 0x01;
pub const CMD_HOUSEKEEPING_GET: u8 = 0x02;
pub const CMD_HOUSEKEEPING_START_SESSION: u8 = 0x10;
pub const CMD_HOUSEKEEPING_END_SESSION: u8 = 0x11;
pub const CMD_HOUSEKEEPING_JTAG_DETECT: u8 = 0x30;
pub const CMD_HOUSEKEEPING_CAL_OSC: u8 = 0x31;
pub const CMD_HOUSEKEEPING_FW_UPGRADE: u8 = 0x50;
pub const HK_CONTEXT_CONFIG: u8 = 0x00;
pub const HK_CONTEXT_ANALOG: u8 = 0x01;
pub const HOUSEKEEPING_CONFIG_HWREV: u8 = 0x00;
pub const HOUSEKEEPING_CONFIG_FWREV_MAJ: u8 = 0x01;
pub const HOUSEKEEPING_CONFIG_FWREV_MIN: u8 = 0x02;
pub const HOUSEKEEPING_CONFIG_BUILD: u8 = 0x03;
pub const HOUSEKEEPING_ANALOG_VTREF: u8 = 0x00;

// EDBG_CTRL
pub const CMD_EDBG_QUERY: u8 = 0x00;
pub const CMD_EDBG_SET: u8 = 0x01;
pub const CMD_EDBG_GET: u8 = 0x02;
pub const EDBG_QUERY_COMMANDS: u8 = 0x00;
pub const EDBG_CONTEXT_CONTROL: u8 = 0x00;
pub const EDBG_CONTEXT_CONFIG0: u8 = 0x10;
pub const EDBG_CONTEXT_CONFIG1: u8 = 0x11;
pub const EDBG_CTRL_LED_USAGE: u8 = 0x00;
pub const EDBG_CTRL_EXT_PROG: u8 = 0x01;
pub const EDBG_CTRL_TARGET_POWER: u8 = 0x10;

// AVR8GENERIC commands
pub const CMD_AVR8_QUERY: u8 = 0x00;
pub const CMD_AVR8_SET: u8 = 0x01;
pub const CMD_AVR8_GET: u8 = 0x02;
pub const CMD_AVR8_ACTIVATE_PHYSICAL: u8 = 0x10;
pub const CMD_AVR8_DEACTIVATE_PHYSICAL: u8 = 0x11;
pub const CMD_AVR8_GET_ID: u8 = 0x12;
pub const CMD_AVR8_ATTACH: u8 = 0x13;
pub const CMD_AVR8_DETACH: u8 = 0x14;
pub const CMD_AVR8_PROG_MODE_ENTER: u8 = 0x15;
pub const CMD_AVR8_PROG_MODE_LEAVE: u8 = 0x16;
pub const CMD_AVR8_DISABLE_DEBUGWIRE: u8 = 0x17;
pub const CMD_AVR8_ERASE: u8 = 0x20;
pub const CMD_AVR8_MEMORY_READ: u8 = 0x21;
pub const CMD_AVR8_MEMORY_READ_MASKED: u8 = 0x22;
pub const CMD_AVR8_MEMORY_WRITE: u8 = 0x23;
pub const CMD_AVR8_CRC: u8 = 0x24;
pub const CMD_AVR8_RESET: u8 = 0x30;
pub const CMD_AVR8_STOP: u8 = 0x31;
pub const CMD_AVR8_RUN: u8 = 0x32;
pub const CMD_AVR8_RUN_TO_ADDRESS: u8 = 0x33;
pub const CMD_AVR8_STEP: u8 = 0x34;
pub const CMD_AVR8_PC_READ: u8 = 0x35;
pub const CMD_AVR8_PC_WRITE: u8 = 0x36;
pub const CMD_AVR8_HW_BREAK_SET: u8 = 0x40;
pub const CMD_AVR8_HW_BREAK_CLEAR: u8 = 0x41;
pub const CMD_AVR8_SW_BREAK_SET: u8 = 0x43;
pub const CMD_AVR8_SW_BREAK_CLEAR: u8 = 0x44;
pub const CMD_AVR8_SW_BREAK_CLEAR_ALL: u8 = 0x45;
pub const CMD_AVR8_PAGE_ERASE: u8 = 0x50;

// AVR8 SET/GET contexts and parameters
pub const AVR8_CTXT_CONFIG: u8 = 0x00;
pub const AVR8_CTXT_PHYSICAL: u8 = 0x01;
pub const AVR8_CTXT_DEVICE: u8 = 0x02;
pub const AVR8_CTXT_OPTIONS: u8 = 0x03;
pub const AVR8_CTXT_SESSION: u8 = 0x04;
pub const AVR8_CONFIG_VARIANT: u8 = 0x00;
pub const AVR8_CONFIG_FUNCTION: u8 = 0x01;
pub const AVR8_VARIANT_UPDI: u8 = 0x05;
pub const AVR8_FUNC_PROGRAMMING: u8 = 0x01;
pub const AVR8_FUNC_DEBUGGING: u8 = 0x02;
pub const AVR8_PHY_INTERFACE: u8 = 0x00;
pub const AVR8_PHY_XM_PDI_CLK: u8 = 0x31;
pub const AVR8_PHY_INTF_PDI_1W: u8 = 0x08;
pub const AVR8_QUERY_COMMANDS: u8 = 0x00;

/// Most bytes moved by a single MEMORY_READ / MEMORY_WRITE
pub const MAX_MEMORY_CHUNK: usize = 64;

// ============================================================================
// Framing
// ============================================================================

/// Prefix a command with the frame header
pub fn wrap_frame(seq: u16, command: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER + command.len());
    frame.push(SOF);
    frame.push(PROTOCOL_VERSION);
    frame.extend_from_slice(&seq.to_le_bytes());
    frame.extend_from_slice(command);
    frame
}

/// Number of AVR_CMD reports needed to carry a frame of `frame_len` bytes
pub fn fragment_count(frame_len: usize) -> usize {
    frame_len.div_ceil(FRAGMENT_PAYLOAD)
}

/// Split a frame into zero-padded AVR_CMD reports
pub fn fragments(frame: &[u8]) -> Result<Vec<[u8; REPORT_SIZE]>> {
    let count = fragment_count(frame.len());
    if count == 0 || count > MAX_FRAGMENTS {
        return Err(Error::InvalidArgument(format!(
            "command frame of {} bytes needs {} fragments (max {})",
            frame.len(),
            count,
            MAX_FRAGMENTS
        )));
    }

    Ok(frame
        .chunks(FRAGMENT_PAYLOAD)
        .enumerate()
        .map(|(i, chunk)| {
            let mut report = [0u8; REPORT_SIZE];
            report[0] = AVR_CMD;
            report[1] = (((i + 1) as u8) << 4) | count as u8;
            report[2..4].copy_from_slice(&(chunk.len() as u16).to_be_bytes());
            report[FRAGMENT_HEADER..FRAGMENT_HEADER + chunk.len()].copy_from_slice(chunk);
            report
        })
        .collect())
}

/// One AVR_RSP poll reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFragment<'a> {
    /// Fragment number, starting at 1
    pub index: u8,
    /// Total fragments; 0 while no response is ready
    pub count: u8,
    /// Payload bytes carried by this fragment
    pub data: &'a [u8],
}

/// Parse an AVR_RSP poll reply
pub fn parse_response_fragment(report: &[u8]) -> Result<ResponseFragment<'_>> {
    if report.len() < FRAGMENT_HEADER || report[0] != AVR_RSP {
        return Err(Error::Protocol(format!(
            "expected AVR_RSP reply, got {:02X?}",
            &report[..report.len().min(FRAGMENT_HEADER)]
        )));
    }
    let len = u16::from_be_bytes([report[2], report[3]]) as usize;
    let data = report
        .get(FRAGMENT_HEADER..FRAGMENT_HEADER + len)
        .ok_or_else(|| {
            Error::Protocol(format!(
                "response fragment claims {} bytes, report holds {}",
                len,
                report.len() - FRAGMENT_HEADER
            ))
        })?;
    Ok(ResponseFragment {
        index: report[1] >> 4,
        count: report[1] & 0x0F,
        data,
    })
}

/// Accumulates AVR_RSP fragments into one response frame
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    frame: Vec<u8>,
    complete: bool,
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one poll reply, returning true once the last fragment is in
    ///
    /// A reply with a fragment count of zero means the probe has nothing
    /// queued yet and is ignored.
    pub fn push(&mut self, report: &[u8]) -> Result<bool> {
        let fragment = parse_response_fragment(report)?;
        if fragment.count == 0 {
            return Ok(false);
        }
        self.frame.extend_from_slice(fragment.data);
        self.complete = fragment.index >= fragment.count;
        Ok(self.complete)
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn into_frame(self) -> Vec<u8> {
        self.frame
    }
}

/// Decoded response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Command accepted, no payload
    Ok,
    /// List of IDs (supported commands, handlers)
    List(Vec<u8>),
    /// Program counter as a word address
    Pc(u32),
    /// Data bytes, trailing status byte removed
    Data(Vec<u8>),
}

impl Response {
    /// Flatten into raw payload bytes
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Response::Ok => Vec::new(),
            Response::List(v) | Response::Data(v) => v,
            Response::Pc(pc) => pc.to_le_bytes().to_vec(),
        }
    }
}

/// Decode a reassembled response frame
///
/// Layout: `[SOF, seq_lo, seq_hi, handler, response_id, version, payload...]`.
/// FAILED carries the failure code as the first payload byte and is
/// reported with the handler ID as its context.
pub fn parse_response(frame: &[u8]) -> Result<Response> {
    if frame.len() < 6 || frame[0] != SOF {
        return Err(Error::Protocol(format!(
            "malformed response frame ({} bytes)",
            frame.len()
        )));
    }
    let handler = frame[3];
    match frame[4] {
        RSP_OK => Ok(Response::Ok),
        RSP_LIST => Ok(Response::List(frame[6..].to_vec())),
        RSP_PC => {
            let pc = frame
                .get(6..10)
                .ok_or_else(|| Error::Protocol("short PC response".into()))?;
            Ok(Response::Pc(u32::from_le_bytes([pc[0], pc[1], pc[2], pc[3]])))
        }
        RSP_DATA => {
            if frame.len() < 7 {
                return Err(Error::Protocol("DATA response without status byte".into()));
            }
            Ok(Response::Data(frame[6..frame.len() - 1].to_vec()))
        }
        RSP_FAILED => Err(Error::DeviceFailure {
            context: handler,
            code: frame.get(6).copied().unwrap_or(0xFF),
        }),
        RSP_EVENT => Err(Error::Protocol(
            "event received in place of a command response".into(),
        )),
        other => Err(Error::Protocol(format!(
            "unknown response id 0x{:02X}",
            other
        ))),
    }
}

// ============================================================================
// Events
// ============================================================================

/// Extract the event payload from an AVR_EVT poll reply
///
/// Layout: `[AVR_EVT, len_hi, len_lo, SOF, version, seq_lo, seq_hi, handler, event...]`
/// where `len` covers everything from SOF. Returns `None` when no event is
/// pending or the envelope does not validate.
pub fn event_payload(report: &[u8]) -> Option<&[u8]> {
    if report.len() < 8 || report[0] != AVR_EVT {
        return None;
    }
    let length = u16::from_be_bytes([report[1], report[2]]) as usize;
    if length <= 5 || report[3] != SOF || report[4] != PROTOCOL_VERSION {
        return None;
    }
    report.get(8..3 + length)
}

/// Why the target stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreakEvent {
    /// Program counter, word address
    pub pc: u16,
    /// Raw extended halt information
    pub ext: u16,
    /// Halted by a reset
    pub reset: bool,
    /// Halted by the debugger (attach or stop)
    pub stop: bool,
    /// A BREAK instruction was fetched
    pub swbp: bool,
    /// Hardware breakpoint 0 hit
    pub bp0: bool,
    /// Hardware breakpoint 1 hit (also run-to and step)
    pub bp1: bool,
}

impl BreakEvent {
    /// Decode an EVT_AVR8_BREAK payload
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() < 3 || payload[0] != EVT_AVR8_BREAK {
            return None;
        }
        let mut event = BreakEvent {
            pc: u16::from_le_bytes([payload[1], payload[2]]),
            ..Default::default()
        };
        if payload.len() >= 8 {
            event.ext = u16::from_le_bytes([payload[6], payload[7]]);
            event.reset = payload[6] & 0x80 != 0;
            event.stop = payload[6] & 0x40 != 0;
            event.swbp = payload[7] & 0x20 != 0;
            event.bp0 = payload[7] & 0x02 != 0;
            event.bp1 = payload[7] & 0x01 != 0;
        }
        Some(event)
    }

    /// Program counter as a byte address
    pub fn byte_address(&self) -> u32 {
        self.pc as u32 * 2
    }
}

impl std::fmt::Display for BreakEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "BREAK at 0x{:04X}, ext 0x{:04X}",
            self.byte_address(),
            self.ext
        )?;
        for (set, name) in [
            (self.reset, "RESET"),
            (self.stop, "STOP"),
            (self.swbp, "SWBP"),
            (self.bp0, "BP0"),
            (self.bp1, "BP1"),
        ] {
            if set {
                write!(f, ", {}", name)?;
            }
        }
        Ok(())
    }
}

/// Decoded AVR8 event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Target halted
    Break(BreakEvent),
    /// One character of debug output written by the target
    Idr(u8),
    /// Any other event ID
    Other(u8),
}

/// Decode an event payload
pub fn decode_event(payload: &[u8]) -> Option<Event> {
    let id = *payload.first()?;
    Some(match id {
        EVT_AVR8_BREAK => Event::Break(BreakEvent::from_payload(payload)?),
        EVT_AVR8_IDR if payload.len() >= 3 => Event::Idr(payload[2]),
        other => Event::Other(other),
    })
}

// ============================================================================
// Tool information
// ============================================================================

/// Probe hardware and firmware revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolInfo {
    pub hw_rev: u8,
    pub fw_major: u8,
    pub fw_minor: u8,
    pub fw_build: u16,
}

impl ToolInfo {
    /// Decode the 5-byte HOUSEKEEPING config block
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 5 {
            return None;
        }
        Some(Self {
            hw_rev: data[0],
            fw_major: data[1],
            fw_minor: data[2],
            fw_build: u16::from_le_bytes([data[3], data[4]]),
        })
    }
}

impl std::fmt::Display for ToolInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "HW rev {}, firmware {}.{}.{}",
            self.hw_rev, self.fw_major, self.fw_minor, self.fw_build
        )
    }
}

// ============================================================================
// Command builders
// ============================================================================

fn avr8(command: u8, params: &[u8]) -> Vec<u8> {
    let mut cmd = Vec::with_capacity(3 + params.len());
    cmd.extend_from_slice(&[HANDLER_AVR8, command, 0x00]);
    cmd.extend_from_slice(params);
    cmd
}

pub fn discovery_query(context: u8) -> Vec<u8> {
    vec![HANDLER_DISCOVERY, CMD_DISCOVERY_QUERY, 0x00, context]
}

pub fn start_session() -> Vec<u8> {
    vec![HANDLER_HOUSEKEEPING, CMD_HOUSEKEEPING_START_SESSION]
}

pub fn end_session() -> Vec<u8> {
    vec![HANDLER_HOUSEKEEPING, CMD_HOUSEKEEPING_END_SESSION]
}

pub fn housekeeping_get(context: u8, address: u8, len: u8) -> Vec<u8> {
    vec![
        HANDLER_HOUSEKEEPING,
        CMD_HOUSEKEEPING_GET,
        0x00,
        context,
        address,
        len,
    ]
}

pub fn edbg_query_commands() -> Vec<u8> {
    vec![HANDLER_EDBG_CTRL, CMD_EDBG_QUERY, 0x00, EDBG_QUERY_COMMANDS]
}

pub fn avr8_query(context: u8) -> Vec<u8> {
    avr8(CMD_AVR8_QUERY, &[context])
}

/// CMD_AVR8_SET of `value` at `(context, address)`
pub fn avr8_set(context: u8, address: u8, value: &[u8]) -> Vec<u8> {
    let mut params = vec![context, address, value.len() as u8];
    params.extend_from_slice(value);
    avr8(CMD_AVR8_SET, &params)
}

/// AVR8_CTXT_DEVICE block for UPDI targets
pub fn set_device_info(
    prog_base: u16,
    flash_page: u8,
    eeprom_page: u8,
    nvm_base: u16,
    ocd_base: u16,
) -> Vec<u8> {
    let mut value = Vec::with_capacity(8);
    value.extend_from_slice(&prog_base.to_le_bytes());
    value.push(flash_page);
    value.push(eeprom_page);
    value.extend_from_slice(&nvm_base.to_le_bytes());
    value.extend_from_slice(&ocd_base.to_le_bytes());
    avr8_set(AVR8_CTXT_DEVICE, 0x00, &value)
}

pub fn activate_physical(reset: bool) -> Vec<u8> {
    avr8(CMD_AVR8_ACTIVATE_PHYSICAL, &[reset as u8])
}

pub fn deactivate_physical() -> Vec<u8> {
    avr8(CMD_AVR8_DEACTIVATE_PHYSICAL, &[])
}

pub fn get_id() -> Vec<u8> {
    avr8(CMD_AVR8_GET_ID, &[])
}

pub fn attach(stop: bool) -> Vec<u8> {
    avr8(CMD_AVR8_ATTACH, &[stop as u8])
}

pub fn detach() -> Vec<u8> {
    avr8(CMD_AVR8_DETACH, &[])
}

pub fn prog_mode_enter() -> Vec<u8> {
    avr8(CMD_AVR8_PROG_MODE_ENTER, &[])
}

pub fn prog_mode_leave() -> Vec<u8> {
    avr8(CMD_AVR8_PROG_MODE_LEAVE, &[])
}

pub fn erase(mode: EraseMode, address: u32) -> Vec<u8> {
    let mut params = vec![mode as u8];
    params.extend_from_slice(&address.to_le_bytes());
    avr8(CMD_AVR8_ERASE, &params)
}

pub fn memory_read(memtype: MemType, address: u32, len: u32) -> Vec<u8> {
    let mut params = vec![memtype.code()];
    params.extend_from_slice(&address.to_le_bytes());
    params.extend_from_slice(&len.to_le_bytes());
    avr8(CMD_AVR8_MEMORY_READ, &params)
}

/// MEMORY_WRITE in "write first, then reply" mode
pub fn memory_write(memtype: MemType, address: u32, data: &[u8]) -> Vec<u8> {
    let mut params = vec![memtype.code()];
    params.extend_from_slice(&address.to_le_bytes());
    params.extend_from_slice(&(data.len() as u32).to_le_bytes());
    params.push(0x00);
    params.extend_from_slice(data);
    avr8(CMD_AVR8_MEMORY_WRITE, &params)
}

/// Reset and hold at the reset vector
pub fn reset() -> Vec<u8> {
    avr8(CMD_AVR8_RESET, &[0x01])
}

pub fn stop() -> Vec<u8> {
    avr8(CMD_AVR8_STOP, &[0x01])
}

pub fn run() -> Vec<u8> {
    avr8(CMD_AVR8_RUN, &[])
}

pub fn run_to_address(word_address: u32) -> Vec<u8> {
    avr8(CMD_AVR8_RUN_TO_ADDRESS, &word_address.to_le_bytes())
}

/// Instruction-level step into
pub fn step() -> Vec<u8> {
    avr8(CMD_AVR8_STEP, &[0x01, 0x01])
}

pub fn pc_read() -> Vec<u8> {
    avr8(CMD_AVR8_PC_READ, &[])
}

pub fn pc_write(word_address: u32) -> Vec<u8> {
    avr8(CMD_AVR8_PC_WRITE, &word_address.to_le_bytes())
}

/// Program breakpoint in slot `num`
pub fn hw_break_set(num: u8, word_address: u32) -> Vec<u8> {
    let mut params = vec![0x01, num];
    params.extend_from_slice(&word_address.to_le_bytes());
    params.push(0x03);
    avr8(CMD_AVR8_HW_BREAK_SET, &params)
}

pub fn hw_break_clear(num: u8) -> Vec<u8> {
    avr8(CMD_AVR8_HW_BREAK_CLEAR, &[num])
}

fn sw_break_list(command: u8, word_addresses: &[u32]) -> Vec<u8> {
    let params: Vec<u8> = word_addresses
        .iter()
        .flat_map(|a| a.to_le_bytes())
        .collect();
    avr8(command, &params)
}

pub fn sw_break_set(word_addresses: &[u32]) -> Vec<u8> {
    sw_break_list(CMD_AVR8_SW_BREAK_SET, word_addresses)
}

pub fn sw_break_clear(word_addresses: &[u32]) -> Vec<u8> {
    sw_break_list(CMD_AVR8_SW_BREAK_CLEAR, word_addresses)
}

pub fn sw_break_clear_all() -> Vec<u8> {
    avr8(CMD_AVR8_SW_BREAK_CLEAR_ALL, &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_count_matches_frame_length() {
        for cmd_len in 1..=800usize {
            let frame = wrap_frame(7, &vec![0xA5; cmd_len]);
            let reports = fragments(&frame).unwrap();
            assert_eq!(reports.len(), (cmd_len + 4).div_ceil(60));
        }
    }

    #[test]
    fn test_fragment_headers() {
        let frame = wrap_frame(0x1234, &[0x5A; 100]);
        let reports = fragments(&frame).unwrap();
        assert_eq!(reports.len(), 2);

        assert_eq!(reports[0][..8], [AVR_CMD, 0x12, 0x00, 60, SOF, 0x00, 0x34, 0x12]);
        assert_eq!(reports[1][..4], [AVR_CMD, 0x22, 0x00, 44]);
        assert_eq!(reports[1][4..48], [0x5A; 44]);
        assert!(reports[1][48..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let frame = wrap_frame(0, &[0; 15 * 60]);
        assert!(matches!(fragments(&frame), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_reassembly_concatenates_in_order() {
        let payloads: [&[u8]; 3] = [&[1, 2, 3], &[4, 5], &[6, 7, 8, 9]];
        let mut asm = ResponseAssembler::new();

        // Nothing queued yet
        let mut empty = [0u8; REPORT_SIZE];
        empty[0] = AVR_RSP;
        assert!(!asm.push(&empty).unwrap());

        for (i, p) in payloads.iter().enumerate() {
            let mut report = [0u8; REPORT_SIZE];
            report[0] = AVR_RSP;
            report[1] = (((i + 1) as u8) << 4) | 3;
            report[3] = p.len() as u8;
            report[4..4 + p.len()].copy_from_slice(p);
            let done = asm.push(&report).unwrap();
            assert_eq!(done, i == 2);
        }
        assert_eq!(asm.into_frame(), vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_fragment_length_overrun() {
        let mut report = [0u8; REPORT_SIZE];
        report[0] = AVR_RSP;
        report[1] = 0x11;
        report[3] = 61;
        assert!(matches!(
            parse_response_fragment(&report),
            Err(Error::Protocol(_))
        ));
        report[0] = AVR_EVT;
        assert!(parse_response_fragment(&report).is_err());
    }

    #[test]
    fn test_parse_responses() {
        let ok = [SOF, 1, 0, HANDLER_AVR8, RSP_OK, 0];
        assert_eq!(parse_response(&ok).unwrap(), Response::Ok);

        let data = [SOF, 1, 0, HANDLER_AVR8, RSP_DATA, 0, 0x1E, 0x93, 0x20, 0x00];
        assert_eq!(
            parse_response(&data).unwrap(),
            Response::Data(vec![0x1E, 0x93, 0x20])
        );

        let pc = [SOF, 1, 0, HANDLER_AVR8, RSP_PC, 0, 0x34, 0x12, 0, 0];
        assert_eq!(parse_response(&pc).unwrap(), Response::Pc(0x1234));

        let list = [SOF, 1, 0, HANDLER_EDBG_CTRL, RSP_LIST, 0, 0, 1, 2];
        assert_eq!(parse_response(&list).unwrap().into_bytes(), vec![0, 1, 2]);

        let failed = [SOF, 1, 0, HANDLER_AVR8, RSP_FAILED, 0, 0x36];
        assert_eq!(
            parse_response(&failed),
            Err(Error::DeviceFailure {
                context: 0x12,
                code: 0x36
            })
        );

        let event = [SOF, 1, 0, HANDLER_AVR8, RSP_EVENT, 0];
        assert!(matches!(parse_response(&event), Err(Error::Protocol(_))));
        assert!(matches!(parse_response(&[SOF, 0]), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_break_event_decode() {
        let mut report = [0u8; REPORT_SIZE];
        let payload = [EVT_AVR8_BREAK, 0x80, 0x00, 0, 0, 0, 0x04, 0x21];
        report[..3].copy_from_slice(&[AVR_EVT, 0x00, (payload.len() + 5) as u8]);
        report[3..8].copy_from_slice(&[SOF, 0x00, 0x05, 0x00, HANDLER_AVR8]);
        report[8..8 + payload.len()].copy_from_slice(&payload);

        let body = event_payload(&report).unwrap();
        assert_eq!(body, &payload);
        let Some(Event::Break(brk)) = decode_event(body) else {
            panic!("expected break event");
        };
        assert_eq!(brk.byte_address(), 0x100);
        assert!(brk.swbp && brk.bp1);
        assert!(!brk.reset && !brk.stop && !brk.bp0);
        assert_eq!(brk.to_string(), "BREAK at 0x0100, ext 0x2104, SWBP, BP1");
    }

    #[test]
    fn test_event_envelope_rejected() {
        let mut report = [0u8; REPORT_SIZE];
        report[0] = AVR_EVT;
        assert_eq!(event_payload(&report), None);

        report[..8].copy_from_slice(&[AVR_EVT, 0, 8, 0x0F, 0, 0, 0, 0x12]);
        assert_eq!(event_payload(&report), None);
    }

    #[test]
    fn test_command_builders() {
        assert_eq!(
            memory_read(MemType::FlashPage, 0x40, 64),
            vec![0x12, 0x21, 0x00, 0xB0, 0x40, 0, 0, 0, 64, 0, 0, 0]
        );
        let w = memory_write(MemType::Fuses, 0x1285, &[0xF6]);
        assert_eq!(w[..13], [0x12, 0x23, 0x00, 0xB2, 0x85, 0x12, 0, 0, 1, 0, 0, 0, 0]);
        assert_eq!(w[13], 0xF6);
        assert_eq!(
            set_device_info(0x8000, 64, 32, 0x1000, 0x0F80),
            vec![0x12, 0x01, 0x00, 0x02, 0x00, 0x08, 0x00, 0x80, 64, 32, 0x00, 0x10, 0x80, 0x0F]
        );
        assert_eq!(
            hw_break_set(1, 0x80),
            vec![0x12, 0x40, 0x00, 0x01, 0x01, 0x80, 0, 0, 0, 0x03]
        );
        assert_eq!(sw_break_set(&[0x10, 0x20]).len(), 3 + 8);
    }

    #[test]
    fn test_tool_info() {
        let info = ToolInfo::from_bytes(&[2, 1, 30, 0x2C, 0x01]).unwrap();
        assert_eq!(info.fw_build, 300);
        assert_eq!(info.to_string(), "HW rev 2, firmware 1.30.300");
        assert!(ToolInfo::from_bytes(&[1, 2]).is_none());
    }
}
