//! Simulated EDBG probe with a tinyAVR target behind it
//!
//! Clones share state, so a test can hand one clone to the engine and keep
//! another to inject events and inspect the memories.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use rupdi_core::chip::ChipDescriptor;
use rupdi_core::memory::{
    MemType, EEPROM_BASE, FUSES_BASE, FUSES_LEN, SIGNATURE_BASE, USERROW_BASE,
};

use crate::error::Result;
use crate::protocol::*;
use crate::transport::HidTransport;

const SRAM_SIZE: usize = 0x4000;
const SIGROW_SIZE: usize = 0x80;

struct State {
    rx: Vec<u8>,
    reply: Option<Vec<u8>>,
    responses: VecDeque<Vec<u8>>,
    events: VecDeque<Vec<u8>>,
    commands: Vec<Vec<u8>>,
    seqs: Vec<u16>,
    reports_written: usize,
    response_chunk: usize,
    empty_polls: usize,
    fail_next: Option<u8>,
    fail_on: Option<(u8, u8)>,
    vtref_mv: u16,
    flash: Vec<u8>,
    eeprom: Vec<u8>,
    fuses: Vec<u8>,
    sigrow: Vec<u8>,
    userrow: Vec<u8>,
    sram: Vec<u8>,
    regs: Vec<u8>,
    flash_page_writes: usize,
    pc: u32,
    hw_breakpoint: Option<(u8, u32)>,
    sw_breakpoints: Vec<u32>,
}

#[derive(Clone)]
pub struct SimProbe {
    state: Rc<RefCell<State>>,
}

fn le32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn break_payload(pc_word: u16, flags6: u8, flags7: u8) -> Vec<u8> {
    let pc = pc_word.to_le_bytes();
    vec![EVT_AVR8_BREAK, pc[0], pc[1], 0, 0, 0, flags6, flags7]
}

impl SimProbe {
    pub fn new(chip: &ChipDescriptor) -> Self {
        let mut sigrow = vec![0xFF; SIGROW_SIZE];
        sigrow[..3].copy_from_slice(&chip.signature);
        for (i, b) in sigrow[3..16].iter_mut().enumerate() {
            *b = 0xA0 + i as u8;
        }
        Self {
            state: Rc::new(RefCell::new(State {
                rx: Vec::new(),
                reply: None,
                responses: VecDeque::new(),
                events: VecDeque::new(),
                commands: Vec::new(),
                seqs: Vec::new(),
                reports_written: 0,
                response_chunk: FRAGMENT_PAYLOAD,
                empty_polls: 0,
                fail_next: None,
                fail_on: None,
                vtref_mv: 3300,
                flash: vec![0xFF; chip.flash_size as usize],
                eeprom: vec![0xFF; chip.eeprom_size as usize],
                fuses: vec![0x00; FUSES_LEN],
                sigrow,
                userrow: vec![0xFF; chip.user_row_size() as usize],
                sram: vec![0x00; SRAM_SIZE],
                regs: vec![0x00; 32],
                flash_page_writes: 0,
                pc: 0,
                hw_breakpoint: None,
                sw_breakpoints: Vec::new(),
            })),
        }
    }

    // --- injection -------------------------------------------------------

    /// Split response frames into poll replies of at most `n` bytes
    pub fn set_response_chunk(&self, n: usize) {
        self.state.borrow_mut().response_chunk = n.clamp(1, FRAGMENT_PAYLOAD);
    }

    /// Answer this many polls with "nothing ready" before each response
    pub fn set_empty_polls(&self, n: usize) {
        self.state.borrow_mut().empty_polls = n;
    }

    /// Answer the next command with FAILED
    pub fn fail_next(&self, code: u8) {
        self.state.borrow_mut().fail_next = Some(code);
    }

    /// Answer every AVR8 command `id` with FAILED
    pub fn fail_on(&self, id: u8, code: u8) {
        self.state.borrow_mut().fail_on = Some((id, code));
    }

    pub fn set_vtref_mv(&self, mv: u16) {
        self.state.borrow_mut().vtref_mv = mv;
    }

    pub fn push_idr_text(&self, text: &str) {
        let mut s = self.state.borrow_mut();
        for c in text.bytes() {
            s.events.push_back(vec![EVT_AVR8_IDR, 0x00, c]);
        }
    }

    pub fn push_break(&self, pc_word: u16, flags6: u8, flags7: u8) {
        self.state
            .borrow_mut()
            .events
            .push_back(break_payload(pc_word, flags6, flags7));
    }

    // --- inspection ------------------------------------------------------

    pub fn seqs(&self) -> Vec<u16> {
        self.state.borrow().seqs.clone()
    }

    pub fn reports_written(&self) -> usize {
        self.state.borrow().reports_written
    }

    pub fn avr8_count(&self, id: u8) -> usize {
        self.count(HANDLER_AVR8, id)
    }

    pub fn housekeeping_count(&self, id: u8) -> usize {
        self.count(HANDLER_HOUSEKEEPING, id)
    }

    fn count(&self, handler: u8, id: u8) -> usize {
        self.state
            .borrow()
            .commands
            .iter()
            .filter(|c| c.len() >= 2 && c[0] == handler && c[1] == id)
            .count()
    }

    pub fn flash_page_writes(&self) -> usize {
        self.state.borrow().flash_page_writes
    }

    pub fn flash(&self) -> Vec<u8> {
        self.state.borrow().flash.clone()
    }

    pub fn eeprom(&self) -> Vec<u8> {
        self.state.borrow().eeprom.clone()
    }

    pub fn fuse(&self, offset: usize) -> u8 {
        self.state.borrow().fuses[offset]
    }

    pub fn pending_events(&self) -> usize {
        self.state.borrow().events.len()
    }

    pub fn hw_breakpoint(&self) -> Option<(u8, u32)> {
        self.state.borrow().hw_breakpoint
    }

    pub fn sw_breakpoints(&self) -> Vec<u32> {
        self.state.borrow().sw_breakpoints.clone()
    }
}

impl State {
    fn handle_command_fragment(&mut self, report: &[u8; REPORT_SIZE]) {
        let index = report[1] >> 4;
        let count = report[1] & 0x0F;
        let len = u16::from_be_bytes([report[2], report[3]]) as usize;
        if index == 1 {
            self.rx.clear();
        }
        self.rx
            .extend_from_slice(&report[FRAGMENT_HEADER..FRAGMENT_HEADER + len]);

        if index < count {
            self.reply = Some(vec![AVR_CMD, 0x00]);
            return;
        }

        let frame = std::mem::take(&mut self.rx);
        let seq = u16::from_le_bytes([frame[2], frame[3]]);
        let command = frame[FRAME_HEADER..].to_vec();
        self.seqs.push(seq);
        self.commands.push(command.clone());

        let (rsp, payload) = self.execute(&command);
        let mut rsp_frame = vec![SOF];
        rsp_frame.extend_from_slice(&seq.to_le_bytes());
        rsp_frame.extend_from_slice(&[command[0], rsp, PROTOCOL_VERSION]);
        rsp_frame.extend_from_slice(&payload);
        self.queue_response(&rsp_frame);
        self.reply = Some(vec![AVR_CMD, CMD_RESPONSE_PENDING]);
    }

    fn queue_response(&mut self, frame: &[u8]) {
        for _ in 0..self.empty_polls {
            self.responses.push_back(vec![AVR_RSP, 0x00, 0x00, 0x00]);
        }
        let chunks: Vec<&[u8]> = frame.chunks(self.response_chunk).collect();
        let count = chunks.len() as u8;
        for (i, chunk) in chunks.iter().enumerate() {
            let mut report = vec![AVR_RSP, ((i as u8 + 1) << 4) | count];
            report.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
            report.extend_from_slice(chunk);
            self.responses.push_back(report);
        }
    }

    fn event_report(&mut self) -> Vec<u8> {
        match self.events.pop_front() {
            Some(payload) => {
                let len = (payload.len() + 5) as u16;
                let mut report = vec![AVR_EVT];
                report.extend_from_slice(&len.to_be_bytes());
                report.extend_from_slice(&[SOF, PROTOCOL_VERSION, 0x00, 0x00, HANDLER_AVR8]);
                report.extend_from_slice(&payload);
                report
            }
            None => vec![AVR_EVT, 0x00, 0x00],
        }
    }

    fn execute(&mut self, cmd: &[u8]) -> (u8, Vec<u8>) {
        if let Some(code) = self.fail_next.take() {
            return (RSP_FAILED, vec![code]);
        }

        let handler = cmd[0];
        let id = cmd[1];
        let params = cmd.get(3..).unwrap_or(&[]);

        match handler {
            HANDLER_DISCOVERY => match params.first() {
                Some(&DISCOVERY_TOOL_NAME) => (RSP_LIST, b"nEDBG CMSIS-DAP\0".to_vec()),
                Some(&DISCOVERY_SERIAL_NUMBER) => (RSP_LIST, b"ATML3203081800001234".to_vec()),
                _ => (RSP_LIST, vec![HANDLER_DISCOVERY, HANDLER_HOUSEKEEPING, HANDLER_AVR8]),
            },
            HANDLER_HOUSEKEEPING => match id {
                CMD_HOUSEKEEPING_GET if params.first() == Some(&HK_CONTEXT_ANALOG) => {
                    let mut data = self.vtref_mv.to_le_bytes().to_vec();
                    data.push(0x00);
                    (RSP_DATA, data)
                }
                CMD_HOUSEKEEPING_GET => {
                    let mut data = vec![1, 1, 20];
                    data.extend_from_slice(&366u16.to_le_bytes());
                    data.push(0x00);
                    (RSP_DATA, data)
                }
                _ => (RSP_OK, Vec::new()),
            },
            HANDLER_EDBG_CTRL => (RSP_LIST, vec![CMD_EDBG_QUERY, CMD_EDBG_SET, CMD_EDBG_GET]),
            HANDLER_AVR8 => self.execute_avr8(id, params),
            _ => (RSP_FAILED, vec![0x10]),
        }
    }

    fn execute_avr8(&mut self, id: u8, params: &[u8]) -> (u8, Vec<u8>) {
        if let Some((fail_id, code)) = self.fail_on {
            if fail_id == id {
                return (RSP_FAILED, vec![code]);
            }
        }

        match id {
            CMD_AVR8_QUERY => (
                RSP_LIST,
                vec![
                    CMD_AVR8_QUERY,
                    CMD_AVR8_SET,
                    CMD_AVR8_ATTACH,
                    CMD_AVR8_MEMORY_READ,
                    CMD_AVR8_MEMORY_WRITE,
                    CMD_AVR8_RUN,
                    CMD_AVR8_STEP,
                ],
            ),
            CMD_AVR8_GET_ID => {
                let mut data = self.sigrow[..3].to_vec();
                data.push(0x00);
                (RSP_DATA, data)
            }
            CMD_AVR8_ATTACH => {
                if params.first() == Some(&1) {
                    self.push_break(0x40, 0x00);
                }
                (RSP_OK, Vec::new())
            }
            CMD_AVR8_ERASE => {
                self.flash.fill(0xFF);
                self.eeprom.fill(0xFF);
                (RSP_OK, Vec::new())
            }
            CMD_AVR8_MEMORY_READ => {
                let memtype = MemType::from_code(params[0]);
                let address = le32(&params[1..5]);
                let len = le32(&params[5..9]) as usize;
                let region = match memtype {
                    Some(m) => self.region(m, address, len),
                    None => None,
                };
                match region {
                    Some((mem, off)) => {
                        let mut data = mem[off..off + len].to_vec();
                        data.push(0x00);
                        (RSP_DATA, data)
                    }
                    None => (RSP_FAILED, vec![0x36]),
                }
            }
            CMD_AVR8_MEMORY_WRITE => {
                let memtype = MemType::from_code(params[0]);
                let address = le32(&params[1..5]);
                let len = le32(&params[5..9]) as usize;
                let data = &params[10..10 + len];
                if memtype == Some(MemType::FlashPage) {
                    self.flash_page_writes += 1;
                }
                let region = match memtype {
                    Some(m) => self.region(m, address, len),
                    None => None,
                };
                match region {
                    Some((mem, off)) => {
                        mem[off..off + len].copy_from_slice(data);
                        (RSP_OK, Vec::new())
                    }
                    None => (RSP_FAILED, vec![0x36]),
                }
            }
            CMD_AVR8_RESET => {
                self.pc = 0;
                self.push_break(0x80, 0x00);
                (RSP_OK, Vec::new())
            }
            CMD_AVR8_STOP => {
                self.push_break(0x40, 0x00);
                (RSP_OK, Vec::new())
            }
            CMD_AVR8_STEP => {
                self.pc += 1;
                self.push_break(0x00, 0x01);
                (RSP_OK, Vec::new())
            }
            CMD_AVR8_RUN_TO_ADDRESS => {
                self.pc = le32(&params[0..4]);
                self.push_break(0x00, 0x01);
                (RSP_OK, Vec::new())
            }
            CMD_AVR8_PC_READ => (RSP_PC, self.pc.to_le_bytes().to_vec()),
            CMD_AVR8_PC_WRITE => {
                self.pc = le32(&params[0..4]);
                (RSP_OK, Vec::new())
            }
            CMD_AVR8_HW_BREAK_SET => {
                self.hw_breakpoint = Some((params[1], le32(&params[2..6])));
                (RSP_OK, Vec::new())
            }
            CMD_AVR8_HW_BREAK_CLEAR => {
                self.hw_breakpoint = None;
                (RSP_OK, Vec::new())
            }
            CMD_AVR8_SW_BREAK_SET => {
                for a in params.chunks(4) {
                    self.sw_breakpoints.push(le32(a));
                }
                (RSP_OK, Vec::new())
            }
            CMD_AVR8_SW_BREAK_CLEAR => {
                let remove: Vec<u32> = params.chunks(4).map(le32).collect();
                self.sw_breakpoints.retain(|a| !remove.contains(a));
                (RSP_OK, Vec::new())
            }
            CMD_AVR8_SW_BREAK_CLEAR_ALL => {
                self.sw_breakpoints.clear();
                (RSP_OK, Vec::new())
            }
            _ => (RSP_OK, Vec::new()),
        }
    }

    fn push_break(&mut self, flags6: u8, flags7: u8) {
        let payload = break_payload(self.pc as u16, flags6, flags7);
        self.events.push_back(payload);
    }

    fn region(&mut self, memtype: MemType, address: u32, len: usize) -> Option<(&mut Vec<u8>, usize)> {
        let (mem, off) = match memtype {
            MemType::FlashPage => (&mut self.flash, address),
            MemType::Eeprom => (&mut self.eeprom, address.checked_sub(EEPROM_BASE)?),
            MemType::Fuses => (&mut self.fuses, address.checked_sub(FUSES_BASE)?),
            MemType::Signature => (&mut self.sigrow, address.checked_sub(SIGNATURE_BASE)?),
            MemType::UserSignature => (&mut self.userrow, address.checked_sub(USERROW_BASE)?),
            MemType::Sram => (&mut self.sram, address),
            MemType::Regfile => (&mut self.regs, address),
            _ => return None,
        };
        let off = off as usize;
        (off + len <= mem.len()).then_some((mem, off))
    }
}

impl HidTransport for SimProbe {
    fn write_report(&mut self, report: &[u8; REPORT_SIZE]) -> Result<()> {
        let mut s = self.state.borrow_mut();
        s.reports_written += 1;
        match report[0] {
            AVR_CMD => s.handle_command_fragment(report),
            AVR_RSP => {
                let reply = s
                    .responses
                    .pop_front()
                    .unwrap_or_else(|| vec![AVR_RSP, 0x00, 0x00, 0x00]);
                s.reply = Some(reply);
            }
            AVR_EVT => {
                let reply = s.event_report();
                s.reply = Some(reply);
            }
            other => panic!("unexpected report type 0x{:02X}", other),
        }
        Ok(())
    }

    fn read_report(&mut self) -> Result<Vec<u8>> {
        let mut reply = self
            .state
            .borrow_mut()
            .reply
            .take()
            .expect("read without a pending reply");
        reply.resize(REPORT_SIZE, 0x00);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_frame_split() {
        let chip = rupdi_core::chip::ChipDatabase::builtin()
            .unwrap()
            .find("attiny416")
            .unwrap()
            .clone();
        let mut sim = SimProbe::new(&chip);
        sim.set_response_chunk(3);

        let frame = wrap_frame(9, &memory_read(MemType::Signature, SIGNATURE_BASE, 3));
        for report in fragments(&frame).unwrap() {
            sim.write_report(&report).unwrap();
        }
        assert_eq!(sim.read_report().unwrap()[..2], [AVR_CMD, CMD_RESPONSE_PENDING]);

        let mut assembler = ResponseAssembler::new();
        let mut polls = 0;
        while !assembler.is_complete() {
            let reply = sim.exchange(&[AVR_RSP]).unwrap();
            let fragment = parse_response_fragment(&reply).unwrap();
            assert_eq!(fragment.count, 4);
            assert!(fragment.data.len() <= 3);
            assembler.push(&reply).unwrap();
            polls += 1;
        }
        assert_eq!(polls, 4);
        assert_eq!(
            parse_response(&assembler.into_frame()).unwrap(),
            Response::Data(chip.signature.to_vec())
        );
    }
}
