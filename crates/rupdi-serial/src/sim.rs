//! Simulated UPDI target for engine tests
//!
//! Bytes written to the line are echoed and fed through an instruction
//! parser that models the parts of a tinyAVR the engine touches: the data
//! space, the pointer register, REPEAT, the control/status space, keys,
//! reset, and an NVM controller whose busy flag stays set for a
//! configurable number of STATUS reads.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use rupdi_core::chip::ChipDescriptor;
use rupdi_core::memory::{
    EEPROM_BASE, FUSES_BASE, FUSES_LEN, SERIAL_NUMBER_LEN, SIGNATURE_BASE, USERROW_BASE,
};

use crate::error::Result;
use crate::protocol::{
    KeyStatus, NvmStatus, Opcode, PtrMode, SysCtrlA, SysStatus, ACK, CS_ASI_KEY_STATUS,
    CS_ASI_RESET_REQ, CS_ASI_SYS_CTRLA, CS_ASI_SYS_STATUS, CS_STATUSA, CS_STATUSB,
    KEY_CHIP_ERASE, KEY_LEN, KEY_NVM_PROG, KEY_SIB, KEY_USER_ROW, NVMCTRL_ADDRH, NVMCTRL_ADDRL,
    NVMCTRL_CTRLA, NVMCTRL_DATAL, NVMCTRL_STATUS, RESET_SIGNATURE, SYNC,
};
use crate::transport::SerialLine;

const SIB: &[u8; 16] = b"tinyAVR P:0D:1-3";

/// Factory fuse values
const DEFAULT_FUSES: [u8; FUSES_LEN] = [
    0x00, 0x00, 0x02, 0xFF, 0x00, 0xF6, 0x07, 0x00, 0x00, 0xFF, 0xC5,
];

enum Parser {
    Idle,
    Opcode,
    Address {
        code: u8,
        bytes: Vec<u8>,
        need: usize,
    },
    StsData {
        address: u16,
        bytes: Vec<u8>,
        need: usize,
    },
    StData {
        ptr: u8,
        bytes: Vec<u8>,
        need: usize,
        left: usize,
    },
    Stcs(u8),
    Repeat,
    Key(Vec<u8>),
}

struct State {
    chip: ChipDescriptor,
    data: Vec<u8>,
    cs: [u8; 16],
    rx: VecDeque<u8>,
    parser: Parser,
    ptr: u16,
    repeat: usize,
    keys: KeyStatus,
    sys: SysStatus,
    in_reset: bool,
    page_buffer: Vec<(u16, u8)>,
    urow_buffer: Vec<(u16, u8)>,
    busy_polls: u32,
    busy_left: u32,
    lock_polls: u32,
    lock_left: u32,
    refuse_prog: bool,
    resets: usize,
    pesig: VecDeque<u8>,
    corrupt_at: Option<usize>,
    written: usize,
    breaks: usize,
    status_reads: usize,
    page_writes: usize,
}

/// Shared handle to a simulated target; clones see the same state
#[derive(Clone)]
pub struct SimTarget {
    state: Rc<RefCell<State>>,
}

impl SimTarget {
    pub fn new(chip: &ChipDescriptor) -> Self {
        let mut data = vec![0u8; 0x1_0000];
        let sig = SIGNATURE_BASE as usize;
        data[sig..sig + 3].copy_from_slice(&chip.signature);
        for i in 0..SERIAL_NUMBER_LEN {
            data[sig + 3 + i] = 0xA0 + i as u8;
        }
        let fuses = FUSES_BASE as usize;
        data[fuses..fuses + FUSES_LEN].copy_from_slice(&DEFAULT_FUSES);
        let urow = USERROW_BASE as usize;
        data[urow..urow + chip.user_row_size() as usize].fill(0xFF);
        let ee = EEPROM_BASE as usize;
        data[ee..ee + chip.eeprom_size as usize].fill(0xFF);
        let flash = chip.prog_base as usize;
        data[flash..flash + chip.flash_size as usize].fill(0xFF);

        Self {
            state: Rc::new(RefCell::new(State {
                chip: chip.clone(),
                data,
                cs: [0; 16],
                rx: VecDeque::new(),
                parser: Parser::Idle,
                ptr: 0,
                repeat: 0,
                keys: KeyStatus::empty(),
                sys: SysStatus::empty(),
                in_reset: false,
                page_buffer: Vec::new(),
                urow_buffer: Vec::new(),
                busy_polls: 0,
                busy_left: 0,
                lock_polls: 0,
                lock_left: 0,
                refuse_prog: false,
                resets: 0,
                pesig: VecDeque::new(),
                corrupt_at: None,
                written: 0,
                breaks: 0,
                status_reads: 0,
                page_writes: 0,
            })),
        }
    }

    /// STATUS reads that report busy after each NVM write or erase
    pub fn set_busy_polls(&self, n: u32) {
        self.state.borrow_mut().busy_polls = n;
    }

    /// Make the NVM controller busy for the next `n` STATUS reads
    pub fn start_busy(&self, n: u32) {
        self.state.borrow_mut().busy_left = n;
    }

    /// SYS_STATUS reads that still report the lock bit after a chip erase
    pub fn set_lock_polls(&self, n: u32) {
        self.state.borrow_mut().lock_polls = n;
    }

    /// Accept the NVM programming key but never enter programming mode
    pub fn refuse_prog_mode(&self) {
        self.state.borrow_mut().refuse_prog = true;
    }

    /// Completed reset pulses
    pub fn resets(&self) -> usize {
        self.state.borrow().resets
    }

    /// Queue an error signature for the next STATUSB read
    pub fn push_pesig(&self, code: u8) {
        self.state.borrow_mut().pesig.push_back(code);
    }

    /// Flip the echo of the byte `offset` positions after the last one written
    pub fn corrupt_echo(&self, offset: usize) {
        let mut s = self.state.borrow_mut();
        s.corrupt_at = Some(s.written + offset);
    }

    pub fn load_flash(&self, offset: usize, bytes: &[u8]) {
        let mut s = self.state.borrow_mut();
        let base = s.chip.prog_base as usize + offset;
        s.data[base..base + bytes.len()].copy_from_slice(bytes);
    }

    pub fn bytes_written(&self) -> usize {
        self.state.borrow().written
    }

    pub fn breaks(&self) -> usize {
        self.state.borrow().breaks
    }

    pub fn status_reads(&self) -> usize {
        self.state.borrow().status_reads
    }

    pub fn page_writes(&self) -> usize {
        self.state.borrow().page_writes
    }

    pub fn sys_status(&self) -> SysStatus {
        self.state.borrow().sys
    }

    pub fn data(&self, address: u16) -> u8 {
        self.state.borrow().data[address as usize]
    }

    pub fn fuse(&self, offset: usize) -> u8 {
        self.state.borrow().data[FUSES_BASE as usize + offset]
    }

    pub fn flash(&self) -> Vec<u8> {
        let s = self.state.borrow();
        let base = s.chip.prog_base as usize;
        s.data[base..base + s.chip.flash_size as usize].to_vec()
    }

    pub fn eeprom(&self) -> Vec<u8> {
        let s = self.state.borrow();
        let base = EEPROM_BASE as usize;
        s.data[base..base + s.chip.eeprom_size as usize].to_vec()
    }

    pub fn user_row(&self) -> Vec<u8> {
        let s = self.state.borrow();
        let base = USERROW_BASE as usize;
        s.data[base..base + s.chip.user_row_size() as usize].to_vec()
    }
}

impl State {
    fn feed(&mut self, byte: u8) {
        let echo = if self.corrupt_at == Some(self.written) {
            byte ^ 0xFF
        } else {
            byte
        };
        self.rx.push_back(echo);
        self.written += 1;

        let parser = std::mem::replace(&mut self.parser, Parser::Idle);
        self.parser = match parser {
            Parser::Idle if byte == SYNC => Parser::Opcode,
            Parser::Idle => Parser::Idle,
            Parser::Opcode => self.opcode(byte),
            Parser::Address {
                code,
                mut bytes,
                need,
            } => {
                bytes.push(byte);
                if bytes.len() < need {
                    Parser::Address { code, bytes, need }
                } else {
                    let address = le16(&bytes);
                    let size = (code & 0x03) as usize + 1;
                    if Opcode::from_byte(code) == Opcode::Lds {
                        for i in 0..size {
                            let value = self.read(address.wrapping_add(i as u16));
                            self.rx.push_back(value);
                        }
                        Parser::Idle
                    } else {
                        self.rx.push_back(ACK);
                        Parser::StsData {
                            address,
                            bytes: Vec::new(),
                            need: size,
                        }
                    }
                }
            }
            Parser::StsData {
                address,
                mut bytes,
                need,
            } => {
                bytes.push(byte);
                if bytes.len() < need {
                    Parser::StsData {
                        address,
                        bytes,
                        need,
                    }
                } else {
                    for (i, &b) in bytes.iter().enumerate() {
                        self.write(address.wrapping_add(i as u16), b);
                    }
                    self.rx.push_back(ACK);
                    Parser::Idle
                }
            }
            Parser::StData {
                ptr,
                mut bytes,
                need,
                left,
            } => {
                bytes.push(byte);
                if bytes.len() < need {
                    Parser::StData {
                        ptr,
                        bytes,
                        need,
                        left,
                    }
                } else {
                    self.store_indirect(ptr, &bytes);
                    self.rx.push_back(ACK);
                    if left > 1 {
                        Parser::StData {
                            ptr,
                            bytes: Vec::new(),
                            need,
                            left: left - 1,
                        }
                    } else {
                        Parser::Idle
                    }
                }
            }
            Parser::Stcs(register) => {
                self.write_cs(register, byte);
                Parser::Idle
            }
            Parser::Repeat => {
                self.repeat = byte as usize;
                Parser::Idle
            }
            Parser::Key(mut bytes) => {
                bytes.push(byte);
                if bytes.len() < KEY_LEN {
                    Parser::Key(bytes)
                } else {
                    self.accept_key(&bytes);
                    Parser::Idle
                }
            }
        };
    }

    fn opcode(&mut self, code: u8) -> Parser {
        let size = (code & 0x03) as usize + 1;
        match Opcode::from_byte(code) {
            Opcode::Lds | Opcode::Sts => Parser::Address {
                code,
                bytes: Vec::new(),
                need: if (code >> 2) & 0x03 == 0 { 1 } else { 2 },
            },
            Opcode::Ld => {
                let ptr = (code >> 2) & 0x03;
                for _ in 0..=std::mem::take(&mut self.repeat) {
                    for i in 0..size {
                        let value = self.read(self.ptr.wrapping_add(i as u16));
                        self.rx.push_back(value);
                    }
                    if ptr == PtrMode::PostInc as u8 {
                        self.ptr = self.ptr.wrapping_add(size as u16);
                    }
                }
                Parser::Idle
            }
            Opcode::St => Parser::StData {
                ptr: (code >> 2) & 0x03,
                bytes: Vec::new(),
                need: size,
                left: std::mem::take(&mut self.repeat) + 1,
            },
            Opcode::Ldcs => {
                let value = self.read_cs(code & 0x0F);
                self.rx.push_back(value);
                Parser::Idle
            }
            Opcode::Stcs => Parser::Stcs(code & 0x0F),
            Opcode::Repeat => Parser::Repeat,
            Opcode::Key if code & KEY_SIB != 0 => {
                self.rx.extend(SIB.iter().copied());
                Parser::Idle
            }
            Opcode::Key => Parser::Key(Vec::new()),
        }
    }

    fn store_indirect(&mut self, ptr: u8, bytes: &[u8]) {
        if ptr == PtrMode::Pointer as u8 {
            self.ptr = le16(bytes);
            return;
        }
        for (i, &b) in bytes.iter().enumerate() {
            self.write(self.ptr.wrapping_add(i as u16), b);
        }
        if ptr == PtrMode::PostInc as u8 {
            self.ptr = self.ptr.wrapping_add(bytes.len() as u16);
        }
    }

    fn in_region(address: u16, base: u32, size: u32) -> bool {
        (address as u32) >= base && (address as u32) < base + size
    }

    fn read(&mut self, address: u16) -> u8 {
        if address == self.chip.nvm_base + NVMCTRL_STATUS {
            self.status_reads += 1;
            if self.busy_left > 0 {
                self.busy_left -= 1;
                return NvmStatus::FBUSY.bits();
            }
            return 0;
        }
        self.data[address as usize]
    }

    fn write(&mut self, address: u16, value: u8) {
        let chip = &self.chip;
        let nvm_prog = self.sys.contains(SysStatus::NVMPROG);
        if address == chip.nvm_base + NVMCTRL_CTRLA {
            if nvm_prog {
                self.nvm_command(value);
            }
        } else if Self::in_region(address, USERROW_BASE, chip.user_row_size()) {
            if self.sys.contains(SysStatus::UROWPROG) {
                self.urow_buffer.push((address, value));
            } else if nvm_prog {
                self.page_buffer.push((address, value));
            }
        } else if Self::in_region(address, chip.prog_base, chip.flash_size)
            || Self::in_region(address, EEPROM_BASE, chip.eeprom_size)
        {
            if nvm_prog {
                self.page_buffer.push((address, value));
            }
        } else {
            self.data[address as usize] = value;
        }
    }

    fn erase(&mut self, base: u32, size: u32) {
        self.data[base as usize..(base + size) as usize].fill(0xFF);
    }

    fn nvm_command(&mut self, command: u8) {
        match command {
            0x01 | 0x03 => {
                for (address, value) in std::mem::take(&mut self.page_buffer) {
                    self.data[address as usize] = value;
                }
                self.page_writes += 1;
                self.busy_left = self.busy_polls;
            }
            0x04 => self.page_buffer.clear(),
            0x05 => {
                self.erase(self.chip.prog_base, self.chip.flash_size);
                self.erase(EEPROM_BASE, self.chip.eeprom_size);
                self.busy_left = self.busy_polls;
            }
            0x06 => {
                self.erase(EEPROM_BASE, self.chip.eeprom_size);
                self.busy_left = self.busy_polls;
            }
            0x07 => {
                let nvm = self.chip.nvm_base as usize;
                let address = u16::from_le_bytes([
                    self.data[nvm + NVMCTRL_ADDRL as usize],
                    self.data[nvm + NVMCTRL_ADDRH as usize],
                ]);
                self.data[address as usize] = self.data[nvm + NVMCTRL_DATAL as usize];
                self.busy_left = self.busy_polls;
            }
            _ => {}
        }
    }

    fn read_cs(&mut self, register: u8) -> u8 {
        match register {
            CS_STATUSA => 0x30,
            CS_STATUSB => self.pesig.pop_front().unwrap_or(0),
            CS_ASI_KEY_STATUS => self.keys.bits(),
            CS_ASI_SYS_STATUS => {
                let mut status = self.sys;
                if self.lock_left > 0 {
                    self.lock_left -= 1;
                    status |= SysStatus::LOCKSTATUS;
                }
                status.bits()
            }
            r => self.cs[r as usize],
        }
    }

    fn write_cs(&mut self, register: u8, value: u8) {
        match register {
            CS_ASI_RESET_REQ if value == RESET_SIGNATURE => {
                self.in_reset = true;
                self.sys |= SysStatus::RSTSYS;
            }
            CS_ASI_RESET_REQ => {
                if std::mem::take(&mut self.in_reset) {
                    self.sys.remove(SysStatus::RSTSYS);
                    self.release_reset();
                }
            }
            CS_ASI_KEY_STATUS => {
                self.keys.remove(KeyStatus::from_bits_truncate(value));
            }
            CS_ASI_SYS_CTRLA => {
                let ctrl = SysCtrlA::from_bits_truncate(value);
                if ctrl.contains(SysCtrlA::UROWWRITE_FINAL) && self.sys.contains(SysStatus::UROWPROG)
                {
                    for (address, value) in std::mem::take(&mut self.urow_buffer) {
                        self.data[address as usize] = value;
                    }
                    self.sys.remove(SysStatus::UROWPROG);
                }
            }
            r => self.cs[r as usize] = value,
        }
    }

    fn accept_key(&mut self, key: &[u8]) {
        if key == KEY_NVM_PROG {
            self.keys |= KeyStatus::NVMPROG;
        } else if key == KEY_CHIP_ERASE {
            self.keys |= KeyStatus::CHIPERASE;
        } else if key == KEY_USER_ROW {
            self.keys |= KeyStatus::UROWWRITE;
        }
    }

    fn release_reset(&mut self) {
        self.resets += 1;
        if self.keys.contains(KeyStatus::CHIPERASE) {
            self.keys.remove(KeyStatus::CHIPERASE);
            self.erase(self.chip.prog_base, self.chip.flash_size);
            self.erase(EEPROM_BASE, self.chip.eeprom_size);
            self.lock_left = self.lock_polls;
        }
        if self.keys.contains(KeyStatus::NVMPROG) && !self.refuse_prog {
            self.keys.remove(KeyStatus::NVMPROG);
            self.sys |= SysStatus::NVMPROG;
        } else {
            self.sys.remove(SysStatus::NVMPROG);
        }
        if self.keys.contains(KeyStatus::UROWWRITE) {
            self.sys |= SysStatus::UROWPROG;
        }
    }
}

fn le16(bytes: &[u8]) -> u16 {
    match bytes {
        [lo] => *lo as u16,
        [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
        [] => 0,
    }
}

impl SerialLine for SimTarget {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut s = self.state.borrow_mut();
        for &b in data {
            s.feed(b);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let mut s = self.state.borrow_mut();
        let n = buf.len().min(s.rx.len());
        for slot in buf.iter_mut().take(n) {
            *slot = s.rx.pop_front().unwrap_or(0);
        }
        Ok(n)
    }

    fn send_double_break(&mut self) -> Result<()> {
        let mut s = self.state.borrow_mut();
        s.breaks += 1;
        s.parser = Parser::Idle;
        s.repeat = 0;
        s.rx.clear();
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.state.borrow_mut().rx.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rupdi_core::chip::ChipDatabase;

    #[test]
    fn test_repeated_load_walks_pointer() {
        let chip = ChipDatabase::builtin()
            .unwrap()
            .find("attiny817")
            .unwrap()
            .clone();
        let mut sim = SimTarget::new(&chip);
        sim.load_flash(0, &[1, 2, 3]);
        // ST ptr 0x8000, REPEAT 2, LD *(ptr++)
        sim.write(&[0x55, 0x69, 0x00, 0x80, 0x55, 0xA0, 0x02, 0x55, 0x24])
            .unwrap();
        let mut buf = [0u8; 13];
        assert_eq!(sim.read(&mut buf, Duration::ZERO).unwrap(), 13);
        // 4 echo + ACK + 3 echo + 2 echo + 3 data
        assert_eq!(buf[4], ACK);
        assert_eq!(&buf[10..], &[1, 2, 3]);
    }
}
