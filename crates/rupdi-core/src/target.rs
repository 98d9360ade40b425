//! Target capability trait
//!
//! Both engines implement [`Target`]. Programming operations are required;
//! live-debug operations have default implementations that fail with
//! [`Error::Unsupported`], so an engine without debug support never silently
//! succeeds.
//!
//! All flash addresses are byte offsets from the start of flash. EEPROM and
//! user-row addresses are byte offsets from their segment base. Program
//! counter and breakpoint addresses are byte addresses; engines convert to
//! word addresses on the wire.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::memory::EraseMode;

/// Receives complete lines of target debug output
pub trait MessageListener: Send {
    /// Called once per accumulated line (newline included)
    fn message(&mut self, text: &str);
}

impl<F> MessageListener for F
where
    F: FnMut(&str) + Send,
{
    fn message(&mut self, text: &str) {
        self(text)
    }
}

/// Progress side channel for long-running transfers
pub trait Progress: Send {
    /// A new phase begins with `total` units of work
    fn start(&mut self, phase: &str, total: usize);

    /// `done` units of the current phase are complete
    fn update(&mut self, done: usize);

    /// The current phase has finished
    fn finish(&mut self) {}
}

/// A no-op progress reporter
pub struct NoProgress;

impl Progress for NoProgress {
    fn start(&mut self, _phase: &str, _total: usize) {}
    fn update(&mut self, _done: usize) {}
}

/// Operations available on a UPDI target behind some probe
pub trait Target {
    /// Read the three signature bytes
    fn device_signature(&mut self) -> Result<[u8; 3]>;

    /// Read the 13-byte device serial number
    fn device_serial_number(&mut self) -> Result<Vec<u8>>;

    /// Read `len` bytes of flash starting at `address`
    fn read_flash(&mut self, address: u32, len: usize) -> Result<Vec<u8>>;

    /// Write flash starting at `address`; the tail of the last page is padded with 0xFF
    fn write_flash(&mut self, address: u32, data: &[u8]) -> Result<()>;

    /// Erase a region of the target
    fn erase_target(&mut self, address: u32, mode: EraseMode) -> Result<()>;

    /// Read the fuse bytes at the given offsets from the fuse base
    fn read_fuses(&mut self, offsets: &[u8]) -> Result<Vec<u8>>;

    /// Write one fuse byte per offset; `offsets` and `values` must have equal length
    fn write_fuses(&mut self, offsets: &[u8], values: &[u8]) -> Result<()>;

    /// Read EEPROM
    fn read_eeprom(&mut self, address: u32, len: usize) -> Result<Vec<u8>>;

    /// Write EEPROM
    fn write_eeprom(&mut self, address: u32, data: &[u8]) -> Result<()>;

    /// Read the user row
    fn read_user_row(&mut self, address: u32, len: usize) -> Result<Vec<u8>>;

    /// Write the user row
    fn write_user_row(&mut self, address: u32, data: &[u8]) -> Result<()>;

    /// Target supply voltage in volts
    fn target_voltage(&mut self) -> Result<f32> {
        Err(Error::Unsupported("target_voltage"))
    }

    /// Reset the target and hold it stopped at the reset vector
    fn reset(&mut self) -> Result<()> {
        Err(Error::Unsupported("reset"))
    }

    /// Resume execution and wait for the next break
    fn run(&mut self) -> Result<()> {
        Err(Error::Unsupported("run"))
    }

    /// Stop execution
    fn stop(&mut self) -> Result<()> {
        Err(Error::Unsupported("stop"))
    }

    /// Execute a single instruction
    fn step(&mut self) -> Result<()> {
        Err(Error::Unsupported("step"))
    }

    /// Resume execution with a one-shot breakpoint at `address`
    fn run_to_address(&mut self, _address: u32) -> Result<()> {
        Err(Error::Unsupported("run_to_address"))
    }

    /// Program counter as a byte address
    fn program_counter(&mut self) -> Result<u32> {
        Err(Error::Unsupported("program_counter"))
    }

    /// Set the program counter from a byte address
    fn set_program_counter(&mut self, _address: u32) -> Result<()> {
        Err(Error::Unsupported("set_program_counter"))
    }

    /// Read data space
    fn read_sram(&mut self, _address: u32, _len: usize) -> Result<Vec<u8>> {
        Err(Error::Unsupported("read_sram"))
    }

    /// Write data space
    fn write_sram(&mut self, _address: u32, _data: &[u8]) -> Result<()> {
        Err(Error::Unsupported("write_sram"))
    }

    /// Read `len` general purpose registers starting at `first`
    fn read_registers(&mut self, _first: u8, _len: usize) -> Result<Vec<u8>> {
        Err(Error::Unsupported("read_registers"))
    }

    /// Write general purpose registers starting at `first`
    fn write_registers(&mut self, _first: u8, _values: &[u8]) -> Result<()> {
        Err(Error::Unsupported("write_registers"))
    }

    /// Read the stack pointer
    fn stack_pointer(&mut self) -> Result<u16> {
        Err(Error::Unsupported("stack_pointer"))
    }

    /// Write the stack pointer
    fn set_stack_pointer(&mut self, _sp: u16) -> Result<()> {
        Err(Error::Unsupported("set_stack_pointer"))
    }

    /// Read SREG
    fn status_register(&mut self) -> Result<u8> {
        Err(Error::Unsupported("status_register"))
    }

    /// Write SREG
    fn set_status_register(&mut self, _value: u8) -> Result<()> {
        Err(Error::Unsupported("set_status_register"))
    }

    /// Arm hardware breakpoint slot `num` (1-3) at a byte address
    fn set_hw_breakpoint(&mut self, _num: u8, _address: u32) -> Result<()> {
        Err(Error::Unsupported("set_hw_breakpoint"))
    }

    /// Release hardware breakpoint slot `num`
    fn clear_hw_breakpoint(&mut self, _num: u8) -> Result<()> {
        Err(Error::Unsupported("clear_hw_breakpoint"))
    }

    /// Insert software breakpoints at word-aligned byte addresses
    fn set_sw_breakpoints(&mut self, _addresses: &[u32]) -> Result<()> {
        Err(Error::Unsupported("set_sw_breakpoints"))
    }

    /// Remove software breakpoints
    fn clear_sw_breakpoints(&mut self, _addresses: &[u32]) -> Result<()> {
        Err(Error::Unsupported("clear_sw_breakpoints"))
    }

    /// Remove every software breakpoint
    fn clear_all_sw_breakpoints(&mut self) -> Result<()> {
        Err(Error::Unsupported("clear_all_sw_breakpoints"))
    }

    /// Install the receiver for target debug output
    fn set_message_listener(&mut self, _listener: Box<dyn MessageListener>) {}

    /// Install a progress reporter
    fn set_progress(&mut self, _progress: Box<dyn Progress>) {}

    /// Install the token checked between polling iterations
    fn set_cancel_token(&mut self, _token: CancelToken) {}

    /// Unwind the connection and release the transport
    fn close(&mut self) -> Result<()>;
}
