//! Single-wire serial line
//!
//! A UART with TX and RX tied together through a resistor forms the UPDI
//! line, so every byte sent is also received back. The engine reads and
//! checks that echo itself; the transport just moves bytes, sends breaks
//! and drops stale input.

use std::time::Duration;

use crate::error::Result;

/// Byte-level access to the UPDI line
pub trait SerialLine {
    /// Write all bytes
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes, returning early when `timeout` passes
    /// without data
    ///
    /// Returns the number of bytes read; a short count means the timeout hit.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Send two break characters to reset the UPDI link
    fn send_double_break(&mut self) -> Result<()>;

    /// Discard pending input
    fn clear_input(&mut self) -> Result<()>;
}

impl<T: SerialLine + ?Sized> SerialLine for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read(buf, timeout)
    }

    fn send_double_break(&mut self) -> Result<()> {
        (**self).send_double_break()
    }

    fn clear_input(&mut self) -> Result<()> {
        (**self).clear_input()
    }
}

pub mod serial {
    //! serialport-backed line

    use std::io::{Read, Write};
    use std::time::Duration;

    use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

    use super::SerialLine;
    use crate::error::{Result, SerialError};

    /// Length of each break; long enough for the slowest UPDI clock
    const BREAK_DURATION: Duration = Duration::from_millis(25);

    /// Idle time after each break
    const BREAK_GAP: Duration = Duration::from_millis(1);

    /// UPDI line on a host serial port
    pub struct SerialPortLine {
        port: Box<dyn SerialPort>,
    }

    impl SerialPortLine {
        /// Open `device` at `baud` in 8E2 framing
        pub fn open(device: &str, baud: u32) -> Result<Self> {
            let port = serialport::new(device, baud)
                .data_bits(DataBits::Eight)
                .parity(Parity::Even)
                .stop_bits(StopBits::Two)
                .flow_control(FlowControl::None)
                .timeout(Duration::from_millis(100))
                .open()
                .map_err(|e| SerialError::OpenFailed(format!("{}: {}", device, e)))?;

            log::info!("updi: opened {} at {} baud (8E2)", device, baud);
            Ok(Self { port })
        }
    }

    impl SerialLine for SerialPortLine {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            log::trace!("updi: >> {:02X?}", data);
            self.port.write_all(data)?;
            self.port.flush()?;
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
            self.port.set_timeout(timeout)?;
            let mut n = 0;
            while n < buf.len() {
                match self.port.read(&mut buf[n..]) {
                    Ok(0) => break,
                    Ok(k) => n += k,
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            log::trace!("updi: << {:02X?}", &buf[..n]);
            Ok(n)
        }

        fn send_double_break(&mut self) -> Result<()> {
            self.port.clear(ClearBuffer::Input)?;
            for _ in 0..2 {
                self.port.set_break()?;
                std::thread::sleep(BREAK_DURATION);
                self.port.clear_break()?;
                std::thread::sleep(BREAK_GAP);
            }
            self.port.clear(ClearBuffer::Input)?;
            Ok(())
        }

        fn clear_input(&mut self) -> Result<()> {
            self.port.clear(ClearBuffer::Input)?;
            Ok(())
        }
    }
}
