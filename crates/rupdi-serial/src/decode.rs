//! UPDI line trace decoder
//!
//! Turns a captured byte stream of the single-wire line (host bytes and
//! target replies interleaved, as a logic analyser sees them) into one
//! readable line per instruction. A stream that ends mid-instruction gets a
//! final "truncated" line instead of an error.

use std::fmt::Write;

use crate::protocol::{Opcode, PtrMode, ACK, CS_REGISTER_NAMES, KEY_LEN, KEY_SIB, SIB_LEN, SYNC};

/// Operand notation by pointer mode field; mode 3 is reserved
const PTR_NAMES: [&str; 4] = ["*(ptr)", "*(ptr++)", "ptr", "err"];

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let out = self.bytes.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(out)
    }

    fn byte(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    /// Little-endian value of 1 or 2 bytes
    fn value(&mut self, len: usize) -> Option<u16> {
        let b = self.take(len)?;
        Some(match b {
            [lo] => *lo as u16,
            [lo, hi] => u16::from_le_bytes([*lo, *hi]),
            _ => 0,
        })
    }
}

/// Operand width of a 2-bit size field
fn operand_len(field: u8) -> usize {
    if field == 0 {
        1
    } else {
        2
    }
}

fn hex(value: u16, len: usize) -> String {
    if len == 1 {
        format!("0x{:02X}", value)
    } else {
        format!("0x{:04X}", value)
    }
}

fn key_text(bytes: &[u8]) -> String {
    let mut out = String::new();
    for b in bytes {
        let _ = write!(out, "0x{:02X} ", b);
    }
    out.push('"');
    out.extend(bytes.iter().map(|&b| {
        if b.is_ascii_graphic() || b == b' ' {
            b as char
        } else {
            '.'
        }
    }));
    out.push('"');
    out
}

/// Decode one instruction after its opcode; `None` means the stream ended
fn decode_instruction(cur: &mut Cursor<'_>, code: u8, repeat: &mut usize) -> Option<Vec<String>> {
    let ptr_name = PTR_NAMES[((code >> 2) & 0x03) as usize];
    let mut lines = Vec::new();

    match Opcode::from_byte(code) {
        Opcode::Lds => {
            let addr_len = operand_len((code >> 2) & 0x03);
            let data_len = operand_len(code & 0x03);
            let address = cur.value(addr_len)?;
            let data = cur.value(data_len)?;
            lines.push(format!(
                "LDS from addr: {} returns: {}",
                hex(address, addr_len),
                hex(data, data_len)
            ));
        }
        Opcode::Ld => {
            let data_len = operand_len(code & 0x03);
            let data = cur.value(data_len)?;
            lines.push(format!("LD load via {} returns: {}", ptr_name, hex(data, data_len)));
            for _ in 0..std::mem::take(repeat) {
                let data = cur.value(data_len)?;
                lines.push(format!(
                    "  RPT: LD load via {} returns: {}",
                    ptr_name,
                    hex(data, data_len)
                ));
            }
        }
        Opcode::Sts => {
            let addr_len = operand_len((code >> 2) & 0x03);
            let data_len = operand_len(code & 0x03);
            let address = cur.value(addr_len)?;
            let ack1 = cur.byte()?;
            let data = cur.value(data_len)?;
            let ack2 = cur.byte()?;
            let mut line = format!(
                "STS store data: {} into addr: {}",
                hex(data, data_len),
                hex(address, addr_len)
            );
            if ack1 != ACK || ack2 != ACK {
                line.push_str(" (missing ACK)");
            }
            lines.push(line);
        }
        Opcode::St => {
            let data_len = operand_len(code & 0x03);
            let is_pointer = (code >> 2) & 0x03 == PtrMode::Pointer as u8;
            let describe = |cur: &mut Cursor<'_>, prefix: &str| -> Option<String> {
                let data = cur.value(data_len)?;
                let ack = cur.byte()?;
                let mut line = if is_pointer {
                    format!("{}ST store data: 0x{:04X} into ptr", prefix, data)
                } else {
                    format!(
                        "{}ST store data: {} via {}",
                        prefix,
                        hex(data, data_len),
                        ptr_name
                    )
                };
                if ack != ACK {
                    line.push_str(" (missing ACK)");
                }
                Some(line)
            };
            lines.push(describe(cur, "")?);
            for _ in 0..std::mem::take(repeat) {
                lines.push(describe(cur, "  RPT: ")?);
            }
        }
        Opcode::Ldcs => {
            let value = cur.byte()?;
            lines.push(format!(
                "LDCS load from {} returns: 0x{:02X}",
                CS_REGISTER_NAMES[(code & 0x0F) as usize],
                value
            ));
        }
        Opcode::Repeat => {
            let count = cur.byte()? as usize;
            *repeat = count;
            lines.push(format!("REPEAT following instruction {} times", count + 1));
        }
        Opcode::Stcs => {
            let value = cur.byte()?;
            lines.push(format!(
                "STCS store data 0x{:02X} into {}",
                value,
                CS_REGISTER_NAMES[(code & 0x0F) as usize]
            ));
        }
        Opcode::Key => {
            if code & KEY_SIB != 0 {
                lines.push(format!("SIB = {}", key_text(cur.take(SIB_LEN)?)));
            } else {
                lines.push(format!("KEY = {}", key_text(cur.take(KEY_LEN)?)));
            }
        }
    }
    Some(lines)
}

/// Decode a captured UPDI byte stream into text, one instruction per line
///
/// Bytes outside an instruction (before a SYNC) are skipped.
pub fn decode_wire(bytes: &[u8]) -> String {
    let mut cur = Cursor { bytes, pos: 0 };
    let mut repeat = 0usize;
    let mut out = String::new();

    while let Some(b) = cur.byte() {
        if b != SYNC {
            continue;
        }
        let Some(code) = cur.byte() else {
            out.push_str("  0x55: truncated\n");
            break;
        };
        let prefix = format!("  0x55 0x{:02X}: ", code);
        match decode_instruction(&mut cur, code, &mut repeat) {
            Some(lines) => {
                for line in lines {
                    out.push_str(&prefix);
                    out.push_str(&line);
                    out.push('\n');
                }
            }
            None => {
                out.push_str(&prefix);
                out.push_str("truncated\n");
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol;

    #[test]
    fn test_decode_link_setup() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&protocol::stcs(protocol::CS_CTRLB, 0x08));
        wire.extend_from_slice(&protocol::ldcs(protocol::CS_STATUSA));
        wire.push(0x30);
        let text = decode_wire(&wire);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, [
            "  0x55 0xC3: STCS store data 0x08 into CTRLB",
            "  0x55 0x80: LDCS load from STATUSA returns: 0x30",
        ]);
    }

    #[test]
    fn test_decode_repeated_read() {
        let wire = [
            0x55, 0x69, 0x00, 0x11, 0x40, // ST ptr
            0x55, 0xA0, 0x02, // REPEAT
            0x55, 0x24, 0x1E, 0x93, 0x20, // LD *(ptr++)
        ];
        let text = decode_wire(&wire);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "  0x55 0x69: ST store data: 0x1100 into ptr");
        assert_eq!(lines[1], "  0x55 0xA0: REPEAT following instruction 3 times");
        assert_eq!(lines[2], "  0x55 0x24: LD load via *(ptr++) returns: 0x1E");
        assert_eq!(lines[4], "  0x55 0x24:   RPT: LD load via *(ptr++) returns: 0x20");
    }

    #[test]
    fn test_decode_sts_and_key() {
        let mut wire = vec![0x55, 0x44, 0x00, 0x10, 0x40, 0x05, 0x40];
        wire.extend_from_slice(&protocol::key(&protocol::KEY_NVM_PROG));
        let text = decode_wire(&wire);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "  0x55 0x44: STS store data: 0x05 into addr: 0x1000");
        assert!(lines[1].starts_with("  0x55 0xE0: KEY = 0x20 0x67"));
        assert!(lines[1].ends_with("\" gorPMVN\""));
    }

    #[test]
    fn test_truncated_stream() {
        let text = decode_wire(&[0x55, 0x04, 0x02]);
        assert_eq!(text, "  0x55 0x04: truncated\n");
        assert_eq!(decode_wire(&[0x00, 0x55]), "  0x55: truncated\n");
    }
}
