//! Human-readable rendering of AVR protocol commands
//!
//! Used for trace logging only. The output is a colon-joined path of
//! handler, command, context and parameter names, for example
//! `AVR8GENERIC:CMD_AVR8_MEMORY_READ:MEMTYPE_FLASH_PAGE:Start-0x00000040:Bytes-0x00000040:`.

use std::fmt::Write;

use rupdi_core::memory::memtype_name;

use crate::protocol::*;

/// Render a command (starting at the handler ID) as text
pub fn decode_command(cmd: &[u8]) -> String {
    let mut out = String::new();
    if decode_into(&mut out, cmd).is_none() {
        out.push_str("Err: truncated");
    }
    out
}

fn at(cmd: &[u8], idx: usize) -> Option<u8> {
    cmd.get(idx).copied()
}

fn le16(cmd: &[u8], idx: usize) -> Option<u16> {
    Some(u16::from_le_bytes([at(cmd, idx)?, at(cmd, idx + 1)?]))
}

fn le32(cmd: &[u8], idx: usize) -> Option<u32> {
    Some(u32::from_le_bytes([
        at(cmd, idx)?,
        at(cmd, idx + 1)?,
        at(cmd, idx + 2)?,
        at(cmd, idx + 3)?,
    ]))
}

fn err(out: &mut String, value: u8) {
    let _ = write!(out, "Err: 0x{:02X}:", value);
}

fn decode_into(out: &mut String, cmd: &[u8]) -> Option<()> {
    match at(cmd, 0)? {
        HANDLER_DISCOVERY => {
            out.push_str("DISCOVERY:");
            decode_discovery(out, cmd)
        }
        HANDLER_HOUSEKEEPING => {
            out.push_str("HOUSEKEEPING:");
            decode_housekeeping(out, cmd)
        }
        HANDLER_AVRISP => {
            out.push_str("AVRISP:Err: not implemented");
            Some(())
        }
        HANDLER_AVR8 => {
            out.push_str("AVR8GENERIC:");
            decode_avr8(out, cmd)
        }
        HANDLER_AVR32 => {
            out.push_str("AVR32GENERIC:Err: not implemented");
            Some(())
        }
        HANDLER_TPI => {
            out.push_str("TPI:Err: not implemented");
            Some(())
        }
        HANDLER_EDBG_CTRL => {
            out.push_str("EDBG_CTRL:");
            decode_edbg_ctrl(out, cmd)
        }
        other => {
            err(out, other);
            Some(())
        }
    }
}

fn decode_discovery(out: &mut String, cmd: &[u8]) -> Option<()> {
    match at(cmd, 1)? {
        CMD_DISCOVERY_QUERY => {
            out.push_str("QUERY:");
            match at(cmd, 3)? {
                DISCOVERY_COMMAND_HANDLERS => out.push_str("COMMAND_HANDLERS:"),
                DISCOVERY_TOOL_NAME => out.push_str("TOOL_NAME:"),
                DISCOVERY_SERIAL_NUMBER => out.push_str("SERIAL_NUMBER:"),
                DISCOVERY_MNF_DATE => out.push_str("MNF_DATE:"),
                other => err(out, other),
            }
        }
        other => err(out, other),
    }
    Some(())
}

fn decode_housekeeping(out: &mut String, cmd: &[u8]) -> Option<()> {
    match at(cmd, 1)? {
        CMD_HOUSEKEEPING_QUERY => match at(cmd, 3)? {
            0x00 => out.push_str("HK_QUERY_COMMANDS:"),
            other => err(out, other),
        },
        CMD_HOUSEKEEPING_SET => err(out, at(cmd, 3)?),
        CMD_HOUSEKEEPING_GET => {
            out.push_str("CMD_HOUSEKEEPING_GET:");
            match (at(cmd, 3)?, at(cmd, 4)?) {
                (HK_CONTEXT_CONFIG, HOUSEKEEPING_CONFIG_HWREV) => {
                    out.push_str("HOUSEKEEPING_CONFIG_HWREV:")
                }
                (HK_CONTEXT_CONFIG, HOUSEKEEPING_CONFIG_FWREV_MAJ) => {
                    out.push_str("HOUSEKEEPING_CONFIG_FWREV_MAJ:")
                }
                (HK_CONTEXT_CONFIG, HOUSEKEEPING_CONFIG_FWREV_MIN) => {
                    out.push_str("HOUSEKEEPING_CONFIG_FWREV_MIN:")
                }
                (HK_CONTEXT_CONFIG, HOUSEKEEPING_CONFIG_BUILD) => {
                    out.push_str("HOUSEKEEPING_CONFIG_BUILD:")
                }
                (HK_CONTEXT_ANALOG, HOUSEKEEPING_ANALOG_VTREF) => {
                    out.push_str("HOUSEKEEPING_ANALOG_VTREF:")
                }
                (HK_CONTEXT_CONFIG | HK_CONTEXT_ANALOG, param) => err(out, param),
                (ctx, _) => err(out, ctx),
            }
        }
        CMD_HOUSEKEEPING_START_SESSION => out.push_str("CMD_HOUSEKEEPING_START_SESSION:"),
        CMD_HOUSEKEEPING_END_SESSION => out.push_str("CMD_HOUSEKEEPING_END_SESSION:"),
        CMD_HOUSEKEEPING_JTAG_DETECT => out.push_str("CMD_HOUSEKEEPING_JTAG_DETECT:"),
        CMD_HOUSEKEEPING_CAL_OSC => out.push_str("CMD_HOUSEKEEPING_CAL_OSC:"),
        CMD_HOUSEKEEPING_FW_UPGRADE => out.push_str("CMD_HOUSEKEEPING_FW_UPGRADE:"),
        other => err(out, other),
    }
    Some(())
}

fn decode_edbg_ctrl(out: &mut String, cmd: &[u8]) -> Option<()> {
    let control_name = |addr: u8| match addr {
        EDBG_CTRL_LED_USAGE => Some("EDBG_CTRL_LED_USAGE:"),
        EDBG_CTRL_EXT_PROG => Some("EDBG_CTRL_EXT_PROG:"),
        EDBG_CTRL_TARGET_POWER => Some("EDBG_CTRL_TARGET_POWER:"),
        _ => None,
    };

    match at(cmd, 1)? {
        CMD_EDBG_QUERY => {
            out.push_str("CMD_EDBG_QUERY:");
            match at(cmd, 3)? {
                EDBG_QUERY_COMMANDS => out.push_str("EDBG_QUERY_COMMANDS:"),
                other => err(out, other),
            }
        }
        op @ (CMD_EDBG_SET | CMD_EDBG_GET) => {
            out.push_str(if op == CMD_EDBG_SET {
                "CMD_EDBG_SET:"
            } else {
                "CMD_EDBG_GET:"
            });
            match at(cmd, 3)? {
                EDBG_CONTEXT_CONTROL => {
                    out.push_str("EDBG_CONTEXT_CONTROL:");
                    let addr = at(cmd, 4)?;
                    match control_name(addr) {
                        Some(name) => {
                            out.push_str(name);
                            if op == CMD_EDBG_SET {
                                let _ = write!(out, "VAL = {}:", at(cmd, 6)?);
                            }
                        }
                        None => err(out, addr),
                    }
                }
                ctx @ (EDBG_CONTEXT_CONFIG0 | EDBG_CONTEXT_CONFIG1) => {
                    let _ = write!(out, "EDBG_CONTEXT_CONFIG{}:", ctx & 1);
                    if op == CMD_EDBG_GET {
                        let _ = write!(out, "Address = 0x{:02X}", at(cmd, 4)?);
                    }
                }
                other => err(out, other),
            }
        }
        other => err(out, other),
    }
    Some(())
}

fn decode_avr8(out: &mut String, cmd: &[u8]) -> Option<()> {
    match at(cmd, 1)? {
        CMD_AVR8_QUERY => {
            out.push_str("CMD_AVR8_QUERY:");
            match at(cmd, 3)? {
                AVR8_QUERY_COMMANDS => out.push_str("AVR8_QUERY_COMMANDS:"),
                0x05 => out.push_str("AVR8_QUERY_CONFIGURATION:"),
                0x07 => out.push_str("AVR8_QUERY_READ_MEMTYPES:"),
                0x08 => out.push_str("AVR8_QUERY_WRITE_MEMTYPES:"),
                other => err(out, other),
            }
        }
        CMD_AVR8_SET => {
            out.push_str("CMD_AVR8_SET:");
            decode_avr8_set(out, cmd)?;
        }
        CMD_AVR8_GET => {
            out.push_str("CMD_AVR8_GET:");
            decode_avr8_get(out, cmd)?;
        }
        CMD_AVR8_ACTIVATE_PHYSICAL => {
            out.push_str("CMD_AVR8_ACTIVATE_PHYSICAL:");
            match at(cmd, 3)? {
                0 => out.push_str("no reset:"),
                1 => out.push_str("reset:"),
                other => err(out, other),
            }
        }
        CMD_AVR8_DEACTIVATE_PHYSICAL => out.push_str("CMD_AVR8_DEACTIVATE_PHYSICAL:"),
        CMD_AVR8_GET_ID => out.push_str("CMD_AVR8_GET_ID:"),
        CMD_AVR8_ATTACH => {
            out.push_str("CMD_AVR8_ATTACH:");
            match at(cmd, 3)? {
                0 => out.push_str("continue running:"),
                1 => out.push_str("break after attach:"),
                other => err(out, other),
            }
        }
        CMD_AVR8_DETACH => out.push_str("CMD_AVR8_DETACH:"),
        CMD_AVR8_PROG_MODE_ENTER => out.push_str("CMD_AVR8_PROG_MODE_ENTER:"),
        CMD_AVR8_PROG_MODE_LEAVE => out.push_str("CMD_AVR8_PROG_MODE_LEAVE:"),
        CMD_AVR8_DISABLE_DEBUGWIRE => out.push_str("CMD_AVR8_DISABLE_DEBUGWIRE:"),
        CMD_AVR8_ERASE => {
            out.push_str("CMD_AVR8_ERASE:");
            let mode = at(cmd, 3)?;
            match mode {
                0 => out.push_str("Chip:"),
                1 => out.push_str("Application:"),
                2 => out.push_str("Boot section:"),
                3 => out.push_str("EEPROM:"),
                4 => out.push_str("Application page:"),
                5 => out.push_str("Boot page:"),
                6 => out.push_str("EEPROM page:"),
                7 => out.push_str("User signature:"),
                other => err(out, other),
            }
            let _ = write!(out, "Address-0x{:08X}:", le32(cmd, 4)?);
        }
        id @ (CMD_AVR8_MEMORY_READ | CMD_AVR8_MEMORY_READ_MASKED | CMD_AVR8_MEMORY_WRITE) => {
            out.push_str(match id {
                CMD_AVR8_MEMORY_READ => "CMD_AVR8_MEMORY_READ:",
                CMD_AVR8_MEMORY_READ_MASKED => "CMD_AVR8_MEMORY_READ_MASKED:",
                _ => "CMD_AVR8_MEMORY_WRITE:",
            });
            let _ = write!(
                out,
                "{}:Start-0x{:08X}:Bytes-0x{:08X}:",
                memtype_name(at(cmd, 3)?),
                le32(cmd, 4)?,
                le32(cmd, 8)?
            );
        }
        CMD_AVR8_CRC => {
            out.push_str("CMD_AVR8_CRC:");
            match at(cmd, 3)? {
                0 => out.push_str("address range:"),
                1 => out.push_str("application section:"),
                2 => out.push_str("boot section:"),
                3 => out.push_str("entire flash:"),
                other => err(out, other),
            }
            let _ = write!(
                out,
                "Start-0x{:08X}:End-0x{:08X}:",
                le32(cmd, 4)?,
                le32(cmd, 8)?
            );
        }
        CMD_AVR8_RESET => {
            out.push_str("CMD_AVR8_RESET:");
            match at(cmd, 3)? {
                1 => out.push_str("STOP:"),
                other => err(out, other),
            }
        }
        CMD_AVR8_STOP => {
            out.push_str("CMD_AVR8_STOP:");
            match at(cmd, 3)? {
                1 => out.push_str("STOP:"),
                other => err(out, other),
            }
        }
        CMD_AVR8_RUN => out.push_str("CMD_AVR8_RUN:"),
        CMD_AVR8_RUN_TO_ADDRESS => {
            let _ = write!(
                out,
                "CMD_AVR8_RUN_TO_ADDRESS:Address-0x{:08X}:",
                le32(cmd, 3)?.wrapping_mul(2)
            );
        }
        CMD_AVR8_STEP => {
            out.push_str("CMD_AVR8_STEP:");
            match (at(cmd, 3)?, at(cmd, 4)?) {
                (1, 1) => out.push_str("STEP:"),
                (level, mode) => {
                    let _ = write!(out, "Err: 0x{:02X}:0x{:02X}:", level, mode);
                }
            }
        }
        CMD_AVR8_PC_READ => out.push_str("CMD_AVR8_PC_READ:"),
        CMD_AVR8_PC_WRITE => {
            let _ = write!(
                out,
                "CMD_AVR8_PC_WRITE:Address-0x{:08X}:",
                le32(cmd, 3)?.wrapping_mul(2)
            );
        }
        CMD_AVR8_HW_BREAK_SET => {
            let _ = write!(
                out,
                "CMD_AVR8_HW_BREAK_SET:T{}:BRK{}:Address-0x{:08X}:program break:",
                at(cmd, 3)?,
                at(cmd, 4)?,
                le32(cmd, 5)?
            );
        }
        CMD_AVR8_HW_BREAK_CLEAR => {
            let _ = write!(out, "CMD_AVR8_HW_BREAK_CLEAR:BRK{}:", at(cmd, 3)?);
        }
        id @ (CMD_AVR8_SW_BREAK_SET | CMD_AVR8_SW_BREAK_CLEAR) => {
            out.push_str(if id == CMD_AVR8_SW_BREAK_SET {
                "CMD_AVR8_SW_BREAK_SET:"
            } else {
                "CMD_AVR8_SW_BREAK_CLEAR:"
            });
            for word in cmd.get(3..).unwrap_or_default().chunks_exact(4) {
                let addr = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                let _ = write!(out, "0x{:04X}:", addr.wrapping_mul(2));
            }
        }
        CMD_AVR8_SW_BREAK_CLEAR_ALL => out.push_str("CMD_AVR8_SW_BREAK_CLEAR_ALL:"),
        CMD_AVR8_PAGE_ERASE => {
            let _ = write!(out, "CMD_AVR8_PAGE_ERASE:Start-0x{:08X}:", le32(cmd, 4)?);
        }
        other => err(out, other),
    }
    Some(())
}

fn decode_avr8_set(out: &mut String, cmd: &[u8]) -> Option<()> {
    match at(cmd, 3)? {
        AVR8_CTXT_CONFIG => {
            out.push_str("AVR8_CTXT_CONFIG:");
            match at(cmd, 4)? {
                AVR8_CONFIG_VARIANT => {
                    out.push_str("AVR8_CONFIG_VARIANT:");
                    match at(cmd, 6)? {
                        0x00 => out.push_str("AVR8_VARIANT_LOOPBACK"),
                        0x01 => out.push_str("AVR8_VARIANT_DW"),
                        0x02 => out.push_str("AVR8_VARIANT_MEGAJTAG"),
                        0x03 => out.push_str("AVR8_VARIANT_XMEGA"),
                        AVR8_VARIANT_UPDI => out.push_str("AVR8_VARIANT_UPDI"),
                        0xFF => out.push_str("AVR8_VARIANT_NONE"),
                        other => err(out, other),
                    }
                }
                AVR8_CONFIG_FUNCTION => {
                    out.push_str("AVR8_CONFIG_FUNCTION = ");
                    match at(cmd, 6)? {
                        0x00 => out.push_str("AVR8_FUNC_NONE"),
                        AVR8_FUNC_PROGRAMMING => out.push_str("AVR8_FUNC_PROGRAMMING"),
                        AVR8_FUNC_DEBUGGING => out.push_str("AVR8_FUNC_DEBUGGING"),
                        other => err(out, other),
                    }
                }
                other => err(out, other),
            }
        }
        AVR8_CTXT_PHYSICAL => {
            out.push_str("AVR8_CTXT_PHYSICAL:");
            match at(cmd, 4)? {
                AVR8_PHY_INTERFACE => {
                    out.push_str("AVR8_PHY_INTERFACE = ");
                    match at(cmd, 6)? {
                        0x00 => out.push_str("AVR8_PHY_INTF_NONE"),
                        0x04 => out.push_str("AVR8_PHY_INTF_JTAG"),
                        0x05 => out.push_str("AVR8_PHY_INTF_DW"),
                        0x06 => out.push_str("AVR8_PHY_INTF_PDI"),
                        AVR8_PHY_INTF_PDI_1W => out.push_str("AVR8_PHY_INTF_PDI_1W"),
                        other => err(out, other),
                    }
                }
                0x01 => {
                    let _ = write!(out, "AVR8_PHY_JTAG_DAISY:DEV-0x{:08X}:", le32(cmd, 6)?);
                }
                0x10 => {
                    let _ = write!(out, "AVR8_PHY_DW_CLK_DIV = {}", at(cmd, 6)?);
                }
                addr @ (0x20 | 0x21 | 0x30 | AVR8_PHY_XM_PDI_CLK) => {
                    let name = match addr {
                        0x20 => "AVR8_PHY_MEGA_PRG_CLK",
                        0x21 => "AVR8_PHY_MEGA_DBG_CLK",
                        0x30 => "AVR8_PHY_XM_JTAG_CLK",
                        _ => "AVR8_PHY_XM_PDI_CLK",
                    };
                    let _ = write!(out, "{} = {} kHz", name, le16(cmd, 6)?);
                }
                other => err(out, other),
            }
        }
        AVR8_CTXT_DEVICE => {
            out.push_str("AVR8_CTXT_DEVICE:");
            let start = at(cmd, 4)? as usize;
            let len = at(cmd, 5)? as usize;
            let mut idx = start;
            while idx < start + len {
                match idx {
                    0x00 => {
                        let _ = write!(out, "\n  PROG_BASE = 0x{:04X}", le16(cmd, 6 + idx)?);
                        idx += 2;
                    }
                    0x02 => {
                        let _ = write!(out, "\n  FLASH_PAGE_BYTES = 0x{:02X}", at(cmd, 6 + idx)?);
                        idx += 1;
                    }
                    0x03 => {
                        let _ = write!(out, "\n  EEPROM_PAGE_BYTES = 0x{:02X}", at(cmd, 6 + idx)?);
                        idx += 1;
                    }
                    0x04 => {
                        let _ = write!(out, "\n  NVMCTRL_MODULE = 0x{:04X}", le16(cmd, 6 + idx)?);
                        idx += 2;
                    }
                    0x06 => {
                        let _ = write!(out, "\n  OCD_MODULE = 0x{:04X}", le16(cmd, 6 + idx)?);
                        idx += 2;
                    }
                    other => {
                        err(out, other as u8);
                        break;
                    }
                }
            }
        }
        AVR8_CTXT_OPTIONS => {
            out.push_str("AVR8_CTXT_OPTIONS:");
            let name = match at(cmd, 4)? {
                0x00 => "AVR8_OPT_RUN_TIMERS",
                0x01 => "AVR8_OPT_DISABLE_DBP",
                0x03 => "AVR8_OPT_ENABLE_IDR",
                0x04 => "AVR8_OPT_POLL_INT",
                other => {
                    err(out, other);
                    return Some(());
                }
            };
            let _ = write!(out, "{} = {}", name, at(cmd, 6)?);
        }
        AVR8_CTXT_SESSION => {
            out.push_str("AVR8_CTXT_SESSION:");
            match at(cmd, 4)? {
                0x00 => {
                    let _ = write!(out, "AVR8_SESS_MAIN_PC:PC-0x{:08X}:", le32(cmd, 6)?);
                }
                other => err(out, other),
            }
        }
        other => err(out, other),
    }
    Some(())
}

fn decode_avr8_get(out: &mut String, cmd: &[u8]) -> Option<()> {
    let ctx = at(cmd, 3)?;
    let addr = at(cmd, 4)?;
    let (ctx_name, param) = match ctx {
        AVR8_CTXT_CONFIG => (
            "AVR8_CTXT_CONFIG:",
            match addr {
                AVR8_CONFIG_VARIANT => Some("AVR8_CONFIG_VARIANT:"),
                AVR8_CONFIG_FUNCTION => Some("AVR8_CONFIG_FUNCTION = "),
                _ => None,
            },
        ),
        AVR8_CTXT_PHYSICAL => (
            "AVR8_CTXT_PHYSICAL:",
            match addr {
                AVR8_PHY_INTERFACE => Some("AVR8_PHY_INTERFACE = "),
                0x01 => Some("AVR8_PHY_JTAG_DAISY:"),
                0x10 => Some("AVR8_PHY_DW_CLK_DIV = "),
                0x20 => Some("AVR8_PHY_MEGA_PRG_CLK = "),
                0x21 => Some("AVR8_PHY_MEGA_DBG_CLK = "),
                0x30 => Some("AVR8_PHY_XM_JTAG_CLK = "),
                AVR8_PHY_XM_PDI_CLK => Some("AVR8_PHY_XM_PDI_CLK = "),
                _ => None,
            },
        ),
        AVR8_CTXT_DEVICE => (
            "AVR8_CTXT_DEVICE:",
            match addr {
                0x00 => Some("PROG_BASE:"),
                0x02 => Some("FLASH_PAGE_BYTES:"),
                0x03 => Some("EEPROM_PAGE_BYTES:"),
                0x04 => Some("NVMCTRL_MODULE:"),
                0x06 => Some("OCD_MODULE:"),
                _ => None,
            },
        ),
        AVR8_CTXT_OPTIONS => (
            "AVR8_CTXT_OPTIONS:",
            match addr {
                0x00 => Some("AVR8_OPT_RUN_TIMERS = "),
                0x01 => Some("AVR8_OPT_DISABLE_DBP = "),
                0x03 => Some("AVR8_OPT_ENABLE_IDR = "),
                0x04 => Some("AVR8_OPT_POLL_INT = "),
                _ => None,
            },
        ),
        AVR8_CTXT_SESSION => (
            "AVR8_CTXT_SESSION:",
            match addr {
                0x00 => Some("AVR8_SESS_MAIN_PC:"),
                _ => None,
            },
        ),
        other => {
            err(out, other);
            return Some(());
        }
    };
    out.push_str(ctx_name);
    match param {
        Some(name) => out.push_str(name),
        None => err(out, addr),
    }
    Some(())
}
