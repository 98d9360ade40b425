//! Offline decoders for captured traffic

use std::path::Path;

/// Parse hex byte tokens such as `12`, `0x12` or `1201` into bytes
fn parse_hex_bytes(tokens: &[String]) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    for token in tokens {
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        if digits.is_empty() || digits.len() % 2 != 0 {
            return Err(format!("Invalid hex bytes: {}", token));
        }
        for pair in digits.as_bytes().chunks(2) {
            let text = std::str::from_utf8(pair).map_err(|_| format!("Invalid hex bytes: {}", token))?;
            out.push(u8::from_str_radix(text, 16).map_err(|_| format!("Invalid hex bytes: {}", token))?);
        }
    }
    Ok(out)
}

/// Decode a raw UPDI line capture
#[cfg(feature = "serial")]
pub fn run_decode_updi(input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(input)?;
    log::info!("Decoding {} bytes from {:?}", bytes.len(), input);
    print!("{}", rupdi_serial::decode_wire(&bytes));
    Ok(())
}

#[cfg(not(feature = "serial"))]
pub fn run_decode_updi(_input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    Err("UPDI decoding requires the serial feature".into())
}

/// Decode one AVR protocol command
#[cfg(feature = "edbg")]
pub fn run_decode_cmd(tokens: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = parse_hex_bytes(tokens)?;
    println!("{}", rupdi_edbg::decode::decode_command(&bytes));
    Ok(())
}

#[cfg(not(feature = "edbg"))]
pub fn run_decode_cmd(tokens: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    parse_hex_bytes(tokens)?;
    Err("Command decoding requires the edbg feature".into())
}
