//! Live debug commands

use crate::cli::DebugCommands;
use rupdi_core::Target;

/// Print the register file, eight registers per line, then PC, SP and SREG
fn print_registers(target: &mut dyn Target) -> Result<(), Box<dyn std::error::Error>> {
    let regs = target.read_registers(0, 32)?;
    for (row, chunk) in regs.chunks(8).enumerate() {
        let line: Vec<String> = chunk
            .iter()
            .enumerate()
            .map(|(i, v)| format!("r{:<2}=0x{:02X}", row * 8 + i, v))
            .collect();
        println!("  {}", line.join(" "));
    }

    let pc = target.program_counter()?;
    let sp = target.stack_pointer()?;
    let sreg = target.status_register()?;
    println!("  PC=0x{:04X} SP=0x{:04X} SREG=0x{:02X} [{}]", pc, sp, sreg, sreg_flags(sreg));
    Ok(())
}

/// SREG bits as letters, upper case when set
fn sreg_flags(sreg: u8) -> String {
    "ITHSVNZC"
        .chars()
        .enumerate()
        .map(|(i, c)| {
            if sreg & (0x80 >> i) != 0 {
                c
            } else {
                c.to_ascii_lowercase()
            }
        })
        .collect()
}

/// Run one debug action against an attached target
pub fn run_debug(
    target: &mut dyn Target,
    action: &DebugCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    target.set_message_listener(Box::new(|text: &str| print!("{}", text)));

    match action {
        DebugCommands::Reset => {
            target.reset()?;
            println!("Reset, PC=0x{:04X}", target.program_counter()?);
        }
        DebugCommands::Step { count } => {
            for _ in 0..*count {
                target.step()?;
            }
            println!("Stepped {} instruction(s), PC=0x{:04X}", count, target.program_counter()?);
        }
        DebugCommands::RunTo { address } => {
            target.run_to_address(*address)?;
            println!("Stopped at PC=0x{:04X}", target.program_counter()?);
        }
        DebugCommands::Regs => {
            print_registers(target)?;
        }
        DebugCommands::Break { address, slot } => {
            target.set_hw_breakpoint(*slot, *address)?;
            let result = target.run().and_then(|_| target.program_counter());
            if let Err(e) = target.clear_hw_breakpoint(*slot) {
                log::warn!("Failed to clear breakpoint {}: {}", slot, e);
            }
            println!("Breakpoint {} hit, PC=0x{:04X}", slot, result?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sreg_flags() {
        assert_eq!(sreg_flags(0x00), "ithsvnzc");
        assert_eq!(sreg_flags(0x82), "IthsvnZc");
        assert_eq!(sreg_flags(0xFF), "ITHSVNZC");
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_debug_actions_on_dummy() {
        use rupdi_core::chip::ChipDatabase;
        use rupdi_dummy::{DummyConfig, DummyTarget};

        let db = ChipDatabase::builtin().unwrap();
        let chip = db.find("ATtiny817").unwrap().clone();
        let mut target = DummyTarget::new(chip, DummyConfig::default());

        run_debug(&mut target, &DebugCommands::Step { count: 3 }).unwrap();
        assert_eq!(target.program_counter().unwrap(), 6);

        run_debug(&mut target, &DebugCommands::Break { address: 0x100, slot: 1 }).unwrap();
        assert_eq!(target.program_counter().unwrap(), 0x100);

        run_debug(&mut target, &DebugCommands::Reset).unwrap();
        assert_eq!(target.program_counter().unwrap(), 0);

        run_debug(&mut target, &DebugCommands::Regs).unwrap();
        assert!(run_debug(&mut target, &DebugCommands::Break { address: 0x100, slot: 4 }).is_err());
    }
}
