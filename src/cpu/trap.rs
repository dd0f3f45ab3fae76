//! Trap routines.
//!
//! The TRAP instruction calls one of six system services by vector. They
//! are implemented natively here rather than as LC-3 code in low memory.

use crate::cpu::registers::{Reg, Registers};
use crate::cpu::Memory;
use crate::io::Console;
use serde::{Serialize, Deserialize};
use std::io;

/// Prompt written by the IN routine.
pub const IN_PROMPT: &[u8] = b"Enter a character: ";

/// Notice written by the HALT routine.
pub const HALT_NOTICE: &[u8] = b"HALT\n";

/// Trap vectors (the low byte of a TRAP instruction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TrapVector {
    /// Read a character, no echo
    Getc = 0x20,
    /// Write the character in R0
    Out = 0x21,
    /// Write a string, one character per word
    Puts = 0x22,
    /// Prompt for and echo a character
    In = 0x23,
    /// Write a string, two characters per word
    Putsp = 0x24,
    /// Stop the machine
    Halt = 0x25,
}

impl TrapVector {
    pub fn from_u8(vector: u8) -> Option<Self> {
        match vector {
            0x20 => Some(TrapVector::Getc),
            0x21 => Some(TrapVector::Out),
            0x22 => Some(TrapVector::Puts),
            0x23 => Some(TrapVector::In),
            0x24 => Some(TrapVector::Putsp),
            0x25 => Some(TrapVector::Halt),
            _ => None,
        }
    }
}

/// What the machine should do after a trap routine returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapOutcome {
    Continue,
    Halt,
}

/// Run the routine for `vector`.
///
/// R7 already holds the return address.
pub fn dispatch(
    vector: TrapVector,
    regs: &mut Registers,
    mem: &Memory,
    console: &mut dyn Console,
) -> io::Result<TrapOutcome> {
    match vector {
        TrapVector::Getc => {
            let key = console.read_key()?;
            regs.write_and_flag(Reg::R0, u16::from(key));
        }

        TrapVector::Out => {
            console.write_byte(regs.read(Reg::R0) as u8)?;
        }

        TrapVector::Puts => {
            for word in mem.string_at(regs.read(Reg::R0)) {
                console.write_byte(word as u8)?;
            }
        }

        TrapVector::In => {
            console.write_bytes(IN_PROMPT)?;
            console.flush()?;
            let key = console.read_key()?;
            console.write_byte(key)?;
            regs.write_and_flag(Reg::R0, u16::from(key));
        }

        TrapVector::Putsp => {
            for word in mem.string_at(regs.read(Reg::R0)) {
                let [lo, hi] = word.to_le_bytes();
                console.write_byte(lo)?;
                if hi != 0 {
                    console.write_byte(hi)?;
                }
            }
        }

        TrapVector::Halt => {
            console.write_bytes(HALT_NOTICE)?;
            console.flush()?;
            return Ok(TrapOutcome::Halt);
        }
    }

    console.flush()?;
    Ok(TrapOutcome::Continue)
}
