//! Instruction decoder for the LC-3.
//!
//! Every instruction is one 16-bit word. The top four bits are the opcode;
//! the remaining twelve are interpreted per opcode.

use crate::cpu::registers::Reg;
use crate::cpu::trap::TrapVector;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Sign-extend the low `bits` bits of `x` to a full word.
#[inline]
pub fn sign_extend(x: u16, bits: u32) -> u16 {
    let x = x & (u16::MAX >> (16 - bits));
    if (x >> (bits - 1)) & 1 == 1 {
        x | (u16::MAX << bits)
    } else {
        x
    }
}

/// The 16 opcodes, in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    Br = 0,
    Add,
    Ld,
    St,
    Jsr,
    And,
    Ldr,
    Str,
    Rti,
    Not,
    Ldi,
    Sti,
    Jmp,
    Res,
    Lea,
    Trap,
}

impl Opcode {
    /// Opcode of an instruction word (bits 15-12).
    pub fn of(word: u16) -> Self {
        match word >> 12 {
            0x0 => Opcode::Br,
            0x1 => Opcode::Add,
            0x2 => Opcode::Ld,
            0x3 => Opcode::St,
            0x4 => Opcode::Jsr,
            0x5 => Opcode::And,
            0x6 => Opcode::Ldr,
            0x7 => Opcode::Str,
            0x8 => Opcode::Rti,
            0x9 => Opcode::Not,
            0xA => Opcode::Ldi,
            0xB => Opcode::Sti,
            0xC => Opcode::Jmp,
            0xD => Opcode::Res,
            0xE => Opcode::Lea,
            _ => Opcode::Trap,
        }
    }
}

/// Second source operand of ADD and AND.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    /// SR2
    Reg(Reg),
    /// imm5, already sign-extended
    Imm(u16),
}

/// Decoded LC-3 instruction.
///
/// Offsets and immediates are stored sign-extended to 16 bits, ready to be
/// added with wrapping arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== Operate ====================

    /// DR := SR1 + op2
    Add { dr: Reg, sr1: Reg, op2: Operand },

    /// DR := SR1 & op2
    And { dr: Reg, sr1: Reg, op2: Operand },

    /// DR := !SR
    Not { dr: Reg, sr: Reg },

    // ==================== Data Movement ====================

    /// DR := mem[PC + offset]
    Ld { dr: Reg, offset: u16 },

    /// DR := mem[mem[PC + offset]]
    Ldi { dr: Reg, offset: u16 },

    /// DR := mem[BaseR + offset]
    Ldr { dr: Reg, base: Reg, offset: u16 },

    /// DR := PC + offset
    Lea { dr: Reg, offset: u16 },

    /// mem[PC + offset] := SR
    St { sr: Reg, offset: u16 },

    /// mem[mem[PC + offset]] := SR
    Sti { sr: Reg, offset: u16 },

    /// mem[BaseR + offset] := SR
    Str { sr: Reg, base: Reg, offset: u16 },

    // ==================== Control ====================

    /// if (nzp & COND) != 0 then PC := PC + offset
    Br { nzp: u16, offset: u16 },

    /// PC := BaseR (RET when BaseR is R7)
    Jmp { base: Reg },

    /// R7 := PC; PC := PC + offset
    Jsr { offset: u16 },

    /// R7 := PC; PC := BaseR
    Jsrr { base: Reg },

    /// R7 := PC; run the trap routine
    Trap { vector: TrapVector },
}

/// Decode an instruction word.
///
/// RTI and the reserved opcode are not executable here and decode to
/// [`DecodeError::Reserved`]; so does a TRAP with an unknown vector.
pub fn decode(word: u16) -> Result<Instruction, DecodeError> {
    let dr = Reg::from_bits(word >> 9);
    let sr1 = Reg::from_bits(word >> 6);
    let off9 = sign_extend(word, 9);

    let instruction = match Opcode::of(word) {
        Opcode::Add => Instruction::Add { dr, sr1, op2: operand(word) },
        Opcode::And => Instruction::And { dr, sr1, op2: operand(word) },
        Opcode::Not => Instruction::Not { dr, sr: sr1 },
        Opcode::Ld => Instruction::Ld { dr, offset: off9 },
        Opcode::Ldi => Instruction::Ldi { dr, offset: off9 },
        Opcode::Ldr => Instruction::Ldr { dr, base: sr1, offset: sign_extend(word, 6) },
        Opcode::Lea => Instruction::Lea { dr, offset: off9 },
        Opcode::St => Instruction::St { sr: dr, offset: off9 },
        Opcode::Sti => Instruction::Sti { sr: dr, offset: off9 },
        Opcode::Str => Instruction::Str { sr: dr, base: sr1, offset: sign_extend(word, 6) },
        Opcode::Br => Instruction::Br { nzp: (word >> 9) & 0x7, offset: off9 },
        Opcode::Jmp => Instruction::Jmp { base: sr1 },
        Opcode::Jsr if (word >> 11) & 1 == 1 => Instruction::Jsr { offset: sign_extend(word, 11) },
        Opcode::Jsr => Instruction::Jsrr { base: sr1 },
        Opcode::Trap => {
            let vector = (word & 0xFF) as u8;
            let vector = TrapVector::from_u8(vector)
                .ok_or(DecodeError::UnknownTrap { vector })?;
            Instruction::Trap { vector }
        }
        op @ (Opcode::Rti | Opcode::Res) => return Err(DecodeError::Reserved { opcode: op, word }),
    };

    Ok(instruction)
}

fn operand(word: u16) -> Operand {
    if (word >> 5) & 1 == 1 {
        Operand::Imm(sign_extend(word, 5))
    } else {
        Operand::Reg(Reg::from_bits(word))
    }
}

/// Encode an instruction back to its word.
///
/// Offsets are truncated to their field width.
#[cfg(test)]
pub(crate) fn encode(instr: &Instruction) -> u16 {
    let r = |reg: Reg, shift: u16| (reg.index() as u16) << shift;
    let op = |opcode: Opcode| (opcode as u16) << 12;
    let op2 = |operand: &Operand| match *operand {
        Operand::Reg(sr2) => r(sr2, 0),
        Operand::Imm(imm) => 1 << 5 | (imm & 0x1F),
    };

    match instr {
        Instruction::Add { dr, sr1, op2: o } => op(Opcode::Add) | r(*dr, 9) | r(*sr1, 6) | op2(o),
        Instruction::And { dr, sr1, op2: o } => op(Opcode::And) | r(*dr, 9) | r(*sr1, 6) | op2(o),
        Instruction::Not { dr, sr } => op(Opcode::Not) | r(*dr, 9) | r(*sr, 6) | 0x3F,
        Instruction::Ld { dr, offset } => op(Opcode::Ld) | r(*dr, 9) | (offset & 0x1FF),
        Instruction::Ldi { dr, offset } => op(Opcode::Ldi) | r(*dr, 9) | (offset & 0x1FF),
        Instruction::Ldr { dr, base, offset } => {
            op(Opcode::Ldr) | r(*dr, 9) | r(*base, 6) | (offset & 0x3F)
        }
        Instruction::Lea { dr, offset } => op(Opcode::Lea) | r(*dr, 9) | (offset & 0x1FF),
        Instruction::St { sr, offset } => op(Opcode::St) | r(*sr, 9) | (offset & 0x1FF),
        Instruction::Sti { sr, offset } => op(Opcode::Sti) | r(*sr, 9) | (offset & 0x1FF),
        Instruction::Str { sr, base, offset } => {
            op(Opcode::Str) | r(*sr, 9) | r(*base, 6) | (offset & 0x3F)
        }
        Instruction::Br { nzp, offset } => op(Opcode::Br) | (nzp & 0x7) << 9 | (offset & 0x1FF),
        Instruction::Jmp { base } => op(Opcode::Jmp) | r(*base, 6),
        Instruction::Jsr { offset } => op(Opcode::Jsr) | 1 << 11 | (offset & 0x7FF),
        Instruction::Jsrr { base } => op(Opcode::Jsr) | r(*base, 6),
        Instruction::Trap { vector } => op(Opcode::Trap) | *vector as u16,
    }
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("reserved opcode {opcode:?} in instruction {word:#06x}")]
    Reserved { opcode: Opcode, word: u16 },

    #[error("unknown trap vector {vector:#04x}")]
    UnknownTrap { vector: u8 },
}
