//! LC-3 register file.
//!
//! The LC-3 has:
//! - R0-R7: eight 16-bit general purpose registers
//! - PC: 16-bit program counter
//! - COND: condition register holding exactly one of N, Z, P

use serde::{Serialize, Deserialize};

/// Address the program counter starts at.
pub const PC_START: u16 = 0x3000;

/// A general purpose register index (R0-R7).
///
/// Built from a 3-bit instruction field, so every value is a valid index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reg(u8);

impl Reg {
    pub const R0: Reg = Reg(0);
    pub const R7: Reg = Reg(7);

    /// Build from the low 3 bits of `bits`.
    #[inline]
    pub const fn from_bits(bits: u16) -> Self {
        Reg((bits & 0x7) as u8)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// Condition flag.
///
/// The discriminants are the one-hot encodings held in COND, which are
/// also the bit positions BR tests its nzp mask against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum Flag {
    /// P (+)
    Pos = 1 << 0,
    /// Z (0)
    Zro = 1 << 1,
    /// N (-)
    Neg = 1 << 2,
}

impl Flag {
    /// Flag describing the sign of `value` read as a signed 16-bit word.
    pub fn for_value(value: u16) -> Self {
        if value == 0 {
            Flag::Zro
        } else if value >> 15 == 1 {
            Flag::Neg
        } else {
            Flag::Pos
        }
    }

    #[inline]
    pub fn bits(self) -> u16 {
        self as u16
    }
}

/// The LC-3 register file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    /// R0-R7
    gpr: [u16; 8],

    /// Program counter
    pub pc: u16,

    /// Condition register
    cond: Flag,
}

impl Registers {
    /// Power-on state: everything zero, PC at [`PC_START`], Z set.
    pub fn new() -> Self {
        Self {
            gpr: [0; 8],
            pc: PC_START,
            cond: Flag::Zro,
        }
    }

    #[inline]
    pub fn read(&self, r: Reg) -> u16 {
        self.gpr[r.index()]
    }

    /// Write a register without touching the flags.
    #[inline]
    pub fn write(&mut self, r: Reg, value: u16) {
        self.gpr[r.index()] = value;
    }

    pub fn flags(&self) -> Flag {
        self.cond
    }

    pub fn set_flags(&mut self, flag: Flag) {
        self.cond = flag;
    }

    /// Set COND from the current contents of `r`.
    pub fn update_flags_for(&mut self, r: Reg) {
        self.cond = Flag::for_value(self.read(r));
    }

    /// Write a register and update COND from the written value.
    pub fn write_and_flag(&mut self, r: Reg, value: u16) {
        self.write(r, value);
        self.update_flags_for(r);
    }

    /// Increment the program counter by 1.
    /// Returns the old value.
    pub fn advance_pc(&mut self) -> u16 {
        let old = self.pc;
        self.pc = self.pc.wrapping_add(1);
        old
    }

    /// Whether any flag selected by a BR nzp mask is currently set.
    pub fn matches(&self, nzp: u16) -> bool {
        nzp & self.cond.bits() != 0
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}
