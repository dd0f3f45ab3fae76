//! CPU emulation for the LC-3.
//!
//! This module implements the complete LC-3 architecture:
//! - 65536 sixteen-bit memory words with memory-mapped keyboard registers
//! - 8 general purpose registers, PC and a one-hot condition register
//! - 16 opcodes, with the six trap routines implemented natively

pub mod memory;
pub mod registers;
pub mod decode;
pub mod execute;
pub mod trap;

pub use memory::{Memory, MEMORY_SIZE, KBSR, KBDR};
pub use registers::{Flag, Reg, Registers, PC_START};
pub use decode::{Instruction, Opcode, Operand, DecodeError};
pub use execute::{Cpu, CpuError, CpuState, RunSummary, Snapshot, StopReason, PUMP_INTERVAL};
pub use trap::TrapVector;
