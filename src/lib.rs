//! # LC-3 Virtual Machine
//!
//! An emulator of the LC-3, a 16-bit educational computer with eight
//! registers, 64K words of memory and a 16-opcode instruction set.
//!
//! Programs are loaded from object images and run against a [`io::Console`],
//! which stands in for the keyboard and display.

pub mod cpu;
pub mod image;
pub mod io;

// Re-export commonly used types
pub use cpu::{Cpu, CpuState, CpuError, Memory, Registers, Instruction, StopReason};
pub use image::{load_image, parse_image, Image, ImageError};
pub use io::{BufferConsole, Console, StreamConsole};

#[cfg(feature = "term")]
pub use io::Terminal;
