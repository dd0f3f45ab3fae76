//! LC-3 memory subsystem.
//!
//! 65536 sixteen-bit words. Two addresses at the top of the space are
//! keyboard device registers: reading KBSR polls the keyboard and latches
//! any pending key into KBDR.

use crate::io::Console;
use std::io;

/// The number of words in memory.
pub const MEMORY_SIZE: usize = 1 << 16;

/// Keyboard status register.
pub const KBSR: u16 = 0xFE00;

/// Keyboard data register.
pub const KBDR: u16 = 0xFE02;

/// Status bit set in KBSR when a key is ready.
const KEY_READY: u16 = 1 << 15;

/// LC-3 memory: 65536 sixteen-bit words.
#[derive(Clone)]
pub struct Memory {
    cells: Vec<u16>,
}

impl Memory {
    /// Create a new memory with all cells zeroed.
    pub fn new() -> Self {
        Self {
            cells: vec![0; MEMORY_SIZE],
        }
    }

    /// Read a word as the running program sees it.
    ///
    /// A read of [`KBSR`] polls the console first; if a key is pending the
    /// ready bit is set and the key code latched into [`KBDR`], otherwise
    /// the status is cleared.
    pub fn read(&mut self, addr: u16, console: &mut dyn Console) -> io::Result<u16> {
        if addr == KBSR {
            match console.poll_key()? {
                Some(key) => {
                    self.cells[KBSR as usize] = KEY_READY;
                    self.cells[KBDR as usize] = u16::from(key);
                }
                None => self.cells[KBSR as usize] = 0,
            }
        }
        Ok(self.cells[addr as usize])
    }

    /// Read a word with no device side effects.
    #[inline]
    pub fn peek(&self, addr: u16) -> u16 {
        self.cells[addr as usize]
    }

    /// Write a word. Device registers are plain storage for writes.
    #[inline]
    pub fn write(&mut self, addr: u16, value: u16) {
        self.cells[addr as usize] = value;
    }

    /// Copy `words` into memory starting at `origin`.
    ///
    /// The caller guarantees the range fits; see [`crate::image::Image`].
    pub fn load(&mut self, origin: u16, words: &[u16]) {
        let start = origin as usize;
        self.cells[start..start + words.len()].copy_from_slice(words);
    }

    /// Iterate over words starting at `addr` until a zero word, wrapping at
    /// the top of the address space. Used by the string output traps.
    pub fn string_at(&self, addr: u16) -> impl Iterator<Item = u16> + '_ {
        (0..MEMORY_SIZE)
            .map(move |i| self.peek(addr.wrapping_add(i as u16)))
            .take_while(|&w| w != 0)
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only count non-zero cells
        let non_zero = self.cells.iter().filter(|&&w| w != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_cells", &non_zero)
            .field("total_cells", &MEMORY_SIZE)
            .finish()
    }
}
