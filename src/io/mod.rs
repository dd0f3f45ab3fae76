//! Character I/O collaborators.
//!
//! The machine talks to the outside world only through [`Console`]:
//! a non-blocking keyboard poll for the memory-mapped status register,
//! a blocking read for the GETC/IN traps, and byte output.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

#[cfg(feature = "term")]
pub mod terminal;

#[cfg(feature = "term")]
pub use terminal::Terminal;

/// Keyboard and display as seen by the machine.
pub trait Console {
    /// Return a pending keystroke if there is one, without blocking.
    fn poll_key(&mut self) -> io::Result<Option<u8>>;

    /// Block until a keystroke arrives.
    fn read_key(&mut self) -> io::Result<u8>;

    /// Write one character.
    fn write_byte(&mut self, byte: u8) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Service the device while the program runs without touching it.
    ///
    /// The run loop calls this every few thousand instructions so a console
    /// can notice out-of-band input such as Ctrl-C. Does nothing by default.
    fn pump(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        for &b in bytes {
            self.write_byte(b)?;
        }
        Ok(())
    }
}

/// In-memory console: scripted keystrokes in, captured bytes out.
#[derive(Debug, Default, Clone)]
pub struct BufferConsole {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Console whose keyboard will yield `keys` in order.
    pub fn with_input(keys: &[u8]) -> Self {
        Self {
            input: keys.iter().copied().collect(),
            output: Vec::new(),
        }
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Captured output as text (lossy).
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl Console for BufferConsole {
    fn poll_key(&mut self) -> io::Result<Option<u8>> {
        Ok(self.input.pop_front())
    }

    fn read_key(&mut self) -> io::Result<u8> {
        self.input
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no more scripted input"))
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.output.push(byte);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Console over plain byte streams, for when stdin is not a terminal.
///
/// Every key read consumes one byte of input. A keyboard poll blocks on the
/// reader and reports no key once it is exhausted.
pub struct StreamConsole<R, W> {
    input: R,
    output: W,
}

impl<R: Read, W: Write> StreamConsole<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn next_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.input.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl<R: Read, W: Write> Console for StreamConsole<R, W> {
    fn poll_key(&mut self) -> io::Result<Option<u8>> {
        self.next_byte()
    }

    fn read_key(&mut self) -> io::Result<u8> {
        self.next_byte()?
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "end of input"))
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.output.write_all(&[byte])
    }

    fn flush(&mut self) -> io::Result<()> {
        self.output.flush()
    }
}
