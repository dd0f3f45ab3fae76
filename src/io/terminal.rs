//! Raw-mode terminal console.
//!
//! Puts the terminal in raw mode so single keystrokes reach the machine
//! unbuffered and unechoed. Raw mode is left again when the console is dropped.

use super::Console;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::collections::VecDeque;
use std::io::{self, Stdout, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Console backed by the process's terminal.
pub struct Terminal {
    out: Stdout,
    /// Keys drained by [`Console::pump`] that the program has not read yet.
    pending: VecDeque<u8>,
    interrupted: Arc<AtomicBool>,
}

impl Terminal {
    /// Enter raw mode.
    pub fn new() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self {
            out: io::stdout(),
            pending: VecDeque::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag raised when the user presses Ctrl-C.
    ///
    /// Raw mode swallows SIGINT, so the keystroke is caught here instead
    /// and the run loop is expected to check this between instructions.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    fn check_interrupt(&self) -> io::Result<()> {
        if self.interrupted.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted by Ctrl-C"));
        }
        Ok(())
    }
}

/// Map a key event to the byte the machine sees.
///
/// Only presses count. Ctrl-C raises `interrupted` and yields nothing, as do
/// keys with no ASCII meaning.
fn translate(key: KeyEvent, interrupted: &AtomicBool) -> Option<u8> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        interrupted.store(true, Ordering::SeqCst);
        return None;
    }
    match key.code {
        KeyCode::Char(c) if c.is_ascii() => Some(c as u8),
        KeyCode::Enter => Some(b'\n'),
        KeyCode::Tab => Some(b'\t'),
        KeyCode::Backspace => Some(0x08),
        KeyCode::Esc => Some(0x1B),
        _ => None,
    }
}

impl Console for Terminal {
    fn poll_key(&mut self) -> io::Result<Option<u8>> {
        self.pump()?;
        match self.pending.pop_front() {
            Some(byte) => Ok(Some(byte)),
            None => {
                self.check_interrupt()?;
                Ok(None)
            }
        }
    }

    fn read_key(&mut self) -> io::Result<u8> {
        loop {
            if let Some(byte) = self.pending.pop_front() {
                return Ok(byte);
            }
            self.check_interrupt()?;
            if let Event::Key(key) = event::read()? {
                if let Some(byte) = translate(key, &self.interrupted) {
                    return Ok(byte);
                }
            }
        }
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        // Raw mode turns off output post-processing, so newlines need the CR.
        if byte == b'\n' {
            self.out.write_all(b"\r\n")
        } else {
            self.out.write_all(&[byte])
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    /// Drain every waiting terminal event into the key queue.
    fn pump(&mut self) -> io::Result<()> {
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                if let Some(byte) = translate(key, &self.interrupted) {
                    self.pending.push_back(byte);
                }
            }
        }
        Ok(())
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        let _ = self.out.flush();
        let _ = disable_raw_mode();
    }
}
