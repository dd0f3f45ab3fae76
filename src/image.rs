//! Program image format.
//!
//! An image is a sequence of big-endian 16-bit words:
//! - word 0 is the origin, the address the program is loaded at
//! - the remaining words are placed contiguously from the origin
//!
//! There is no header or length field; the length is the file size.

use crate::cpu::{KBDR, KBSR, MEMORY_SIZE};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A parsed program image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Load address of the first word.
    pub origin: u16,
    /// Program and data words.
    pub words: Vec<u16>,
}

impl Image {
    /// Number of words to be loaded.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// One past the last address the image occupies.
    pub fn end(&self) -> usize {
        self.origin as usize + self.words.len()
    }

    fn covers(&self, addr: u16) -> bool {
        (self.origin as usize..self.end()).contains(&(addr as usize))
    }
}

/// Parse an image from raw bytes.
///
/// Images that would run past the end of memory or cover the keyboard
/// device registers are rejected rather than clamped.
pub fn parse_image(bytes: &[u8]) -> Result<Image, ImageError> {
    if bytes.len() < 2 {
        return Err(ImageError::MissingOrigin);
    }
    if bytes.len() % 2 != 0 {
        return Err(ImageError::Truncated { len: bytes.len() });
    }

    let mut words = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
    let origin = words.next().ok_or(ImageError::MissingOrigin)?;
    let image = Image {
        origin,
        words: words.collect(),
    };

    if image.end() > MEMORY_SIZE {
        return Err(ImageError::TooLarge { origin, words: image.len() });
    }
    if image.covers(KBSR) || image.covers(KBDR) {
        return Err(ImageError::OverlapsDeviceRegisters { origin, words: image.len() });
    }

    Ok(image)
}

/// Load an image file from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<Image, ImageError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| ImageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_image(&bytes)
}

/// Errors that can occur while loading an image.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image has no origin word")]
    MissingOrigin,

    #[error("image ends mid-word ({len} bytes)")]
    Truncated { len: usize },

    #[error("{words} words at origin {origin:#06x} run past the end of memory")]
    TooLarge { origin: u16, words: usize },

    #[error("{words} words at origin {origin:#06x} cover the keyboard device registers")]
    OverlapsDeviceRegisters { origin: u16, words: usize },
}
