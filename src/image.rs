//! Owned memory image of a radio: one flat, fixed-size byte buffer.

use std::fmt::Write as _;
use std::io;
use std::path::Path;

/// Access outside the image bounds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("range 0x{offset:04X}+{length} outside image of {size} bytes")]
pub struct RangeError {
    pub offset: usize,
    pub length: usize,
    pub size: usize,
}

/// Mutable byte buffer representing a device's full memory image.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ByteImage {
    data: Vec<u8>,
}

impl ByteImage {
    /// Zero-filled image of `size` bytes.
    pub fn new(size: usize) -> Self {
        ByteImage {
            data: vec![0; size],
        }
    }

    /// Image of `size` bytes all set to `byte` (erased EEPROM reads back `0xFF`).
    pub fn filled(size: usize, byte: u8) -> Self {
        ByteImage {
            data: vec![byte; size],
        }
    }

    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        ByteImage { data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn check(&self, offset: usize, length: usize) -> Result<std::ops::Range<usize>, RangeError> {
        match offset.checked_add(length) {
            Some(end) if end <= self.data.len() => Ok(offset..end),
            _ => Err(RangeError {
                offset,
                length,
                size: self.data.len(),
            }),
        }
    }

    /// Borrow `length` bytes starting at `offset`.
    pub fn read(&self, offset: usize, length: usize) -> Result<&[u8], RangeError> {
        let range = self.check(offset, length)?;
        Ok(&self.data[range])
    }

    /// Overwrite `bytes.len()` bytes at `offset`; the whole write must fit.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), RangeError> {
        let range = self.check(offset, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn byte(&self, offset: usize) -> Result<u8, RangeError> {
        Ok(self.read(offset, 1)?[0])
    }

    /// Independent copy of a sub-region.
    pub fn slice(&self, offset: usize, length: usize) -> Result<ByteImage, RangeError> {
        Ok(ByteImage::from_bytes(self.read(offset, length)?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Load a flat binary image file.
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(ByteImage::from_bytes(std::fs::read(path)?))
    }

    /// Save the image as a flat binary file; no framing is added.
    pub fn save(&self, path: impl AsRef<Path>) -> io::Result<()> {
        std::fs::write(path, &self.data)
    }

    /// Hex + ASCII dump of a region, 8 bytes per row, addresses relative to `offset`.
    pub fn hexdump(&self, offset: usize, length: usize) -> Result<String, RangeError> {
        Ok(hexdump(self.read(offset, length)?))
    }
}

impl std::fmt::Debug for ByteImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ByteImage({} bytes)", self.data.len())
    }
}

impl AsRef<[u8]> for ByteImage {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for ByteImage {
    fn from(data: Vec<u8>) -> Self {
        ByteImage { data }
    }
}

/// Hexdump-like rendering of `data`: `addr: xx xx ..   ascii`.
pub fn hexdump(data: &[u8]) -> String {
    const ROW: usize = 8;
    let mut out = String::new();
    for (row, chunk) in data.chunks(ROW).enumerate() {
        let _ = write!(out, "{:04}: ", row * ROW);
        for i in 0..ROW {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, "{:02x} ", b);
                }
                None => out.push_str("   "),
            }
        }
        out.push_str("  ");
        for i in 0..ROW {
            let c = chunk.get(i).copied().unwrap_or(b'.');
            out.push(if c > 0x20 && c < 0x7E { c as char } else { '.' });
        }
        out.push('\n');
    }
    out
}
