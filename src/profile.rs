//! Per-model clone parameters.
//!
//! Everything that differs between radio families (link speed, wake-up
//! sequence, frame shape, checksum, memory map) lives in a
//! [`CloneProfile`], usually loaded from TOML:
//!
//! ```toml
//! name = "UV-5R"
//! block-size = 0x40
//! memory-size = 0x2000
//!
//! [link]
//! baud-rates = [9600]
//!
//! [handshake]
//! wake = [0x50, 0xBB, 0xFF, 0x20, 0x12, 0x07, 0x25]
//! wake-ack = [0x06]
//! ident-command = [0x02]
//! ident-length = 8
//! accepted-idents = [[0xAA, 0x30, 0x76, 0x04, 0x00, 0x05, 0x20, 0xDD]]
//! ident-confirm = [0x06]
//! end-command = "E"
//!
//! [frame]
//! read-command = 0x53
//! read-reply = 0x58
//! write-command = 0x58
//! checksum = "none"
//!
//! [[range]]
//! start = 0x0000
//! end = 0x1800
//! ```
//!
//! Byte sequences may be written as arrays of integers or as ASCII strings.

use crate::layout::Endianness;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid profile: {0}")]
    Invalid(String),
}

/// Block checksum variant.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Checksum {
    None,
    /// Sum of header and payload bytes, mod 256.
    #[default]
    Sum8,
    /// Sum of payload bytes only, mod 256.
    Sum8Payload,
    /// XOR of header and payload bytes.
    Xor8,
    /// Model-specific function over header and payload; set in code.
    #[serde(skip)]
    Custom(fn(&[u8]) -> u8),
}

impl Checksum {
    /// Checksum of one frame, `None` when the variant carries no checksum byte.
    pub fn compute(&self, header: &[u8], payload: &[u8]) -> Option<u8> {
        let all = header.iter().chain(payload);
        match self {
            Checksum::None => None,
            Checksum::Sum8 => Some(all.fold(0u8, |acc, b| acc.wrapping_add(*b))),
            Checksum::Sum8Payload => Some(payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))),
            Checksum::Xor8 => Some(all.fold(0u8, |acc, b| acc ^ b)),
            Checksum::Custom(f) => {
                let mut frame = header.to_vec();
                frame.extend_from_slice(payload);
                Some(f(&frame))
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Checksum::None => 0,
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LinkConfig {
    /// Candidate speeds, tried in order after the caller's hint.
    pub baud_rates: Vec<u32>,
    /// Candidate terminators appended to handshake commands.
    #[serde(deserialize_with = "deserialize_byte_list")]
    pub delimiters: Vec<Vec<u8>>,
    /// The cable loops every written byte back.
    pub echos_write: bool,
    pub timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            baud_rates: vec![9600],
            delimiters: vec![Vec::new()],
            echos_write: false,
            timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct HandshakeConfig {
    #[serde(deserialize_with = "deserialize_bytes")]
    pub wake: Vec<u8>,
    #[serde(deserialize_with = "deserialize_bytes")]
    pub wake_ack: Vec<u8>,
    #[serde(deserialize_with = "deserialize_bytes")]
    pub ident_command: Vec<u8>,
    pub ident_length: usize,
    #[serde(deserialize_with = "deserialize_byte_list")]
    pub accepted_idents: Vec<Vec<u8>>,
    /// Sent after an accepted ident; the radio answers with the frame ack byte.
    #[serde(deserialize_with = "deserialize_opt_bytes")]
    pub ident_confirm: Option<Vec<u8>>,
    #[serde(deserialize_with = "deserialize_bytes")]
    pub end_command: Vec<u8>,
    #[serde(deserialize_with = "deserialize_bytes")]
    pub end_ack: Vec<u8>,
}

/// Shape of block frames: `op, address, [length], payload, [checksum]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FrameFormat {
    pub read_command: u8,
    pub read_reply: u8,
    pub write_command: u8,
    /// Address bytes: 1, 2 or 4.
    pub address_width: usize,
    /// Length bytes: 0 (implied by the request), 1 or 2.
    pub length_width: usize,
    pub byte_order: Endianness,
    pub checksum: Checksum,
    /// Positive acknowledgement byte.
    pub ack: u8,
    /// The host acknowledges every read reply with `ack`.
    pub ack_reads: bool,
}

impl Default for FrameFormat {
    fn default() -> Self {
        FrameFormat {
            read_command: b'R',
            read_reply: b'W',
            write_command: b'W',
            address_width: 2,
            length_width: 1,
            byte_order: Endianness::Big,
            checksum: Checksum::Sum8,
            ack: 0x06,
            ack_reads: false,
        }
    }
}

impl FrameFormat {
    /// Frame header: opcode, address, length.
    pub fn header(&self, op: u8, address: u32, length: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.address_width + self.length_width);
        out.push(op);
        push_be_or_le(&mut out, address as u64, self.address_width, self.byte_order);
        push_be_or_le(&mut out, length as u64, self.length_width, self.byte_order);
        out
    }

    pub fn header_len(&self) -> usize {
        1 + self.address_width + self.length_width
    }

    /// Split a received header into `(op, address, length)`; length is
    /// `None` when the format carries no length field.
    pub fn parse_header(&self, header: &[u8]) -> (u8, u32, Option<usize>) {
        let op = header.first().copied().unwrap_or(0);
        let addr_end = 1 + self.address_width;
        let address = read_be_or_le(&header[1..addr_end], self.byte_order) as u32;
        let length = match self.length_width {
            0 => None,
            _ => Some(read_be_or_le(&header[addr_end..self.header_len()], self.byte_order) as usize),
        };
        (op, address, length)
    }
}

fn push_be_or_le(out: &mut Vec<u8>, value: u64, width: usize, order: Endianness) {
    let bytes = value.to_be_bytes();
    let field = &bytes[8 - width..];
    match order {
        Endianness::Big => out.extend_from_slice(field),
        Endianness::Little => out.extend(field.iter().rev()),
    }
}

fn read_be_or_le(bytes: &[u8], order: Endianness) -> u64 {
    let fold = |acc: u64, b: &u8| (acc << 8) | *b as u64;
    match order {
        Endianness::Big => bytes.iter().fold(0, fold),
        Endianness::Little => bytes.iter().rev().fold(0, fold),
    }
}

/// Half-open address range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AddressRange {
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub start: u32,
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub end: u32,
}

/// All model-specific clone parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CloneProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub link: LinkConfig,
    pub handshake: HandshakeConfig,
    #[serde(default)]
    pub frame: FrameFormat,
    pub block_size: usize,
    pub memory_size: usize,
    /// Regions to transfer; empty means the whole memory.
    #[serde(default, rename = "range")]
    pub ranges: Vec<AddressRange>,
}

impl CloneProfile {
    pub fn from_toml_str(content: &str) -> Result<Self, ProfileError> {
        let profile: CloneProfile = toml::from_str(content)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// `(start, end)` pairs to transfer.
    pub fn transfer_ranges(&self) -> Vec<(u32, u32)> {
        if self.ranges.is_empty() {
            vec![(0, self.memory_size as u32)]
        } else {
            self.ranges.iter().map(|r| (r.start, r.end)).collect()
        }
    }

    /// Reject parameter combinations no frame could carry.
    pub fn validate(&self) -> Result<(), ProfileError> {
        let invalid = |msg: String| Err(ProfileError::Invalid(msg));
        if self.block_size == 0 || self.block_size % 2 != 0 {
            return invalid(format!("block size {} must be even and positive", self.block_size));
        }
        if ![1, 2, 4].contains(&self.frame.address_width) {
            return invalid(format!("address width {} must be 1, 2 or 4", self.frame.address_width));
        }
        let length_max = match self.frame.length_width {
            0 => u32::MAX as usize,
            1 => 0xFF,
            2 => 0xFFFF,
            w => return invalid(format!("length width {} must be 0, 1 or 2", w)),
        };
        if self.block_size > length_max {
            return invalid(format!(
                "block size {} does not fit a {}-byte length field",
                self.block_size, self.frame.length_width
            ));
        }
        let address_max = (1u64 << (8 * self.frame.address_width)) - 1;
        if self.memory_size as u64 > (address_max + 1).min(u32::MAX as u64) {
            return invalid(format!(
                "memory size 0x{:X} exceeds {}-byte addresses",
                self.memory_size, self.frame.address_width
            ));
        }
        if self.link.baud_rates.is_empty() {
            return invalid("no baud rates".to_string());
        }
        if self.link.delimiters.is_empty() {
            return invalid("no delimiters (use [[]] for none)".to_string());
        }
        if self.handshake.ident_command.is_empty() != (self.handshake.ident_length == 0) {
            return invalid("ident-command and ident-length must be set together".to_string());
        }
        for r in &self.ranges {
            if r.start > r.end || r.end as usize > self.memory_size {
                return invalid(format!(
                    "range 0x{:04X}..0x{:04X} outside memory of 0x{:X} bytes",
                    r.start, r.end, self.memory_size
                ));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ByteSeq {
    Raw(Vec<u8>),
    Text(String),
}

impl From<ByteSeq> for Vec<u8> {
    fn from(seq: ByteSeq) -> Self {
        match seq {
            ByteSeq::Raw(v) => v,
            ByteSeq::Text(s) => s.into_bytes(),
        }
    }
}

fn deserialize_bytes<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(ByteSeq::deserialize(deserializer)?.into())
}

fn deserialize_opt_bytes<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<ByteSeq>::deserialize(deserializer)?.map(Into::into))
}

fn deserialize_byte_list<'de, D>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Vec::<ByteSeq>::deserialize(deserializer)?
        .into_iter()
        .map(Into::into)
        .collect())
}

/// Deserialize a u32 that can be an integer or a "0x..." string.
fn deserialize_hex_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Int(u32),
        Str(String),
    }

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => {
            let s = s.trim();
            let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u32::from_str_radix(hex, 16),
                None => s.parse(),
            };
            parsed.map_err(|e| serde::de::Error::custom(format!("invalid number `{}`: {}", s, e)))
        }
    }
}
