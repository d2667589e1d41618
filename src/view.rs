//! Live, typed views of a [`Layout`] bound to a [`ByteImage`].
//!
//! A [`FieldView`] is a `(layout node, base offset, image)` triple. It is
//! cheap to create and holds no state of its own: every `get` decodes the
//! current bytes and every `set` writes straight into the image.
//!
//! Views are generic over how they hold the image: a view over
//! `&ByteImage` can only read, a view over `&mut ByteImage` can also write.
//!
//! ```ignore
//! let layout = radiomem::compile("#seekto 0x10; struct { u8 a:4, b:4; } x;")?;
//! let mut image = radiomem::ByteImage::new(0x11);
//! let mut root = layout.bind(&mut image)?;
//! root.view_mut().at("x.b")?.set(5)?;
//! assert_eq!(root.view().at("x.a")?.get_int()?, 0);
//! ```
//!
//! ## Field semantics
//!
//! | Kind | `get()` | `set()` accepts |
//! |------|---------|-----------------|
//! | `u8`..`il32` | `Value::Int` | in-range `Int` |
//! | `lbcd`/`bbcd` array | `Value::Int` of all digits | `Int` with at most `2 * len` digits |
//! | `lbcd`/`bbcd` byte | `Value::Int` 0..=99 | `Int` 0..=99 |
//! | `char` array | `Value::Str` filtered by [`CharPolicy`] | `Str`, padded or truncated |
//! | bit-group member, `bit` element | `Value::Int` | `Int` that fits the width |
//! | other arrays | `Value::List` | `List` of the same length |
//! | struct | `Value::Struct` | `Struct` with any subset of members |

use crate::image::{ByteImage, RangeError};
use crate::layout::*;
use crate::value::Value;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ViewError {
    #[error("invalid BCD byte 0x{byte:02X} at 0x{offset:04X}")]
    InvalidBcd { offset: usize, byte: u8 },
    #[error("`{field}`: decoded value does not fit in 64 bits")]
    DecodeOverflow { field: String },
    #[error("index {index} out of range for `{field}` with {len} elements")]
    Index {
        field: String,
        index: usize,
        len: usize,
    },
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error("no field `{name}` in struct `{scope}`")]
    UnknownField { name: String, scope: String },
    #[error("invalid path `{0}`")]
    InvalidPath(String),
    #[error("`{field}` is not {expected}")]
    NotA {
        field: String,
        expected: &'static str,
    },
    #[error("value {value} out of range for `{field}` ({min}..={max})")]
    ValueOutOfRange {
        field: String,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("`{field}` expects {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("`{field}` expects {expected} elements, got {actual}")]
    LengthMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },
    #[error("`{field}`: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("image of {actual} bytes is smaller than the layout ({required} bytes)")]
    ImageTooSmall { required: usize, actual: usize },
}

/// How char arrays are decoded and padded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharPolicy {
    /// Byte written after the text when it is shorter than the field.
    pub pad: u8,
    /// Trailing bytes dropped before decoding.
    pub trim: Vec<u8>,
    /// Stands in for bytes outside printable ASCII.
    pub replacement: char,
}

impl CharPolicy {
    /// Pad and trim with the same byte.
    pub fn padded_with(pad: u8) -> Self {
        CharPolicy {
            pad,
            trim: vec![pad],
            replacement: ' ',
        }
    }

    /// Printable ASCII as itself, anything else as `replacement`.
    pub fn decode(&self, byte: u8) -> char {
        if (0x20..=0x7E).contains(&byte) {
            byte as char
        } else {
            self.replacement
        }
    }
}

impl Default for CharPolicy {
    fn default() -> Self {
        CharPolicy {
            pad: 0xFF,
            trim: vec![0x00, 0xFF],
            replacement: ' ',
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Node<'l> {
    Struct(&'l StructLayout),
    Field(&'l Field),
    Element(&'l Field, usize),
}

impl<'l> Node<'l> {
    fn name(&self) -> &'l str {
        match *self {
            Node::Struct(s) => &s.name,
            Node::Field(f) | Node::Element(f, _) => &f.name,
        }
    }

    fn location(&self, base: usize) -> Location {
        match *self {
            Node::Struct(s) => Location {
                byte_offset: s.offset + base,
                bit_offset: 0,
                bit_width: (s.size * 8) as u32,
            },
            Node::Field(f) => {
                let mut loc = f.location();
                loc.byte_offset += base;
                loc
            }
            Node::Element(f, i) => match f.kind {
                FieldKind::Bit(order) => Location {
                    byte_offset: f.offset + base + i / 8,
                    bit_offset: bit_index(order, i),
                    bit_width: 1,
                },
                _ => Location {
                    byte_offset: f.offset + base + i * f.stride,
                    bit_offset: 0,
                    bit_width: (f.stride * 8) as u32,
                },
            },
        }
    }

    /// Byte range covered by the node.
    fn span(&self, base: usize) -> (usize, usize) {
        match *self {
            Node::Struct(s) => (s.offset + base, s.size),
            Node::Field(f) => (f.offset + base, f.byte_len()),
            Node::Element(f, i) => match f.kind {
                FieldKind::Bit(_) => (f.offset + base + i / 8, 1),
                _ => (f.offset + base + i * f.stride, f.stride),
            },
        }
    }
}

fn bit_index(order: BitOrder, i: usize) -> u32 {
    match order {
        BitOrder::MsbFirst => 7 - (i % 8) as u32,
        BitOrder::LsbFirst => (i % 8) as u32,
    }
}

/// Node for a field as seen from its parent: scalar structs open directly.
fn enter(field: &Field) -> Node<'_> {
    match (&field.kind, field.count) {
        (FieldKind::Struct(s), None) => Node::Struct(s),
        _ => Node::Field(field),
    }
}

fn child<'l>(node: Node<'l>, base: usize, name: &str) -> Result<(Node<'l>, usize), ViewError> {
    let s = match node {
        Node::Struct(s) => s,
        other => {
            return Err(ViewError::NotA {
                field: other.name().to_string(),
                expected: "a struct",
            })
        }
    };
    let field = s.field(name).ok_or_else(|| ViewError::UnknownField {
        name: name.to_string(),
        scope: s.name.clone(),
    })?;
    Ok((enter(field), base))
}

fn element(node: Node<'_>, base: usize, index: usize) -> Result<(Node<'_>, usize), ViewError> {
    let field = match node {
        Node::Field(f) if f.is_array() => f,
        other => {
            return Err(ViewError::NotA {
                field: other.name().to_string(),
                expected: "an array",
            })
        }
    };
    if index >= field.len() {
        return Err(ViewError::Index {
            field: field.name.clone(),
            index,
            len: field.len(),
        });
    }
    match &field.kind {
        FieldKind::Struct(s) => Ok((Node::Struct(s), base + index * field.stride)),
        _ => Ok((Node::Element(field, index), base)),
    }
}

#[derive(Debug, PartialEq)]
enum Segment<'p> {
    Name(&'p str),
    Index(usize),
}

/// Split `a.b[3].c` (optionally starting with `.` or `[`) into segments.
fn parse_path(path: &str) -> Result<Vec<Segment<'_>>, ViewError> {
    let invalid = || ViewError::InvalidPath(path.to_string());
    let mut segments = Vec::new();
    let mut rest = path;
    let mut need_name = false;
    while !rest.is_empty() {
        if let Some(r) = rest.strip_prefix('.') {
            if need_name {
                return Err(invalid());
            }
            rest = r;
            need_name = true;
            continue;
        }
        if let Some(r) = rest.strip_prefix('[') {
            if need_name {
                return Err(invalid());
            }
            let close = r.find(']').ok_or_else(invalid)?;
            let index = r[..close].trim().parse().map_err(|_| invalid())?;
            segments.push(Segment::Index(index));
            rest = &r[close + 1..];
            continue;
        }
        let end = rest.find(['.', '[']).unwrap_or(rest.len());
        segments.push(Segment::Name(rest[..end].trim()));
        rest = &rest[end..];
        need_name = false;
    }
    if need_name {
        return Err(invalid());
    }
    Ok(segments)
}

fn walk<'l>(mut node: Node<'l>, mut base: usize, path: &str) -> Result<(Node<'l>, usize), ViewError> {
    for segment in parse_path(path)? {
        (node, base) = match segment {
            Segment::Name(name) => child(node, base, name)?,
            Segment::Index(i) => element(node, base, i)?,
        };
    }
    Ok((node, base))
}

impl Layout {
    /// Bind the layout to an image. Pass `&image` for a read-only view or
    /// `&mut image` for a writable one.
    pub fn bind<I: Deref<Target = ByteImage>>(&self, image: I) -> Result<FieldView<'_, I>, ViewError> {
        if image.len() < self.size() {
            return Err(ViewError::ImageTooSmall {
                required: self.size(),
                actual: image.len(),
            });
        }
        Ok(FieldView {
            node: Node::Struct(self.root()),
            base: 0,
            image,
        })
    }

    /// Writable root view.
    pub fn bind_mut<'i>(&self, image: &'i mut ByteImage) -> Result<FieldView<'_, &'i mut ByteImage>, ViewError> {
        self.bind(image)
    }

    /// Resolve a path to its position without any image.
    pub fn locate(&self, path: &str) -> Result<Location, ViewError> {
        let (node, base) = walk(Node::Struct(self.root()), 0, path)?;
        Ok(node.location(base))
    }
}

/// Bind straight to the field at `path`.
pub fn bind_path<'l, I: Deref<Target = ByteImage>>(
    layout: &'l Layout,
    path: &str,
    image: I,
) -> Result<FieldView<'l, I>, ViewError> {
    layout.bind(image)?.at(path)
}

/// Accessor for one struct, array, element or scalar of a bound image.
pub struct FieldView<'l, I> {
    node: Node<'l>,
    base: usize,
    image: I,
}

impl<'l, I: Deref<Target = ByteImage>> FieldView<'l, I> {
    pub fn name(&self) -> &'l str {
        self.node.name()
    }

    pub fn location(&self) -> Location {
        self.node.location(self.base)
    }

    pub fn offset(&self) -> usize {
        self.location().byte_offset
    }

    /// Whether [`index`](Self::index) applies.
    pub fn is_array(&self) -> bool {
        matches!(self.node, Node::Field(f) if f.is_array())
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.node, Node::Struct(_))
    }

    /// Element count of an array; 1 otherwise.
    pub fn len(&self) -> usize {
        match self.node {
            Node::Field(f) => f.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-only reborrow.
    pub fn view(&self) -> FieldView<'l, &ByteImage> {
        FieldView {
            node: self.node,
            base: self.base,
            image: &*self.image,
        }
    }

    /// Member of a struct.
    pub fn field(self, name: &str) -> Result<Self, ViewError> {
        let (node, base) = child(self.node, self.base, name)?;
        Ok(FieldView { node, base, ..self })
    }

    /// Element of an array; out-of-range indices fail instead of reading neighbours.
    pub fn index(self, index: usize) -> Result<Self, ViewError> {
        let (node, base) = element(self.node, self.base, index)?;
        Ok(FieldView { node, base, ..self })
    }

    /// Follow a path such as `memory[3].freq` or `.settings.squelch`.
    pub fn at(self, path: &str) -> Result<Self, ViewError> {
        let (node, base) = walk(self.node, self.base, path)?;
        Ok(FieldView { node, base, ..self })
    }

    /// Struct members in declaration order.
    pub fn members(&self) -> Result<Vec<FieldView<'l, &ByteImage>>, ViewError> {
        match self.node {
            Node::Struct(s) => Ok(s
                .fields()
                .iter()
                .map(|f| FieldView {
                    node: enter(f),
                    base: self.base,
                    image: &*self.image,
                })
                .collect()),
            other => Err(ViewError::NotA {
                field: other.name().to_string(),
                expected: "a struct",
            }),
        }
    }

    /// Array elements in order.
    pub fn elements(&self) -> Result<Vec<FieldView<'l, &ByteImage>>, ViewError> {
        (0..self.array_len()?)
            .map(|i| self.view().index(i))
            .collect()
    }

    fn array_len(&self) -> Result<usize, ViewError> {
        match self.node {
            Node::Field(f) if f.is_array() => Ok(f.len()),
            other => Err(ViewError::NotA {
                field: other.name().to_string(),
                expected: "an array",
            }),
        }
    }

    fn bytes(&self, offset: usize, len: usize) -> Result<&[u8], ViewError> {
        Ok(self.image.read(offset, len)?)
    }

    /// Decode the current value.
    pub fn get(&self) -> Result<Value, ViewError> {
        match self.node {
            Node::Struct(_) => {
                let mut members = Vec::new();
                for m in self.members()? {
                    members.push((m.name().to_string(), m.get()?));
                }
                Ok(Value::Struct(members))
            }
            Node::Field(f) => match (&f.kind, f.count) {
                (_, None) => self.get_element(f, 0),
                (FieldKind::Bcd(order), Some(_)) => self.get_bcd_number(f, *order),
                (FieldKind::Char, Some(_)) => self.get_text(&CharPolicy::default()).map(Value::Str),
                (_, Some(_)) => Ok(Value::List(
                    self.elements()?
                        .iter()
                        .map(|e| e.get())
                        .collect::<Result<_, _>>()?,
                )),
            },
            Node::Element(f, i) => self.get_element(f, i),
        }
    }

    pub fn get_int(&self) -> Result<i64, ViewError> {
        let v = self.get()?;
        v.as_i64().ok_or_else(|| ViewError::TypeMismatch {
            field: self.name().to_string(),
            expected: "integer",
            actual: v.kind_name(),
        })
    }

    pub fn get_str(&self) -> Result<String, ViewError> {
        match self.get()? {
            Value::Str(s) => Ok(s),
            other => Err(ViewError::TypeMismatch {
                field: self.name().to_string(),
                expected: "string",
                actual: other.kind_name(),
            }),
        }
    }

    fn get_element(&self, f: &Field, index: usize) -> Result<Value, ViewError> {
        let (offset, len) = Node::Element(f, index).span(self.base);
        match f.kind {
            FieldKind::Int(t) => Ok(Value::Int(read_int(self.bytes(offset, len)?, t))),
            FieldKind::Bcd(_) => {
                let byte = self.bytes(offset, 1)?[0];
                Ok(Value::Int(bcd_pair(byte, offset)? as i64))
            }
            FieldKind::Char => {
                let byte = self.bytes(offset, 1)?[0];
                Ok(Value::Str(CharPolicy::default().decode(byte).to_string()))
            }
            FieldKind::Bits {
                container,
                shift,
                width,
            } => {
                let raw = read_uint(self.bytes(offset, len)?, container.endianness);
                Ok(Value::Int(((raw >> shift) & mask(width)) as i64))
            }
            FieldKind::Bit(order) => {
                let byte = self.bytes(offset, 1)?[0];
                Ok(Value::Int(((byte >> bit_index(order, index)) & 1) as i64))
            }
            FieldKind::Struct(ref s) => FieldView {
                node: Node::Struct(s),
                base: self.base + index * f.stride,
                image: &*self.image,
            }
            .get(),
        }
    }

    fn get_bcd_number(&self, f: &Field, order: BcdOrder) -> Result<Value, ViewError> {
        let (offset, len) = Node::Field(f).span(self.base);
        let bytes = self.bytes(offset, len)?;
        let overflow = || ViewError::DecodeOverflow {
            field: f.name.clone(),
        };
        let mut value: i64 = 0;
        let mut push = |i: usize| -> Result<(), ViewError> {
            let pair = bcd_pair(bytes[i], offset + i)? as i64;
            value = value
                .checked_mul(100)
                .and_then(|v| v.checked_add(pair))
                .ok_or_else(overflow)?;
            Ok(())
        };
        match order {
            BcdOrder::Big => (0..len).try_for_each(&mut push)?,
            BcdOrder::Little => (0..len).rev().try_for_each(&mut push)?,
        }
        Ok(Value::Int(value))
    }

    /// Decode a char array (or single char) with an explicit policy.
    pub fn get_text(&self, policy: &CharPolicy) -> Result<String, ViewError> {
        self.expect_char()?;
        let (offset, len) = self.node.span(self.base);
        let mut bytes = self.bytes(offset, len)?;
        while let Some((last, rest)) = bytes.split_last() {
            if !policy.trim.contains(last) {
                break;
            }
            bytes = rest;
        }
        Ok(bytes.iter().map(|&b| policy.decode(b)).collect())
    }

    fn expect_char(&self) -> Result<(), ViewError> {
        match self.node {
            Node::Field(f) | Node::Element(f, _) if f.kind == FieldKind::Char => Ok(()),
            other => Err(ViewError::NotA {
                field: other.name().to_string(),
                expected: "a char field",
            }),
        }
    }

    /// Bytes covered by the view, uninterpreted.
    pub fn get_raw(&self) -> Result<Vec<u8>, ViewError> {
        let (offset, len) = self.node.span(self.base);
        Ok(self.bytes(offset, len)?.to_vec())
    }

    /// Underlying unsigned integer (at most 4 bytes) and its byte order.
    fn raw_uint(&self) -> Result<(u64, Endianness), ViewError> {
        let (offset, len) = self.node.span(self.base);
        if len == 0 || len > 4 {
            return Err(ViewError::NotA {
                field: self.name().to_string(),
                expected: "an integer-sized field",
            });
        }
        let endianness = match self.node {
            Node::Field(f) | Node::Element(f, _) => match f.kind {
                FieldKind::Int(t) | FieldKind::Bits { container: t, .. } => t.endianness,
                _ => Endianness::Big,
            },
            Node::Struct(_) => Endianness::Big,
        };
        Ok((read_uint(self.bytes(offset, len)?, endianness), endianness))
    }

    /// `raw & mask` over the underlying integer, for reserved bits no field names.
    pub fn get_bits(&self, mask: u32) -> Result<u32, ViewError> {
        let (raw, _) = self.raw_uint()?;
        Ok((raw as u32) & mask)
    }
}

impl<'l, I: DerefMut<Target = ByteImage>> FieldView<'l, I> {
    /// Writable reborrow.
    pub fn view_mut(&mut self) -> FieldView<'l, &mut ByteImage> {
        FieldView {
            node: self.node,
            base: self.base,
            image: &mut *self.image,
        }
    }

    fn put(&mut self, offset: usize, bytes: &[u8]) -> Result<(), ViewError> {
        Ok(self.image.write(offset, bytes)?)
    }

    fn out_of_range(&self, value: i64, min: i64, max: i64) -> ViewError {
        ViewError::ValueOutOfRange {
            field: self.name().to_string(),
            value,
            min,
            max,
        }
    }

    fn mismatch(&self, expected: &'static str, actual: &Value) -> ViewError {
        ViewError::TypeMismatch {
            field: self.name().to_string(),
            expected,
            actual: actual.kind_name(),
        }
    }

    /// Encode `value` into the image immediately.
    pub fn set(&mut self, value: impl Into<Value>) -> Result<(), ViewError> {
        let value = value.into();
        match self.node {
            Node::Struct(_) => self.set_struct(&value),
            Node::Field(f) => match (&f.kind, f.count) {
                (_, None) => self.set_element(f, 0, &value),
                (FieldKind::Bcd(order), Some(_)) => self.set_bcd_number(f, *order, &value),
                (FieldKind::Char, Some(_)) => match &value {
                    Value::Str(s) => self.set_text(s, &CharPolicy::default()),
                    other => Err(self.mismatch("string", other)),
                },
                (_, Some(n)) => {
                    let items = value.as_list().ok_or_else(|| self.mismatch("list", &value))?;
                    if items.len() != n {
                        return Err(ViewError::LengthMismatch {
                            field: f.name.clone(),
                            expected: n,
                            actual: items.len(),
                        });
                    }
                    for (i, item) in items.iter().enumerate() {
                        self.view_mut().index(i)?.set(item.clone())?;
                    }
                    Ok(())
                }
            },
            Node::Element(f, i) => self.set_element(f, i, &value),
        }
    }

    fn set_struct(&mut self, value: &Value) -> Result<(), ViewError> {
        let members = value.as_struct().ok_or_else(|| self.mismatch("struct", value))?;
        for (name, v) in members {
            self.view_mut().field(name)?.set(v.clone())?;
        }
        Ok(())
    }

    fn set_element(&mut self, f: &Field, index: usize, value: &Value) -> Result<(), ViewError> {
        let (offset, len) = Node::Element(f, index).span(self.base);
        if let FieldKind::Struct(ref s) = f.kind {
            return FieldView {
                node: Node::Struct(s),
                base: self.base + index * f.stride,
                image: &mut *self.image,
            }
            .set_struct(value);
        }
        if f.kind == FieldKind::Char {
            let existing = self.image.read(offset, 1)?[0];
            let byte = match value {
                Value::Str(s) if s.chars().count() == 1 => {
                    let c = s.chars().next().unwrap_or(' ');
                    if CharPolicy::default().decode(existing) == c {
                        existing
                    } else {
                        char_byte(c).ok_or_else(|| ViewError::InvalidValue {
                            field: f.name.clone(),
                            reason: format!("{:?} is not a single-byte character", s),
                        })?
                    }
                }
                Value::Int(x) if (0..=0xFF).contains(x) => *x as u8,
                Value::Int(x) => return Err(self.out_of_range(*x, 0, 0xFF)),
                other => return Err(self.mismatch("single character", other)),
            };
            return self.put(offset, &[byte]);
        }
        let x = value.as_i64().ok_or_else(|| self.mismatch("integer", value))?;
        match f.kind {
            FieldKind::Int(t) => {
                if x < t.min() || x > t.max() {
                    return Err(self.out_of_range(x, t.min(), t.max()));
                }
                let mut buf = [0u8; 4];
                write_uint(&mut buf[..len], (x as u64) & mask(t.bits()), t.endianness);
                self.put(offset, &buf[..len])
            }
            FieldKind::Bcd(_) => {
                if !(0..=99).contains(&x) {
                    return Err(self.out_of_range(x, 0, 99));
                }
                self.put(offset, &[to_bcd_pair(x as u8)])
            }
            FieldKind::Bits {
                container,
                shift,
                width,
            } => {
                let max = mask(width) as i64;
                if x < 0 || x > max {
                    return Err(self.out_of_range(x, 0, max));
                }
                let raw = read_uint(self.image.read(offset, len)?, container.endianness);
                let cleared = raw & !(mask(width) << shift);
                let mut buf = [0u8; 4];
                write_uint(&mut buf[..len], cleared | ((x as u64) << shift), container.endianness);
                self.put(offset, &buf[..len])
            }
            FieldKind::Bit(order) => {
                if !(0..=1).contains(&x) {
                    return Err(self.out_of_range(x, 0, 1));
                }
                let bit = 1u8 << bit_index(order, index);
                let byte = self.image.byte(offset)?;
                self.put(offset, &[if x == 1 { byte | bit } else { byte & !bit }])
            }
            FieldKind::Char | FieldKind::Struct(_) => Ok(()),
        }
    }

    fn set_bcd_number(&mut self, f: &Field, order: BcdOrder, value: &Value) -> Result<(), ViewError> {
        let x = value.as_i64().ok_or_else(|| self.mismatch("integer", value))?;
        let (offset, len) = Node::Field(f).span(self.base);
        let max = 10i64
            .checked_pow(2 * len as u32)
            .map_or(i64::MAX, |limit| limit - 1);
        if x < 0 || x > max {
            return Err(self.out_of_range(x, 0, max));
        }
        let mut bytes = vec![0u8; len];
        let mut rest = x;
        // Least significant digit pair first, then place per byte order.
        for i in 0..len {
            let pair = to_bcd_pair((rest % 100) as u8);
            rest /= 100;
            match order {
                BcdOrder::Little => bytes[i] = pair,
                BcdOrder::Big => bytes[len - 1 - i] = pair,
            }
        }
        self.put(offset, &bytes)
    }

    /// Encode text, truncating or padding to the field length.
    ///
    /// Bytes that already decode to the wanted character are left alone, so
    /// writing back what [`get_text`](FieldView::get_text) returned changes
    /// nothing. Padding keeps existing fill bytes (those in `policy.trim`); new
    /// padding repeats the field's current trailing fill byte, or `policy.pad`
    /// when the field does not end in one.
    pub fn set_text(&mut self, text: &str, policy: &CharPolicy) -> Result<(), ViewError> {
        self.expect_char()?;
        let (offset, len) = self.node.span(self.base);
        let mut encoded = Vec::with_capacity(len);
        for c in text.chars().take(len) {
            encoded.push(char_byte(c).ok_or_else(|| ViewError::InvalidValue {
                field: self.name().to_string(),
                reason: format!("{:?} is not a single-byte character", c),
            })?);
        }
        let mut bytes = self.image.read(offset, len)?.to_vec();
        let fill = match bytes.last() {
            Some(b) if policy.trim.contains(b) => *b,
            _ => policy.pad,
        };
        for (i, &byte) in encoded.iter().enumerate() {
            if policy.decode(bytes[i]) != policy.decode(byte) || !(0x20..=0x7E).contains(&byte) {
                bytes[i] = byte;
            }
        }
        // A kept fill byte at the end of the text would be trimmed away on read.
        for i in (0..encoded.len()).rev() {
            if !policy.trim.contains(&bytes[i]) {
                break;
            }
            bytes[i] = encoded[i];
        }
        for b in &mut bytes[encoded.len()..] {
            if !policy.trim.contains(b) {
                *b = fill;
            }
        }
        self.put(offset, &bytes)
    }

    /// Overwrite the view's bytes; `data` must match its size exactly.
    pub fn set_raw(&mut self, data: &[u8]) -> Result<(), ViewError> {
        let (offset, len) = self.node.span(self.base);
        if data.len() != len {
            return Err(ViewError::LengthMismatch {
                field: self.name().to_string(),
                expected: len,
                actual: data.len(),
            });
        }
        self.put(offset, data)
    }

    /// Fill every byte of the view with `byte`.
    pub fn fill_raw(&mut self, byte: u8) -> Result<(), ViewError> {
        let (offset, len) = self.node.span(self.base);
        self.put(offset, &vec![byte; len])
    }

    fn update_bits(&mut self, f: impl FnOnce(u64) -> u64, mask_value: u32) -> Result<(), ViewError> {
        let (raw, endianness) = self.raw_uint()?;
        let (offset, len) = self.node.span(self.base);
        let max = mask(len as u32 * 8);
        if mask_value as u64 > max {
            return Err(self.out_of_range(mask_value as i64, 0, max as i64));
        }
        let mut buf = [0u8; 4];
        write_uint(&mut buf[..len], f(raw) & max, endianness);
        self.put(offset, &buf[..len])
    }

    /// Set the bits in `mask`, leaving the others untouched.
    pub fn set_bits(&mut self, mask: u32) -> Result<(), ViewError> {
        self.update_bits(|raw| raw | mask as u64, mask)
    }

    /// Clear the bits in `mask`, leaving the others untouched.
    pub fn clr_bits(&mut self, mask: u32) -> Result<(), ViewError> {
        self.update_bits(|raw| raw & !(mask as u64), mask)
    }
}

impl<'l, I: Deref<Target = ByteImage>> std::fmt::Debug for FieldView<'l, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let loc = self.location();
        write!(
            f,
            "FieldView({} @ 0x{:04X}, bit {}, {} bits)",
            self.name(),
            loc.byte_offset,
            loc.bit_offset,
            loc.bit_width
        )
    }
}

fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

fn read_uint(bytes: &[u8], endianness: Endianness) -> u64 {
    match endianness {
        Endianness::Big => BigEndian::read_uint(bytes, bytes.len()),
        Endianness::Little => LittleEndian::read_uint(bytes, bytes.len()),
    }
}

fn read_int(bytes: &[u8], t: IntType) -> i64 {
    match (t.signed, t.endianness) {
        (false, e) => read_uint(bytes, e) as i64,
        (true, Endianness::Big) => BigEndian::read_int(bytes, bytes.len()),
        (true, Endianness::Little) => LittleEndian::read_int(bytes, bytes.len()),
    }
}

fn write_uint(buf: &mut [u8], value: u64, endianness: Endianness) {
    let n = buf.len();
    match endianness {
        Endianness::Big => BigEndian::write_uint(buf, value, n),
        Endianness::Little => LittleEndian::write_uint(buf, value, n),
    }
}

/// Decode one BCD byte to 0..=99; nibbles above 9 are an error, not clamped.
fn bcd_pair(byte: u8, offset: usize) -> Result<u8, ViewError> {
    let (tens, ones) = (byte >> 4, byte & 0x0F);
    if tens > 9 || ones > 9 {
        return Err(ViewError::InvalidBcd { offset, byte });
    }
    Ok(tens * 10 + ones)
}

fn to_bcd_pair(x: u8) -> u8 {
    ((x / 10) << 4) | (x % 10)
}

/// Byte for a character in the straight Latin-1 mapping the radios use.
fn char_byte(c: char) -> Option<u8> {
    u8::try_from(c as u32).ok()
}
