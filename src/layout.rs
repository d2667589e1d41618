//! Schema compiler: turns schema text into an offset-resolved [`Layout`].
//!
//! Compilation is a single left-to-right pass over the AST with a byte
//! cursor. `#seekto` sets the cursor, `#seek` advances it, and every field
//! declaration advances it by its byte size. A repeated struct
//! (`struct mem m[N];`) compiles its body once, at the first instance; the
//! remaining instances are addressed by `offset + i * stride` when a view
//! indexes them.
//!
//! Struct type names (`struct name { ... };`) share one global namespace and
//! must be defined before use. Field names must be unique within a struct.
//!
//! The compiled [`Layout`] holds no reference to any image; it can be built
//! once per radio model and bound to any number of [`ByteImage`](crate::ByteImage)s.

use crate::ast::*;
use crate::parser::parse;
use std::collections::HashMap;

/// Byte order of a multi-byte integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Endianness {
    Big,
    Little,
}

/// Fixed-width integer type (`u8` .. `il32`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntType {
    pub bytes: usize,
    pub signed: bool,
    pub endianness: Endianness,
}

impl IntType {
    pub const U8: IntType = IntType::new(1, false, Endianness::Big);

    pub const fn new(bytes: usize, signed: bool, endianness: Endianness) -> Self {
        IntType {
            bytes,
            signed,
            endianness,
        }
    }

    pub fn bits(&self) -> u32 {
        self.bytes as u32 * 8
    }

    pub fn min(&self) -> i64 {
        if self.signed {
            -(1i64 << (self.bits() - 1))
        } else {
            0
        }
    }

    pub fn max(&self) -> i64 {
        if self.signed {
            (1i64 << (self.bits() - 1)) - 1
        } else {
            (1i64 << self.bits()) - 1
        }
    }
}

/// Digit-pair order of a BCD array: `lbcd` stores the least significant pair first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcdOrder {
    Little,
    Big,
}

/// Bit numbering of a `bit` / `lbit` array within each byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOrder {
    /// `bit`: element 0 is the most significant bit of the first byte.
    MsbFirst,
    /// `lbit`: element 0 is the least significant bit of the first byte.
    LsbFirst,
}

/// What a field's bytes mean.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Int(IntType),
    /// One byte holding two decimal digits; arrays form one multi-digit number.
    Bcd(BcdOrder),
    Char,
    /// Member of a bit group: `width` bits starting `shift` bits above the container's LSB.
    Bits {
        container: IntType,
        shift: u32,
        width: u32,
    },
    /// Element of a packed `bit` / `lbit` array.
    Bit(BitOrder),
    Struct(StructLayout),
}

impl FieldKind {
    /// Bytes occupied by one element (0 for packed bits).
    fn element_size(&self) -> usize {
        match self {
            FieldKind::Int(t) => t.bytes,
            FieldKind::Bcd(_) | FieldKind::Char => 1,
            FieldKind::Bits { container, .. } => container.bytes,
            FieldKind::Bit(_) => 0,
            FieldKind::Struct(s) => s.size,
        }
    }
}

/// Resolved position of a field or element relative to the image start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub byte_offset: usize,
    /// Position of the least significant bit of the value within its container.
    pub bit_offset: u32,
    pub bit_width: u32,
}

/// One declared field. Offsets are absolute for the first instance of every
/// enclosing repeated struct.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub offset: usize,
    /// `None` for a scalar, `Some(n)` for `name[n]`.
    pub count: Option<usize>,
    /// Distance in bytes between consecutive elements.
    pub stride: usize,
    pub kind: FieldKind,
    pub line: usize,
}

impl Field {
    pub fn is_array(&self) -> bool {
        self.count.is_some()
    }

    /// Number of elements (1 for a scalar).
    pub fn len(&self) -> usize {
        self.count.unwrap_or(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes spanned by the field.
    pub fn byte_len(&self) -> usize {
        match self.kind {
            FieldKind::Bit(_) => self.len().div_ceil(8),
            _ => self.stride * self.len(),
        }
    }

    pub fn location(&self) -> Location {
        match self.kind {
            FieldKind::Bits { shift, width, .. } => Location {
                byte_offset: self.offset,
                bit_offset: shift,
                bit_width: width,
            },
            _ => Location {
                byte_offset: self.offset,
                bit_offset: 0,
                bit_width: match self.kind {
                    FieldKind::Bit(_) => self.len() as u32,
                    _ => (self.byte_len() * 8) as u32,
                },
            },
        }
    }
}

/// A compiled struct: its fields in declaration order plus a name index.
#[derive(Debug, Clone, PartialEq)]
pub struct StructLayout {
    pub name: String,
    pub offset: usize,
    pub size: usize,
    fields: Vec<Field>,
    by_name: HashMap<String, usize>,
}

impl StructLayout {
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }
}

/// Compiled, image-independent memory layout of one radio model.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    root: StructLayout,
    size: usize,
}

impl Layout {
    /// Struct holding the top-level declarations.
    pub fn root(&self) -> &StructLayout {
        &self.root
    }

    /// One past the highest byte any field touches; the minimum image size.
    pub fn size(&self) -> usize {
        self.size
    }
}

impl std::str::FromStr for Layout {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        compile(s)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("line {line}: unknown type `{name}`")]
    UnknownType { name: String, line: usize },
    #[error("line {line}: struct `{name}` referenced before definition")]
    UndefinedStruct { name: String, line: usize },
    #[error("line {line}: struct `{name}` is already defined")]
    DuplicateStruct { name: String, line: usize },
    #[error("line {line}: struct `{name}` contains itself")]
    RecursiveStruct { name: String, line: usize },
    #[error("line {line}: duplicate field `{name}` in struct `{scope}`")]
    DuplicateField {
        name: String,
        scope: String,
        line: usize,
    },
    #[error("line {line}: invalid number `{text}`: {reason}")]
    InvalidNumber {
        text: String,
        reason: &'static str,
        line: usize,
    },
    #[error("line {line}: bit group widths sum to {actual}, but `{type_name}` is {expected} bits")]
    BitWidthMismatch {
        type_name: String,
        expected: u32,
        actual: u64,
        line: usize,
    },
    #[error("line {line}: `{type_name}` cannot hold a bit group")]
    InvalidBitContainer { type_name: String, line: usize },
    #[error("line {line}: bit array `{name}` has {count} bits, not a multiple of 8")]
    BitArrayLength {
        name: String,
        count: usize,
        line: usize,
    },
    #[error("line {line}: #seekto inside repeated struct `{scope}`")]
    SeekInRepeatedStruct { scope: String, line: usize },
    #[error("line {line}: offset overflow")]
    Overflow { line: usize },
}

/// Parse and compile schema text.
pub fn compile(source: &str) -> Result<Layout, SchemaError> {
    let schema = parse(source)?;
    compile_schema(&schema)
}

/// Compile an already parsed schema.
pub fn compile_schema(schema: &Schema) -> Result<Layout, SchemaError> {
    let mut compiler = Compiler::default();
    let root = compiler.compile_block(&schema.items, "(root)", false)?;
    Ok(Layout {
        root,
        size: compiler.extent,
    })
}

fn scalar_kind(type_name: &str) -> Option<FieldKind> {
    use Endianness::{Big, Little};
    let int = |bytes, signed, endianness| Some(FieldKind::Int(IntType::new(bytes, signed, endianness)));
    match type_name {
        "u8" => int(1, false, Big),
        "u16" => int(2, false, Big),
        "ul16" => int(2, false, Little),
        "u24" => int(3, false, Big),
        "ul24" => int(3, false, Little),
        "u32" => int(4, false, Big),
        "ul32" => int(4, false, Little),
        "i8" => int(1, true, Big),
        "i16" => int(2, true, Big),
        "il16" => int(2, true, Little),
        "i24" => int(3, true, Big),
        "il24" => int(3, true, Little),
        "i32" => int(4, true, Big),
        "il32" => int(4, true, Little),
        "char" => Some(FieldKind::Char),
        "lbcd" => Some(FieldKind::Bcd(BcdOrder::Little)),
        "bbcd" => Some(FieldKind::Bcd(BcdOrder::Big)),
        "bit" => Some(FieldKind::Bit(BitOrder::MsbFirst)),
        "lbit" => Some(FieldKind::Bit(BitOrder::LsbFirst)),
        _ => None,
    }
}

/// Parse a decimal or `0x` hex count. Signs are accepted by the grammar so
/// that negative values can be reported here.
fn parse_number(text: &str, line: usize) -> Result<usize, SchemaError> {
    let invalid = |reason| SchemaError::InvalidNumber {
        text: text.to_string(),
        reason,
        line,
    };
    if text.starts_with('-') {
        return Err(invalid("negative"));
    }
    let digits = text.trim_start_matches('+');
    let parsed = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => digits.parse::<usize>(),
    };
    parsed.map_err(|_| invalid("not a number"))
}

fn parse_positive(text: &str, line: usize) -> Result<usize, SchemaError> {
    match parse_number(text, line)? {
        0 => Err(SchemaError::InvalidNumber {
            text: text.to_string(),
            reason: "must be positive",
            line,
        }),
        n => Ok(n),
    }
}

#[derive(Default)]
struct Compiler<'s> {
    cursor: usize,
    extent: usize,
    types: HashMap<String, &'s [Item]>,
    expanding: Vec<String>,
}

impl<'s> Compiler<'s> {
    fn advance(&mut self, n: usize, line: usize) -> Result<(), SchemaError> {
        self.cursor = self
            .cursor
            .checked_add(n)
            .ok_or(SchemaError::Overflow { line })?;
        self.extent = self.extent.max(self.cursor);
        Ok(())
    }

    fn compile_block(
        &mut self,
        items: &'s [Item],
        scope: &str,
        repeated: bool,
    ) -> Result<StructLayout, SchemaError> {
        let start = self.cursor;
        let mut fields = Vec::new();
        let mut by_name = HashMap::new();
        for item in items {
            let new_fields = match item {
                Item::Directive(d) => {
                    self.directive(d, scope, repeated)?;
                    continue;
                }
                Item::Definition(d) => self.definition(d)?,
                Item::Struct(s) => match &s.kind {
                    StructKind::Define { name, body } => {
                        // A definition nested in a struct body is revisited for every
                        // instantiation of that body; only a different body is a clash.
                        let previous = self.types.insert(name.clone(), body.as_slice());
                        if previous.is_some_and(|p| !std::ptr::eq(p, body.as_slice())) {
                            return Err(SchemaError::DuplicateStruct {
                                name: name.clone(),
                                line: s.line,
                            });
                        }
                        continue;
                    }
                    StructKind::Declare { body, declarator } => {
                        vec![self.instantiate(body, declarator, s.line, repeated)?]
                    }
                },
            };
            for field in new_fields {
                if by_name.insert(field.name.clone(), fields.len()).is_some() {
                    return Err(SchemaError::DuplicateField {
                        name: field.name,
                        scope: scope.to_string(),
                        line: item.line(),
                    });
                }
                fields.push(field);
            }
        }
        Ok(StructLayout {
            name: scope.to_string(),
            offset: start,
            size: self.cursor.saturating_sub(start),
            fields,
            by_name,
        })
    }

    fn directive(&mut self, d: &Directive, scope: &str, repeated: bool) -> Result<(), SchemaError> {
        match &d.kind {
            DirectiveKind::SeekTo(text) => {
                if repeated {
                    return Err(SchemaError::SeekInRepeatedStruct {
                        scope: scope.to_string(),
                        line: d.line,
                    });
                }
                let target = parse_number(text, d.line)?;
                if target < self.cursor {
                    log::warn!(
                        "line {}: #seekto 0x{:04X} moves backwards from 0x{:04X}",
                        d.line,
                        target,
                        self.cursor
                    );
                } else if target == self.cursor {
                    log::debug!("line {}: unnecessary #seekto 0x{:04X}", d.line, target);
                }
                self.cursor = target;
                self.extent = self.extent.max(target);
            }
            DirectiveKind::Seek(text) => {
                let n = parse_number(text, d.line)?;
                self.advance(n, d.line)?;
            }
            DirectiveKind::PrintOffset(label) => {
                log::debug!("{}: {} (0x{:08X})", label, self.cursor, self.cursor);
            }
        }
        Ok(())
    }

    fn definition(&mut self, d: &Definition) -> Result<Vec<Field>, SchemaError> {
        let line = d.line;
        let kind = scalar_kind(&d.type_name).ok_or_else(|| SchemaError::UnknownType {
            name: d.type_name.clone(),
            line,
        })?;
        match &d.declarator {
            Declarator::Scalar(name) => {
                if matches!(kind, FieldKind::Bit(_)) {
                    return Err(SchemaError::BitArrayLength {
                        name: name.clone(),
                        count: 1,
                        line,
                    });
                }
                let stride = kind.element_size();
                let field = Field {
                    name: name.clone(),
                    offset: self.cursor,
                    count: None,
                    stride,
                    kind,
                    line,
                };
                self.advance(stride, line)?;
                Ok(vec![field])
            }
            Declarator::Array { name, count } => {
                let count = parse_positive(count, line)?;
                let stride = kind.element_size();
                let total = if matches!(kind, FieldKind::Bit(_)) {
                    if count % 8 != 0 {
                        return Err(SchemaError::BitArrayLength {
                            name: name.clone(),
                            count,
                            line,
                        });
                    }
                    count / 8
                } else {
                    stride
                        .checked_mul(count)
                        .ok_or(SchemaError::Overflow { line })?
                };
                let field = Field {
                    name: name.clone(),
                    offset: self.cursor,
                    count: Some(count),
                    stride,
                    kind,
                    line,
                };
                self.advance(total, line)?;
                Ok(vec![field])
            }
            Declarator::Bitfield(members) => {
                let container = match kind {
                    FieldKind::Int(t) => t,
                    _ => {
                        return Err(SchemaError::InvalidBitContainer {
                            type_name: d.type_name.clone(),
                            line,
                        })
                    }
                };
                let widths = members
                    .iter()
                    .map(|m| parse_positive(&m.width, line))
                    .collect::<Result<Vec<_>, _>>()?;
                let total = widths
                    .iter()
                    .fold(0u64, |acc, &w| acc.saturating_add(w as u64));
                if total != container.bits() as u64 {
                    return Err(SchemaError::BitWidthMismatch {
                        type_name: d.type_name.clone(),
                        expected: container.bits(),
                        actual: total,
                        line,
                    });
                }
                // First member takes the most significant bits.
                let mut left = container.bits();
                let fields = members
                    .iter()
                    .zip(widths)
                    .map(|(m, width)| {
                        let width = width as u32;
                        left -= width;
                        Field {
                            name: m.name.clone(),
                            offset: self.cursor,
                            count: None,
                            stride: container.bytes,
                            kind: FieldKind::Bits {
                                container,
                                shift: left,
                                width,
                            },
                            line,
                        }
                    })
                    .collect();
                self.advance(container.bytes, line)?;
                Ok(fields)
            }
        }
    }

    fn instantiate(
        &mut self,
        body: &'s StructBody,
        declarator: &Declarator,
        line: usize,
        repeated: bool,
    ) -> Result<Field, SchemaError> {
        let (name, count) = match declarator {
            Declarator::Scalar(name) => (name.clone(), None),
            Declarator::Array { name, count } => (name.clone(), Some(parse_positive(count, line)?)),
            Declarator::Bitfield(_) => {
                return Err(SchemaError::Syntax(format!(
                    "line {}: a struct cannot be declared as a bit group",
                    line
                )))
            }
        };
        let (items, type_name) = match body {
            StructBody::Named(type_name) => {
                let items = self
                    .types
                    .get(type_name)
                    .copied()
                    .ok_or_else(|| SchemaError::UndefinedStruct {
                        name: type_name.clone(),
                        line,
                    })?;
                if self.expanding.contains(type_name) {
                    return Err(SchemaError::RecursiveStruct {
                        name: type_name.clone(),
                        line,
                    });
                }
                (items, Some(type_name.clone()))
            }
            StructBody::Inline(items) => (items.as_slice(), None),
        };

        let start = self.cursor;
        let repeated = repeated || count.is_some_and(|n| n > 1);
        if let Some(t) = &type_name {
            self.expanding.push(t.clone());
        }
        let layout = self.compile_block(items, type_name.as_deref().unwrap_or(&name), repeated);
        if type_name.is_some() {
            self.expanding.pop();
        }
        let layout = layout?;

        let stride = self.cursor.saturating_sub(start);
        if let Some(n) = count {
            let total = stride
                .checked_mul(n)
                .ok_or(SchemaError::Overflow { line })?;
            self.cursor = start;
            self.advance(total, line)?;
        }
        Ok(Field {
            name,
            offset: start,
            count,
            stride,
            kind: FieldKind::Struct(layout),
            line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_number_accepts_hex_and_decimal() {
        assert_eq!(parse_number("0x1F", 1), Ok(31));
        assert_eq!(parse_number("0X10", 1), Ok(16));
        assert_eq!(parse_number("42", 1), Ok(42));
        assert_eq!(parse_number("+7", 1), Ok(7));
    }

    #[test]
    fn parse_number_rejects_negative_and_words() {
        assert!(matches!(
            parse_number("-4", 3),
            Err(SchemaError::InvalidNumber { reason: "negative", line: 3, .. })
        ));
        assert!(matches!(
            parse_number("ten", 1),
            Err(SchemaError::InvalidNumber { reason: "not a number", .. })
        ));
        assert!(matches!(
            parse_positive("0", 1),
            Err(SchemaError::InvalidNumber { reason: "must be positive", .. })
        ));
    }

    #[test]
    fn int_type_ranges() {
        let u16t = IntType::new(2, false, Endianness::Big);
        assert_eq!((u16t.min(), u16t.max()), (0, 0xFFFF));
        let i8t = IntType::new(1, true, Endianness::Big);
        assert_eq!((i8t.min(), i8t.max()), (-128, 127));
        let u32t = IntType::new(4, false, Endianness::Little);
        assert_eq!(u32t.max(), 0xFFFF_FFFF);
    }
}
