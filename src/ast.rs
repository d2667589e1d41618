//! Abstract Syntax Tree for the memory-map schema language.
//!
//! The tree is unresolved: numbers are kept as source text and struct
//! references by name, so the compiler in [`crate::layout`] can report
//! precise errors with line numbers.

/// Root of a parsed schema: the top-level items in source order.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub items: Vec<Item>,
}

/// One statement inside a block.
#[derive(Debug, Clone)]
pub enum Item {
    Directive(Directive),
    Definition(Definition),
    Struct(StructItem),
}

impl Item {
    /// 1-based source line of the statement.
    pub fn line(&self) -> usize {
        match self {
            Item::Directive(d) => d.line,
            Item::Definition(d) => d.line,
            Item::Struct(s) => s.line,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveKind {
    /// `#seekto n;` absolute cursor.
    SeekTo(String),
    /// `#seek n;` relative cursor.
    Seek(String),
    /// `#printoffset "label";`
    PrintOffset(String),
}

/// Primitive field declaration: `u8 foo;`, `lbcd freq[4];`, `u8 a:4, b:4;`.
#[derive(Debug, Clone)]
pub struct Definition {
    pub type_name: String,
    pub declarator: Declarator,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Declarator {
    Scalar(String),
    Array { name: String, count: String },
    Bitfield(Vec<BitMember>),
}

impl Declarator {
    /// Name introduced by a scalar or array declarator.
    pub fn name(&self) -> Option<&str> {
        match self {
            Declarator::Scalar(name) | Declarator::Array { name, .. } => Some(name),
            Declarator::Bitfield(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BitMember {
    pub name: String,
    pub width: String,
}

#[derive(Debug, Clone)]
pub struct StructItem {
    pub kind: StructKind,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub enum StructKind {
    /// `struct name { ... };` defines a reusable type without allocating memory.
    Define { name: String, body: Vec<Item> },
    /// `struct name var[N];` or `struct { ... } var;` allocates memory.
    Declare { body: StructBody, declarator: Declarator },
}

#[derive(Debug, Clone)]
pub enum StructBody {
    Named(String),
    Inline(Vec<Item>),
}
