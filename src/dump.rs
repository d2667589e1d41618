//! Format layouts and decoded images for display (offset listing, value tree).

use crate::image::ByteImage;
use crate::layout::{BcdOrder, BitOrder, Endianness, Field, FieldKind, IntType, Layout, StructLayout};
use crate::view::FieldView;
use std::fmt::Write as _;
use std::ops::Deref;

/// Schema spelling of an integer type (`u16`, `il32`, ...).
pub fn int_type_name(t: &IntType) -> String {
    let sign = if t.signed { "i" } else { "u" };
    let little = if t.endianness == Endianness::Little && t.bytes > 1 {
        "l"
    } else {
        ""
    };
    format!("{}{}{}", sign, little, t.bits())
}

/// Short description of a field kind for listings.
pub fn kind_label(kind: &FieldKind) -> String {
    match kind {
        FieldKind::Int(t) => int_type_name(t),
        FieldKind::Bcd(BcdOrder::Little) => "lbcd".to_string(),
        FieldKind::Bcd(BcdOrder::Big) => "bbcd".to_string(),
        FieldKind::Char => "char".to_string(),
        FieldKind::Bits {
            container,
            shift,
            width,
        } => format!("{}:{} (shift {})", int_type_name(container), width, shift),
        FieldKind::Bit(BitOrder::MsbFirst) => "bit".to_string(),
        FieldKind::Bit(BitOrder::LsbFirst) => "lbit".to_string(),
        FieldKind::Struct(s) => format!("struct {}", s.name),
    }
}

/// One line per field: offset, path, kind and size, nested structs indented.
/// Offsets of repeated structs are those of the first instance.
pub fn format_layout(layout: &Layout) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "layout: {} bytes (0x{:04X})", layout.size(), layout.size());
    format_struct(&mut out, layout.root(), 0);
    out
}

fn format_struct(out: &mut String, s: &StructLayout, indent: usize) {
    for field in s.fields() {
        format_field(out, field, indent);
    }
}

fn format_field(out: &mut String, field: &Field, indent: usize) {
    let pad = "  ".repeat(indent);
    let count = field.count.map(|n| format!("[{}]", n)).unwrap_or_default();
    let _ = writeln!(
        out,
        "0x{:04X}  {}{}{}  {}  ({} bytes)",
        field.offset,
        pad,
        field.name,
        count,
        kind_label(&field.kind),
        field.byte_len()
    );
    if let FieldKind::Struct(s) = &field.kind {
        format_struct(out, s, indent + 1);
    }
}

/// Decode every field under `view` into an indented tree. Fields that fail
/// to decode (e.g. invalid BCD) are shown with their error instead of
/// aborting the dump.
pub fn dump_view<I: Deref<Target = ByteImage>>(view: &FieldView<'_, I>) -> String {
    let mut out = String::new();
    dump_node(&mut out, &view.view(), view.name(), 0);
    out
}

fn dump_node(out: &mut String, view: &FieldView<'_, &ByteImage>, label: &str, indent: usize) {
    let pad = "  ".repeat(indent);
    if view.is_struct() {
        let _ = writeln!(out, "{}{} {{", pad, label);
        match view.members() {
            Ok(members) => {
                for m in &members {
                    dump_node(out, m, m.name(), indent + 1);
                }
            }
            Err(e) => {
                let _ = writeln!(out, "{}  <error: {}>", pad, e);
            }
        }
        let _ = writeln!(out, "{}}}", pad);
        return;
    }
    if view.is_array() {
        if let Ok(elements) = view.elements() {
            if elements.first().is_some_and(|e| e.is_struct()) {
                let _ = writeln!(out, "{}{}[{}] [", pad, label, view.len());
                for (i, e) in elements.iter().enumerate() {
                    dump_node(out, e, &format!("[{}]", i), indent + 1);
                }
                let _ = writeln!(out, "{}]", pad);
                return;
            }
        }
    }
    let loc = view.location();
    match view.get() {
        Ok(v) => {
            let _ = writeln!(out, "{}{} = {}  @0x{:04X}", pad, label, v, loc.byte_offset);
        }
        Err(e) => {
            let _ = writeln!(out, "{}{} = <error: {}>  @0x{:04X}", pad, label, e, loc.byte_offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::compile;

    #[test]
    fn int_type_names_follow_schema_spelling() {
        assert_eq!(int_type_name(&IntType::U8), "u8");
        assert_eq!(int_type_name(&IntType::new(2, false, Endianness::Little)), "ul16");
        assert_eq!(int_type_name(&IntType::new(4, true, Endianness::Little)), "il32");
        assert_eq!(int_type_name(&IntType::new(3, true, Endianness::Big)), "i24");
    }

    #[test]
    fn layout_listing_shows_offsets_and_nesting() {
        let layout = compile("#seekto 0x10;\nstruct { u16 freq; u8 a:4, b:4; } ch[2];").unwrap();
        let text = format_layout(&layout);
        assert!(text.starts_with("layout: 22 bytes (0x0016)"));
        assert!(text.contains("0x0010  ch[2]  struct ch  (6 bytes)"));
        assert!(text.contains("0x0010    freq  u16  (2 bytes)"));
        assert!(text.contains("0x0012    a  u8:4 (shift 4)  (1 bytes)"));
    }

    #[test]
    fn dump_reports_bad_fields_inline() {
        let layout = compile("lbcd freq[2]; u8 x;").unwrap();
        let image = ByteImage::from_bytes(vec![0xAB, 0x12, 7]);
        let root = layout.bind(&image).unwrap();
        let text = dump_view(&root);
        assert!(text.contains("freq = <error: invalid BCD byte 0xAB at 0x0000>"));
        assert!(text.contains("x = 7  @0x0002"));
    }
}
