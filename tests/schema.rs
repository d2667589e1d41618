//! Schema compiler tests: offsets, strides, bit groups, directives and errors.

use radiomem::{compile, BcdOrder, BitOrder, FieldKind, Layout, Location, SchemaError};

const CHANNELS: &str = r#"
#seekto 0x0010;
struct {
  lbcd rxfreq[4];
  lbcd txfreq[4];
  ul16 rxtone;
  ul16 txtone;
  u8 unused:3,
     isuhf:1,
     scode:4;
  u8 unknown:7,
     wide:1;
} memory[128];

#seekto 0x0E28;
struct {
  u8 squelch;
  u8 step;
  char welcome[7];
} settings;
"#;

fn field_names(layout: &Layout) -> Vec<&str> {
    layout.root().fields().iter().map(|f| f.name.as_str()).collect()
}

#[test]
fn test_compile_repeated_struct_stride() {
    let layout = compile(CHANNELS).expect("compile");
    assert_eq!(field_names(&layout), ["memory", "settings"]);

    let memory = layout.root().field("memory").expect("memory");
    assert_eq!(memory.offset, 0x10);
    assert_eq!(memory.count, Some(128));
    assert_eq!(memory.stride, 14);
    assert_eq!(memory.byte_len(), 14 * 128);

    // Instance offsets are base + i * stride.
    assert_eq!(layout.locate("memory[0].rxtone").unwrap().byte_offset, 0x18);
    assert_eq!(layout.locate("memory[1].rxtone").unwrap().byte_offset, 0x18 + 14);
    assert_eq!(layout.locate("memory[127].txfreq").unwrap().byte_offset, 0x10 + 127 * 14 + 4);
    assert_eq!(layout.size(), 0x0E28 + 9);
}

#[test]
fn test_bit_group_members_msb_first() {
    let layout = compile(CHANNELS).expect("compile");
    assert_eq!(
        layout.locate("memory[0].unused").unwrap(),
        Location { byte_offset: 0x1C, bit_offset: 5, bit_width: 3 }
    );
    assert_eq!(
        layout.locate("memory[0].isuhf").unwrap(),
        Location { byte_offset: 0x1C, bit_offset: 4, bit_width: 1 }
    );
    assert_eq!(
        layout.locate("memory[0].scode").unwrap(),
        Location { byte_offset: 0x1C, bit_offset: 0, bit_width: 4 }
    );
    assert_eq!(
        layout.locate("memory[2].wide").unwrap(),
        Location { byte_offset: 0x1D + 28, bit_offset: 0, bit_width: 1 }
    );
}

#[test]
fn test_field_kinds() {
    let layout = compile(CHANNELS).expect("compile");
    let memory = match &layout.root().field("memory").unwrap().kind {
        FieldKind::Struct(s) => s.clone(),
        other => panic!("expected struct, got {:?}", other),
    };
    assert_eq!(memory.field("rxfreq").unwrap().kind, FieldKind::Bcd(BcdOrder::Little));
    match memory.field("rxtone").unwrap().kind {
        FieldKind::Int(t) => {
            assert_eq!(t.bytes, 2);
            assert_eq!(t.endianness, radiomem::Endianness::Little);
        }
        ref other => panic!("expected int, got {:?}", other),
    }
    assert_eq!(
        layout.locate("settings.welcome").unwrap(),
        Location { byte_offset: 0x0E2A, bit_offset: 0, bit_width: 56 }
    );
}

#[test]
fn test_named_struct_reuse() {
    let layout = compile(
        r#"
        struct tone { u8 mode:2, pol:1, unused:5; ul16 code; };
        struct ch { u8 freq[3]; struct tone rx; struct tone tx; };
        #seekto 0x100;
        struct ch channels[4];
        struct ch vfo;
        "#,
    )
    .expect("compile");
    assert_eq!(layout.locate("channels[0].tx.code").unwrap().byte_offset, 0x100 + 3 + 3 + 1);
    assert_eq!(layout.locate("channels[3].rx").unwrap().byte_offset, 0x100 + 3 * 9 + 3);
    assert_eq!(layout.locate("vfo").unwrap().byte_offset, 0x100 + 36);
    assert_eq!(layout.size(), 0x100 + 45);
}

#[test]
fn test_seek_and_printoffset() {
    let layout = compile("u8 a;\n#seek 3;\n#printoffset \"after gap\";\nu16 b;").expect("compile");
    assert_eq!(layout.locate("b").unwrap().byte_offset, 4);
    assert_eq!(layout.size(), 6);
}

#[test]
fn test_comments_and_whitespace_ignored() {
    let a = compile("u8 x; /* block\n comment */ u16 y; // trailing\n").expect("compile");
    let b = compile("u8 x;u16 y;").expect("compile");
    assert_eq!(a.size(), b.size());
    assert_eq!(a.locate("y").unwrap(), b.locate("y").unwrap());
    assert_eq!(a.root().field("y").unwrap().line, 2);
}

#[test]
fn test_backwards_seekto_allowed() {
    let layout = compile("#seekto 0x20; u8 late; #seekto 0x10; u8 early;").expect("compile");
    assert_eq!(layout.locate("early").unwrap().byte_offset, 0x10);
    assert_eq!(layout.size(), 0x21);
}

#[test]
fn test_bit_arrays() {
    let layout = compile("bit flags[16]; lbit lflags[8];").expect("compile");
    let flags = layout.root().field("flags").unwrap();
    assert_eq!(flags.kind, FieldKind::Bit(BitOrder::MsbFirst));
    assert_eq!(flags.byte_len(), 2);
    assert_eq!(
        layout.locate("flags[9]").unwrap(),
        Location { byte_offset: 1, bit_offset: 6, bit_width: 1 }
    );
    assert_eq!(
        layout.locate("lflags[3]").unwrap(),
        Location { byte_offset: 2, bit_offset: 3, bit_width: 1 }
    );
    assert_eq!(layout.size(), 3);
}

#[test]
fn test_wide_bit_groups() {
    let layout = compile("u16 hi:4, mid:8, lo:4; ul32 a:1, b:31;").expect("compile");
    assert_eq!(layout.locate("mid").unwrap().bit_offset, 4);
    assert_eq!(layout.locate("b").unwrap(), Location { byte_offset: 2, bit_offset: 0, bit_width: 31 });
}

#[test]
fn test_layout_from_str() {
    let layout: Layout = "u8 a; u8 b;".parse().expect("parse");
    assert_eq!(layout.size(), 2);
}

#[test]
fn test_error_bit_width_mismatch() {
    match compile("u8 a:3, b:4;") {
        Err(SchemaError::BitWidthMismatch { expected: 8, actual: 7, line: 1, .. }) => {}
        other => panic!("expected width mismatch, got {:?}", other),
    }
    assert!(matches!(
        compile("u16 a:8, b:9;"),
        Err(SchemaError::BitWidthMismatch { expected: 16, actual: 17, .. })
    ));
}

#[test]
fn test_error_bit_group_on_non_integer() {
    assert!(matches!(
        compile("lbcd a:4, b:4;"),
        Err(SchemaError::InvalidBitContainer { .. })
    ));
}

#[test]
fn test_error_undefined_struct() {
    match compile("u8 a;\nstruct later x;\nstruct later { u8 b; };") {
        Err(SchemaError::UndefinedStruct { name, line }) => {
            assert_eq!(name, "later");
            assert_eq!(line, 2);
        }
        other => panic!("expected undefined struct, got {:?}", other),
    }
}

#[test]
fn test_error_invalid_numbers() {
    assert!(matches!(
        compile("u8 a[-4];"),
        Err(SchemaError::InvalidNumber { reason: "negative", .. })
    ));
    assert!(matches!(
        compile("u8 a[ten];"),
        Err(SchemaError::InvalidNumber { reason: "not a number", .. })
    ));
    assert!(matches!(
        compile("#seekto -0x10;"),
        Err(SchemaError::InvalidNumber { .. })
    ));
    assert!(matches!(
        compile("u8 a[0];"),
        Err(SchemaError::InvalidNumber { reason: "must be positive", .. })
    ));
}

#[test]
fn test_error_duplicate_field() {
    match compile("struct { u8 a; u8 b:4, a:4; } s;") {
        Err(SchemaError::DuplicateField { name, scope, .. }) => {
            assert_eq!(name, "a");
            assert_eq!(scope, "s");
        }
        other => panic!("expected duplicate field, got {:?}", other),
    }
    // Same name in different scopes is fine.
    assert!(compile("u8 a; struct { u8 a; } s;").is_ok());
}

#[test]
fn test_error_duplicate_and_recursive_struct() {
    assert!(matches!(
        compile("struct t { u8 a; };\nstruct t { u8 b; };"),
        Err(SchemaError::DuplicateStruct { line: 2, .. })
    ));
    assert!(matches!(
        compile("struct a { u8 x; struct a inner; };\nstruct a top;"),
        Err(SchemaError::RecursiveStruct { .. })
    ));
}

#[test]
fn test_nested_definition_inside_repeated_struct() {
    let layout = compile("struct { struct inner { u8 v; }; struct inner i; } outer[3];").expect("compile");
    assert_eq!(layout.locate("outer[2].i.v").unwrap().byte_offset, 2);
}

#[test]
fn test_error_seekto_in_repeated_struct() {
    match compile("struct {\n u8 a;\n #seekto 0x40;\n u8 b;\n} ch[2];") {
        Err(SchemaError::SeekInRepeatedStruct { scope, line }) => {
            assert_eq!(scope, "ch");
            assert_eq!(line, 3);
        }
        other => panic!("expected seekto error, got {:?}", other),
    }
    // A struct instantiated once may seek.
    assert!(compile("struct { u8 a; #seekto 0x40; u8 b; } one;").is_ok());
}

#[test]
fn test_error_bit_array_length() {
    assert!(matches!(
        compile("bit flags[12];"),
        Err(SchemaError::BitArrayLength { count: 12, .. })
    ));
    assert!(matches!(
        compile("bit flag;"),
        Err(SchemaError::BitArrayLength { count: 1, .. })
    ));
}

#[test]
fn test_error_unknown_type_and_syntax() {
    assert!(matches!(
        compile("float x;"),
        Err(SchemaError::UnknownType { .. })
    ));
    assert!(matches!(compile("u8 x"), Err(SchemaError::Syntax(_))));
    assert!(matches!(compile("struct { u8 a; } "), Err(SchemaError::Syntax(_))));
}

#[test]
fn test_error_overflow() {
    assert!(matches!(
        compile("#seekto 0xFFFFFFFFFFFFFFFF; u16 x;"),
        Err(SchemaError::Overflow { .. })
    ));
    assert!(matches!(
        compile("u32 x[0x4000000000000000];"),
        Err(SchemaError::Overflow { .. })
    ));
}

#[test]
fn test_sample_schema_compiles() {
    let source = std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/schemas/handheld.mem"))
        .expect("read schema");
    let layout = compile(&source).expect("compile");
    assert_eq!(layout.size(), 0x1000);
    assert_eq!(layout.locate("memory[127].step").unwrap().byte_offset, 0x0810 - 1);
    assert_eq!(layout.locate("names[1].name").unwrap().byte_offset, 0x0818);
    assert_eq!(layout.locate("bank_a").unwrap().byte_offset, 0x0C20);
}
