//! Field view tests: integer, BCD, bit group, char and struct semantics over a ByteImage.

use radiomem::{bind_path, compile, ByteImage, CharPolicy, Layout, Value, ViewError};

/// Small deterministic generator so round-trip tests cover many images.
struct Lcg(u64);

impl Lcg {
    fn next_u8(&mut self) -> u8 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) as u8
    }

    fn fill(&mut self, len: usize) -> Vec<u8> {
        (0..len).map(|_| self.next_u8()).collect()
    }
}

const MIXED: &str = r#"
struct {
  u8 a;
  u16 b;
  ul16 c;
  u24 d;
  ul32 e;
  i8 f;
  il16 g;
  i32 h;
  u8 hi:3, mid:2, lo:3;
  ul16 x:5, y:11;
  bit flags[16];
  lbit lflags[8];
  char initial;
  char tag[5];
} rec[4];
"#;

#[test]
fn test_scenario_bit_group_in_struct() {
    let layout = compile("#seekto 0x10; struct { u8 a:4, b:4; } x;").expect("compile");
    let mut image = ByteImage::new(0x11);
    image.write(0x10, &[0x3C]).unwrap();

    let mut root = layout.bind(&mut image).expect("bind");
    assert_eq!(root.view().at("x.a").unwrap().get_int().unwrap(), 3);
    assert_eq!(root.view().at("x.b").unwrap().get_int().unwrap(), 12);

    root.view_mut().at("x.b").unwrap().set(5).unwrap();
    assert_eq!(root.view().at("x.a").unwrap().get_int().unwrap(), 3);
    assert_eq!(image.byte(0x10).unwrap(), 0x35);
}

#[test]
fn test_scenario_lbcd_array() {
    let layout = compile("lbcd field[2];").expect("compile");
    let mut image = ByteImage::from_bytes(vec![0x34, 0x12]);
    let mut field = bind_path(&layout, "field", &mut image).expect("bind");
    assert_eq!(field.get_int().unwrap(), 1234);

    field.set(56).unwrap();
    assert_eq!(image.as_bytes(), &[0x56, 0x00]);
}

#[test]
fn test_bbcd_is_most_significant_first() {
    let layout = compile("bbcd freq[4];").expect("compile");
    let mut image = ByteImage::new(4);
    let mut freq = layout.bind(&mut image).unwrap().field("freq").unwrap();
    freq.set(14_652_000).unwrap();
    assert_eq!(image.as_bytes(), &[0x14, 0x65, 0x20, 0x00]);
}

#[test]
fn test_bcd_rejects_values_beyond_digit_budget() {
    let layout = compile("lbcd f[2]; lbcd one;").expect("compile");
    let mut image = ByteImage::new(3);
    let mut root = layout.bind(&mut image).unwrap();
    root.view_mut().field("f").unwrap().set(9999).unwrap();
    match root.view_mut().field("f").unwrap().set(10_000) {
        Err(ViewError::ValueOutOfRange { value: 10_000, max: 9999, .. }) => {}
        other => panic!("expected out of range, got {:?}", other),
    }
    assert!(root.view_mut().field("f").unwrap().set(-1).is_err());
    assert!(root.view_mut().field("one").unwrap().set(100).is_err());
    root.view_mut().field("one").unwrap().set(42).unwrap();
    assert_eq!(image.as_bytes(), &[0x99, 0x99, 0x42]);
}

#[test]
fn test_bcd_rejects_invalid_nibbles() {
    let layout = compile("lbcd f[2]; lbcd g[2];").expect("compile");
    let image = ByteImage::from_bytes(vec![0x12, 0x3A, 0xF0, 0x00]);
    let root = layout.bind(&image).unwrap();
    assert_eq!(
        root.view().field("f").unwrap().get(),
        Err(ViewError::InvalidBcd { offset: 1, byte: 0x3A })
    );
    assert_eq!(
        root.view().field("g").unwrap().get(),
        Err(ViewError::InvalidBcd { offset: 2, byte: 0xF0 })
    );
    // Single elements decode as two-digit numbers.
    assert_eq!(root.view().at("f[0]").unwrap().get_int().unwrap(), 12);
}

#[test]
fn test_integer_encodings() {
    let layout = compile(MIXED).expect("compile");
    let mut image = ByteImage::new(layout.size());
    {
        let mut rec = layout.bind(&mut image).unwrap().at("rec[1]").unwrap();
        rec.view_mut().field("b").unwrap().set(0x1234).unwrap();
        rec.view_mut().field("c").unwrap().set(0x1234).unwrap();
        rec.view_mut().field("d").unwrap().set(0xABCDEF).unwrap();
        rec.view_mut().field("e").unwrap().set(0x01020304).unwrap();
        rec.view_mut().field("f").unwrap().set(-2).unwrap();
        rec.view_mut().field("g").unwrap().set(-300).unwrap();
        rec.view_mut().field("h").unwrap().set(i32::MIN).unwrap();
    }
    let stride = layout.root().field("rec").unwrap().stride;
    let bytes = image.read(stride, 1 + 2 + 2 + 3 + 4 + 1 + 2 + 4).unwrap();
    assert_eq!(
        bytes,
        &[
            0x00, 0x12, 0x34, 0x34, 0x12, 0xAB, 0xCD, 0xEF, 0x04, 0x03, 0x02, 0x01, 0xFE, 0xD4, 0xFE,
            0x80, 0x00, 0x00, 0x00
        ]
    );

    let rec = layout.bind(&image).unwrap().at("rec[1]").unwrap();
    assert_eq!(rec.view().field("f").unwrap().get_int().unwrap(), -2);
    assert_eq!(rec.view().field("g").unwrap().get_int().unwrap(), -300);
    assert_eq!(rec.view().field("h").unwrap().get_int().unwrap(), i32::MIN as i64);
}

#[test]
fn test_integer_set_out_of_range_fails() {
    let layout = compile("u8 a; i8 b; u16 c:12, d:4;").expect("compile");
    let mut image = ByteImage::new(layout.size());
    let mut root = layout.bind(&mut image).unwrap();
    assert!(matches!(
        root.view_mut().field("a").unwrap().set(256),
        Err(ViewError::ValueOutOfRange { min: 0, max: 255, .. })
    ));
    assert!(root.view_mut().field("b").unwrap().set(-129).is_err());
    assert!(root.view_mut().field("b").unwrap().set(128).is_err());
    assert!(matches!(
        root.view_mut().field("d").unwrap().set(16),
        Err(ViewError::ValueOutOfRange { max: 15, .. })
    ));
    assert!(root.view_mut().field("a").unwrap().set("text").is_err());
    assert_eq!(image.as_bytes(), &[0, 0, 0, 0]);
}

#[test]
fn test_bit_group_isolation() {
    let layout = compile("u8 hi:3, mid:2, lo:3; ul16 x:5, y:11;").expect("compile");
    let members = [("hi", 7), ("mid", 3), ("lo", 7), ("x", 31), ("y", 2047)];
    let mut rng = Lcg(7);
    for _ in 0..200 {
        let mut image = ByteImage::from_bytes(rng.fill(layout.size()));
        let mut root = layout.bind(&mut image).unwrap();
        for &(m1, max) in &members {
            let before: Vec<i64> = members
                .iter()
                .map(|(m, _)| root.view().field(m).unwrap().get_int().unwrap())
                .collect();
            let v = rng.next_u8() as i64 % (max + 1);
            root.view_mut().field(m1).unwrap().set(v).unwrap();
            for (i, &(m2, _)) in members.iter().enumerate() {
                let now = root.view().field(m2).unwrap().get_int().unwrap();
                if m2 == m1 {
                    assert_eq!(now, v);
                } else {
                    assert_eq!(now, before[i], "{} changed when setting {}", m2, m1);
                }
            }
        }
    }
}

#[test]
fn test_set_get_round_trip_on_random_images() {
    let layout = compile(MIXED).expect("compile");
    let mut rng = Lcg(0x5EED);
    for _ in 0..50 {
        let original = ByteImage::from_bytes(rng.fill(layout.size()));
        let mut image = original.clone();
        let value = layout.bind(&image).unwrap().get().expect("get");
        layout.bind(&mut image).unwrap().set(value.clone()).expect("set");
        assert_eq!(image, original);
        assert_eq!(layout.bind(&image).unwrap().get().unwrap(), value);
    }
}

#[test]
fn test_get_after_set_returns_value() {
    let layout = compile("u24 a; il16 b; lbcd c[3]; char d[5]; u8 e:1, f:7; lbit g[8];").expect("compile");
    let mut rng = Lcg(99);
    let mut image = ByteImage::from_bytes(rng.fill(layout.size()));
    let mut root = layout.bind(&mut image).unwrap();
    let cases: Vec<(&str, Value)> = vec![
        ("a", Value::Int(0xFFFFFF)),
        ("b", Value::Int(-32768)),
        ("c", Value::Int(123456)),
        ("d", Value::from("HELLO")),
        ("d", Value::from("HI")),
        ("f", Value::Int(100)),
        ("g[5]", Value::Int(1)),
    ];
    for (path, value) in cases {
        root.view_mut().at(path).unwrap().set(value.clone()).unwrap();
        assert_eq!(root.view().at(path).unwrap().get().unwrap(), value, "{}", path);
    }
}

#[test]
fn test_array_index_bounds() {
    let layout = compile("u16 words[4]; struct { u8 v; } recs[2]; u8 tail;").expect("compile");
    let image = ByteImage::filled(layout.size(), 0xAA);
    let root = layout.bind(&image).unwrap();
    assert!(root.view().at("words[3]").is_ok());
    assert_eq!(
        root.view().at("words[4]").unwrap_err(),
        ViewError::Index { field: "words".to_string(), index: 4, len: 4 }
    );
    assert!(matches!(root.view().at("recs[2].v"), Err(ViewError::Index { index: 2, .. })));
    assert!(matches!(root.view().at("tail[0]"), Err(ViewError::NotA { .. })));
    assert!(matches!(root.view().at("words.v"), Err(ViewError::NotA { .. })));
    assert!(matches!(
        root.view().at("nope"),
        Err(ViewError::UnknownField { .. })
    ));
    assert!(matches!(root.view().at("words[x]"), Err(ViewError::InvalidPath(_))));
}

#[test]
fn test_char_policy() {
    let layout = compile("char name[6];").expect("compile");
    let mut image = ByteImage::from_bytes(b"AB\x01C\xFF\xFF".to_vec());
    let mut name = layout.bind(&mut image).unwrap().field("name").unwrap();
    assert_eq!(name.get_str().unwrap(), "AB C");

    let dotted = CharPolicy {
        replacement: '.',
        ..CharPolicy::default()
    };
    assert_eq!(name.get_text(&dotted).unwrap(), "AB.C");

    name.set("XY").unwrap();
    assert_eq!(image.as_bytes(), b"XY\xFF\xFF\xFF\xFF");

    let mut name = layout.bind(&mut image).unwrap().field("name").unwrap();
    name.set_text("LONGER NAME", &CharPolicy::padded_with(b' ')).unwrap();
    assert_eq!(image.as_bytes(), b"LONGER");

    let mut name = layout.bind(&mut image).unwrap().field("name").unwrap();
    name.set_text("ab", &CharPolicy::padded_with(0x00)).unwrap();
    assert_eq!(name.get_text(&CharPolicy::padded_with(0x00)).unwrap(), "ab");
    assert!(matches!(name.set("\u{263A}"), Err(ViewError::InvalidValue { .. })));
}

#[test]
fn test_char_write_back_keeps_existing_bytes() {
    let layout = compile("char name[6]; char mark;").expect("compile");
    let original = ByteImage::from_bytes(b"ABC\x00\x00\x00\x01".to_vec());
    let mut image = original.clone();
    let value = layout.bind(&image).unwrap().get().expect("get");
    assert_eq!(
        value,
        Value::Struct(vec![
            ("name".to_string(), Value::from("ABC")),
            ("mark".to_string(), Value::from(" ")),
        ])
    );
    layout.bind(&mut image).unwrap().set(value).expect("set");
    assert_eq!(image, original);

    // Shorter text pads with the fill byte already in use.
    let mut root = layout.bind(&mut image).unwrap();
    root.view_mut().field("name").unwrap().set("AB").unwrap();
    assert_eq!(image.read(0, 6).unwrap(), b"AB\x00\x00\x00\x00");

    // Non-printable bytes inside the text survive a write of the same text.
    let mut image = ByteImage::from_bytes(b"A\x01B\xFF\xFF\xFF\x41".to_vec());
    let mut root = layout.bind(&mut image).unwrap();
    assert_eq!(root.view().field("name").unwrap().get_str().unwrap(), "A B");
    root.view_mut().field("name").unwrap().set("A B").unwrap();
    root.view_mut().field("mark").unwrap().set("A").unwrap();
    assert_eq!(image.as_bytes(), b"A\x01B\xFF\xFF\xFF\x41");

    // A trailing space is written, not left as a fill byte that reads back trimmed.
    let mut image = ByteImage::from_bytes(b"XY\x00\x00\x00\x00\x00".to_vec());
    let mut root = layout.bind(&mut image).unwrap();
    root.view_mut().field("name").unwrap().set("AB ").unwrap();
    assert_eq!(root.view().field("name").unwrap().get_str().unwrap(), "AB ");
    root.view_mut().field("mark").unwrap().set(" ").unwrap();
    assert_eq!(image.as_bytes(), b"AB \x00\x00\x00\x00");
}

#[test]
fn test_single_char_is_filtered() {
    let layout = compile("char c; char s[3];").expect("compile");
    let image = ByteImage::from_bytes(vec![0x01, b'a', 0x7F, 0xFF]);
    let root = layout.bind(&image).unwrap();
    assert_eq!(root.view().field("c").unwrap().get_str().unwrap(), " ");
    assert_eq!(root.view().at("s[0]").unwrap().get_str().unwrap(), "a");
    assert_eq!(root.view().at("s[1]").unwrap().get_str().unwrap(), " ");
    assert_eq!(root.view().field("s").unwrap().get_str().unwrap(), "a ");
}

#[test]
fn test_struct_values() {
    let layout = compile("struct { u8 a; char n[2]; u8 b:4, c:4; } s[2];").expect("compile");
    let mut image = ByteImage::new(layout.size());
    let mut root = layout.bind(&mut image).unwrap();
    root.view_mut()
        .at("s[1]")
        .unwrap()
        .set(Value::Struct(vec![
            ("a".to_string(), Value::Int(9)),
            ("c".to_string(), Value::Int(3)),
        ]))
        .unwrap();
    let s1 = root.view().at("s[1]").unwrap().get().unwrap();
    assert_eq!(s1.member("a"), Some(&Value::Int(9)));
    assert_eq!(s1.member("c"), Some(&Value::Int(3)));
    assert_eq!(s1.member("b"), Some(&Value::Int(0)));

    let all = root.view().field("s").unwrap().get().unwrap();
    assert_eq!(all.as_list().map(|l| l.len()), Some(2));
    assert_eq!(image.as_bytes(), &[0, 0, 0, 0, 9, 0, 0, 3]);
}

#[test]
fn test_list_values_need_matching_length() {
    let layout = compile("u8 bytes[3];").expect("compile");
    let mut image = ByteImage::new(3);
    let mut bytes = layout.bind(&mut image).unwrap().field("bytes").unwrap();
    bytes.set(vec![Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap();
    assert!(matches!(
        bytes.set(vec![Value::Int(1)]),
        Err(ViewError::LengthMismatch { expected: 3, actual: 1, .. })
    ));
    assert_eq!(bytes.len(), 3);
    assert_eq!(image.as_bytes(), &[1, 2, 3]);
}

#[test]
fn test_raw_access() {
    let layout = compile("u8 head; struct { u16 a; u8 b; } body; u8 tail;").expect("compile");
    let mut image = ByteImage::new(layout.size());
    let mut root = layout.bind(&mut image).unwrap();
    root.view_mut().field("body").unwrap().set_raw(&[1, 2, 3]).unwrap();
    assert_eq!(root.view().at("body.a").unwrap().get_int().unwrap(), 0x0102);
    assert!(matches!(
        root.view_mut().field("body").unwrap().set_raw(&[1, 2]),
        Err(ViewError::LengthMismatch { expected: 3, actual: 2, .. })
    ));
    root.view_mut().field("tail").unwrap().fill_raw(0xFF).unwrap();
    assert_eq!(root.view().field("body").unwrap().get_raw().unwrap(), vec![1, 2, 3]);
    assert_eq!(image.as_bytes(), &[0, 1, 2, 3, 0xFF]);
}

#[test]
fn test_direct_bit_manipulation() {
    let layout = compile("u8 flags; u16 word; u8 a:4, b:4;").expect("compile");
    let mut image = ByteImage::new(layout.size());
    let mut root = layout.bind(&mut image).unwrap();

    let mut flags = root.view_mut().field("flags").unwrap();
    flags.set_bits(0x81).unwrap();
    flags.clr_bits(0x01).unwrap();
    assert_eq!(flags.get_bits(0xFF).unwrap(), 0x80);
    assert!(flags.set_bits(0x100).is_err());

    root.view_mut().field("word").unwrap().set_bits(0x0102).unwrap();
    // Bit group members expose their whole container.
    root.view_mut().field("b").unwrap().set_bits(0xF0).unwrap();
    assert_eq!(root.view().field("a").unwrap().get_int().unwrap(), 0xF);
    assert_eq!(image.as_bytes(), &[0x80, 0x01, 0x02, 0xF0]);
}

#[test]
fn test_bit_arrays_packed_order() {
    let layout = compile("bit msb[8]; lbit lsb[8];").expect("compile");
    let mut image = ByteImage::new(2);
    let mut root = layout.bind(&mut image).unwrap();
    root.view_mut().at("msb[0]").unwrap().set(1).unwrap();
    root.view_mut().at("lsb[0]").unwrap().set(1).unwrap();
    root.view_mut().at("lsb[7]").unwrap().set(true).unwrap();
    assert!(root.view_mut().at("msb[1]").unwrap().set(2).is_err());
    assert_eq!(root.view().at("msb[0]").unwrap().get_int().unwrap(), 1);
    assert_eq!(root.view().at("msb[7]").unwrap().get_int().unwrap(), 0);
    assert_eq!(image.as_bytes(), &[0x80, 0x81]);
}

#[test]
fn test_bind_requires_full_image() {
    let layout = compile("#seekto 0x10; u8 x;").expect("compile");
    let image = ByteImage::new(0x10);
    assert!(matches!(
        layout.bind(&image),
        Err(ViewError::ImageTooSmall { required: 0x11, actual: 0x10 })
    ));
}

#[test]
fn test_one_layout_many_images() {
    let layout: Layout = compile("u16 id;").expect("compile");
    let a = ByteImage::from_bytes(vec![0x00, 0x01]);
    let b = ByteImage::from_bytes(vec![0x00, 0x02]);
    let va = layout.bind(&a).unwrap().field("id").unwrap();
    let vb = layout.bind(&b).unwrap().field("id").unwrap();
    assert_eq!(va.get_int().unwrap(), 1);
    assert_eq!(vb.get_int().unwrap(), 2);
    assert_eq!(va.offset(), vb.offset());
}
