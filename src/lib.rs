//! # radiomem: radio memory overlays and clone sessions
//!
//! Two pieces shared by every radio driver:
//!
//! - a small schema language, compiled with a PEST grammar into an
//!   offset-resolved [`Layout`], plus typed [`FieldView`]s over a
//!   [`ByteImage`] (integers, BCD, bit groups, char arrays, nested structs);
//! - a [`CloneSession`] state machine that puts a radio into programming
//!   mode over any [`Transport`], checks its identity and moves the image
//!   in checksummed blocks.
//!
//! ## Schema language
//!
//! - Integers: `u8 u16 u24 u32` (big-endian), `ul16 ul24 ul32` (little-endian),
//!   `i8 .. i32`, `il16 .. il32`
//! - `lbcd` / `bbcd`: two decimal digits per byte, least / most significant pair first
//! - `char name[n]`: fixed-length text
//! - `bit name[n]` / `lbit name[n]`: packed flags, MSB / LSB first
//! - Bit groups: `u8 a:1, b:3, c:4;` (first member takes the high bits)
//! - Structs: `struct name { ... };`, `struct name var[n];`, `struct { ... } var;`
//! - Directives: `#seekto 0x100;`, `#seek 4;`, `#printoffset "label";`
//!
//! ## Example schema
//!
//! ```text
//! #seekto 0x0010;
//! struct {
//!   lbcd rxfreq[4];
//!   lbcd txfreq[4];
//!   ul16 rxtone;
//!   u8 unknown:2,
//!      power:2,
//!      wide:1,
//!      scan:1,
//!      bcl:2;
//!   char name[7];
//! } memory[128];
//! ```
//!
//! ## Usage
//!
//! ```
//! use radiomem::{compile, ByteImage};
//!
//! let layout = compile("#seekto 0x10; struct { u8 a:4, b:4; } x;").unwrap();
//! let mut image = ByteImage::new(layout.size());
//! image.write(0x10, &[0x3C]).unwrap();
//!
//! let mut root = layout.bind(&mut image).unwrap();
//! assert_eq!(root.view().at("x.a").unwrap().get_int().unwrap(), 3);
//! root.view_mut().at("x.b").unwrap().set(5).unwrap();
//! assert_eq!(image.byte(0x10).unwrap(), 0x35);
//! ```
//!
//! See `tests/integration.rs` for a full download, edit and upload cycle.

pub mod ast;
pub mod dump;
pub mod image;
pub mod layout;
pub mod mock;
pub mod parser;
pub mod profile;
pub mod session;
pub mod transport;
pub mod value;
pub mod view;

pub use dump::{dump_view, format_layout};
pub use image::{hexdump, ByteImage, RangeError};
pub use layout::{
    compile, compile_schema, BcdOrder, BitOrder, Endianness, Field, FieldKind, IntType, Layout,
    Location, SchemaError, StructLayout,
};
pub use mock::MockTransport;
pub use parser::parse;
pub use profile::{AddressRange, Checksum, CloneProfile, FrameFormat, HandshakeConfig, LinkConfig, ProfileError};
pub use session::{with_session, CloneError, CloneSession, LinkHint, ProtocolError, SessionState};
#[cfg(feature = "serial")]
pub use transport::SerialTransport;
pub use transport::{Transport, TransportError};
pub use value::Value;
pub use view::{bind_path, CharPolicy, FieldView, ViewError};
