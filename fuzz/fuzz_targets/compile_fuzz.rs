//! Schema compiler fuzz target: feed arbitrary text to `compile`.
//! The compiler must not panic; it returns a Layout or a SchemaError.
//! Any layout it accepts must bind to an image of its size.
//! Build with: cargo fuzz run compile_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    if let Ok(layout) = radiomem::compile(s) {
        if layout.size() <= 1 << 20 {
            let image = radiomem::ByteImage::new(layout.size());
            let view = layout.bind(&image).expect("image of layout size binds");
            let _ = view.get();
        }
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run compile_fuzz");
}
