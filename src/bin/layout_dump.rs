//! Compile a memory schema and print its layout, or decode an image with it.
//!
//! Usage:
//!   layout_dump SCHEMA [IMAGE] [PATH]
//!
//! With only SCHEMA, prints every field's offset and kind. With IMAGE, binds
//! the image and prints the decoded value tree, starting at PATH when given
//! (e.g. `memory[3]`).
//!
//! Options:
//!   --hex, -x    Also print a hexdump of the selected region

use anyhow::Context;
use radiomem::{bind_path, compile, dump_view, format_layout, ByteImage};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let hex = if let Some(pos) = args.iter().position(|a| a == "--hex" || a == "-x") {
        args.remove(pos);
        true
    } else {
        false
    };
    if args.is_empty() || args.len() > 3 {
        eprintln!("Usage: layout_dump [--hex] SCHEMA [IMAGE] [PATH]");
        std::process::exit(2);
    }

    let schema_path = &args[0];
    let source = std::fs::read_to_string(schema_path)
        .with_context(|| format!("reading schema {}", schema_path))?;
    let layout = compile(&source).with_context(|| format!("compiling {}", schema_path))?;

    let image_path = match args.get(1) {
        Some(p) => p,
        None => {
            print!("{}", format_layout(&layout));
            return Ok(());
        }
    };
    let image = ByteImage::load(image_path).with_context(|| format!("reading image {}", image_path))?;
    if image.len() != layout.size() {
        log::warn!(
            "image is {} bytes, layout covers {} bytes",
            image.len(),
            layout.size()
        );
    }

    let path = args.get(2).map(String::as_str).unwrap_or("");
    let view = bind_path(&layout, path, &image)?;
    print!("{}", dump_view(&view));
    if hex {
        let loc = view.location();
        let len = view.get_raw()?.len();
        println!();
        print!("{}", image.hexdump(loc.byte_offset, len)?);
    }
    Ok(())
}
