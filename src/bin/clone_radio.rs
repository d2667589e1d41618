//! Download (or upload) a radio's memory image over a serial port.
//!
//! Usage:
//!   clone_radio PORT PROFILE.toml IMAGE.img [--upload] [--baud N]
//!
//! The profile describes the radio's handshake and block format (see
//! `radiomem::profile`). Without `--upload` the image is read from the radio
//! and written to IMAGE.img; with it, IMAGE.img is sent to the radio.

use anyhow::{bail, Context};
use radiomem::{with_session, ByteImage, CloneProfile, CloneSession, LinkHint, SerialTransport};
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let upload = if let Some(pos) = args.iter().position(|a| a == "--upload") {
        args.remove(pos);
        true
    } else {
        false
    };
    let mut hint = LinkHint::default();
    if let Some(pos) = args.iter().position(|a| a == "--baud") {
        args.remove(pos);
        if pos >= args.len() {
            bail!("--baud needs a value");
        }
        let value = args.remove(pos);
        hint.baud_rate = Some(value.parse().with_context(|| format!("invalid baud rate {}", value))?);
    }
    if args.len() != 3 {
        eprintln!("Usage: clone_radio PORT PROFILE.toml IMAGE.img [--upload] [--baud N]");
        std::process::exit(2);
    }
    let (port, profile_path, image_path) = (&args[0], &args[1], &args[2]);

    let profile = CloneProfile::from_toml_file(profile_path)
        .with_context(|| format!("loading profile {}", profile_path))?;
    let first_baud = hint
        .baud_rate
        .or_else(|| profile.link.baud_rates.first().copied())
        .unwrap_or(9600);
    let timeout = Duration::from_millis(profile.link.timeout_ms);
    let transport = SerialTransport::open(port, first_baud, timeout)?;

    let ranges = profile.transfer_ranges();
    let accepted = profile.handshake.accepted_idents.clone();
    let memory_size = profile.memory_size;
    let mut session = CloneSession::new(transport, profile);
    session.on_progress(|done, total| {
        eprint!("\r{:6}/{:6} bytes", done, total);
        if done == total {
            eprintln!();
        }
    });

    if upload {
        let image = ByteImage::load(image_path).with_context(|| format!("reading {}", image_path))?;
        if image.len() != memory_size {
            bail!("image is {} bytes, radio memory is {} bytes", image.len(), memory_size);
        }
        with_session(&mut session, &mut hint, &accepted, |s| s.upload_ranges(&image, &ranges))?;
        log::info!("uploaded {} to {}", image_path, port);
    } else {
        let image = with_session(&mut session, &mut hint, &accepted, |s| {
            let mut image = ByteImage::filled(memory_size, 0xFF);
            s.download_ranges(&mut image, &ranges)?;
            Ok(image)
        })?;
        image.save(image_path).with_context(|| format!("writing {}", image_path))?;
        log::info!("saved {} bytes to {}", image.len(), image_path);
    }
    if let Some(baud) = hint.baud_rate {
        log::info!("radio answered at {} baud", baud);
    }
    Ok(())
}
