//! Clone session: programming-mode handshake, identity check and block
//! transfer against a [`Transport`].
//!
//! ```text
//! Idle -> Handshaking -> Identifying -> Transferring -> Finalizing -> Closed
//!            \______________\________________\______________\-----> Failed
//! ```
//!
//! Any protocol violation or transport failure moves the session to
//! `Failed`, which is terminal: nothing is retried, and every later call
//! returns an error. A new session must be built to try again.
//!
//! Link tuning discovered during the handshake (baud rate, command
//! delimiter) is returned to the caller as a [`LinkHint`] and can be fed to
//! the next session so it tries the known-good setting first.

use crate::image::{hexdump, ByteImage, RangeError};
use crate::profile::CloneProfile;
use crate::transport::{Transport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Handshaking,
    Identifying,
    Transferring,
    Finalizing,
    Closed,
    Failed,
}

/// The radio answered something the protocol does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("handshake refused: expected {expected:02X?}, got {actual:02X?}")]
    HandshakeRefused { expected: Vec<u8>, actual: Vec<u8> },
    #[error("unsupported model: ident {ident:02X?}")]
    UnsupportedModel { ident: Vec<u8> },
    #[error("unexpected reply opcode 0x{actual:02X} (expected 0x{expected:02X})")]
    HeaderMismatch { expected: u8, actual: u8 },
    #[error("reply for address 0x{actual:04X}, requested 0x{expected:04X}")]
    AddressMismatch { expected: u32, actual: u32 },
    #[error("block 0x{address:04X}: requested {requested} bytes, reply declares {received}")]
    LengthMismatch {
        address: u32,
        requested: usize,
        received: usize,
    },
    #[error("block 0x{address:04X}: checksum 0x{actual:02X}, expected 0x{expected:02X}")]
    Checksum { address: u32, expected: u8, actual: u8 },
    #[error("block 0x{address:04X}: radio answered 0x{byte:02X} instead of ack")]
    Nak { address: u32, byte: u8 },
    #[error("echo mismatch: sent {sent:02X?}, echoed {echoed:02X?}")]
    EchoMismatch { sent: Vec<u8>, echoed: Vec<u8> },
    #[error("end of session refused: expected {expected:02X?}, got {actual:02X?}")]
    EndRefused { expected: Vec<u8>, actual: Vec<u8> },
}

#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("session already failed: {0}")]
    Failed(String),
    #[error("cannot {operation} in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("invalid request: {0}")]
    Config(String),
    #[error(transparent)]
    Range(#[from] RangeError),
}

/// Last known-good link settings; input and output of the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkHint {
    pub baud_rate: Option<u32>,
    pub delimiter: Option<Vec<u8>>,
}

type ProgressFn = Box<dyn FnMut(usize, usize)>;
type BlockFn = Box<dyn FnMut(u32, &[u8])>;

/// One programming-mode session with one radio. Not reentrant: drive it
/// from a single thread.
pub struct CloneSession<T: Transport> {
    transport: T,
    profile: CloneProfile,
    state: SessionState,
    delimiter: Vec<u8>,
    failure: Option<String>,
    end_sent: bool,
    on_progress: Option<ProgressFn>,
    on_block: Option<BlockFn>,
}

impl<T: Transport> CloneSession<T> {
    pub fn new(transport: T, profile: CloneProfile) -> Self {
        CloneSession {
            transport,
            profile,
            state: SessionState::Idle,
            delimiter: Vec::new(),
            failure: None,
            end_sent: false,
            on_progress: None,
            on_block: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn profile(&self) -> &CloneProfile {
        &self.profile
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Release the link; the session keeps no reference to any image.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Called with `(bytes done, bytes total)` after every block.
    pub fn on_progress(&mut self, f: impl FnMut(usize, usize) + 'static) {
        self.on_progress = Some(Box::new(f));
    }

    /// Called with `(address, data)` after every verified block.
    pub fn on_block(&mut self, f: impl FnMut(u32, &[u8]) + 'static) {
        self.on_block = Some(Box::new(f));
    }

    fn check(&self, operation: &'static str, allowed: &[SessionState]) -> Result<(), CloneError> {
        match self.state {
            SessionState::Failed => Err(CloneError::Failed(
                self.failure.clone().unwrap_or_else(|| "unknown cause".to_string()),
            )),
            s if allowed.contains(&s) => Ok(()),
            s => Err(CloneError::InvalidState {
                operation,
                state: s,
            }),
        }
    }

    fn fail(&mut self, err: CloneError) -> CloneError {
        log::warn!("clone session failed in state {:?}: {}", self.state, err);
        self.state = SessionState::Failed;
        self.failure = Some(err.to_string());
        err
    }

    fn guard<R>(&mut self, result: Result<R, CloneError>) -> Result<R, CloneError> {
        match result {
            Ok(v) => Ok(v),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), CloneError> {
        log::trace!("-> {} bytes\n{}", frame.len(), hexdump(frame).trim_end());
        self.transport.write(frame)?;
        if self.profile.link.echos_write {
            let echoed = self.transport.read_exact(frame.len())?;
            if echoed != frame {
                return Err(ProtocolError::EchoMismatch {
                    sent: frame.to_vec(),
                    echoed,
                }
                .into());
            }
        }
        Ok(())
    }

    fn recv(&mut self, n: usize) -> Result<Vec<u8>, CloneError> {
        let data = self.transport.read_exact(n)?;
        log::trace!("<- {} bytes\n{}", n, hexdump(&data).trim_end());
        Ok(data)
    }

    fn expect_ack(&mut self, address: u32) -> Result<(), CloneError> {
        let byte = self.recv(1)?[0];
        if byte != self.profile.frame.ack {
            return Err(ProtocolError::Nak { address, byte }.into());
        }
        Ok(())
    }

    fn with_delimiter(&self, command: &[u8]) -> Vec<u8> {
        let mut out = command.to_vec();
        out.extend_from_slice(&self.delimiter);
        out
    }

    /// `(baud, delimiter)` pairs to try, the hinted pair first.
    fn candidates(&self, hint: &LinkHint) -> Vec<(u32, Vec<u8>)> {
        fn hint_first<V: Clone + PartialEq>(hint: Option<&V>, all: &[V]) -> Vec<V> {
            let mut out: Vec<V> = hint.into_iter().cloned().collect();
            out.extend(all.iter().filter(|v| Some(*v) != hint).cloned());
            out
        }
        let bauds = hint_first(hint.baud_rate.as_ref(), &self.profile.link.baud_rates);
        let delimiters = hint_first(hint.delimiter.as_ref(), &self.profile.link.delimiters);
        delimiters
            .iter()
            .flat_map(|d| bauds.iter().map(move |&b| (b, d.clone())))
            .collect()
    }

    /// Put the radio into programming mode. Tries each link candidate once
    /// and returns the one that answered.
    pub fn start_session(&mut self, hint: &LinkHint) -> Result<LinkHint, CloneError> {
        self.check("start session", &[SessionState::Idle])?;
        self.profile
            .validate()
            .map_err(|e| CloneError::Config(e.to_string()))?;
        self.state = SessionState::Handshaking;
        log::info!("starting clone session for {}", self.profile.name);

        let mut last = None;
        for (baud, delimiter) in self.candidates(hint) {
            log::debug!("trying handshake at {} baud, delimiter {:02X?}", baud, delimiter);
            match self.handshake(baud, &delimiter) {
                Ok(()) => {
                    log::info!("radio answered at {} baud", baud);
                    self.delimiter = delimiter.clone();
                    return Ok(LinkHint {
                        baud_rate: Some(baud),
                        delimiter: Some(delimiter),
                    });
                }
                Err(CloneError::Transport(TransportError::Closed)) => {
                    last = Some(CloneError::Transport(TransportError::Closed));
                    break;
                }
                Err(e) => {
                    log::debug!("no handshake at {} baud: {}", baud, e);
                    last = Some(e);
                }
            }
        }
        let err = last.unwrap_or_else(|| CloneError::Config("no link candidates".to_string()));
        Err(self.fail(err))
    }

    fn handshake(&mut self, baud: u32, delimiter: &[u8]) -> Result<(), CloneError> {
        self.transport.set_baud_rate(baud)?;
        self.transport.discard_input()?;
        let mut wake = self.profile.handshake.wake.clone();
        if !wake.is_empty() {
            wake.extend_from_slice(delimiter);
            self.send(&wake)?;
        }
        let expected = self.profile.handshake.wake_ack.clone();
        if !expected.is_empty() {
            let actual = self.recv(expected.len())?;
            if actual != expected {
                return Err(ProtocolError::HandshakeRefused { expected, actual }.into());
            }
        }
        Ok(())
    }

    /// Ask the radio who it is and accept only idents in `accepted`.
    /// Profiles without an ident inquiry skip the exchange and return an
    /// empty ident.
    pub fn verify_identity(&mut self, accepted: &[Vec<u8>]) -> Result<Vec<u8>, CloneError> {
        self.check("verify identity", &[SessionState::Handshaking])?;
        let result = self.identify(accepted);
        let ident = self.guard(result)?;
        self.state = SessionState::Identifying;
        Ok(ident)
    }

    fn identify(&mut self, accepted: &[Vec<u8>]) -> Result<Vec<u8>, CloneError> {
        let handshake = self.profile.handshake.clone();
        if handshake.ident_command.is_empty() {
            log::info!("{} has no ident inquiry", self.profile.name);
            return Ok(Vec::new());
        }
        let command = self.with_delimiter(&handshake.ident_command);
        self.send(&command)?;
        let ident = self.recv(handshake.ident_length)?;
        if !accepted.contains(&ident) {
            return Err(ProtocolError::UnsupportedModel { ident }.into());
        }
        log::info!("radio ident {:02X?}", ident);
        if let Some(confirm) = &handshake.ident_confirm {
            self.send(confirm)?;
            self.expect_ack(0)?;
        }
        Ok(ident)
    }

    fn check_length(&self, len: usize) -> Result<(), CloneError> {
        let max = match self.profile.frame.length_width {
            0 => usize::MAX,
            w => (1usize << (8 * w)) - 1,
        };
        if len == 0 || len > max {
            return Err(CloneError::Config(format!(
                "block length {} outside 1..={}",
                len, max
            )));
        }
        Ok(())
    }

    /// Read one block. The reply header must echo the requested address
    /// and length, and the checksum must match; nothing is retried.
    pub fn read_block(&mut self, address: u32, len: usize) -> Result<Vec<u8>, CloneError> {
        self.check(
            "read block",
            &[SessionState::Identifying, SessionState::Transferring],
        )?;
        self.check_length(len)?;
        self.state = SessionState::Transferring;
        let result = self.read_frame(address, len);
        self.guard(result)
    }

    fn read_frame(&mut self, address: u32, len: usize) -> Result<Vec<u8>, CloneError> {
        let frame = self.profile.frame.clone();
        self.send(&frame.header(frame.read_command, address, len))?;

        let header = self.recv(frame.header_len())?;
        let (op, reply_address, reply_len) = frame.parse_header(&header);
        if op != frame.read_reply {
            return Err(ProtocolError::HeaderMismatch {
                expected: frame.read_reply,
                actual: op,
            }
            .into());
        }
        if reply_address != address {
            return Err(ProtocolError::AddressMismatch {
                expected: address,
                actual: reply_address,
            }
            .into());
        }
        if let Some(received) = reply_len.filter(|&n| n != len) {
            return Err(ProtocolError::LengthMismatch {
                address,
                requested: len,
                received,
            }
            .into());
        }

        let payload = self.recv(len)?;
        if let Some(expected) = frame.checksum.compute(&header, &payload) {
            let actual = self.recv(1)?[0];
            if actual != expected {
                return Err(ProtocolError::Checksum {
                    address,
                    expected,
                    actual,
                }
                .into());
            }
        }
        if frame.ack_reads {
            self.send(&[frame.ack])?;
        }
        log::debug!("read block 0x{:04X} ({} bytes)", address, len);
        Ok(payload)
    }

    /// Write one block and wait for the radio's ack byte.
    pub fn write_block(&mut self, address: u32, data: &[u8]) -> Result<(), CloneError> {
        self.check(
            "write block",
            &[SessionState::Identifying, SessionState::Transferring],
        )?;
        self.check_length(data.len())?;
        self.state = SessionState::Transferring;
        let result = self.write_frame(address, data);
        self.guard(result)
    }

    fn write_frame(&mut self, address: u32, data: &[u8]) -> Result<(), CloneError> {
        let frame = self.profile.frame.clone();
        let header = frame.header(frame.write_command, address, data.len());
        let mut out = header.clone();
        out.extend_from_slice(data);
        if let Some(checksum) = frame.checksum.compute(&header, data) {
            out.push(checksum);
        }
        self.send(&out)?;
        self.expect_ack(address)?;
        log::debug!("wrote block 0x{:04X} ({} bytes)", address, data.len());
        Ok(())
    }

    /// Leave programming mode. On a failed session the end command is
    /// still sent (once, without waiting for an answer) and the original
    /// failure is returned.
    pub fn end_session(&mut self) -> Result<(), CloneError> {
        match self.state {
            SessionState::Failed => {
                if !self.end_sent && !self.profile.handshake.end_command.is_empty() {
                    self.end_sent = true;
                    let command = self.with_delimiter(&self.profile.handshake.end_command);
                    if let Err(e) = self.transport.write(&command) {
                        log::warn!("end command after failure not sent: {}", e);
                    }
                }
                return self.check("end session", &[]);
            }
            SessionState::Handshaking | SessionState::Identifying | SessionState::Transferring => {}
            state => {
                return Err(CloneError::InvalidState {
                    operation: "end session",
                    state,
                })
            }
        }
        self.state = SessionState::Finalizing;
        let result = self.finish();
        self.guard(result)?;
        self.state = SessionState::Closed;
        log::info!("clone session closed");
        Ok(())
    }

    fn finish(&mut self) -> Result<(), CloneError> {
        let handshake = self.profile.handshake.clone();
        if !handshake.end_command.is_empty() {
            self.end_sent = true;
            let command = self.with_delimiter(&handshake.end_command);
            self.send(&command)?;
        }
        if !handshake.end_ack.is_empty() {
            let actual = self.recv(handshake.end_ack.len())?;
            if actual != handshake.end_ack {
                return Err(ProtocolError::EndRefused {
                    expected: handshake.end_ack,
                    actual,
                }
                .into());
            }
        }
        Ok(())
    }

    fn report(&mut self, address: u32, data: &[u8], done: usize, total: usize) {
        if let Some(f) = self.on_block.as_mut() {
            f(address, data);
        }
        if let Some(f) = self.on_progress.as_mut() {
            f(done, total);
        }
    }

    /// Read `size` bytes from address 0 into a new image.
    pub fn download(&mut self, size: usize) -> Result<ByteImage, CloneError> {
        let end = u32::try_from(size)
            .map_err(|_| CloneError::Config(format!("{} bytes exceed the address space", size)))?;
        let mut image = ByteImage::new(size);
        self.download_ranges(&mut image, &[(0, end)])?;
        Ok(image)
    }

    /// Read each `[start, end)` range into the same addresses of `image`.
    /// A block reaches the image only after it verified.
    pub fn download_ranges(&mut self, image: &mut ByteImage, ranges: &[(u32, u32)]) -> Result<(), CloneError> {
        self.check(
            "download",
            &[SessionState::Identifying, SessionState::Transferring],
        )?;
        let total = check_ranges(image.len(), ranges)?;
        log::info!("downloading {} bytes in {} range(s)", total, ranges.len());
        let mut done = 0;
        for &(start, end) in ranges {
            for (address, len) in blocks(start, end, self.profile.block_size) {
                let data = self.read_block(address, len)?;
                image.write(address as usize, &data)?;
                done += len;
                self.report(address, &data, done, total);
            }
        }
        Ok(())
    }

    /// Write the whole image starting at address 0.
    pub fn upload(&mut self, image: &ByteImage) -> Result<(), CloneError> {
        let end = u32::try_from(image.len()).map_err(|_| {
            CloneError::Config(format!("{} bytes exceed the address space", image.len()))
        })?;
        self.upload_ranges(image, &[(0, end)])
    }

    /// Write each `[start, end)` range of `image` to the same addresses.
    pub fn upload_ranges(&mut self, image: &ByteImage, ranges: &[(u32, u32)]) -> Result<(), CloneError> {
        self.check(
            "upload",
            &[SessionState::Identifying, SessionState::Transferring],
        )?;
        let total = check_ranges(image.len(), ranges)?;
        log::info!("uploading {} bytes in {} range(s)", total, ranges.len());
        let mut done = 0;
        for &(start, end) in ranges {
            for (address, len) in blocks(start, end, self.profile.block_size) {
                let data = image.read(address as usize, len)?;
                self.write_block(address, data)?;
                done += len;
                self.report(address, data, done, total);
            }
        }
        Ok(())
    }
}

/// Blocks of at most `block_size` bytes covering `[start, end)`; the last may be shorter.
fn blocks(start: u32, end: u32, block_size: usize) -> Vec<(u32, usize)> {
    let step = block_size.max(1) as u32;
    (start..end)
        .step_by(step as usize)
        .map(|a| (a, (end - a).min(step) as usize))
        .collect()
}

/// Total bytes in `ranges`, all of which must lie inside an image of `size` bytes.
fn check_ranges(size: usize, ranges: &[(u32, u32)]) -> Result<usize, CloneError> {
    let mut total = 0;
    for &(start, end) in ranges {
        if start > end {
            return Err(CloneError::Config(format!(
                "range 0x{:04X}..0x{:04X} ends before it starts",
                start, end
            )));
        }
        if end as usize > size {
            return Err(RangeError {
                offset: start as usize,
                length: (end - start) as usize,
                size,
            }
            .into());
        }
        total += (end - start) as usize;
    }
    Ok(total)
}

/// Run `body` inside a session: handshake, identity check, body, then
/// `end_session` exactly once whatever the body returned. `hint` is updated
/// with the link settings that worked. The body's error takes precedence
/// over an error while closing.
pub fn with_session<T, R, F>(
    session: &mut CloneSession<T>,
    hint: &mut LinkHint,
    accepted: &[Vec<u8>],
    body: F,
) -> Result<R, CloneError>
where
    T: Transport,
    F: FnOnce(&mut CloneSession<T>) -> Result<R, CloneError>,
{
    *hint = session.start_session(hint)?;
    let result = session.verify_identity(accepted).and_then(|_| body(session));
    let closed = match session.state() {
        SessionState::Closed => Ok(()),
        _ => session.end_session(),
    };
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close)) => {
            log::warn!("ending the session also failed: {}", close);
            Err(e)
        }
    }
}
