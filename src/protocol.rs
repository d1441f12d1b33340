//! Wire framing for the device serial protocol.
//!
//! The device emits a mixed stream of newline-terminated ASCII lines and
//! binary audio frames. A binary frame begins with a fixed 12-byte header:
//! magic (4 bytes, little-endian `AUD0`), version (1), frame type (1),
//! reserved (2, zero), payload length (4, little-endian). The reader scans
//! byte-by-byte, aligning on the magic value or accumulating a line until
//! the next newline.

use bytes::{Buf, BytesMut};

pub const MAGIC: u32 = 0x3044_4155; // ASCII "AUD0" little-endian
pub const VERSION: u8 = 1;
pub const FRAME_TYPE_AUDIO: u8 = 1;
pub const HEADER_LEN: usize = 12;
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;

/// Approximate size of a paced outbound playback chunk.
pub const PLAYBACK_CHUNK_BYTES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundItem {
    Audio(Vec<u8>),
    Line(String),
}

/// Incremental frame/line demultiplexer over an inbound byte stream.
///
/// Feed it bytes as they arrive (from any number of underlying reads, split
/// arbitrarily); it yields complete `InboundItem`s as soon as they're known,
/// and resynchronizes silently on a header magic mismatch or malformed
/// payload length. Each resynchronization event is counted so the caller can
/// decide whether to log a `framing_error`.
#[derive(Default)]
pub struct Demuxer {
    buf: BytesMut,
    framing_errors: usize,
}

enum ScanOutcome {
    Item(InboundItem),
    NeedMore,
}

impl Demuxer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            framing_errors: 0,
        }
    }

    pub fn framing_errors(&self) -> usize {
        self.framing_errors
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pull as many complete items as are currently available.
    pub fn drain_items(&mut self) -> Vec<InboundItem> {
        let mut items = Vec::new();
        loop {
            match self.scan_once() {
                Some(ScanOutcome::Item(item)) => items.push(item),
                Some(ScanOutcome::NeedMore) | None => break,
            }
        }
        items
    }

    fn scan_once(&mut self) -> Option<ScanOutcome> {
        if self.buf.is_empty() {
            return None;
        }

        if let Some(magic_at) = find_magic(&self.buf) {
            if magic_at > 0 {
                // Bytes before the magic are either a line fragment or junk;
                // if they contain a newline, emit the line(s) first.
                if let Some(nl) = self.buf[..magic_at].iter().position(|&b| b == b'\n') {
                    let line_bytes = self.buf.split_to(nl + 1);
                    let text = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1])
                        .trim_end_matches('\r')
                        .to_string();
                    return Some(ScanOutcome::Item(InboundItem::Line(text)));
                }
                let discarded = self.buf.split_to(magic_at);
                self.framing_errors += 1;
                tracing::warn!(discarded = discarded.len(), "framing error: junk before magic");
                return Some(ScanOutcome::NeedMore);
            }

            if self.buf.len() < HEADER_LEN {
                return Some(ScanOutcome::NeedMore);
            }

            let version = self.buf[4];
            let frame_type = self.buf[5];
            let payload_len = u32::from_le_bytes([self.buf[8], self.buf[9], self.buf[10], self.buf[11]]) as usize;

            if version != VERSION || frame_type != FRAME_TYPE_AUDIO {
                self.buf.advance(4); // step past this magic, keep scanning
                self.framing_errors += 1;
                tracing::warn!(version, frame_type, "framing error: bad header fields");
                return Some(ScanOutcome::NeedMore);
            }

            if payload_len == 0 || payload_len > MAX_PAYLOAD_LEN {
                self.buf.advance(4);
                self.framing_errors += 1;
                tracing::warn!(payload_len, "framing error: malformed payload length");
                return Some(ScanOutcome::NeedMore);
            }

            if self.buf.len() < HEADER_LEN + payload_len {
                return Some(ScanOutcome::NeedMore);
            }

            self.buf.advance(HEADER_LEN);
            let payload = self.buf.split_to(payload_len).to_vec();
            return Some(ScanOutcome::Item(InboundItem::Audio(payload)));
        }

        if let Some(nl) = self.buf.iter().position(|&b| b == b'\n') {
            let line_bytes = self.buf.split_to(nl + 1);
            let text = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1])
                .trim_end_matches('\r')
                .to_string();
            return Some(ScanOutcome::Item(InboundItem::Line(text)));
        }

        // Keep an unterminated tail bounded so a talkative device without
        // newlines can't grow this buffer unboundedly; this never happens
        // in practice since lines are short control tokens.
        Some(ScanOutcome::NeedMore)
    }
}

/// Find the byte offset of the first occurrence of `MAGIC` (little-endian)
/// in `buf`, if any full match is currently present.
fn find_magic(buf: &[u8]) -> Option<usize> {
    let needle = MAGIC.to_le_bytes();
    if buf.len() < needle.len() {
        return None;
    }
    buf.windows(needle.len()).position(|w| w == needle)
}

pub fn encode_audio_header(payload_len: u32) -> [u8; HEADER_LEN] {
    let mut h = [0u8; HEADER_LEN];
    h[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    h[4] = VERSION;
    h[5] = FRAME_TYPE_AUDIO;
    h[6] = 0;
    h[7] = 0;
    h[8..12].copy_from_slice(&payload_len.to_le_bytes());
    h
}

pub fn start_line(sample_rate: u32, channels: u8, bits: u8, sample_count: u32) -> String {
    format!("START {sample_rate} {channels} {bits} {sample_count}\n")
}

pub const RESUME_LINE: &str = "RESUME\n";
pub const PAUSE_LINE: &str = "PAUSE\n";
pub const STATE_QUERY_LINE: &str = "STATE?\n";
pub const END_LINE: &str = "END\n";
