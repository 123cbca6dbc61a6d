//! Locating GRIB2 messages in a byte stream.
//!
//! Messages are framed by the `GRIB` magic, the 64-bit total length in
//! Section 0 and the trailing `7777` marker. [`MessageScanner`] accepts
//! consecutive windows of a file and yields every message once it is
//! complete, carrying partial messages (and partial magic) across windows.

use bytes::Bytes;

use crate::sections::{parse_indicator, INDICATOR_LEN};
use crate::{Grib2Error, Grib2Message};

/// Upper bound on a plausible message length. Larger lengths are treated as
/// a false-positive `GRIB` match.
pub const DEFAULT_MAX_MESSAGE_LEN: u64 = 1 << 31;

const MAGIC: &[u8; 4] = b"GRIB";
const END_MARKER: &[u8; 4] = b"7777";

/// A complete, framed GRIB2 message and its absolute offset in the file.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub offset: u64,
    pub bytes: Bytes,
}

enum Locate {
    Found { start: usize, end: usize },
    Incomplete { start: usize, total_len: Option<usize> },
    NotFound,
}

fn locate_message(buf: &[u8], from: usize, max_len: u64) -> Locate {
    let mut pos = from;

    while pos < buf.len() {
        let Some(rel) = buf[pos..].windows(4).position(|w| w == MAGIC) else {
            break;
        };
        let start = pos + rel;
        let available = buf.len() - start;

        if available < INDICATOR_LEN {
            return Locate::Incomplete {
                start,
                total_len: None,
            };
        }

        let indicator = match parse_indicator(&buf[start..start + INDICATOR_LEN]) {
            Ok(indicator) => indicator,
            Err(_) => {
                // GRIB1 or a stray match inside other data
                pos = start + 1;
                continue;
            }
        };

        let total = indicator.message_length;
        if total < (INDICATOR_LEN + END_MARKER.len()) as u64 || total > max_len {
            pos = start + 1;
            continue;
        }

        let total = total as usize;
        if available < total {
            return Locate::Incomplete {
                start,
                total_len: Some(total),
            };
        }

        if &buf[start + total - 4..start + total] != END_MARKER {
            pos = start + 1;
            continue;
        }

        return Locate::Found {
            start,
            end: start + total,
        };
    }

    Locate::NotFound
}

/// Incremental scanner over consecutive windows of a GRIB2 file.
#[derive(Debug)]
pub struct MessageScanner {
    carry: Vec<u8>,
    carry_offset: u64,
    /// Length the carry must reach before the pending message is complete.
    needed: Option<usize>,
    next_offset: u64,
    max_message_len: u64,
}

impl Default for MessageScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageScanner {
    pub fn new() -> Self {
        Self::with_max_message_len(DEFAULT_MAX_MESSAGE_LEN)
    }

    pub fn with_max_message_len(max_message_len: u64) -> Self {
        Self {
            carry: Vec::new(),
            carry_offset: 0,
            needed: None,
            next_offset: 0,
            max_message_len,
        }
    }

    /// Feed the next window. Windows must be pushed in file order without gaps.
    ///
    /// Returns the messages that became complete with this window.
    pub fn push(&mut self, window: Bytes) -> Vec<RawMessage> {
        let window_offset = self.next_offset;
        self.next_offset += window.len() as u64;

        let (buf, base) = if self.carry.is_empty() {
            (window, window_offset)
        } else {
            self.carry.extend_from_slice(&window);
            if matches!(self.needed, Some(needed) if self.carry.len() < needed) {
                return Vec::new();
            }
            (Bytes::from(std::mem::take(&mut self.carry)), self.carry_offset)
        };
        self.needed = None;

        let mut messages = Vec::new();
        let mut pos = 0;
        loop {
            match locate_message(&buf, pos, self.max_message_len) {
                Locate::Found { start, end } => {
                    messages.push(RawMessage {
                        offset: base + start as u64,
                        bytes: buf.slice(start..end),
                    });
                    pos = end;
                }
                Locate::Incomplete { start, total_len } => {
                    self.keep_tail(&buf, base, start);
                    self.needed = total_len;
                    break;
                }
                Locate::NotFound => {
                    // A magic may straddle the window edge
                    let keep_from = buf.len().saturating_sub(MAGIC.len() - 1).max(pos);
                    self.keep_tail(&buf, base, keep_from);
                    break;
                }
            }
        }

        messages
    }

    /// Whether the scanner stopped in the middle of a message.
    pub fn is_mid_message(&self) -> bool {
        self.needed.is_some() || self.carry.starts_with(MAGIC)
    }

    /// Bytes held back waiting for more input.
    pub fn pending_bytes(&self) -> usize {
        self.carry.len()
    }

    /// Signal end of input.
    ///
    /// A pending message can no longer complete, so its `GRIB` match is taken
    /// as false and the held-back bytes are scanned again past it. Returns the
    /// complete messages found there; the scanner is empty afterwards.
    pub fn finish(&mut self) -> Vec<RawMessage> {
        let carry = Bytes::from(std::mem::take(&mut self.carry));
        let base = self.carry_offset;
        self.needed = None;

        let mut messages = Vec::new();
        if !carry.starts_with(MAGIC) {
            return messages;
        }

        let mut pos = 1;
        loop {
            match locate_message(&carry, pos, self.max_message_len) {
                Locate::Found { start, end } => {
                    messages.push(RawMessage {
                        offset: base + start as u64,
                        bytes: carry.slice(start..end),
                    });
                    pos = end;
                }
                Locate::Incomplete { start, .. } => pos = start + 1,
                Locate::NotFound => break,
            }
        }

        messages
    }

    fn keep_tail(&mut self, buf: &[u8], base: u64, from: usize) {
        self.carry = buf[from..].to_vec();
        self.carry_offset = base + from as u64;
    }
}

/// Sequential reader over a fully buffered GRIB2 file.
pub struct Grib2Reader {
    data: Bytes,
    pos: usize,
}

impl Grib2Reader {
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    /// Parse the next message, or `None` at end of file.
    pub fn next_message(&mut self) -> Result<Option<Grib2Message>, Grib2Error> {
        match locate_message(&self.data, self.pos, DEFAULT_MAX_MESSAGE_LEN) {
            Locate::Found { start, end } => {
                self.pos = end;
                let raw = RawMessage {
                    offset: start as u64,
                    bytes: self.data.slice(start..end),
                };
                Grib2Message::parse(raw).map(Some)
            }
            Locate::Incomplete { start, .. } => {
                self.pos = self.data.len();
                Err(Grib2Error::InvalidFormat(format!(
                    "Truncated message at offset {}",
                    start
                )))
            }
            Locate::NotFound => {
                self.pos = self.data.len();
                Ok(None)
            }
        }
    }
}
