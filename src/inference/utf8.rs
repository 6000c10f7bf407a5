//! Incremental UTF-8 reassembly
//!
//! The engine hands over the text of each token as raw bytes. A multi-byte
//! code point may be split across two or more tokens, so bytes are held back
//! until the code point they belong to is complete.

use std::ops::RangeInclusive;
use thiserror::Error;

/// Errors raised while reassembling a byte stream into text
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Utf8Error {
    #[error("invalid UTF-8 byte 0x{byte:02X} at stream offset {offset}")]
    Invalid { byte: u8, offset: usize },

    #[error("stream ended inside a UTF-8 sequence: {0:02X?}")]
    Incomplete(Vec<u8>),
}

/// Returns the bytes of a token run up to (not including) its `0x00`
/// terminator, or `None` if the run has no terminator.
pub fn terminated_run(raw: &[u8]) -> Option<&[u8]> {
    raw.iter().position(|&b| b == 0).map(|end| &raw[..end])
}

/// Length of the sequence introduced by `lead`, or `None` when `lead` can
/// never start a well-formed sequence.
fn sequence_len(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7F => Some(1),
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        // stray continuation bytes, overlong leads (C0, C1), > U+10FFFF
        _ => None,
    }
}

/// Allowed range for the byte right after `lead`. Narrower than the general
/// continuation range for leads that could otherwise encode overlongs,
/// surrogates or code points past U+10FFFF.
fn second_byte_range(lead: u8) -> RangeInclusive<u8> {
    match lead {
        0xE0 => 0xA0..=0xBF,
        0xED => 0x80..=0x9F,
        0xF0 => 0x90..=0xBF,
        0xF4 => 0x80..=0x8F,
        _ => 0x80..=0xBF,
    }
}

/// Stateful decoder turning a byte stream into complete UTF-8 fragments.
///
/// At most three bytes are ever pending: a fourth byte either completes the
/// longest possible sequence or proves the stream invalid.
#[derive(Debug, Default)]
pub struct Utf8Reassembler {
    pending: Vec<u8>,
    /// Bytes already emitted, used for error offsets
    emitted: usize,
}

impl Utf8Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns every code point that is now complete.
    ///
    /// Returns `Ok(None)` when nothing new became decodable. An incomplete
    /// trailing sequence stays buffered for the next call.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Option<String>, Utf8Error> {
        self.pending.extend_from_slice(bytes);

        let complete = self.complete_prefix_len()?;
        if complete == 0 {
            return Ok(None);
        }

        let taken: Vec<u8> = self.pending.drain(..complete).collect();
        let offset = self.emitted;
        self.emitted += complete;

        String::from_utf8(taken).map(Some).map_err(|e| {
            let at = e.utf8_error().valid_up_to();
            Utf8Error::Invalid {
                byte: e.as_bytes()[at],
                offset: offset + at,
            }
        })
    }

    /// Bytes still waiting for the rest of their code point.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Ends the stream. Fails if a code point was left unfinished.
    pub fn finish(self) -> Result<(), Utf8Error> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            Err(Utf8Error::Incomplete(self.pending))
        }
    }

    /// Walks the pending buffer sequence by sequence, checking lead and
    /// continuation bytes, and returns how many leading bytes form complete
    /// code points.
    fn complete_prefix_len(&self) -> Result<usize, Utf8Error> {
        let buf = &self.pending;
        let mut i = 0;

        while i < buf.len() {
            let lead = buf[i];
            let len = sequence_len(lead).ok_or(Utf8Error::Invalid {
                byte: lead,
                offset: self.emitted + i,
            })?;

            let available = buf.len() - i;
            for k in 1..len.min(available) {
                let byte = buf[i + k];
                let valid = if k == 1 {
                    second_byte_range(lead).contains(&byte)
                } else {
                    (0x80..=0xBF).contains(&byte)
                };
                if !valid {
                    return Err(Utf8Error::Invalid {
                        byte,
                        offset: self.emitted + i + k,
                    });
                }
            }

            if available < len {
                // on track, waiting for continuation bytes
                break;
            }
            i += len;
        }

        Ok(i)
    }
}
