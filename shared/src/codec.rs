//! Binary encoding of envelopes
//!
//! Envelopes are serialized with bincode using fixed-width integers. Decoding
//! is bounded by `MAX_DATAGRAM_SIZE` so a hostile length prefix can never
//! trigger a large allocation, and trailing bytes after a complete envelope
//! are treated as corruption.

use crate::{Envelope, MAX_DATAGRAM_SIZE};
use bincode::Options;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("empty datagram")]
    Empty,
    #[error("datagram of {len} bytes exceeds the {max} byte limit")]
    Oversized { len: usize, max: usize },
    #[error("malformed envelope: {0}")]
    Malformed(#[from] bincode::Error),
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    let bytes = options().serialize(envelope)?;
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(CodecError::Oversized {
            len: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(bytes)
}

/// Decodes one envelope, returning an error for any malformed input
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(CodecError::Oversized {
            len: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    let envelope = options()
        .with_limit(MAX_DATAGRAM_SIZE as u64)
        .deserialize(bytes)?;
    Ok(envelope)
}
