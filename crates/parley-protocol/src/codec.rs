//! Codec for encoding and decoding Parley frames.
//!
//! Frames are single JSON documents; transport framing (WebSocket text
//! messages) already delimits them, so no length prefix is added.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::frames::ClientEnvelope;

/// Maximum inbound frame size (1 MiB).
///
/// Only frames read from clients are capped. Server-built frames such as a
/// full message history may exceed it.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a value as a JSON text frame.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn encode<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(value)?)
}

/// Encode a value as JSON bytes, e.g. for a backplane payload.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn encode_bytes<T: Serialize>(value: &T) -> Result<Bytes, ProtocolError> {
    encode(value).map(Bytes::from)
}

/// Decode a JSON frame.
///
/// # Errors
///
/// Returns an error if the data is too large or not valid JSON for `T`.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    Ok(serde_json::from_slice(data)?)
}

/// Decode a client command envelope.
///
/// # Errors
///
/// Returns an error if the frame is not a JSON object with an `event` name.
pub fn decode_envelope(data: &[u8]) -> Result<ClientEnvelope, ProtocolError> {
    decode(data)
}
