//! Serialization and deserialization for the live-channel wire format.
//!
//! Frames are UTF-8 JSON objects discriminated by a `type` tag. Decode
//! failures are reported to the caller, who is expected to log and drop
//! the frame: a single malformed frame must never take down the stream.

use crate::event::{InboundEvent, OutboundIntent};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The inbound frame is not valid JSON or has an unrecognized shape.
    #[error("malformed inbound frame: {0}")]
    MalformedFrame(String),
    /// An outbound intent could not be serialized.
    #[error("intent serialization failed: {0}")]
    Serialization(String),
}

/// Decodes a raw inbound frame into a typed [`InboundEvent`].
///
/// # Errors
///
/// Returns [`CodecError::MalformedFrame`] for invalid JSON, an unknown
/// `type` tag, or a shape mismatch for a known tag.
pub fn decode_frame(raw: &str) -> Result<InboundEvent, CodecError> {
    serde_json::from_str(raw).map_err(|e| CodecError::MalformedFrame(e.to_string()))
}

/// Serializes an [`OutboundIntent`] into a wire-ready JSON frame.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the intent cannot be
/// serialized.
pub fn encode_intent(intent: &OutboundIntent) -> Result<String, CodecError> {
    serde_json::to_string(intent).map_err(|e| CodecError::Serialization(e.to_string()))
}
