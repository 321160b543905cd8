//! Codec errors.

use crate::datapoint::DatapointType;

/// Result type for the wire codecs.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while encoding or decoding custom-cluster frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The buffer ended before a complete element.
    #[error("truncated at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Type tag outside the known set; the length width is unknown so the
    /// rest of the frame cannot be walked.
    #[error("unknown datapoint type 0x{tag:02x} for dp {dp} at offset {offset}")]
    UnknownType { dp: u8, tag: u8, offset: usize },

    /// A fixed-width datapoint carried the wrong payload length.
    #[error("dp {dp}: {kind} payload must be {expected} bytes, got {actual}")]
    BadLength {
        dp: u8,
        kind: DatapointType,
        expected: usize,
        actual: usize,
    },

    #[error("dp {dp}: payload of {len} bytes exceeds the length field")]
    PayloadTooLarge { dp: u8, len: usize },

    #[error("dp {dp}: value {value} does not fit a {kind} datapoint")]
    OutOfRange {
        dp: u8,
        kind: DatapointType,
        value: i64,
    },

    #[error("dp {dp}: cannot build a {kind} datapoint from {found}")]
    ValueMismatch {
        dp: u8,
        kind: DatapointType,
        found: &'static str,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl CodecError {
    /// Whether decoding must stop at this error.
    pub fn is_fatal_for_frame(&self) -> bool {
        matches!(self, Self::Truncated { .. } | Self::UnknownType { .. })
    }
}
