//! Datapoint codec.
//!
//! Wire layout of one datapoint:
//!
//! ```text
//! [id: u8][type: u8][length][payload]
//! ```
//!
//! `length` is one byte for the fixed-width types (`Bool`, `Integer`, `Enum`)
//! and a two-byte big-endian count for the variable types (`Raw`, `String`,
//! `Bitmap`). A frame is a plain concatenation of datapoints.

use crate::error::{CodecError, Result};
use meshdp_core::{RawValue, ValueCodec};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Datapoint type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DatapointType {
    Raw = 0x00,
    Bool = 0x01,
    /// Four-byte big-endian signed value.
    Integer = 0x02,
    String = 0x03,
    /// One-byte ordinal.
    Enum = 0x04,
    Bitmap = 0x05,
}

impl DatapointType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(Self::Raw),
            0x01 => Some(Self::Bool),
            0x02 => Some(Self::Integer),
            0x03 => Some(Self::String),
            0x04 => Some(Self::Enum),
            0x05 => Some(Self::Bitmap),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Payload size for fixed-width types.
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            Self::Bool | Self::Enum => Some(1),
            Self::Integer => Some(4),
            Self::Raw | Self::String | Self::Bitmap => None,
        }
    }

    /// Width of the length field in bytes.
    pub fn length_width(self) -> usize {
        if self.fixed_len().is_some() {
            1
        } else {
            2
        }
    }

    /// Largest payload the length field can describe.
    pub fn max_payload(self) -> usize {
        match self.fixed_len() {
            Some(n) => n,
            None => u16::MAX as usize,
        }
    }

    /// Wire type best suited to values produced by a codec.
    pub fn for_codec(codec: &ValueCodec) -> Option<Self> {
        match codec {
            ValueCodec::Boolean | ValueCodec::InvertBoolean => Some(Self::Bool),
            ValueCodec::Enum { .. } => Some(Self::Enum),
            ValueCodec::Divide { .. }
            | ValueCodec::Scale { .. }
            | ValueCodec::Battery200
            | ValueCodec::LuxLog => Some(Self::Integer),
            ValueCodec::Raw => None,
        }
    }
}

impl fmt::Display for DatapointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Raw => "raw",
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::String => "string",
            Self::Enum => "enum",
            Self::Bitmap => "bitmap",
        };
        f.write_str(name)
    }
}

/// Payload interpreted according to its type tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatapointValue {
    Bool(bool),
    Integer(i32),
    Enum(u8),
    /// Text; invalid UTF-8 is reported as `Raw` instead.
    String(String),
    Raw(Vec<u8>),
    Bitmap(Vec<u8>),
}

impl From<DatapointValue> for RawValue {
    fn from(value: DatapointValue) -> Self {
        match value {
            DatapointValue::Bool(b) => RawValue::Bool(b),
            DatapointValue::Integer(i) => RawValue::Integer(i64::from(i)),
            DatapointValue::Enum(e) => RawValue::Integer(i64::from(e)),
            DatapointValue::String(s) => RawValue::String(s),
            DatapointValue::Raw(b) | DatapointValue::Bitmap(b) => RawValue::Bytes(b),
        }
    }
}

/// One typed value unit of a custom-cluster frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Datapoint {
    id: u8,
    kind: DatapointType,
    payload: Vec<u8>,
}

impl Datapoint {
    /// Build a datapoint, checking the payload against the type.
    pub fn new(id: u8, kind: DatapointType, payload: Vec<u8>) -> Result<Self> {
        if let Some(expected) = kind.fixed_len() {
            if payload.len() != expected {
                return Err(CodecError::BadLength {
                    dp: id,
                    kind,
                    expected,
                    actual: payload.len(),
                });
            }
        } else if payload.len() > kind.max_payload() {
            return Err(CodecError::PayloadTooLarge {
                dp: id,
                len: payload.len(),
            });
        }
        Ok(Self { id, kind, payload })
    }

    pub fn bool(id: u8, value: bool) -> Self {
        Self {
            id,
            kind: DatapointType::Bool,
            payload: vec![u8::from(value)],
        }
    }

    pub fn integer(id: u8, value: i32) -> Self {
        Self {
            id,
            kind: DatapointType::Integer,
            payload: value.to_be_bytes().to_vec(),
        }
    }

    pub fn enumeration(id: u8, ordinal: u8) -> Self {
        Self {
            id,
            kind: DatapointType::Enum,
            payload: vec![ordinal],
        }
    }

    pub fn string(id: u8, value: &str) -> Result<Self> {
        Self::new(id, DatapointType::String, value.as_bytes().to_vec())
    }

    pub fn raw(id: u8, payload: Vec<u8>) -> Result<Self> {
        Self::new(id, DatapointType::Raw, payload)
    }

    pub fn bitmap(id: u8, payload: Vec<u8>) -> Result<Self> {
        Self::new(id, DatapointType::Bitmap, payload)
    }

    /// Build an outbound datapoint from a raw value.
    ///
    /// With no `kind` the wire type follows the value: booleans become
    /// `Bool`, integers `Integer`, text `String` and bytes `Raw`.
    pub fn from_raw_value(id: u8, value: &RawValue, kind: Option<DatapointType>) -> Result<Self> {
        let mismatch = |kind| CodecError::ValueMismatch {
            dp: id,
            kind,
            found: value.type_name(),
        };
        let kind = kind.unwrap_or(match value {
            RawValue::Bool(_) => DatapointType::Bool,
            RawValue::Integer(_) => DatapointType::Integer,
            RawValue::String(_) => DatapointType::String,
            RawValue::Bytes(_) => DatapointType::Raw,
        });

        match (kind, value) {
            (DatapointType::Bool, RawValue::Bool(b)) => Ok(Self::bool(id, *b)),
            (DatapointType::Bool, RawValue::Integer(i)) => Ok(Self::bool(id, *i != 0)),
            (DatapointType::Integer, RawValue::Integer(i)) => i32::try_from(*i)
                .map(|v| Self::integer(id, v))
                .map_err(|_| CodecError::OutOfRange {
                    dp: id,
                    kind,
                    value: *i,
                }),
            (DatapointType::Integer, RawValue::Bool(b)) => Ok(Self::integer(id, i32::from(*b))),
            (DatapointType::Enum, RawValue::Integer(i)) => u8::try_from(*i)
                .map(|v| Self::enumeration(id, v))
                .map_err(|_| CodecError::OutOfRange {
                    dp: id,
                    kind,
                    value: *i,
                }),
            (DatapointType::String, RawValue::String(s)) => Self::string(id, s),
            (DatapointType::Raw | DatapointType::Bitmap, RawValue::Bytes(b)) => {
                Self::new(id, kind, b.clone())
            }
            (DatapointType::Bitmap, RawValue::Integer(i)) => u32::try_from(*i)
                .map(|v| Self {
                    id,
                    kind,
                    payload: v.to_be_bytes().to_vec(),
                })
                .map_err(|_| CodecError::OutOfRange {
                    dp: id,
                    kind,
                    value: *i,
                }),
            (kind, _) => Err(mismatch(kind)),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn kind(&self) -> DatapointType {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Interpret the payload per type tag.
    pub fn value(&self) -> DatapointValue {
        match self.kind {
            DatapointType::Bool => DatapointValue::Bool(self.payload.first().copied().unwrap_or(0) != 0),
            DatapointType::Integer => {
                let bytes: [u8; 4] = self
                    .payload
                    .get(..4)
                    .and_then(|b| b.try_into().ok())
                    .unwrap_or([0; 4]);
                DatapointValue::Integer(i32::from_be_bytes(bytes))
            }
            DatapointType::Enum => DatapointValue::Enum(self.payload.first().copied().unwrap_or(0)),
            DatapointType::String => match String::from_utf8(self.payload.clone()) {
                Ok(s) => DatapointValue::String(s),
                Err(e) => DatapointValue::Raw(e.into_bytes()),
            },
            DatapointType::Raw => DatapointValue::Raw(self.payload.clone()),
            DatapointType::Bitmap => DatapointValue::Bitmap(self.payload.clone()),
        }
    }

    /// Value in the shape descriptor codecs consume.
    pub fn raw_value(&self) -> RawValue {
        self.value().into()
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        2 + self.kind.length_width() + self.payload.len()
    }

    /// Append this datapoint's wire form to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.id);
        out.push(self.kind.tag());
        if self.kind.length_width() == 1 {
            out.push(self.payload.len() as u8);
        } else {
            out.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        }
        out.extend_from_slice(&self.payload);
    }
}

impl fmt::Display for Datapoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dp{}:{}={:?}", self.id, self.kind, self.value())
    }
}

/// Encode a datapoint list into one frame body.
pub fn encode(datapoints: &[Datapoint]) -> Vec<u8> {
    let mut out = Vec::with_capacity(datapoints.iter().map(Datapoint::encoded_len).sum());
    for dp in datapoints {
        dp.encode_into(&mut out);
    }
    out
}

/// Result of decoding a frame body, including what was dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeReport {
    pub datapoints: Vec<Datapoint>,
    pub errors: Vec<CodecError>,
}

impl DecodeReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether decoding ended early on a truncated tail.
    pub fn truncated(&self) -> bool {
        self.errors
            .iter()
            .any(|e| matches!(e, CodecError::Truncated { .. }))
    }
}

/// Decode a frame body, discarding malformed datapoints.
pub fn decode(frame: &[u8]) -> Vec<Datapoint> {
    decode_detailed(frame).datapoints
}

/// Decode a frame body and report every dropped datapoint.
///
/// A truncated tail and an unknown type tag end the walk; a fixed-width
/// datapoint with the wrong length is skipped and decoding continues.
pub fn decode_detailed(frame: &[u8]) -> DecodeReport {
    let mut report = DecodeReport::default();
    let mut offset = 0;

    while offset < frame.len() {
        let start = offset;
        let remaining = frame.len() - offset;
        if remaining < 2 {
            report.errors.push(CodecError::Truncated {
                offset: start,
                needed: 2,
                available: remaining,
            });
            break;
        }

        let id = frame[offset];
        let tag = frame[offset + 1];
        let Some(kind) = DatapointType::from_tag(tag) else {
            report.errors.push(CodecError::UnknownType {
                dp: id,
                tag,
                offset: start,
            });
            break;
        };
        offset += 2;

        let width = kind.length_width();
        if frame.len() - offset < width {
            report.errors.push(CodecError::Truncated {
                offset: start,
                needed: 2 + width,
                available: remaining,
            });
            break;
        }
        let len = if width == 1 {
            frame[offset] as usize
        } else {
            u16::from_be_bytes([frame[offset], frame[offset + 1]]) as usize
        };
        offset += width;

        if frame.len() - offset < len {
            report.errors.push(CodecError::Truncated {
                offset: start,
                needed: 2 + width + len,
                available: remaining,
            });
            break;
        }
        let payload = frame[offset..offset + len].to_vec();
        offset += len;

        match Datapoint::new(id, kind, payload) {
            Ok(dp) => report.datapoints.push(dp),
            Err(e) => {
                debug!(dp = id, error = %e, "Dropping malformed datapoint");
                report.errors.push(e);
            }
        }
    }

    if report.truncated() {
        debug!(
            decoded = report.datapoints.len(),
            "Discarded truncated datapoint tail"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_layout() {
        let bytes = encode(&[Datapoint::integer(2, 235)]);
        assert_eq!(bytes, vec![0x02, 0x02, 0x04, 0x00, 0x00, 0x00, 0xEB]);

        let bytes = encode(&[Datapoint::bool(1, true), Datapoint::enumeration(4, 2)]);
        assert_eq!(bytes, vec![0x01, 0x01, 0x01, 0x01, 0x04, 0x04, 0x01, 0x02]);
    }

    #[test]
    fn test_variable_width_layout() {
        let bytes = encode(&[Datapoint::string(9, "ok").unwrap()]);
        assert_eq!(bytes, vec![0x09, 0x03, 0x00, 0x02, b'o', b'k']);
    }

    #[test]
    fn test_negative_integer() {
        let dp = Datapoint::integer(3, -45);
        let decoded = decode(&encode(&[dp]));
        assert_eq!(decoded[0].value(), DatapointValue::Integer(-45));
        assert_eq!(decoded[0].raw_value(), RawValue::Integer(-45));
    }

    #[test]
    fn test_bad_fixed_length_is_skipped() {
        // dp 1 claims a 2-byte bool, dp 2 is fine.
        let frame = [0x01, 0x01, 0x02, 0x01, 0x00, 0x02, 0x01, 0x01, 0x01];
        let report = decode_detailed(&frame);
        assert_eq!(report.datapoints, vec![Datapoint::bool(2, true)]);
        assert!(matches!(
            report.errors[0],
            CodecError::BadLength { dp: 1, expected: 1, actual: 2, .. }
        ));
        assert!(!report.truncated());
    }

    #[test]
    fn test_unknown_type_stops_frame() {
        let mut frame = encode(&[Datapoint::bool(1, false)]);
        frame.extend_from_slice(&[0x07, 0x09, 0x01, 0xAA]);
        frame.extend_from_slice(&encode(&[Datapoint::bool(2, true)]));

        let report = decode_detailed(&frame);
        assert_eq!(report.datapoints, vec![Datapoint::bool(1, false)]);
        assert!(matches!(
            report.errors[0],
            CodecError::UnknownType { dp: 7, tag: 0x09, .. }
        ));
    }

    #[test]
    fn test_invalid_utf8_string_is_raw() {
        let dp = Datapoint::new(5, DatapointType::String, vec![0xFF, 0xFE]).unwrap();
        assert_eq!(dp.value(), DatapointValue::Raw(vec![0xFF, 0xFE]));
    }

    #[test]
    fn test_from_raw_value() {
        assert_eq!(
            Datapoint::from_raw_value(4, &RawValue::Integer(1), Some(DatapointType::Enum)).unwrap(),
            Datapoint::enumeration(4, 1)
        );
        assert_eq!(
            Datapoint::from_raw_value(1, &RawValue::Bool(true), None).unwrap(),
            Datapoint::bool(1, true)
        );
        assert!(matches!(
            Datapoint::from_raw_value(4, &RawValue::Integer(300), Some(DatapointType::Enum)),
            Err(CodecError::OutOfRange { .. })
        ));
        assert!(matches!(
            Datapoint::from_raw_value(4, &RawValue::String("x".into()), Some(DatapointType::Integer)),
            Err(CodecError::ValueMismatch { .. })
        ));
    }

    #[test]
    fn test_new_rejects_bad_payload() {
        assert!(Datapoint::new(1, DatapointType::Integer, vec![0; 3]).is_err());
        assert!(Datapoint::raw(1, vec![0; 70_000]).is_err());
    }
}
