//! Lumi multi-field structured attribute (`0xFF01` on the basic cluster).
//!
//! The attribute value is a list of `[tag: u8][zcl type: u8][value]` entries.
//! Value width follows the ZCL data type; an unknown type ends the walk.

use crate::error::{CodecError, Result};
use meshdp_core::zcl::lumi_tag;
use tracing::debug;

/// Battery voltage that maps to 0 %.
pub const BATTERY_EMPTY_MV: u32 = 2500;
/// Battery voltage that maps to 100 %.
pub const BATTERY_FULL_MV: u32 = 3000;

/// Decoded entry value.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredValue {
    Bool(bool),
    Unsigned(u64),
    Signed(i64),
    Float(f32),
    Bytes(Vec<u8>),
}

impl StructuredValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Unsigned(v) => i64::try_from(*v).ok(),
            Self::Signed(v) => Some(*v),
            Self::Float(f) => Some(*f as i64),
            Self::Bytes(_) => None,
        }
    }
}

/// One tagged entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredField {
    pub tag: u8,
    pub zcl_type: u8,
    pub value: StructuredValue,
}

/// All entries of one attribute report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredReport {
    pub fields: Vec<StructuredField>,
}

impl StructuredReport {
    pub fn get(&self, tag: u8) -> Option<&StructuredValue> {
        self.fields.iter().find(|f| f.tag == tag).map(|f| &f.value)
    }

    pub fn battery_mv(&self) -> Option<u32> {
        self.get(lumi_tag::BATTERY_VOLTAGE)
            .and_then(StructuredValue::as_i64)
            .and_then(|v| u32::try_from(v).ok())
    }

    pub fn device_temperature(&self) -> Option<i64> {
        self.get(lumi_tag::DEVICE_TEMPERATURE)
            .and_then(StructuredValue::as_i64)
    }
}

/// Linear battery estimate between the empty and full voltages.
pub fn battery_percent(mv: u32) -> u8 {
    let clamped = mv.clamp(BATTERY_EMPTY_MV, BATTERY_FULL_MV);
    let pct = (clamped - BATTERY_EMPTY_MV) * 100 / (BATTERY_FULL_MV - BATTERY_EMPTY_MV);
    pct as u8
}

enum Width {
    Fixed(usize),
    /// One-byte length prefix.
    Prefixed,
}

fn width_of(zcl_type: u8) -> Option<Width> {
    let width = match zcl_type {
        0x10 | 0x18 | 0x20 | 0x28 | 0x30 => Width::Fixed(1),
        0x19 | 0x21 | 0x29 | 0x31 => Width::Fixed(2),
        0x22 | 0x2a => Width::Fixed(3),
        0x1b | 0x23 | 0x2b | 0x39 => Width::Fixed(4),
        0x24 | 0x2c => Width::Fixed(5),
        0x25 | 0x2d => Width::Fixed(6),
        0x27 | 0x2f | 0x3a => Width::Fixed(8),
        0x41 | 0x42 => Width::Prefixed,
        _ => return None,
    };
    Some(width)
}

fn decode_value(zcl_type: u8, bytes: &[u8]) -> StructuredValue {
    match zcl_type {
        0x10 => StructuredValue::Bool(bytes.first().copied().unwrap_or(0) != 0),
        0x28..=0x2f => {
            // Little-endian signed, sign-extended from its width.
            let mut v: i64 = 0;
            for (i, b) in bytes.iter().enumerate() {
                v |= i64::from(*b) << (8 * i);
            }
            let bits = 8 * bytes.len() as u32;
            if bits < 64 {
                let shift = 64 - bits;
                v = (v << shift) >> shift;
            }
            StructuredValue::Signed(v)
        }
        0x39 => {
            let raw: [u8; 4] = bytes.try_into().unwrap_or([0; 4]);
            StructuredValue::Float(f32::from_le_bytes(raw))
        }
        0x3a => {
            let raw: [u8; 8] = bytes.try_into().unwrap_or([0; 8]);
            StructuredValue::Float(f64::from_le_bytes(raw) as f32)
        }
        0x41 | 0x42 => StructuredValue::Bytes(bytes.to_vec()),
        _ => {
            let mut v: u64 = 0;
            for (i, b) in bytes.iter().enumerate() {
                v |= u64::from(*b) << (8 * i);
            }
            StructuredValue::Unsigned(v)
        }
    }
}

/// Parse a structured attribute value.
///
/// Entries decoded before an unknown type or a truncated entry are kept.
/// Fails only if nothing could be decoded.
pub fn parse(data: &[u8]) -> Result<StructuredReport> {
    let mut report = StructuredReport::default();
    let mut offset = 0;
    let mut failure = None;

    while offset < data.len() {
        let start = offset;
        if data.len() - offset < 2 {
            failure = Some(CodecError::Truncated {
                offset: start,
                needed: 2,
                available: data.len() - offset,
            });
            break;
        }
        let tag = data[offset];
        let zcl_type = data[offset + 1];
        offset += 2;

        let len = match width_of(zcl_type) {
            Some(Width::Fixed(n)) => n,
            Some(Width::Prefixed) => match data.get(offset) {
                Some(n) => {
                    offset += 1;
                    *n as usize
                }
                None => {
                    failure = Some(CodecError::Truncated {
                        offset: start,
                        needed: 3,
                        available: data.len() - start,
                    });
                    break;
                }
            },
            None => {
                failure = Some(CodecError::Invalid {
                    field: "structured attribute",
                    reason: format!("unknown zcl type 0x{:02x} for tag 0x{:02x}", zcl_type, tag),
                });
                break;
            }
        };

        let Some(bytes) = data.get(offset..offset + len) else {
            failure = Some(CodecError::Truncated {
                offset: start,
                needed: offset - start + len,
                available: data.len() - start,
            });
            break;
        };
        offset += len;

        report.fields.push(StructuredField {
            tag,
            zcl_type,
            value: decode_value(zcl_type, bytes),
        });
    }

    match failure {
        Some(e) if report.fields.is_empty() => Err(e),
        Some(e) => {
            debug!(error = %e, kept = report.fields.len(), "Structured attribute partially decoded");
            Ok(report)
        }
        None => Ok(report),
    }
}
