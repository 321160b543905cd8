//! Time exchange on the custom cluster.
//!
//! A device asks for the time with a request carrying a two-byte id. The hub
//! answers with a fixed 10-byte reply:
//!
//! ```text
//! [request id: u16 BE][utc: u32 BE][local: u32 BE]
//! ```
//!
//! Both timestamps are Unix epoch seconds; `local` is `utc` shifted by the
//! hub's UTC offset.

use crate::error::{CodecError, Result};
use chrono::{DateTime, FixedOffset, Local, Offset, Utc};

/// Size of the time reply payload.
pub const TIME_REPLY_LEN: usize = 10;

/// Device-initiated time request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeRequest {
    pub request_id: u16,
}

impl TimeRequest {
    /// Some devices send an empty payload; those get request id 0.
    pub fn decode(payload: &[u8]) -> Self {
        let request_id = match payload {
            [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
            _ => 0,
        };
        Self { request_id }
    }
}

/// Hub time reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeReply {
    pub request_id: u16,
    pub utc_secs: u32,
    pub local_secs: u32,
}

impl TimeReply {
    /// Build a reply for `instant` as seen from `offset`.
    pub fn at(request_id: u16, instant: DateTime<Utc>, offset: FixedOffset) -> Self {
        let utc = instant.timestamp();
        let local = utc + i64::from(offset.local_minus_utc());
        Self {
            request_id,
            utc_secs: clamp_secs(utc),
            local_secs: clamp_secs(local),
        }
    }

    /// Build a reply for the current instant in the hub's local zone.
    pub fn now(request_id: u16) -> Self {
        let now = Local::now();
        Self::at(request_id, now.with_timezone(&Utc), now.offset().fix())
    }

    pub fn encode(&self) -> [u8; TIME_REPLY_LEN] {
        let mut out = [0u8; TIME_REPLY_LEN];
        out[0..2].copy_from_slice(&self.request_id.to_be_bytes());
        out[2..6].copy_from_slice(&self.utc_secs.to_be_bytes());
        out[6..10].copy_from_slice(&self.local_secs.to_be_bytes());
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() != TIME_REPLY_LEN {
            return Err(CodecError::Invalid {
                field: "time reply",
                reason: format!("expected {} bytes, got {}", TIME_REPLY_LEN, payload.len()),
            });
        }
        let u16_at = |i: usize| u16::from_be_bytes([payload[i], payload[i + 1]]);
        let u32_at = |i: usize| {
            u32::from_be_bytes([payload[i], payload[i + 1], payload[i + 2], payload[i + 3]])
        };
        Ok(Self {
            request_id: u16_at(0),
            utc_secs: u32_at(2),
            local_secs: u32_at(6),
        })
    }

    /// Local offset carried by the reply, in seconds.
    pub fn offset_secs(&self) -> i64 {
        i64::from(self.local_secs) - i64::from(self.utc_secs)
    }
}

fn clamp_secs(secs: i64) -> u32 {
    secs.clamp(0, i64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_reply_layout() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let offset = FixedOffset::east_opt(3600).unwrap();
        let reply = TimeReply::at(0x0007, instant, offset);

        let bytes = reply.encode();
        assert_eq!(bytes.len(), 10);
        assert_eq!(&bytes[0..2], &[0x00, 0x07]);
        assert_eq!(
            u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
            instant.timestamp() as u32
        );
        assert_eq!(reply.offset_secs(), 3600);
        assert_eq!(TimeReply::decode(&bytes).unwrap(), reply);
    }

    #[test]
    fn test_negative_offset() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        let reply = TimeReply::at(1, instant, offset);
        assert_eq!(reply.offset_secs(), -5 * 3600);
    }

    #[test]
    fn test_request_decode() {
        assert_eq!(TimeRequest::decode(&[0x12, 0x34]).request_id, 0x1234);
        assert_eq!(TimeRequest::decode(&[]).request_id, 0);
    }

    #[test]
    fn test_decode_wrong_length() {
        assert!(TimeReply::decode(&[0; 8]).is_err());
    }
}
