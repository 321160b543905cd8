//! Custom-cluster command envelope.
//!
//! Every datapoint command starts with a two-byte big-endian sequence number
//! followed by the datapoint list.

use crate::datapoint::{self, Datapoint, DecodeReport};
use crate::error::{CodecError, Result};
use crate::time_sync::TimeRequest;
use meshdp_core::zcl::tuya_cmd;
use tracing::trace;

/// A sequence-numbered datapoint list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatapointCommand {
    pub seq: u16,
    pub datapoints: Vec<Datapoint>,
}

impl DatapointCommand {
    pub fn new(seq: u16, datapoints: Vec<Datapoint>) -> Self {
        Self { seq, datapoints }
    }

    pub fn encode(&self) -> Vec<u8> {
        let body = datapoint::encode(&self.datapoints);
        let mut out = Vec::with_capacity(2 + body.len());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// Decode a command payload, dropping malformed datapoints.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Self::decode_detailed(payload).map(|(cmd, _)| cmd)
    }

    /// Decode a command payload, returning dropped-datapoint errors too.
    pub fn decode_detailed(payload: &[u8]) -> Result<(Self, Vec<CodecError>)> {
        let seq = read_seq(payload)?;
        let DecodeReport { datapoints, errors } = datapoint::decode_detailed(&payload[2..]);
        Ok((Self { seq, datapoints }, errors))
    }
}

/// Query payload: sequence number only.
pub fn encode_data_query(seq: u16) -> Vec<u8> {
    seq.to_be_bytes().to_vec()
}

fn read_seq(payload: &[u8]) -> Result<u16> {
    match payload {
        [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(CodecError::Truncated {
            offset: 0,
            needed: 2,
            available: payload.len(),
        }),
    }
}

/// Where a datapoint list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatapointOrigin {
    /// Answer to a data request or query.
    Response,
    /// Unsolicited report.
    Report,
}

/// Inbound custom-cluster command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCommand {
    Datapoints {
        origin: DatapointOrigin,
        command: DatapointCommand,
        dropped: Vec<CodecError>,
    },
    TimeRequest(TimeRequest),
    /// Command id the engine does not handle.
    Unknown { command_id: u8, payload: Vec<u8> },
}

impl ClusterCommand {
    /// Classify an inbound command by id and decode its payload.
    pub fn parse(command_id: u8, payload: &[u8]) -> Result<Self> {
        let cmd = match command_id {
            tuya_cmd::DATA_RESPONSE | tuya_cmd::DATA_REPORT => {
                let origin = if command_id == tuya_cmd::DATA_RESPONSE {
                    DatapointOrigin::Response
                } else {
                    DatapointOrigin::Report
                };
                let (command, dropped) = DatapointCommand::decode_detailed(payload)?;
                Self::Datapoints {
                    origin,
                    command,
                    dropped,
                }
            }
            tuya_cmd::TIME_SYNC => Self::TimeRequest(TimeRequest::decode(payload)),
            other => Self::Unknown {
                command_id: other,
                payload: payload.to_vec(),
            },
        };
        trace!(command_id, ?cmd, "Parsed cluster command");
        Ok(cmd)
    }
}
