//! Device runtime errors.

use crate::executor::ExecutorError;
use crate::mesh::DeviceId;
use meshdp_core::{Fingerprint, ValueError};
use meshdp_protocol::CodecError;

pub type Result<T> = std::result::Result<T, DeviceError>;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device not found: {0}")]
    NotFound(DeviceId),

    #[error("no profile matches {0}")]
    UnknownFingerprint(Fingerprint),

    #[error("identification failed for {device}: {reason}")]
    Identification { device: DeviceId, reason: String },

    #[error("device {device} has no capability '{capability}'")]
    UnknownCapability {
        device: DeviceId,
        capability: String,
    },

    #[error("capability '{0}' is not writable")]
    NotWritable(String),

    #[error("device {0} runtime has stopped")]
    Stopped(DeviceId),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Failure binding one capability. Recorded, never propagated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("invalid reporting policy: min {min}s > max {max}s")]
    InvalidReporting { min: u16, max: u16 },
}

/// Rejected capability publication.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PublishError {
    #[error("capability '{0}' rejected the value: {1}")]
    Rejected(String, String),

    #[error("publication sink closed")]
    Closed,
}
