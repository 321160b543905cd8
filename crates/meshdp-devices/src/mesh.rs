//! Mesh transport seam.
//!
//! The host platform's radio stack is reached only through [`MeshTransport`].
//! Inbound traffic is handed to the device manager as [`InboundFrame`]s.

use async_trait::async_trait;
use meshdp_core::{RawValue, ReportingPolicy};
use serde::{Deserialize, Serialize};

/// Network-unique device identifier (typically the IEEE address).
pub type DeviceId = String;

/// Result type for radio operations.
pub type MeshResult<T> = Result<T, MeshError>;

/// Failure of a radio operation.
///
/// `Unsupported` means the device has no such access path and retrying the
/// same strategy is pointless; every other variant is transient.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeshError {
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("device unreachable: {0}")]
    Unreachable(String),
}

impl MeshError {
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }

    pub fn is_transient(&self) -> bool {
        !self.is_unsupported()
    }
}

/// Attribute value as delivered by the stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Bool(bool),
    Unsigned(u64),
    Signed(i64),
    String(String),
    Bytes(Vec<u8>),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Value in the shape descriptor codecs consume.
    pub fn to_raw(&self) -> RawValue {
        match self {
            Self::Bool(b) => RawValue::Bool(*b),
            Self::Unsigned(v) => RawValue::Integer(i64::try_from(*v).unwrap_or(i64::MAX)),
            Self::Signed(v) => RawValue::Integer(*v),
            Self::String(s) => RawValue::String(s.clone()),
            Self::Bytes(b) => RawValue::Bytes(b.clone()),
        }
    }
}

/// Address of one attribute on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeAddr {
    pub endpoint: u8,
    pub cluster: u16,
    pub attribute: u16,
}

/// Traffic from a device, as received by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    AttributeReport {
        endpoint: u8,
        cluster: u16,
        attribute: u16,
        value: AttributeValue,
    },
    ClusterCommand {
        endpoint: u8,
        cluster: u16,
        command_id: u8,
        payload: Vec<u8>,
    },
}

/// A joined device as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    pub id: DeviceId,
    /// Endpoint used for the basic and vendor clusters.
    pub endpoint: u8,
}

impl DeviceHandle {
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            endpoint: 1,
        }
    }

    pub fn with_endpoint(mut self, endpoint: u8) -> Self {
        self.endpoint = endpoint;
        self
    }
}

/// Radio operations the engine consumes from the host.
#[async_trait]
pub trait MeshTransport: Send + Sync {
    /// Read attributes; the result may omit attributes the device did not return.
    async fn read_attributes(
        &self,
        device: &DeviceId,
        endpoint: u8,
        cluster: u16,
        attributes: &[u16],
    ) -> MeshResult<Vec<(u16, AttributeValue)>>;

    async fn configure_reporting(
        &self,
        device: &DeviceId,
        endpoint: u8,
        cluster: u16,
        attribute: u16,
        policy: ReportingPolicy,
    ) -> MeshResult<()>;

    async fn bind(&self, device: &DeviceId, endpoint: u8, cluster: u16) -> MeshResult<()>;

    async fn send_command(
        &self,
        device: &DeviceId,
        endpoint: u8,
        cluster: u16,
        command_id: u8,
        payload: &[u8],
    ) -> MeshResult<()>;
}
