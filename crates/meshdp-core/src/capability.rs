//! Capability descriptors - how a device feature is sourced and decoded.
//!
//! Every capability a profile exposes is described once, at build time, by a
//! [`CapabilityDescriptor`]. The descriptor selects exactly one
//! [`CapabilitySource`] variant, so the binder never has to probe a live
//! device for what it supports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Value published through the platform capability API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CapabilityValue {
    Boolean(bool),
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl CapabilityValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl From<bool> for CapabilityValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<f64> for CapabilityValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for CapabilityValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for CapabilityValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl fmt::Display for CapabilityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Number(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// Wire-level value before a codec gives it meaning.
///
/// Attribute reports and datapoints both reduce to this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawValue {
    Bool(bool),
    Integer(i64),
    String(String),
    Bytes(Vec<u8>),
}

impl RawValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }
}

/// Errors raised while converting between raw and capability values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("codec '{codec}' cannot decode {found} value")]
    TypeMismatch { codec: &'static str, found: &'static str },

    #[error("enum ordinal {0} has no label")]
    UnknownOrdinal(i64),

    #[error("enum label '{0}' is not declared")]
    UnknownLabel(String),

    #[error("invalid codec: {0}")]
    InvalidCodec(String),
}

/// Transform from a raw value to a capability value (and back for writes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueCodec {
    /// Forward the value unchanged.
    #[default]
    Raw,
    /// Non-zero integers and `true` are `true`.
    Boolean,
    /// Boolean with inverted polarity (e.g. contact sensors reporting "open").
    InvertBoolean,
    /// Integer divided by a fixed divisor (`divideBy10` style).
    Divide { divisor: f64 },
    /// `raw / divisor + offset`.
    Scale { divisor: f64, offset: f64 },
    /// Ordinal mapped onto declared labels.
    Enum { values: Vec<String> },
    /// Battery percentage reported in half-percent steps (0-200).
    Battery200,
    /// Standard illuminance encoding: `10^((v - 1) / 10000)` lux.
    LuxLog,
}

impl ValueCodec {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Boolean => "boolean",
            Self::InvertBoolean => "invert_boolean",
            Self::Divide { .. } => "divide",
            Self::Scale { .. } => "scale",
            Self::Enum { .. } => "enum",
            Self::Battery200 => "battery_200",
            Self::LuxLog => "lux_log",
        }
    }

    /// Check that the codec parameters are usable.
    pub fn validate(&self) -> Result<(), ValueError> {
        match self {
            Self::Divide { divisor } | Self::Scale { divisor, .. }
                if *divisor == 0.0 || !divisor.is_finite() =>
            {
                Err(ValueError::InvalidCodec(format!(
                    "divisor must be a non-zero finite number, got {}",
                    divisor
                )))
            }
            Self::Enum { values } if values.is_empty() => Err(ValueError::InvalidCodec(
                "enum codec declares no values".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Decode a raw value into a capability value.
    pub fn decode(&self, raw: &RawValue) -> Result<CapabilityValue, ValueError> {
        match self {
            Self::Raw => Ok(match raw {
                RawValue::Bool(b) => CapabilityValue::Boolean(*b),
                RawValue::Integer(i) => CapabilityValue::Number(*i as f64),
                RawValue::String(s) => CapabilityValue::String(s.clone()),
                RawValue::Bytes(b) => CapabilityValue::Bytes(b.clone()),
            }),
            Self::Boolean => self.as_bool(raw).map(CapabilityValue::Boolean),
            Self::InvertBoolean => self.as_bool(raw).map(|b| CapabilityValue::Boolean(!b)),
            Self::Divide { divisor } => {
                let v = self.as_integer(raw)?;
                Ok(CapabilityValue::Number(v as f64 / divisor))
            }
            Self::Scale { divisor, offset } => {
                let v = self.as_integer(raw)?;
                Ok(CapabilityValue::Number(v as f64 / divisor + offset))
            }
            Self::Enum { values } => {
                let ordinal = self.as_integer(raw)?;
                usize::try_from(ordinal)
                    .ok()
                    .and_then(|i| values.get(i))
                    .map(|label| CapabilityValue::String(label.clone()))
                    .ok_or(ValueError::UnknownOrdinal(ordinal))
            }
            Self::Battery200 => {
                let v = self.as_integer(raw)?;
                Ok(CapabilityValue::Number((v as f64 / 2.0).clamp(0.0, 100.0)))
            }
            Self::LuxLog => {
                let v = self.as_integer(raw)?;
                let lux = if v <= 0 {
                    0.0
                } else {
                    10f64.powf((v as f64 - 1.0) / 10000.0).round()
                };
                Ok(CapabilityValue::Number(lux))
            }
        }
    }

    /// Encode a capability value back to its raw form (outbound writes).
    pub fn encode(&self, value: &CapabilityValue) -> Result<RawValue, ValueError> {
        let mismatch = || ValueError::TypeMismatch {
            codec: self.name(),
            found: value.type_name(),
        };
        match self {
            Self::Raw => Ok(match value {
                CapabilityValue::Boolean(b) => RawValue::Bool(*b),
                CapabilityValue::Number(n) => RawValue::Integer(n.round() as i64),
                CapabilityValue::String(s) => RawValue::String(s.clone()),
                CapabilityValue::Bytes(b) => RawValue::Bytes(b.clone()),
            }),
            Self::Boolean => value.as_bool().map(RawValue::Bool).ok_or_else(mismatch),
            Self::InvertBoolean => value.as_bool().map(|b| RawValue::Bool(!b)).ok_or_else(mismatch),
            Self::Divide { divisor } => value
                .as_f64()
                .map(|n| RawValue::Integer((n * divisor).round() as i64))
                .ok_or_else(mismatch),
            Self::Scale { divisor, offset } => value
                .as_f64()
                .map(|n| RawValue::Integer(((n - offset) * divisor).round() as i64))
                .ok_or_else(mismatch),
            Self::Enum { values } => {
                let label = value.as_str().ok_or_else(mismatch)?;
                values
                    .iter()
                    .position(|v| v == label)
                    .map(|i| RawValue::Integer(i as i64))
                    .ok_or_else(|| ValueError::UnknownLabel(label.to_string()))
            }
            Self::Battery200 => value
                .as_f64()
                .map(|n| RawValue::Integer((n.clamp(0.0, 100.0) * 2.0).round() as i64))
                .ok_or_else(mismatch),
            Self::LuxLog => value
                .as_f64()
                .map(|n| {
                    if n <= 0.0 {
                        RawValue::Integer(0)
                    } else {
                        RawValue::Integer((10000.0 * n.log10() + 1.0).round() as i64)
                    }
                })
                .ok_or_else(mismatch),
        }
    }

    fn as_bool(&self, raw: &RawValue) -> Result<bool, ValueError> {
        match raw {
            RawValue::Bool(b) => Ok(*b),
            RawValue::Integer(i) => Ok(*i != 0),
            other => Err(ValueError::TypeMismatch {
                codec: self.name(),
                found: other.type_name(),
            }),
        }
    }

    fn as_integer(&self, raw: &RawValue) -> Result<i64, ValueError> {
        match raw {
            RawValue::Integer(i) => Ok(*i),
            RawValue::Bool(b) => Ok(i64::from(*b)),
            other => Err(ValueError::TypeMismatch {
                codec: self.name(),
                found: other.type_name(),
            }),
        }
    }
}

/// Periodic attribute reporting bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingPolicy {
    /// Minimum seconds between two reports.
    pub min_interval: u16,
    /// Maximum seconds without a report.
    pub max_interval: u16,
    /// Minimum change (in raw units) that triggers a report.
    pub min_change: u32,
}

impl ReportingPolicy {
    pub fn new(min_interval: u16, max_interval: u16, min_change: u32) -> Self {
        Self {
            min_interval,
            max_interval,
            min_change,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.min_interval <= self.max_interval && self.max_interval > 0
    }
}

impl Default for ReportingPolicy {
    fn default() -> Self {
        Self::new(
            crate::config::binder::DEFAULT_MIN_INTERVAL_SECS,
            crate::config::binder::DEFAULT_MAX_INTERVAL_SECS,
            crate::config::binder::DEFAULT_MIN_CHANGE,
        )
    }
}

fn default_endpoint() -> u8 {
    1
}

/// Where a capability's values come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapabilitySource {
    /// A standard attribute, configured for periodic reporting.
    Attribute {
        cluster: u16,
        attribute: u16,
        #[serde(default = "default_endpoint")]
        endpoint: u8,
    },
    /// Cluster commands sent by the device (buttons, remotes).
    Command {
        cluster: u16,
        #[serde(default = "default_endpoint")]
        endpoint: u8,
        /// Command id to trigger action name.
        #[serde(default)]
        actions: BTreeMap<u8, String>,
        /// First payload byte to action name, used when present.
        #[serde(default)]
        payload_actions: BTreeMap<u8, String>,
    },
    /// A vendor datapoint on the custom cluster.
    Datapoint { dp: u8 },
}

/// Discriminant of [`CapabilitySource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Attribute,
    Command,
    Datapoint,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attribute => write!(f, "attribute"),
            Self::Command => write!(f, "command"),
            Self::Datapoint => write!(f, "datapoint"),
        }
    }
}

impl CapabilitySource {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Attribute { .. } => SourceKind::Attribute,
            Self::Command { .. } => SourceKind::Command,
            Self::Datapoint { .. } => SourceKind::Datapoint,
        }
    }

    pub fn cluster(&self) -> Option<u16> {
        match self {
            Self::Attribute { cluster, .. } | Self::Command { cluster, .. } => Some(*cluster),
            Self::Datapoint { .. } => None,
        }
    }
}

/// One capability of a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Platform capability name (e.g. `measure_temperature`).
    pub capability: String,
    pub source: CapabilitySource,
    #[serde(default)]
    pub codec: ValueCodec,
    /// Reporting bounds for attribute sources; defaults apply when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporting: Option<ReportingPolicy>,
}

impl CapabilityDescriptor {
    pub fn new(capability: impl Into<String>, source: CapabilitySource) -> Self {
        Self {
            capability: capability.into(),
            source,
            codec: ValueCodec::Raw,
            reporting: None,
        }
    }

    pub fn with_codec(mut self, codec: ValueCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_reporting(mut self, reporting: ReportingPolicy) -> Self {
        self.reporting = Some(reporting);
        self
    }

    pub fn kind(&self) -> SourceKind {
        self.source.kind()
    }

    pub fn datapoint_id(&self) -> Option<u8> {
        match self.source {
            CapabilitySource::Datapoint { dp } => Some(dp),
            _ => None,
        }
    }

    /// Reporting policy to configure, falling back to defaults.
    pub fn reporting_policy(&self) -> ReportingPolicy {
        self.reporting.unwrap_or_default()
    }

    /// Decode a raw value using this descriptor's codec.
    pub fn decode(&self, raw: &RawValue) -> Result<CapabilityValue, ValueError> {
        self.codec.decode(raw)
    }
}
