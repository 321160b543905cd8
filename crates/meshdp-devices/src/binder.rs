//! Capability Binder.
//!
//! Binding walks a resolved profile once and, per descriptor variant:
//! - `Attribute`: configure reporting through the executor, falling back to
//!   a direct read and polling at the reporting max interval
//! - `Command`: bind the cluster so commands reach the hub, falling back to
//!   passive listening
//! - `Datapoint`: register the descriptor under its dp id
//!
//! A failing capability is recorded in the [`BindReport`] and does not stop
//! the others. The resulting [`DeviceBindings`] route decoded inbound traffic
//! to [`Publication`]s.

use crate::error::BindError;
use crate::executor::{FallbackExecutor, Strategy};
use crate::mesh::{AttributeAddr, AttributeValue, DeviceHandle, DeviceId, MeshError, MeshTransport};
use crate::quirks;
use meshdp_core::zcl::{basic_attrs, cluster, tuya_cmd};
use meshdp_core::{
    BinderConfig, CapabilityDescriptor, CapabilityProfile, CapabilitySource, CapabilityValue,
    ReportingPolicy,
};
use meshdp_protocol::{encode_data_query, Datapoint};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Something to hand to the capability API.
#[derive(Debug, Clone, PartialEq)]
pub enum Publication {
    Value {
        capability: String,
        value: CapabilityValue,
    },
    Trigger {
        capability: String,
        action: String,
    },
}

impl Publication {
    pub fn value(capability: &str, value: impl Into<CapabilityValue>) -> Self {
        Self::Value {
            capability: capability.to_string(),
            value: value.into(),
        }
    }

    pub fn trigger(capability: &str, action: &str) -> Self {
        Self::Trigger {
            capability: capability.to_string(),
            action: action.to_string(),
        }
    }

    pub fn capability(&self) -> &str {
        match self {
            Self::Value { capability, .. } | Self::Trigger { capability, .. } => capability,
        }
    }
}

/// How a capability ended up bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BindMode {
    /// Device pushes periodic attribute reports.
    Reporting,
    /// Reporting unavailable; the hub reads the attribute on a timer.
    Polled { interval_secs: u64 },
    /// Cluster bound, commands are delivered to the hub.
    CommandBound,
    /// Binding failed as unsupported; commands may still arrive.
    Passive,
    /// Registered under a datapoint id.
    Datapoint { dp: u8 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundCapability {
    pub capability: String,
    #[serde(flatten)]
    pub mode: BindMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindFailure {
    pub capability: String,
    pub error: BindError,
}

/// Outcome of binding one device.
#[derive(Debug, Clone, PartialEq)]
pub struct BindReport {
    pub device_id: DeviceId,
    pub profile_id: String,
    pub bound: Vec<BoundCapability>,
    pub failed: Vec<BindFailure>,
    /// Values read while binding (polled attributes).
    pub initial_values: Vec<Publication>,
    pub quirks: Vec<&'static str>,
    /// Whether the post-bind data query reached the device.
    pub data_query_sent: bool,
}

impl BindReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn mode_of(&self, capability: &str) -> Option<&BindMode> {
        self.bound
            .iter()
            .find(|b| b.capability == capability)
            .map(|b| &b.mode)
    }
}

/// Attribute polled because reporting could not be configured.
#[derive(Debug, Clone, PartialEq)]
pub struct PollTarget {
    pub addr: AttributeAddr,
    pub interval: Duration,
}

/// Per-device routing of inbound traffic to capabilities.
#[derive(Debug, Clone)]
pub struct DeviceBindings {
    profile: Arc<CapabilityProfile>,
    attributes: HashMap<AttributeAddr, CapabilityDescriptor>,
    commands: HashMap<(u8, u16), Vec<CapabilityDescriptor>>,
    polled: Vec<PollTarget>,
}

impl DeviceBindings {
    fn new(profile: Arc<CapabilityProfile>) -> Self {
        Self {
            profile,
            attributes: HashMap::new(),
            commands: HashMap::new(),
            polled: Vec::new(),
        }
    }

    pub fn profile(&self) -> &Arc<CapabilityProfile> {
        &self.profile
    }

    pub fn polled(&self) -> &[PollTarget] {
        &self.polled
    }

    pub fn time_sync(&self) -> bool {
        self.profile.quirks.time_sync
    }

    /// Route an attribute report.
    pub fn on_attribute(&self, addr: AttributeAddr, value: &AttributeValue) -> Vec<Publication> {
        if addr.cluster == cluster::BASIC && addr.attribute == basic_attrs::LUMI_STRUCTURED {
            if !self.profile.quirks.structured_attribute {
                return Vec::new();
            }
            return match value {
                AttributeValue::Bytes(data) => quirks::structured::publications(&self.profile, data),
                AttributeValue::String(s) => {
                    quirks::structured::publications(&self.profile, s.as_bytes())
                }
                _ => Vec::new(),
            };
        }

        let Some(desc) = self.attributes.get(&addr) else {
            debug!(
                profile = %self.profile.id,
                cluster = addr.cluster,
                attribute = addr.attribute,
                "Unbound attribute report"
            );
            return Vec::new();
        };
        match desc.decode(&value.to_raw()) {
            Ok(value) => vec![Publication::Value {
                capability: desc.capability.clone(),
                value,
            }],
            Err(e) => {
                debug!(capability = %desc.capability, error = %e, "Attribute value dropped");
                Vec::new()
            }
        }
    }

    /// Route decoded datapoints; undecodable values are dropped individually.
    pub fn on_datapoints(&self, datapoints: &[Datapoint]) -> Vec<Publication> {
        let mut out = Vec::with_capacity(datapoints.len());
        for dp in datapoints {
            let Some(desc) = self.profile.datapoint(dp.id()) else {
                debug!(profile = %self.profile.id, dp = dp.id(), "Unmapped datapoint");
                continue;
            };
            match desc.decode(&dp.raw_value()) {
                Ok(value) => out.push(Publication::Value {
                    capability: desc.capability.clone(),
                    value,
                }),
                Err(e) => {
                    debug!(dp = dp.id(), capability = %desc.capability, error = %e, "Datapoint dropped");
                }
            }
        }
        out
    }

    /// Translate a cluster command into trigger events.
    pub fn on_command(
        &self,
        endpoint: u8,
        cluster_id: u16,
        command_id: u8,
        payload: &[u8],
    ) -> Vec<Publication> {
        let Some(descriptors) = self.commands.get(&(endpoint, cluster_id)) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for desc in descriptors {
            let CapabilitySource::Command {
                actions,
                payload_actions,
                ..
            } = &desc.source
            else {
                continue;
            };
            let action = payload
                .first()
                .and_then(|b| payload_actions.get(b))
                .or_else(|| actions.get(&command_id));
            match action {
                Some(action) => out.push(Publication::trigger(&desc.capability, action)),
                None => debug!(
                    capability = %desc.capability,
                    command_id,
                    "Command without mapped action"
                ),
            }
        }
        out
    }
}

/// Outcome of the attribute bind strategies.
enum AttributeBind {
    Reporting,
    Read(AttributeValue),
}

/// Binds profiles to live devices.
pub struct CapabilityBinder {
    transport: Arc<dyn MeshTransport>,
    executor: Arc<FallbackExecutor>,
    config: BinderConfig,
    poll_floor: Duration,
}

impl CapabilityBinder {
    pub fn new(
        transport: Arc<dyn MeshTransport>,
        executor: Arc<FallbackExecutor>,
        config: BinderConfig,
    ) -> Self {
        Self {
            transport,
            executor,
            config,
            poll_floor: Duration::from_secs(meshdp_core::config::runtime::DEFAULT_POLL_FLOOR_SECS),
        }
    }

    pub fn with_poll_floor(mut self, floor: Duration) -> Self {
        self.poll_floor = floor;
        self
    }

    fn reporting_for(&self, desc: &CapabilityDescriptor) -> ReportingPolicy {
        desc.reporting.unwrap_or(ReportingPolicy::new(
            self.config.min_interval_secs,
            self.config.max_interval_secs,
            self.config.min_change,
        ))
    }

    /// Bind every capability of `profile` on `device`.
    pub async fn bind(
        &self,
        profile: Arc<CapabilityProfile>,
        device: &DeviceHandle,
    ) -> (DeviceBindings, BindReport) {
        let mut bindings = DeviceBindings::new(Arc::clone(&profile));
        let mut report = BindReport {
            device_id: device.id.clone(),
            profile_id: profile.id.clone(),
            bound: Vec::new(),
            failed: Vec::new(),
            initial_values: Vec::new(),
            quirks: Vec::new(),
            data_query_sent: false,
        };

        let mut bound_clusters: HashSet<(u8, u16)> = HashSet::new();

        for desc in &profile.capabilities {
            let result = match &desc.source {
                CapabilitySource::Attribute {
                    cluster,
                    attribute,
                    endpoint,
                } => {
                    let addr = AttributeAddr {
                        endpoint: *endpoint,
                        cluster: *cluster,
                        attribute: *attribute,
                    };
                    self.bind_attribute(device, desc, addr, &mut bindings, &mut report)
                        .await
                        .map(|mode| {
                            bound_clusters.insert((*endpoint, *cluster));
                            mode
                        })
                }
                CapabilitySource::Command {
                    cluster, endpoint, ..
                } => {
                    let mode = if bound_clusters.contains(&(*endpoint, *cluster)) {
                        Ok(BindMode::CommandBound)
                    } else {
                        self.bind_command(device, *endpoint, *cluster).await
                    };
                    if let Ok(BindMode::CommandBound) = mode {
                        bound_clusters.insert((*endpoint, *cluster));
                    }
                    bindings
                        .commands
                        .entry((*endpoint, *cluster))
                        .or_default()
                        .push(desc.clone());
                    mode
                }
                // Datapoints live in `datapoint_map` and are bound below.
                CapabilitySource::Datapoint { .. } => continue,
            };

            match result {
                Ok(mode) => {
                    debug!(device_id = %device.id, capability = %desc.capability, ?mode, "Capability bound");
                    report.bound.push(BoundCapability {
                        capability: desc.capability.clone(),
                        mode,
                    });
                }
                Err(error) => {
                    warn!(
                        device_id = %device.id,
                        capability = %desc.capability,
                        error = %error,
                        "Capability bind failed"
                    );
                    report.failed.push(BindFailure {
                        capability: desc.capability.clone(),
                        error,
                    });
                }
            }
        }

        if profile.uses_datapoints() {
            for (dp, desc) in &profile.datapoint_map {
                report.bound.push(BoundCapability {
                    capability: desc.capability.clone(),
                    mode: BindMode::Datapoint { dp: *dp },
                });
            }
            self.bind_datapoint_cluster(device, &mut report).await;
        }

        if profile.quirks.time_sync {
            report.quirks.push("time_sync");
        }
        if profile.quirks.structured_attribute {
            report.quirks.push("structured_attribute");
        }

        info!(
            device_id = %device.id,
            profile = %profile.id,
            bound = report.bound.len(),
            failed = report.failed.len(),
            polled = bindings.polled.len(),
            "Device bound"
        );
        (bindings, report)
    }

    async fn bind_attribute(
        &self,
        device: &DeviceHandle,
        desc: &CapabilityDescriptor,
        addr: AttributeAddr,
        bindings: &mut DeviceBindings,
        report: &mut BindReport,
    ) -> Result<BindMode, BindError> {
        let policy = self.reporting_for(desc);
        if !policy.is_valid() {
            return Err(BindError::InvalidReporting {
                min: policy.min_interval,
                max: policy.max_interval,
            });
        }

        let transport = &self.transport;
        let id = &device.id;
        let executed = self
            .executor
            .execute(
                "bind_attribute",
                vec![
                    Strategy::new("configure_reporting", || async move {
                        transport.bind(id, addr.endpoint, addr.cluster).await?;
                        transport
                            .configure_reporting(id, addr.endpoint, addr.cluster, addr.attribute, policy)
                            .await?;
                        Ok::<_, MeshError>(AttributeBind::Reporting)
                    }),
                    Strategy::new("direct_read", || async move {
                        let values = transport
                            .read_attributes(id, addr.endpoint, addr.cluster, &[addr.attribute])
                            .await?;
                        values
                            .into_iter()
                            .find(|(attr, _)| *attr == addr.attribute)
                            .map(|(_, value)| AttributeBind::Read(value))
                            .ok_or_else(|| {
                                MeshError::Unsupported(format!(
                                    "attribute 0x{:04x} not returned",
                                    addr.attribute
                                ))
                            })
                    }),
                ],
            )
            .await?;

        bindings.attributes.insert(addr, desc.clone());
        match executed.value {
            AttributeBind::Reporting => Ok(BindMode::Reporting),
            AttributeBind::Read(value) => {
                // The read path works, so poll even if this first value is bad.
                let interval =
                    Duration::from_secs(u64::from(policy.max_interval)).max(self.poll_floor);
                bindings.polled.push(PollTarget { addr, interval });
                match desc.decode(&value.to_raw()) {
                    Ok(decoded) => report.initial_values.push(Publication::Value {
                        capability: desc.capability.clone(),
                        value: decoded,
                    }),
                    Err(e) => warn!(
                        device_id = %device.id,
                        capability = %desc.capability,
                        error = %e,
                        "Initial value dropped"
                    ),
                }
                Ok(BindMode::Polled {
                    interval_secs: interval.as_secs(),
                })
            }
        }
    }

    async fn bind_command(
        &self,
        device: &DeviceHandle,
        endpoint: u8,
        cluster_id: u16,
    ) -> Result<BindMode, BindError> {
        let transport = &self.transport;
        let id = &device.id;
        let executed = self
            .executor
            .execute(
                "bind_command",
                vec![
                    Strategy::new("bind_cluster", || async move {
                        transport.bind(id, endpoint, cluster_id).await?;
                        Ok::<_, MeshError>(BindMode::CommandBound)
                    }),
                    Strategy::new("passive_listen", || async { Ok(BindMode::Passive) }),
                ],
            )
            .await?;
        Ok(executed.value)
    }

    /// Bind the vendor cluster and ask for current values. Failures here are
    /// logged only; datapoint reports may still arrive unsolicited.
    async fn bind_datapoint_cluster(&self, device: &DeviceHandle, report: &mut BindReport) {
        let transport = &self.transport;
        let id = &device.id;
        let endpoint = device.endpoint;

        if let Err(e) = self
            .executor
            .execute(
                "bind_datapoint_cluster",
                vec![Strategy::new("bind_cluster", || async move {
                    transport.bind(id, endpoint, cluster::TUYA).await
                })],
            )
            .await
        {
            debug!(device_id = %device.id, error = %e, "Vendor cluster bind failed, relying on unsolicited reports");
        }

        if !self.config.query_on_bind {
            return;
        }
        let payload = encode_data_query(0);
        let payload = &payload;
        match self
            .executor
            .execute(
                "data_query",
                vec![Strategy::new("data_query", || async move {
                    transport
                        .send_command(id, endpoint, cluster::TUYA, tuya_cmd::DATA_QUERY, payload)
                        .await
                })],
            )
            .await
        {
            Ok(_) => report.data_query_sent = true,
            Err(e) => warn!(device_id = %device.id, error = %e, "Data query failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshdp_core::{Category, ValueCodec, VendorQuirks};
    use std::collections::BTreeMap;

    fn profile() -> Arc<CapabilityProfile> {
        let mut payload_actions = BTreeMap::new();
        payload_actions.insert(0, "single".to_string());
        payload_actions.insert(1, "double".to_string());
        let mut actions = BTreeMap::new();
        actions.insert(0x01, "on".to_string());

        Arc::new(
            CapabilityProfile::new(
                "thermostat",
                Category::parse("radiator valve"),
                vec![
                    CapabilityDescriptor::new("target_temperature", CapabilitySource::Datapoint { dp: 2 })
                        .with_codec(ValueCodec::Divide { divisor: 10.0 }),
                    CapabilityDescriptor::new("child_lock", CapabilitySource::Datapoint { dp: 7 })
                        .with_codec(ValueCodec::Boolean),
                    CapabilityDescriptor::new(
                        "button_1",
                        CapabilitySource::Command {
                            cluster: cluster::ON_OFF,
                            endpoint: 1,
                            actions,
                            payload_actions,
                        },
                    ),
                ],
                vec![cluster::TUYA],
                0,
                VendorQuirks::default(),
                false,
            )
            .unwrap(),
        )
    }

    fn bindings() -> DeviceBindings {
        let profile = profile();
        let mut b = DeviceBindings::new(Arc::clone(&profile));
        for desc in profile.command_descriptors() {
            b.commands.entry((1, cluster::ON_OFF)).or_default().push(desc.clone());
        }
        b
    }

    #[test]
    fn test_datapoint_routing() {
        let pubs = bindings().on_datapoints(&[
            Datapoint::integer(2, 215),
            Datapoint::bool(7, true),
            Datapoint::integer(99, 1),
            // Wrong wire type for a boolean codec is dropped alone.
            Datapoint::string(7, "x").unwrap(),
        ]);
        assert_eq!(
            pubs,
            vec![
                Publication::value("target_temperature", 21.5),
                Publication::value("child_lock", true),
            ]
        );
    }

    #[test]
    fn test_command_routing() {
        let b = bindings();
        assert_eq!(
            b.on_command(1, cluster::ON_OFF, 0xFD, &[0x01]),
            vec![Publication::trigger("button_1", "double")]
        );
        assert_eq!(
            b.on_command(1, cluster::ON_OFF, 0x01, &[]),
            vec![Publication::trigger("button_1", "on")]
        );
        assert!(b.on_command(1, cluster::ON_OFF, 0x02, &[]).is_empty());
        assert!(b.on_command(2, cluster::ON_OFF, 0x01, &[]).is_empty());
    }

    #[test]
    fn test_structured_ignored_without_quirk() {
        let addr = AttributeAddr {
            endpoint: 1,
            cluster: cluster::BASIC,
            attribute: basic_attrs::LUMI_STRUCTURED,
        };
        assert!(bindings()
            .on_attribute(addr, &AttributeValue::Bytes(vec![0x01, 0x21, 0xB8, 0x0B]))
            .is_empty());
    }
}
