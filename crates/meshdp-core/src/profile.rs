//! Capability profiles.
//!
//! A profile is built once from manifest data and is read-only afterwards.

use crate::capability::{CapabilityDescriptor, SourceKind};
use crate::category::{Category, Specificity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stable profile identifier (the manifest `id`).
pub type ProfileId = String;

/// Errors raised while assembling a profile.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProfileError {
    #[error("profile '{profile}': datapoint {dp} is mapped by both '{first}' and '{second}'")]
    DuplicateDatapoint {
        profile: ProfileId,
        dp: u8,
        first: String,
        second: String,
    },

    #[error("profile '{profile}': capability '{capability}' declared twice")]
    DuplicateCapability {
        profile: ProfileId,
        capability: String,
    },

    #[error("profile '{profile}': capability '{capability}': {reason}")]
    InvalidDescriptor {
        profile: ProfileId,
        capability: String,
        reason: String,
    },
}

/// Vendor-family behaviours layered on top of the ordinary capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorQuirks {
    /// Answer device time requests and resend the time daily.
    #[serde(default)]
    pub time_sync: bool,
    /// Parse the multi-field structured attribute on the basic cluster.
    #[serde(default)]
    pub structured_attribute: bool,
}

impl VendorQuirks {
    pub fn any(&self) -> bool {
        self.time_sync || self.structured_attribute
    }
}

/// Read-only description of what a device model can do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    pub id: ProfileId,
    pub category: Category,
    /// Attribute and command capabilities.
    pub capabilities: Vec<CapabilityDescriptor>,
    /// Clusters the hub binds to for this profile.
    #[serde(default)]
    pub cluster_bindings: Vec<u16>,
    /// Datapoint capabilities keyed by dp id.
    #[serde(default)]
    pub datapoint_map: BTreeMap<u8, CapabilityDescriptor>,
    /// Manifest declaration index; lower is earlier.
    pub priority: u32,
    #[serde(default)]
    pub quirks: VendorQuirks,
    /// Catch-all profile used when nothing else matches.
    #[serde(default)]
    pub fallback: bool,
}

impl CapabilityProfile {
    /// Assemble a profile, splitting datapoint descriptors into the dp map.
    ///
    /// Fails if two descriptors claim the same datapoint or the same
    /// capability name, or if a descriptor's codec is unusable.
    pub fn new(
        id: impl Into<ProfileId>,
        category: Category,
        descriptors: Vec<CapabilityDescriptor>,
        cluster_bindings: Vec<u16>,
        priority: u32,
        quirks: VendorQuirks,
        fallback: bool,
    ) -> Result<Self, ProfileError> {
        let id = id.into();
        let mut capabilities = Vec::new();
        let mut datapoint_map: BTreeMap<u8, CapabilityDescriptor> = BTreeMap::new();
        let mut seen: Vec<&str> = Vec::new();

        for desc in &descriptors {
            if seen.contains(&desc.capability.as_str()) {
                return Err(ProfileError::DuplicateCapability {
                    profile: id,
                    capability: desc.capability.clone(),
                });
            }
            seen.push(&desc.capability);

            if let Err(e) = desc.codec.validate() {
                return Err(ProfileError::InvalidDescriptor {
                    profile: id,
                    capability: desc.capability.clone(),
                    reason: e.to_string(),
                });
            }
        }

        for desc in descriptors {
            match desc.datapoint_id() {
                Some(dp) => {
                    if let Some(existing) = datapoint_map.get(&dp) {
                        return Err(ProfileError::DuplicateDatapoint {
                            profile: id,
                            dp,
                            first: existing.capability.clone(),
                            second: desc.capability,
                        });
                    }
                    datapoint_map.insert(dp, desc);
                }
                None => capabilities.push(desc),
            }
        }

        Ok(Self {
            id,
            category,
            capabilities,
            cluster_bindings,
            datapoint_map,
            priority,
            quirks,
            fallback,
        })
    }

    pub fn specificity(&self) -> Specificity {
        self.category.specificity
    }

    pub fn attribute_descriptors(&self) -> impl Iterator<Item = &CapabilityDescriptor> {
        self.capabilities
            .iter()
            .filter(|d| d.kind() == SourceKind::Attribute)
    }

    pub fn command_descriptors(&self) -> impl Iterator<Item = &CapabilityDescriptor> {
        self.capabilities
            .iter()
            .filter(|d| d.kind() == SourceKind::Command)
    }

    pub fn datapoint(&self, dp: u8) -> Option<&CapabilityDescriptor> {
        self.datapoint_map.get(&dp)
    }

    /// Find a descriptor by capability name across all sources.
    pub fn descriptor(&self, capability: &str) -> Option<&CapabilityDescriptor> {
        self.capabilities
            .iter()
            .chain(self.datapoint_map.values())
            .find(|d| d.capability == capability)
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.descriptor(capability).is_some()
    }

    /// All capability names, attribute/command first then datapoints by id.
    pub fn capability_names(&self) -> Vec<&str> {
        self.capabilities
            .iter()
            .chain(self.datapoint_map.values())
            .map(|d| d.capability.as_str())
            .collect()
    }

    pub fn uses_datapoints(&self) -> bool {
        !self.datapoint_map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilitySource, ValueCodec};

    fn dp(name: &str, dp: u8) -> CapabilityDescriptor {
        CapabilityDescriptor::new(name, CapabilitySource::Datapoint { dp })
    }

    #[test]
    fn test_splits_datapoints() {
        let profile = CapabilityProfile::new(
            "soil_sensor",
            Category::parse("soil sensor"),
            vec![
                dp("measure_temperature", 5)
                    .with_codec(ValueCodec::Divide { divisor: 10.0 }),
                dp("measure_humidity", 3),
                CapabilityDescriptor::new(
                    "measure_battery",
                    CapabilitySource::Attribute {
                        cluster: 0x0001,
                        attribute: 0x0021,
                        endpoint: 1,
                    },
                ),
            ],
            vec![0xEF00],
            0,
            VendorQuirks::default(),
            false,
        )
        .unwrap();

        assert_eq!(profile.datapoint_map.len(), 2);
        assert_eq!(profile.attribute_descriptors().count(), 1);
        assert_eq!(
            profile.datapoint(5).map(|d| d.capability.as_str()),
            Some("measure_temperature")
        );
        assert!(profile.has_capability("measure_battery"));
        assert_eq!(
            profile.capability_names(),
            vec!["measure_battery", "measure_humidity", "measure_temperature"]
        );
    }

    #[test]
    fn test_duplicate_datapoint_rejected() {
        let err = CapabilityProfile::new(
            "bad",
            Category::parse("sensor"),
            vec![dp("measure_temperature", 1), dp("measure_humidity", 1)],
            vec![],
            0,
            VendorQuirks::default(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, ProfileError::DuplicateDatapoint { dp: 1, .. }));
    }

    #[test]
    fn test_duplicate_capability_rejected() {
        let err = CapabilityProfile::new(
            "bad",
            Category::parse("sensor"),
            vec![dp("alarm", 1), dp("alarm", 2)],
            vec![],
            0,
            VendorQuirks::default(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, ProfileError::DuplicateCapability { .. }));
    }

    #[test]
    fn test_invalid_codec_rejected() {
        let err = CapabilityProfile::new(
            "bad",
            Category::parse("sensor"),
            vec![dp("measure_temperature", 1).with_codec(ValueCodec::Divide { divisor: 0.0 })],
            vec![],
            0,
            VendorQuirks::default(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, ProfileError::InvalidDescriptor { .. }));
    }
}
