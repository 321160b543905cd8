//! Lumi structured attribute quirk.

use crate::binder::Publication;
use meshdp_core::CapabilityProfile;
use meshdp_protocol::structured;
use tracing::debug;

pub const VOLTAGE: &str = "measure_voltage";
pub const BATTERY: &str = "measure_battery";
pub const TEMPERATURE: &str = "measure_temperature";

/// Values carried by one structured attribute report, limited to the
/// capabilities the profile declares.
pub fn publications(profile: &CapabilityProfile, data: &[u8]) -> Vec<Publication> {
    let report = match structured::parse(data) {
        Ok(report) => report,
        Err(e) => {
            debug!(profile = %profile.id, error = %e, "Unparseable structured attribute");
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    if let Some(mv) = report.battery_mv() {
        if profile.has_capability(VOLTAGE) {
            out.push(Publication::value(VOLTAGE, f64::from(mv) / 1000.0));
        }
        if profile.has_capability(BATTERY) {
            out.push(Publication::value(
                BATTERY,
                f64::from(structured::battery_percent(mv)),
            ));
        }
    }
    if let Some(temp) = report.device_temperature() {
        if profile.has_capability(TEMPERATURE) {
            out.push(Publication::value(TEMPERATURE, temp as f64));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshdp_core::{CapabilityDescriptor, CapabilitySource, Category, VendorQuirks};

    fn profile(capabilities: &[&str]) -> CapabilityProfile {
        let descriptors = capabilities
            .iter()
            .map(|name| {
                CapabilityDescriptor::new(
                    *name,
                    CapabilitySource::Attribute {
                        cluster: 0x0001,
                        attribute: 0x0020,
                        endpoint: 1,
                    },
                )
            })
            .collect();
        CapabilityProfile::new(
            "lumi_button",
            Category::parse("wireless button"),
            descriptors,
            vec![],
            0,
            VendorQuirks {
                structured_attribute: true,
                ..VendorQuirks::default()
            },
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_declared_capabilities_only() {
        let data = [0x01, 0x21, 0xBE, 0x0A, 0x03, 0x28, 0x1A];
        let pubs = publications(&profile(&[BATTERY]), &data);
        assert_eq!(pubs, vec![Publication::value(BATTERY, 50.0)]);

        let pubs = publications(&profile(&[VOLTAGE, BATTERY, TEMPERATURE]), &data);
        assert_eq!(pubs.len(), 3);
        assert_eq!(pubs[0], Publication::value(VOLTAGE, 2.75));
        assert_eq!(pubs[2], Publication::value(TEMPERATURE, 26.0));
    }

    #[test]
    fn test_garbage_is_ignored() {
        assert!(publications(&profile(&[BATTERY]), &[0x01, 0xFE]).is_empty());
    }
}
