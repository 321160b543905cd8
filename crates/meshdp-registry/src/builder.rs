//! Registry build step: manifests in, immutable registry plus report out.

use crate::error::{RegistryError, Result};
use crate::manifest::{self, ProfileManifest};
use crate::normalize::{self, Repair};
use crate::registry::FingerprintRegistry;
use crate::resolver::{Claim, CollisionRecord, CollisionResolver};
use meshdp_core::{CapabilityProfile, RegistryConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// Build-time diagnostics. Never shipped with the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildReport {
    pub profiles: usize,
    pub declared_fingerprints: usize,
    pub resolved_fingerprints: usize,
    pub collisions: Vec<CollisionRecord>,
    pub repairs: Vec<Repair>,
}

impl BuildReport {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| RegistryError::Snapshot(e.to_string()))
    }
}

/// Build output.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub registry: FingerprintRegistry,
    pub report: BuildReport,
}

/// Collects manifests in declaration order and runs the resolver.
#[derive(Debug, Clone, Default)]
pub struct RegistryBuilder {
    config: RegistryConfig,
    manifests: Vec<ProfileManifest>,
}

impl RegistryBuilder {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            manifests: Vec::new(),
        }
    }

    pub fn with_manifest(mut self, manifest: ProfileManifest) -> Self {
        self.manifests.push(manifest);
        self
    }

    pub fn add_manifest(&mut self, manifest: ProfileManifest) {
        self.manifests.push(manifest);
    }

    pub fn add_manifests(&mut self, manifests: impl IntoIterator<Item = ProfileManifest>) {
        self.manifests.extend(manifests);
    }

    /// Append every manifest found in `dir` (sorted by file name).
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<&mut Self> {
        let manifests = manifest::load_dir(dir)?;
        self.manifests.extend(manifests);
        Ok(self)
    }

    pub fn manifest_count(&self) -> usize {
        self.manifests.len()
    }

    pub fn build(self) -> Result<BuildOutput> {
        let mut seen_ids = HashSet::new();
        let mut profiles: Vec<CapabilityProfile> = Vec::with_capacity(self.manifests.len());
        let mut claims = Vec::new();
        let mut report = BuildReport::default();

        for (index, manifest) in self.manifests.iter().enumerate() {
            if !seen_ids.insert(manifest.id.clone()) {
                return Err(RegistryError::DuplicateProfile(manifest.id.clone()));
            }
            let priority = index as u32;
            let profile = manifest.to_profile(priority)?;

            for declared in manifest.declared_fingerprints() {
                report.declared_fingerprints += 1;
                let normalized = normalize::normalize(&declared)
                    .ok_or_else(|| RegistryError::EmptyIdentifier(manifest.id.clone()))?;
                if normalized.repaired {
                    warn!(
                        profile = %manifest.id,
                        declared = %format!("{}/{}", declared.manufacturer, declared.model),
                        repaired = %normalized.fingerprint,
                        "Repaired model suffix in manufacturer identifier"
                    );
                    report.repairs.push(Repair {
                        profile: manifest.id.clone(),
                        declared,
                        repaired: normalized.fingerprint.clone(),
                    });
                }
                claims.push(Claim {
                    fingerprint: normalized.fingerprint,
                    profile: manifest.id.clone(),
                    specificity: profile.specificity(),
                    declaration: priority,
                    repaired: normalized.repaired,
                });
            }
            profiles.push(profile);
        }

        let resolver = CollisionResolver::new(self.config.tie_break, self.config.strict_repairs);
        let resolution = resolver.resolve(claims)?;

        report.profiles = profiles.len();
        report.resolved_fingerprints = resolution.table.len();
        report.collisions = resolution.collisions;

        let registry =
            FingerprintRegistry::from_parts(profiles, resolution.table, self.config.prefix_len)?;

        info!(
            profiles = report.profiles,
            declared = report.declared_fingerprints,
            resolved = report.resolved_fingerprints,
            collisions = report.collisions.len(),
            repairs = report.repairs.len(),
            "Registry build complete"
        );
        Ok(BuildOutput { registry, report })
    }
}
