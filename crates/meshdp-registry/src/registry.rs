//! Fingerprint Registry - immutable `Fingerprint -> Profile` table.
//!
//! Lookup order:
//! 1. exact `(manufacturer, model)` match
//! 2. vendor family match on `(manufacturer prefix, model)`
//! 3. the catch-all fallback profile, if one is declared
//!
//! The registry is produced once by [`crate::RegistryBuilder`] and can be
//! shipped as a versioned JSON snapshot.

use crate::error::{RegistryError, Result};
use meshdp_core::config::registry::SNAPSHOT_VERSION;
use meshdp_core::{CapabilityProfile, FamilyKey, Fingerprint, ProfileId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// How a lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Prefix,
    Generic,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Prefix => write!(f, "prefix"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// Successful lookup.
#[derive(Debug, Clone)]
pub struct Lookup {
    pub profile: Arc<CapabilityProfile>,
    pub kind: MatchKind,
}

/// Read-only fingerprint table.
#[derive(Debug, Clone)]
pub struct FingerprintRegistry {
    profiles: HashMap<ProfileId, Arc<CapabilityProfile>>,
    exact: HashMap<Fingerprint, ProfileId>,
    prefix: HashMap<FamilyKey, ProfileId>,
    fallback: Option<ProfileId>,
    prefix_len: usize,
}

impl FingerprintRegistry {
    /// Assemble a registry from a resolved table.
    ///
    /// Every table entry must name a known profile.
    pub fn from_parts(
        profiles: Vec<CapabilityProfile>,
        table: BTreeMap<Fingerprint, ProfileId>,
        prefix_len: usize,
    ) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(profiles.len());
        let mut fallback: Option<ProfileId> = None;
        for profile in profiles {
            if profile.fallback {
                if let Some(first) = &fallback {
                    return Err(RegistryError::MultipleFallbacks {
                        first: first.clone(),
                        second: profile.id.clone(),
                    });
                }
                fallback = Some(profile.id.clone());
            }
            let id = profile.id.clone();
            if by_id.insert(id.clone(), Arc::new(profile)).is_some() {
                return Err(RegistryError::DuplicateProfile(id));
            }
        }

        for (fp, id) in &table {
            if !by_id.contains_key(id) {
                return Err(RegistryError::Snapshot(format!(
                    "{} maps to unknown profile '{}'",
                    fp, id
                )));
            }
        }

        let prefix = build_prefix_index(&table, prefix_len);
        let exact: HashMap<Fingerprint, ProfileId> = table.into_iter().collect();

        info!(
            profiles = by_id.len(),
            fingerprints = exact.len(),
            families = prefix.len(),
            fallback = fallback.as_deref().unwrap_or("-"),
            "Fingerprint registry ready"
        );

        Ok(Self {
            profiles: by_id,
            exact,
            prefix,
            fallback,
            prefix_len,
        })
    }

    /// Resolve a device's identifiers to its profile.
    pub fn lookup(&self, manufacturer_id: &str, model_id: &str) -> Option<Lookup> {
        self.lookup_fingerprint(&Fingerprint::new(manufacturer_id, model_id))
    }

    pub fn lookup_fingerprint(&self, fingerprint: &Fingerprint) -> Option<Lookup> {
        if let Some(id) = self.exact.get(fingerprint) {
            return self.hit(id, MatchKind::Exact);
        }
        if let Some(key) = fingerprint.family_key(self.prefix_len) {
            if let Some(id) = self.prefix.get(&key) {
                debug!(fingerprint = %fingerprint, family = %key, "Family prefix match");
                return self.hit(id, MatchKind::Prefix);
            }
        }
        let id = self.fallback.as_ref()?;
        debug!(fingerprint = %fingerprint, "No match, using fallback profile");
        self.hit(id, MatchKind::Generic)
    }

    fn hit(&self, id: &str, kind: MatchKind) -> Option<Lookup> {
        self.profiles.get(id).map(|profile| Lookup {
            profile: Arc::clone(profile),
            kind,
        })
    }

    pub fn profile(&self, id: &str) -> Option<Arc<CapabilityProfile>> {
        self.profiles.get(id).cloned()
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }

    pub fn fingerprint_count(&self) -> usize {
        self.exact.len()
    }

    pub fn fallback_profile(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    /// Exact table entries, sorted.
    pub fn entries(&self) -> BTreeMap<&Fingerprint, &str> {
        self.exact.iter().map(|(fp, id)| (fp, id.as_str())).collect()
    }

    pub fn to_snapshot(&self) -> RegistrySnapshot {
        let mut profiles: Vec<CapabilityProfile> =
            self.profiles.values().map(|p| (**p).clone()).collect();
        profiles.sort_by_key(|p| p.priority);

        let entries = self
            .entries()
            .into_iter()
            .map(|(fp, id)| SnapshotEntry {
                fingerprint: fp.clone(),
                profile: id.to_string(),
            })
            .collect();

        RegistrySnapshot {
            version: SNAPSHOT_VERSION,
            prefix_len: self.prefix_len,
            profiles,
            entries,
        }
    }

    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Result<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(RegistryError::SnapshotVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        let mut table = BTreeMap::new();
        for entry in snapshot.entries {
            if let Some(previous) = table.insert(entry.fingerprint.clone(), entry.profile) {
                return Err(RegistryError::Snapshot(format!(
                    "{} listed twice (first for '{}')",
                    entry.fingerprint, previous
                )));
            }
        }
        Self::from_parts(snapshot.profiles, table, snapshot.prefix_len)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.to_snapshot())
            .map_err(|e| RegistryError::Snapshot(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: RegistrySnapshot =
            serde_json::from_str(json).map_err(|e| RegistryError::Snapshot(e.to_string()))?;
        Self::from_snapshot(snapshot)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Saved registry snapshot");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }
}

/// Family index: a key is kept only when every fingerprint in the family maps
/// to the same profile.
fn build_prefix_index(
    table: &BTreeMap<Fingerprint, ProfileId>,
    prefix_len: usize,
) -> HashMap<FamilyKey, ProfileId> {
    let mut families: HashMap<FamilyKey, Option<ProfileId>> = HashMap::new();
    for (fp, id) in table {
        let Some(key) = fp.family_key(prefix_len) else {
            continue;
        };
        match families.get_mut(&key) {
            None => {
                families.insert(key, Some(id.clone()));
            }
            Some(slot) => {
                if slot.as_ref().is_some_and(|existing| existing != id) {
                    debug!(family = %key, "Ambiguous vendor family, no prefix match");
                    *slot = None;
                }
            }
        }
    }
    families
        .into_iter()
        .filter_map(|(key, id)| id.map(|id| (key, id)))
        .collect()
}

/// Serialized registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub version: u32,
    pub prefix_len: usize,
    pub profiles: Vec<CapabilityProfile>,
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub fingerprint: Fingerprint,
    pub profile: ProfileId,
}
