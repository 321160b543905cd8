//! Profile manifests.
//!
//! Manifests are JSON documents, one profile per object. A file holds either a
//! single profile or `{"profiles": [...]}`. Declaration order is the order of
//! files (sorted by name) and of profiles within a file.

use crate::error::{RegistryError, Result};
use meshdp_core::{
    CapabilityDescriptor, CapabilityProfile, Category, ProfileError, Specificity, VendorQuirks,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A fingerprint exactly as written in a manifest, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeclaredFingerprint {
    pub manufacturer: String,
    pub model: String,
}

impl DeclaredFingerprint {
    pub fn new(manufacturer: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            manufacturer: manufacturer.into(),
            model: model.into(),
        }
    }
}

/// One declared profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileManifest {
    pub id: String,
    /// Free-form category tag, e.g. "motion sensor".
    pub category: String,
    /// Overrides the specificity inferred from the category tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specificity: Option<Specificity>,
    #[serde(default)]
    pub fingerprints: Vec<DeclaredFingerprint>,
    /// Combined with every entry of `product_ids`.
    #[serde(default)]
    pub manufacturer_names: Vec<String>,
    #[serde(default)]
    pub product_ids: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<CapabilityDescriptor>,
    #[serde(default)]
    pub cluster_bindings: Vec<u16>,
    #[serde(default)]
    pub quirks: VendorQuirks,
    #[serde(default)]
    pub fallback: bool,
}

impl ProfileManifest {
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            specificity: None,
            fingerprints: Vec::new(),
            manufacturer_names: Vec::new(),
            product_ids: Vec::new(),
            capabilities: Vec::new(),
            cluster_bindings: Vec::new(),
            quirks: VendorQuirks::default(),
            fallback: false,
        }
    }

    pub fn with_fingerprint(mut self, manufacturer: &str, model: &str) -> Self {
        self.fingerprints
            .push(DeclaredFingerprint::new(manufacturer, model));
        self
    }

    pub fn with_capability(mut self, descriptor: CapabilityDescriptor) -> Self {
        self.capabilities.push(descriptor);
        self
    }

    pub fn with_quirks(mut self, quirks: VendorQuirks) -> Self {
        self.quirks = quirks;
        self
    }

    pub fn as_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }

    pub fn category(&self) -> Category {
        match self.specificity {
            Some(s) => Category::with_specificity(&self.category, s),
            None => Category::parse(&self.category),
        }
    }

    /// Explicit pairs followed by the `manufacturer_names` x `product_ids`
    /// cross product, in declaration order.
    pub fn declared_fingerprints(&self) -> Vec<DeclaredFingerprint> {
        let mut out = self.fingerprints.clone();
        for manufacturer in &self.manufacturer_names {
            for model in &self.product_ids {
                out.push(DeclaredFingerprint::new(manufacturer.clone(), model.clone()));
            }
        }
        out
    }

    /// Build the runtime profile; `priority` is the declaration index.
    pub fn to_profile(&self, priority: u32) -> std::result::Result<CapabilityProfile, ProfileError> {
        CapabilityProfile::new(
            self.id.clone(),
            self.category(),
            self.capabilities.clone(),
            self.cluster_bindings.clone(),
            priority,
            self.quirks,
            self.fallback,
        )
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    Many { profiles: Vec<ProfileManifest> },
    One(Box<ProfileManifest>),
}

/// Parse a manifest document.
pub fn parse_manifest(content: &str, path: &Path) -> Result<Vec<ProfileManifest>> {
    let file: ManifestFile =
        serde_json::from_str(content).map_err(|source| RegistryError::Manifest {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(match file {
        ManifestFile::Many { profiles } => profiles,
        ManifestFile::One(profile) => vec![*profile],
    })
}

/// Load one manifest file.
pub fn load_file(path: impl AsRef<Path>) -> Result<Vec<ProfileManifest>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let manifests = parse_manifest(&content, path)?;
    debug!(path = %path.display(), count = manifests.len(), "Loaded manifest file");
    Ok(manifests)
}

/// Load every `*.json` manifest in a directory, ordered by file name.
pub fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<ProfileManifest>> {
    let dir = dir.as_ref();
    let io_err = |source| RegistryError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut manifests = Vec::new();
    for path in &paths {
        manifests.extend(load_file(path)?);
    }
    info!(
        dir = %dir.display(),
        files = paths.len(),
        profiles = manifests.len(),
        "Loaded manifest directory"
    );
    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_product() {
        let mut m = ProfileManifest::new("plug", "plug").with_fingerprint("_TZ3000_explicit", "TS011F");
        m.manufacturer_names = vec!["_TZ3000_a".into(), "_TZ3000_b".into()];
        m.product_ids = vec!["TS011F".into(), "TS0121".into()];

        let fps = m.declared_fingerprints();
        assert_eq!(fps.len(), 5);
        assert_eq!(fps[0], DeclaredFingerprint::new("_TZ3000_explicit", "TS011F"));
        assert_eq!(fps[2], DeclaredFingerprint::new("_TZ3000_a", "TS0121"));
        assert_eq!(fps[4], DeclaredFingerprint::new("_TZ3000_b", "TS0121"));
    }

    #[test]
    fn test_parse_single_and_many() {
        let one = r#"{"id": "a", "category": "motion sensor"}"#;
        let many = r#"{"profiles": [{"id": "a", "category": "sensor"}, {"id": "b", "category": "generic"}]}"#;
        let path = Path::new("inline.json");

        assert_eq!(parse_manifest(one, path).unwrap().len(), 1);
        let parsed = parse_manifest(many, path).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].category().specificity, Specificity::Generic);
    }

    #[test]
    fn test_specificity_override() {
        let mut m = ProfileManifest::new("a", "sensor");
        assert_eq!(m.category().specificity, Specificity::Partial);
        m.specificity = Some(Specificity::Exact);
        assert_eq!(m.category().specificity, Specificity::Exact);
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = parse_manifest("{", Path::new("broken.json")).unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }
}
