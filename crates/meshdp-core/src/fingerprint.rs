//! Device fingerprints.
//!
//! A fingerprint is the `(manufacturer, model)` pair a device reports from its
//! basic cluster when it joins. Both halves are canonicalized on construction
//! (trimmed, ASCII lowercase) so two declarations that differ only by case are
//! the same fingerprint everywhere in the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical form of a vendor identifier.
pub fn canonicalize(id: &str) -> String {
    id.trim().to_ascii_lowercase()
}

/// Normalized `(manufacturer, model)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "FingerprintRepr", into = "FingerprintRepr")]
pub struct Fingerprint {
    manufacturer_id: String,
    model_id: String,
}

impl Fingerprint {
    /// Create a fingerprint, canonicalizing both identifiers.
    pub fn new(manufacturer_id: impl AsRef<str>, model_id: impl AsRef<str>) -> Self {
        Self {
            manufacturer_id: canonicalize(manufacturer_id.as_ref()),
            model_id: canonicalize(model_id.as_ref()),
        }
    }

    pub fn manufacturer_id(&self) -> &str {
        &self.manufacturer_id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Fixed-width vendor family prefix of the manufacturer identifier.
    ///
    /// Returns `None` when the identifier is not longer than the prefix, since
    /// such an identifier names a single product rather than a family.
    pub fn manufacturer_prefix(&self, len: usize) -> Option<&str> {
        if len == 0 || self.manufacturer_id.len() <= len {
            return None;
        }
        self.manufacturer_id.get(..len)
    }

    /// Key used by the prefix index: `(prefix, model)`.
    pub fn family_key(&self, len: usize) -> Option<FamilyKey> {
        self.manufacturer_prefix(len).map(|prefix| FamilyKey {
            prefix: prefix.to_string(),
            model_id: self.model_id.clone(),
        })
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.manufacturer_id, self.model_id)
    }
}

/// Vendor family key: manufacturer prefix plus model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FamilyKey {
    pub prefix: String,
    pub model_id: String,
}

impl fmt::Display for FamilyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*/{}", self.prefix, self.model_id)
    }
}

#[derive(Serialize, Deserialize)]
struct FingerprintRepr {
    manufacturer: String,
    model: String,
}

impl From<FingerprintRepr> for Fingerprint {
    fn from(repr: FingerprintRepr) -> Self {
        Fingerprint::new(repr.manufacturer, repr.model)
    }
}

impl From<Fingerprint> for FingerprintRepr {
    fn from(fp: Fingerprint) -> Self {
        FingerprintRepr {
            manufacturer: fp.manufacturer_id,
            model: fp.model_id,
        }
    }
}
