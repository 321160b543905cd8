//! Device categories and their collision-ranking specificity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How specific a category is. Higher wins a fingerprint collision.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Specificity {
    /// Catch-all profiles ("generic sensor", "universal").
    #[default]
    Generic = 0,
    /// A device family without a concrete device class ("sensor", "switch").
    Partial = 1,
    /// A concrete device class ("motion sensor", "2-gang switch").
    Exact = 2,
}

impl Specificity {
    pub fn rank(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for Specificity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => write!(f, "generic"),
            Self::Partial => write!(f, "partial"),
            Self::Exact => write!(f, "exact"),
        }
    }
}

/// Family names that describe a group of devices rather than one device class.
const FAMILY_TAGS: &[&str] = &[
    "sensor",
    "switch",
    "light",
    "lighting",
    "plug",
    "socket",
    "cover",
    "remote",
    "controller",
    "actuator",
    "climate",
    "security",
    "energy",
];

/// Tags that mark a catch-all profile.
const GENERIC_TAGS: &[&str] = &["generic", "universal", "unknown", "catch_all", "other", "default"];

/// A normalized category tag with its specificity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub specificity: Specificity,
}

impl Category {
    /// Parse a manifest category tag, classifying its specificity.
    ///
    /// `"Motion Sensor"`, `"motion-sensor"` and `"motion_sensor"` all normalize
    /// to `motion_sensor`.
    pub fn parse(tag: &str) -> Self {
        let name = normalize_tag(tag);
        let specificity = classify(&name);
        Self { name, specificity }
    }

    /// Parse a tag but force its specificity (manifest override).
    pub fn with_specificity(tag: &str, specificity: Specificity) -> Self {
        Self {
            name: normalize_tag(tag),
            specificity,
        }
    }

    pub fn is_generic(&self) -> bool {
        self.specificity == Specificity::Generic
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.specificity)
    }
}

fn normalize_tag(tag: &str) -> String {
    let mut out = String::with_capacity(tag.len());
    for c in tag.trim().chars() {
        if c.is_whitespace() || c == '-' {
            if !out.ends_with('_') {
                out.push('_');
            }
        } else {
            out.push(c.to_ascii_lowercase());
        }
    }
    out.trim_matches('_').to_string()
}

fn classify(name: &str) -> Specificity {
    if name.is_empty()
        || GENERIC_TAGS.contains(&name)
        || name.starts_with("generic_")
        || name.ends_with("_generic")
        || name.starts_with("universal_")
    {
        Specificity::Generic
    } else if FAMILY_TAGS.contains(&name) {
        Specificity::Partial
    } else {
        Specificity::Exact
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specific_categories() {
        assert_eq!(Category::parse("motion sensor").specificity, Specificity::Exact);
        assert_eq!(Category::parse("switch_2gang").specificity, Specificity::Exact);
        assert_eq!(Category::parse("Soil-Sensor").name, "soil_sensor");
    }

    #[test]
    fn test_partial_and_generic() {
        assert_eq!(Category::parse("sensor").specificity, Specificity::Partial);
        assert_eq!(Category::parse("generic sensor").specificity, Specificity::Generic);
        assert_eq!(Category::parse("universal").specificity, Specificity::Generic);
        assert_eq!(Category::parse("").specificity, Specificity::Generic);
    }

    #[test]
    fn test_ordering() {
        assert!(Specificity::Exact > Specificity::Partial);
        assert!(Specificity::Partial > Specificity::Generic);
    }

    #[test]
    fn test_override() {
        let cat = Category::with_specificity("Sensor", Specificity::Exact);
        assert_eq!(cat.name, "sensor");
        assert_eq!(cat.specificity, Specificity::Exact);
    }
}
