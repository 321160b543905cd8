//! Fingerprint normalization.
//!
//! Declared identifiers are canonicalized (trimmed, lowercased). A manufacturer
//! field that accidentally carries the model identifier as a suffix, such as
//! `_TZ3000_abc12345TS0601` or `_TZ3000_abc12345 TS0601` for model `TS0601`,
//! is repaired by stripping the suffix. Repairs are recorded for the build
//! report.

use crate::manifest::DeclaredFingerprint;
use meshdp_core::{canonicalize, Fingerprint, ProfileId};
use serde::{Deserialize, Serialize};

const SEPARATORS: &[char] = &['_', '-', ' ', '/', '.', ':'];

/// What normalization changed beyond case and whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repair {
    pub profile: ProfileId,
    pub declared: DeclaredFingerprint,
    pub repaired: Fingerprint,
}

/// A declared fingerprint after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub fingerprint: Fingerprint,
    /// Set when the model suffix was stripped from the manufacturer.
    pub repaired: bool,
}

/// Normalize one declaration.
///
/// Returns `None` when either identifier is empty after canonicalization.
pub fn normalize(declared: &DeclaredFingerprint) -> Option<Normalized> {
    let manufacturer = canonicalize(&declared.manufacturer);
    let model = canonicalize(&declared.model);
    if manufacturer.is_empty() || model.is_empty() {
        return None;
    }

    match strip_model_suffix(&manufacturer, &model) {
        Some(stripped) => Some(Normalized {
            fingerprint: Fingerprint::new(stripped, &model),
            repaired: true,
        }),
        None => Some(Normalized {
            fingerprint: Fingerprint::new(&manufacturer, &model),
            repaired: false,
        }),
    }
}

fn strip_model_suffix<'a>(manufacturer: &'a str, model: &str) -> Option<&'a str> {
    if manufacturer.len() <= model.len() {
        return None;
    }
    let head = manufacturer.strip_suffix(model)?;
    let head = head.trim_end_matches(SEPARATORS);
    // A manufacturer made only of separators plus the model is not repairable.
    if head.trim_start_matches(SEPARATORS).is_empty() {
        return None;
    }
    Some(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(m: &str, model: &str) -> Normalized {
        normalize(&DeclaredFingerprint::new(m, model)).unwrap()
    }

    #[test]
    fn test_case_only() {
        let n = norm("_VEND_ABC12345", "MODEL01");
        assert_eq!(n.fingerprint, Fingerprint::new("_vend_abc12345", "model01"));
        assert!(!n.repaired);
    }

    #[test]
    fn test_model_suffix_stripped() {
        for manufacturer in [
            "_TZ3000_abc12345TS0601",
            "_TZ3000_abc12345 TS0601",
            "_TZ3000_abc12345_ts0601",
            "_TZ3000_abc12345/TS0601",
        ] {
            let n = norm(manufacturer, "TS0601");
            assert_eq!(
                n.fingerprint,
                Fingerprint::new("_tz3000_abc12345", "ts0601"),
                "{}",
                manufacturer
            );
            assert!(n.repaired);
        }
    }

    #[test]
    fn test_not_stripped() {
        assert!(!norm("LUMI", "lumi").repaired);
        assert!(!norm("_TS0601", "TS0601").repaired);
        assert!(!norm("_TZE200_abc", "TS0601").repaired);
    }

    #[test]
    fn test_empty_rejected() {
        assert!(normalize(&DeclaredFingerprint::new("  ", "TS0601")).is_none());
        assert!(normalize(&DeclaredFingerprint::new("_TZ3000_x", "")).is_none());
    }
}
