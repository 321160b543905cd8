//! Registry build and load errors.

use meshdp_core::{Fingerprint, ProfileError, ProfileId};
use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, RegistryError>;

/// A fingerprint the resolver could not assign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// Two or more top-ranked claimants share the same specificity.
    EqualPriority {
        fingerprint: Fingerprint,
        profiles: Vec<ProfileId>,
    },
    /// A repaired (malformed) declaration lands on a fingerprint that another
    /// profile declares as well.
    AmbiguousRepair {
        fingerprint: Fingerprint,
        repaired_by: Vec<ProfileId>,
        profiles: Vec<ProfileId>,
    },
}

impl Conflict {
    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            Self::EqualPriority { fingerprint, .. } | Self::AmbiguousRepair { fingerprint, .. } => {
                fingerprint
            }
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EqualPriority {
                fingerprint,
                profiles,
            } => write!(
                f,
                "{} claimed with equal priority by [{}]",
                fingerprint,
                profiles.join(", ")
            ),
            Self::AmbiguousRepair {
                fingerprint,
                repaired_by,
                profiles,
            } => write!(
                f,
                "{} reached by repaired declaration(s) of [{}] and also claimed by [{}]",
                fingerprint,
                repaired_by.join(", "),
                profiles.join(", ")
            ),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("profile id '{0}' declared more than once")]
    DuplicateProfile(ProfileId),

    #[error("profile '{0}' declares an empty manufacturer or model identifier")]
    EmptyIdentifier(ProfileId),

    #[error("more than one fallback profile: '{first}' and '{second}'")]
    MultipleFallbacks { first: ProfileId, second: ProfileId },

    #[error("{} unresolved fingerprint collision(s); first: {}", .0.len(), first_conflict(.0))]
    Unresolved(Vec<Conflict>),

    #[error("invalid registry snapshot: {0}")]
    Snapshot(String),

    #[error("unsupported registry snapshot version {found} (expected {expected})")]
    SnapshotVersion { found: u32, expected: u32 },
}

fn first_conflict(conflicts: &[Conflict]) -> String {
    conflicts
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}
