//! Fingerprint registry for meshdp.
//!
//! Profile manifests are normalized and run through the collision resolver
//! once, at build time, producing an immutable [`FingerprintRegistry`] that the
//! runtime only reads.

pub mod builder;
pub mod error;
pub mod manifest;
pub mod normalize;
pub mod registry;
pub mod resolver;

pub use builder::{BuildOutput, BuildReport, RegistryBuilder};
pub use error::{Conflict, RegistryError, Result};
pub use manifest::{DeclaredFingerprint, ProfileManifest};
pub use normalize::Repair;
pub use registry::{FingerprintRegistry, Lookup, MatchKind, RegistrySnapshot};
pub use resolver::{rank, CollisionReason, CollisionRecord, CollisionResolver};
