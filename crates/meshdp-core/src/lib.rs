//! Core types for meshdp.
//!
//! Fingerprints, categories, capability descriptors and profiles shared by the
//! registry builder, the datapoint codec and the device runtime.

pub mod capability;
pub mod category;
pub mod config;
pub mod fingerprint;
pub mod profile;
pub mod zcl;

pub use capability::{
    CapabilityDescriptor, CapabilitySource, CapabilityValue, RawValue, ReportingPolicy,
    SourceKind, ValueCodec, ValueError,
};
pub use category::{Category, Specificity};
pub use config::{
    BinderConfig, ConfigError, EngineConfig, ExecutorConfig, LogLevel, RegistryConfig,
    RuntimeConfig, TieBreak,
};
pub use fingerprint::{canonicalize, FamilyKey, Fingerprint};
pub use profile::{CapabilityProfile, ProfileError, ProfileId, VendorQuirks};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::capability::{
        CapabilityDescriptor, CapabilitySource, CapabilityValue, RawValue, ValueCodec,
    };
    pub use crate::category::{Category, Specificity};
    pub use crate::config::EngineConfig;
    pub use crate::fingerprint::Fingerprint;
    pub use crate::profile::{CapabilityProfile, ProfileId, VendorQuirks};
}
