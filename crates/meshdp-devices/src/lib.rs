//! Device runtime for meshdp.
//!
//! Identifies joined devices, binds their capabilities through the
//! [`FallbackExecutor`], applies vendor quirks and publishes decoded values.
//!
//! ## Example
//!
//! ```ignore
//! let manager = DeviceManager::new(registry, transport, publisher, &config);
//! let report = manager.join(DeviceHandle::new("0x00158d0001a2b3c4")).await?;
//! manager.handle_frame(&report.device_id, frame).await?;
//! ```

pub mod binder;
pub mod device;
pub mod error;
pub mod executor;
pub mod identify;
pub mod mesh;
pub mod publish;
pub mod quirks;

pub use binder::{
    BindFailure, BindMode, BindReport, BoundCapability, CapabilityBinder, DeviceBindings,
    PollTarget, Publication,
};
pub use device::{DeviceManager, DeviceStatus};
pub use error::{BindError, DeviceError, PublishError, Result};
pub use executor::{
    Executed, ExecutorError, ExecutorStats, FallbackExecutor, OperationStats, RetryPolicy, Strategy,
};
pub use identify::identify;
pub use mesh::{
    AttributeAddr, AttributeValue, DeviceHandle, DeviceId, InboundFrame, MeshError, MeshResult,
    MeshTransport,
};
pub use publish::{CapabilityPublisher, CapabilityStore, DeviceEvent, DeviceEventBus};
