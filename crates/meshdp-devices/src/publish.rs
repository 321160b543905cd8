//! Capability publication.
//!
//! [`CapabilityPublisher`] is the platform capability API (`set_value`,
//! `get_value`, trigger emission). [`CapabilityStore`] is the in-process
//! implementation: a last-known-value cache plus a broadcast event bus.

use crate::error::PublishError;
use crate::mesh::DeviceId;
use async_trait::async_trait;
use dashmap::DashMap;
use meshdp_core::CapabilityValue;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// Default event bus capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

/// Event published for a managed device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    Capability {
        device_id: DeviceId,
        capability: String,
        value: CapabilityValue,
        timestamp: i64,
    },
    Trigger {
        device_id: DeviceId,
        capability: String,
        action: String,
        timestamp: i64,
    },
    Availability {
        device_id: DeviceId,
        available: bool,
        reason: Option<String>,
        timestamp: i64,
    },
}

impl DeviceEvent {
    pub fn device_id(&self) -> &str {
        match self {
            Self::Capability { device_id, .. }
            | Self::Trigger { device_id, .. }
            | Self::Availability { device_id, .. } => device_id,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Capability { timestamp, .. }
            | Self::Trigger { timestamp, .. }
            | Self::Availability { timestamp, .. } => *timestamp,
        }
    }
}

/// Broadcast bus for [`DeviceEvent`]s.
#[derive(Debug, Clone)]
pub struct DeviceEventBus {
    tx: broadcast::Sender<DeviceEvent>,
}

impl Default for DeviceEventBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl DeviceEventBus {
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns `true` if at least one subscriber received the event.
    pub fn publish(&self, event: DeviceEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Platform capability API.
#[async_trait]
pub trait CapabilityPublisher: Send + Sync {
    async fn set_value(
        &self,
        device: &DeviceId,
        capability: &str,
        value: CapabilityValue,
    ) -> Result<(), PublishError>;

    fn get_value(&self, device: &DeviceId, capability: &str) -> Option<CapabilityValue>;

    async fn trigger(
        &self,
        device: &DeviceId,
        capability: &str,
        action: &str,
    ) -> Result<(), PublishError>;

    /// Device availability changed.
    async fn set_available(&self, device: &DeviceId, available: bool, reason: Option<String>);

    /// Forget everything about a removed device.
    fn forget(&self, device: &DeviceId);
}

/// In-memory publisher with last-known values and an event bus.
#[derive(Debug, Default)]
pub struct CapabilityStore {
    values: DashMap<(DeviceId, String), CapabilityValue>,
    bus: DeviceEventBus,
}

impl CapabilityStore {
    pub fn new(bus: DeviceEventBus) -> Self {
        Self {
            values: DashMap::new(),
            bus,
        }
    }

    pub fn bus(&self) -> &DeviceEventBus {
        &self.bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.bus.subscribe()
    }

    /// All known values of one device.
    pub fn device_values(&self, device: &str) -> Vec<(String, CapabilityValue)> {
        let mut values: Vec<(String, CapabilityValue)> = self
            .values
            .iter()
            .filter(|entry| entry.key().0 == device)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        values
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl CapabilityPublisher for CapabilityStore {
    async fn set_value(
        &self,
        device: &DeviceId,
        capability: &str,
        value: CapabilityValue,
    ) -> Result<(), PublishError> {
        if let CapabilityValue::Number(n) = value {
            if !n.is_finite() {
                return Err(PublishError::Rejected(
                    capability.to_string(),
                    format!("{} is not finite", n),
                ));
            }
        }
        trace!(device_id = %device, capability, value = %value, "Capability value");
        self.values
            .insert((device.clone(), capability.to_string()), value.clone());
        self.bus.publish(DeviceEvent::Capability {
            device_id: device.clone(),
            capability: capability.to_string(),
            value,
            timestamp: now(),
        });
        Ok(())
    }

    fn get_value(&self, device: &DeviceId, capability: &str) -> Option<CapabilityValue> {
        self.values
            .get(&(device.clone(), capability.to_string()))
            .map(|v| v.clone())
    }

    async fn trigger(
        &self,
        device: &DeviceId,
        capability: &str,
        action: &str,
    ) -> Result<(), PublishError> {
        trace!(device_id = %device, capability, action, "Trigger");
        self.bus.publish(DeviceEvent::Trigger {
            device_id: device.clone(),
            capability: capability.to_string(),
            action: action.to_string(),
            timestamp: now(),
        });
        Ok(())
    }

    async fn set_available(&self, device: &DeviceId, available: bool, reason: Option<String>) {
        self.bus.publish(DeviceEvent::Availability {
            device_id: device.clone(),
            available,
            reason,
            timestamp: now(),
        });
    }

    fn forget(&self, device: &DeviceId) {
        self.values.retain(|key, _| &key.0 != device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_and_event() {
        let store = CapabilityStore::default();
        let mut rx = store.subscribe();
        let device = "0x00124b0001".to_string();

        store
            .set_value(&device, "measure_temperature", CapabilityValue::Number(21.5))
            .await
            .unwrap();
        assert_eq!(
            store.get_value(&device, "measure_temperature"),
            Some(CapabilityValue::Number(21.5))
        );

        match rx.recv().await.unwrap() {
            DeviceEvent::Capability { capability, .. } => assert_eq!(capability, "measure_temperature"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejects_nan() {
        let store = CapabilityStore::default();
        let result = store
            .set_value(&"d".to_string(), "measure_power", CapabilityValue::Number(f64::NAN))
            .await;
        assert!(matches!(result, Err(PublishError::Rejected(..))));
    }

    #[tokio::test]
    async fn test_forget() {
        let store = CapabilityStore::default();
        let a = "a".to_string();
        let b = "b".to_string();
        store.set_value(&a, "onoff", true.into()).await.unwrap();
        store.set_value(&b, "onoff", false.into()).await.unwrap();
        store.forget(&a);
        assert!(store.get_value(&a, "onoff").is_none());
        assert_eq!(store.device_values("b").len(), 1);
    }
}
