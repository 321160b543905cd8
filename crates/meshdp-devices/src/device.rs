//! Device manager and per-device runtime.
//!
//! Every managed device owns one worker task fed by a bounded channel. Inbound
//! frames, poll ticks and the daily time resync are handled in that task, so
//! traffic from one device never blocks another. Removing a device aborts its
//! worker and poll tasks, which stops every timer it owned.

use crate::binder::{BindReport, CapabilityBinder, DeviceBindings, PollTarget, Publication};
use crate::error::{DeviceError, Result};
use crate::executor::{ExecutorError, ExecutorStats, FallbackExecutor, OperationStats, Strategy};
use crate::identify::identify;
use crate::mesh::{AttributeAddr, DeviceHandle, DeviceId, InboundFrame, MeshTransport};
use crate::publish::CapabilityPublisher;
use crate::quirks::{send_time, TimeSyncSchedule};
use meshdp_core::zcl::{cluster, tuya_cmd};
use meshdp_core::{
    CapabilityProfile, CapabilitySource, CapabilityValue, EngineConfig, Fingerprint, RuntimeConfig,
};
use meshdp_protocol::{ClusterCommand, Datapoint, DatapointCommand, DatapointType};
use meshdp_registry::{FingerprintRegistry, MatchKind};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Work item for a device worker.
#[derive(Debug, Clone, PartialEq)]
enum DeviceMessage {
    Frame(InboundFrame),
    Poll(AttributeAddr),
}

/// Public view of a managed device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub device_id: DeviceId,
    pub fingerprint: Fingerprint,
    pub profile_id: String,
    pub match_kind: MatchKind,
    pub available: bool,
    pub polled_attributes: usize,
    pub time_sync: bool,
}

struct DeviceRuntime {
    handle: DeviceHandle,
    fingerprint: Fingerprint,
    profile: Arc<CapabilityProfile>,
    match_kind: MatchKind,
    available: Arc<AtomicBool>,
    polled: usize,
    tx: mpsc::Sender<DeviceMessage>,
    tasks: Vec<JoinHandle<()>>,
}

impl DeviceRuntime {
    fn status(&self) -> DeviceStatus {
        DeviceStatus {
            device_id: self.handle.id.clone(),
            fingerprint: self.fingerprint.clone(),
            profile_id: self.profile.id.clone(),
            match_kind: self.match_kind,
            available: self.available.load(Ordering::Relaxed),
            polled_attributes: self.polled,
            time_sync: self.profile.quirks.time_sync,
        }
    }

    fn stop(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Publish an availability change; no-op when the state is unchanged.
async fn set_availability(
    publisher: &dyn CapabilityPublisher,
    device: &DeviceId,
    flag: &AtomicBool,
    available: bool,
    reason: Option<String>,
) {
    if flag.swap(available, Ordering::Relaxed) == available {
        return;
    }
    if available {
        info!(device_id = %device, "Device available");
    } else {
        warn!(device_id = %device, reason = reason.as_deref().unwrap_or(""), "Device unavailable");
    }
    publisher.set_available(device, available, reason).await;
}

async fn publish_all(publisher: &dyn CapabilityPublisher, device: &DeviceId, pubs: Vec<Publication>) {
    for publication in pubs {
        let result = match publication {
            Publication::Value { capability, value } => {
                publisher.set_value(device, &capability, value).await
            }
            Publication::Trigger { capability, action } => {
                publisher.trigger(device, &capability, &action).await
            }
        };
        if let Err(e) = result {
            warn!(device_id = %device, error = %e, "Publication rejected");
        }
    }
}

/// Owns one device's bindings and timers.
struct DeviceWorker {
    handle: DeviceHandle,
    bindings: DeviceBindings,
    transport: Arc<dyn MeshTransport>,
    executor: Arc<FallbackExecutor>,
    publisher: Arc<dyn CapabilityPublisher>,
    available: Arc<AtomicBool>,
    time_sync: Option<TimeSyncSchedule>,
}

impl DeviceWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<DeviceMessage>) {
        debug!(device_id = %self.handle.id, "Device worker started");
        if self.time_sync.is_some() {
            // Set the clock right after binding; the daily period starts here.
            self.reply_time(0).await;
        }
        loop {
            let due = self.time_sync.map(|s| s.next_due());
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle_message(msg).await,
                    None => break,
                },
                _ = sleep_or_pending(due) => {
                    self.reply_time(0).await;
                }
            }
        }
        debug!(device_id = %self.handle.id, "Device worker stopped");
    }

    async fn handle_message(&mut self, msg: DeviceMessage) {
        match msg {
            DeviceMessage::Frame(frame) => {
                self.mark(true, None).await;
                self.handle_frame(frame).await;
            }
            DeviceMessage::Poll(addr) => self.poll(addr).await,
        }
    }

    async fn handle_frame(&mut self, frame: InboundFrame) {
        let pubs = match frame {
            InboundFrame::AttributeReport {
                endpoint,
                cluster,
                attribute,
                value,
            } => self.bindings.on_attribute(
                AttributeAddr {
                    endpoint,
                    cluster,
                    attribute,
                },
                &value,
            ),
            InboundFrame::ClusterCommand {
                cluster: cluster::TUYA,
                command_id,
                payload,
                ..
            } => match ClusterCommand::parse(command_id, &payload) {
                Ok(ClusterCommand::Datapoints {
                    origin,
                    command,
                    dropped,
                }) => {
                    for error in &dropped {
                        debug!(device_id = %self.handle.id, seq = command.seq, error = %error, "Datapoint dropped");
                    }
                    debug!(
                        device_id = %self.handle.id,
                        ?origin,
                        seq = command.seq,
                        count = command.datapoints.len(),
                        "Datapoints received"
                    );
                    self.bindings.on_datapoints(&command.datapoints)
                }
                Ok(ClusterCommand::TimeRequest(request)) => {
                    if self.bindings.time_sync() {
                        self.reply_time(request.request_id).await;
                    } else {
                        debug!(device_id = %self.handle.id, "Time request from device without time quirk");
                    }
                    Vec::new()
                }
                Ok(ClusterCommand::Unknown { command_id, .. }) => {
                    debug!(device_id = %self.handle.id, command_id, "Unhandled vendor command");
                    Vec::new()
                }
                Err(e) => {
                    debug!(device_id = %self.handle.id, error = %e, "Malformed vendor command");
                    Vec::new()
                }
            },
            InboundFrame::ClusterCommand {
                endpoint,
                cluster,
                command_id,
                payload,
            } => self
                .bindings
                .on_command(endpoint, cluster, command_id, &payload),
        };
        publish_all(self.publisher.as_ref(), &self.handle.id, pubs).await;
    }

    async fn poll(&mut self, addr: AttributeAddr) {
        let transport = &self.transport;
        let id = &self.handle.id;
        let result = self
            .executor
            .execute(
                "poll_attribute",
                vec![Strategy::new("direct_read", || async move {
                    transport
                        .read_attributes(id, addr.endpoint, addr.cluster, &[addr.attribute])
                        .await
                })],
            )
            .await;
        match result {
            Ok(executed) => {
                self.mark(true, None).await;
                let mut pubs = Vec::new();
                for (attribute, value) in executed.value {
                    if attribute == addr.attribute {
                        pubs.extend(self.bindings.on_attribute(addr, &value));
                    }
                }
                publish_all(self.publisher.as_ref(), &self.handle.id, pubs).await;
            }
            Err(e) => self.on_failure(e).await,
        }
    }

    async fn reply_time(&mut self, request_id: u16) {
        match send_time(
            self.transport.as_ref(),
            self.executor.as_ref(),
            &self.handle,
            request_id,
        )
        .await
        {
            Ok(_) => {
                if let Some(schedule) = self.time_sync.as_mut() {
                    schedule.reset();
                }
            }
            Err(e) => {
                // Push the next attempt a full period out rather than spinning.
                if let Some(schedule) = self.time_sync.as_mut() {
                    schedule.reset();
                }
                self.on_failure(e).await;
            }
        }
    }

    async fn mark(&self, available: bool, reason: Option<String>) {
        set_availability(
            self.publisher.as_ref(),
            &self.handle.id,
            &self.available,
            available,
            reason,
        )
        .await;
    }

    async fn on_failure(&self, error: ExecutorError) {
        if error.is_exhausted() {
            self.mark(false, Some(error.to_string())).await;
        } else {
            debug!(device_id = %self.handle.id, error = %error, "Operation unsupported");
        }
    }
}

async fn sleep_or_pending(due: Option<Instant>) {
    match due {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn spawn_poller(target: PollTarget, tx: mpsc::Sender<DeviceMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + target.interval, target.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if tx.send(DeviceMessage::Poll(target.addr)).await.is_err() {
                break;
            }
        }
    })
}

/// Runtime entry point: identifies, binds and serves devices.
pub struct DeviceManager {
    registry: Arc<FingerprintRegistry>,
    transport: Arc<dyn MeshTransport>,
    executor: Arc<FallbackExecutor>,
    binder: CapabilityBinder,
    publisher: Arc<dyn CapabilityPublisher>,
    runtime: RuntimeConfig,
    devices: Arc<RwLock<HashMap<DeviceId, DeviceRuntime>>>,
    seq: AtomicU16,
}

impl DeviceManager {
    pub fn new(
        registry: Arc<FingerprintRegistry>,
        transport: Arc<dyn MeshTransport>,
        publisher: Arc<dyn CapabilityPublisher>,
        config: &EngineConfig,
    ) -> Self {
        let executor = Arc::new(FallbackExecutor::from_config(&config.executor));
        Self::with_executor(registry, transport, publisher, executor, config)
    }

    /// Use a prepared executor, e.g. one sharing statistics with others.
    pub fn with_executor(
        registry: Arc<FingerprintRegistry>,
        transport: Arc<dyn MeshTransport>,
        publisher: Arc<dyn CapabilityPublisher>,
        executor: Arc<FallbackExecutor>,
        config: &EngineConfig,
    ) -> Self {
        let binder = CapabilityBinder::new(
            Arc::clone(&transport),
            Arc::clone(&executor),
            config.binder.clone(),
        )
        .with_poll_floor(Duration::from_secs(config.runtime.poll_floor_secs));
        Self {
            registry,
            transport,
            executor,
            binder,
            publisher,
            runtime: config.runtime.clone(),
            devices: Arc::new(RwLock::new(HashMap::new())),
            seq: AtomicU16::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<FingerprintRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<FallbackExecutor> {
        &self.executor
    }

    /// Identify a newly joined device and bind it.
    pub async fn join(&self, handle: DeviceHandle) -> Result<BindReport> {
        let fingerprint = identify(self.transport.as_ref(), &self.executor, &handle).await?;
        self.add_device(handle, fingerprint).await
    }

    /// Bind a device whose fingerprint is already known.
    ///
    /// An already managed device with the same id is replaced.
    pub async fn add_device(&self, handle: DeviceHandle, fingerprint: Fingerprint) -> Result<BindReport> {
        let lookup = self
            .registry
            .lookup_fingerprint(&fingerprint)
            .ok_or_else(|| DeviceError::UnknownFingerprint(fingerprint.clone()))?;

        if self.devices.read().await.contains_key(&handle.id) {
            self.remove_device(&handle.id).await?;
        }

        info!(
            device_id = %handle.id,
            fingerprint = %fingerprint,
            profile = %lookup.profile.id,
            match_kind = ?lookup.kind,
            "Binding device"
        );

        let (bindings, report) = self.binder.bind(Arc::clone(&lookup.profile), &handle).await;
        publish_all(self.publisher.as_ref(), &handle.id, report.initial_values.clone()).await;

        let available = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel(self.runtime.channel_capacity.max(1));
        let mut tasks = Vec::with_capacity(1 + bindings.polled().len());
        for target in bindings.polled() {
            tasks.push(spawn_poller(target.clone(), tx.clone()));
        }
        let polled = bindings.polled().len();

        let time_sync = bindings
            .time_sync()
            .then(|| TimeSyncSchedule::new(Duration::from_secs(self.runtime.time_resync_secs)));
        let worker = DeviceWorker {
            handle: handle.clone(),
            bindings,
            transport: Arc::clone(&self.transport),
            executor: Arc::clone(&self.executor),
            publisher: Arc::clone(&self.publisher),
            available: Arc::clone(&available),
            time_sync,
        };
        tasks.push(tokio::spawn(worker.run(rx)));

        let runtime = DeviceRuntime {
            handle: handle.clone(),
            fingerprint,
            profile: lookup.profile,
            match_kind: lookup.kind,
            available,
            polled,
            tx,
            tasks,
        };
        let displaced = self.devices.write().await.insert(handle.id.clone(), runtime);
        if let Some(old) = displaced {
            // A concurrent add for the same id finished first.
            old.stop();
            debug!(device_id = %handle.id, "Replaced runtime from concurrent add");
        }
        Ok(report)
    }

    /// Queue an inbound frame for the device's worker.
    pub async fn handle_frame(&self, device: &DeviceId, frame: InboundFrame) -> Result<()> {
        let tx = {
            let devices = self.devices.read().await;
            let runtime = devices
                .get(device)
                .ok_or_else(|| DeviceError::NotFound(device.clone()))?;
            runtime.tx.clone()
        };
        tx.send(DeviceMessage::Frame(frame))
            .await
            .map_err(|_| DeviceError::Stopped(device.clone()))
    }

    /// Stop all timers and handlers of a device and forget its values.
    pub async fn remove_device(&self, device: &DeviceId) -> Result<()> {
        let runtime = self
            .devices
            .write()
            .await
            .remove(device)
            .ok_or_else(|| DeviceError::NotFound(device.clone()))?;
        runtime.stop();
        self.publisher.forget(device);
        info!(device_id = %device, profile = %runtime.profile.id, "Device removed");
        Ok(())
    }

    /// Write a capability value to a datapoint device.
    pub async fn write_capability(
        &self,
        device: &DeviceId,
        capability: &str,
        value: CapabilityValue,
    ) -> Result<()> {
        let (handle, profile, available) = {
            let devices = self.devices.read().await;
            let runtime = devices
                .get(device)
                .ok_or_else(|| DeviceError::NotFound(device.clone()))?;
            (
                runtime.handle.clone(),
                Arc::clone(&runtime.profile),
                Arc::clone(&runtime.available),
            )
        };

        let desc = profile
            .descriptor(capability)
            .ok_or_else(|| DeviceError::UnknownCapability {
                device: device.clone(),
                capability: capability.to_string(),
            })?;
        let CapabilitySource::Datapoint { dp } = desc.source else {
            return Err(DeviceError::NotWritable(capability.to_string()));
        };

        let raw = desc.codec.encode(&value)?;
        let datapoint = Datapoint::from_raw_value(dp, &raw, DatapointType::for_codec(&desc.codec))?;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let payload = DatapointCommand::new(seq, vec![datapoint]).encode();

        let transport = &self.transport;
        let payload = &payload;
        let id = &handle.id;
        let endpoint = handle.endpoint;
        let result = self
            .executor
            .execute(
                "write_datapoint",
                vec![Strategy::new("data_request", || async move {
                    transport
                        .send_command(id, endpoint, cluster::TUYA, tuya_cmd::DATA_REQUEST, payload)
                        .await
                })],
            )
            .await;

        match result {
            Ok(_) => {
                set_availability(self.publisher.as_ref(), device, &available, true, None).await;
                debug!(device_id = %device, capability, dp, seq, "Datapoint written");
                Ok(())
            }
            Err(e) => {
                if e.is_exhausted() {
                    set_availability(
                        self.publisher.as_ref(),
                        device,
                        &available,
                        false,
                        Some(e.to_string()),
                    )
                    .await;
                }
                Err(e.into())
            }
        }
    }

    pub async fn status(&self, device: &DeviceId) -> Option<DeviceStatus> {
        self.devices.read().await.get(device).map(|r| r.status())
    }

    pub async fn list(&self) -> Vec<DeviceStatus> {
        let mut all: Vec<DeviceStatus> = self
            .devices
            .read()
            .await
            .values()
            .map(|r| r.status())
            .collect();
        all.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        all
    }

    pub async fn device_count(&self) -> usize {
        self.devices.read().await.len()
    }

    pub fn stats(&self) -> &Arc<ExecutorStats> {
        self.executor.stats()
    }

    pub fn stats_snapshot(&self) -> BTreeMap<String, OperationStats> {
        self.executor.stats().snapshot()
    }

    pub fn reset_stats(&self) {
        self.executor.stats().reset();
    }

    /// Remove every device.
    pub async fn shutdown(&self) {
        let mut devices = self.devices.write().await;
        for (id, runtime) in devices.drain() {
            runtime.stop();
            self.publisher.forget(&id);
        }
        info!("Device manager stopped");
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        if let Ok(devices) = self.devices.try_read() {
            for runtime in devices.values() {
                runtime.stop();
            }
        }
    }
}
