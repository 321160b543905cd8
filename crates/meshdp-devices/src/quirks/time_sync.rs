//! Time-exchange responder and resync schedule.

use crate::executor::{ExecutorError, FallbackExecutor, Strategy};
use crate::mesh::{DeviceHandle, MeshTransport};
use meshdp_core::zcl::{cluster, tuya_cmd};
use meshdp_protocol::TimeReply;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Send a time reply to `device`, echoing `request_id`.
pub async fn send_time(
    transport: &dyn MeshTransport,
    executor: &FallbackExecutor,
    device: &DeviceHandle,
    request_id: u16,
) -> Result<TimeReply, ExecutorError> {
    let reply = TimeReply::now(request_id);
    let payload = reply.encode();
    let payload = &payload[..];
    let id = &device.id;
    let endpoint = device.endpoint;

    executor
        .execute(
            "time_sync",
            vec![Strategy::new("time_reply", || async move {
                transport
                    .send_command(id, endpoint, cluster::TUYA, tuya_cmd::TIME_SYNC, payload)
                    .await
            })],
        )
        .await?;

    debug!(
        device_id = %device.id,
        request_id,
        utc = reply.utc_secs,
        local = reply.local_secs,
        "Time sent"
    );
    Ok(reply)
}

/// When the next unsolicited time reply is due.
#[derive(Debug, Clone, Copy)]
pub struct TimeSyncSchedule {
    interval: Duration,
    next_due: Instant,
}

impl TimeSyncSchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: Instant::now() + interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_due(&self) -> Instant {
        self.next_due
    }

    /// Restart the period from now, after any reply was sent.
    pub fn reset(&mut self) {
        self.next_due = Instant::now() + self.interval;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_schedule_reset() {
        let mut schedule = TimeSyncSchedule::new(Duration::from_secs(86_400));
        let first = schedule.next_due();
        assert!(!schedule.is_due(Instant::now()));

        tokio::time::advance(Duration::from_secs(3600)).await;
        schedule.reset();
        assert_eq!(schedule.next_due(), first + Duration::from_secs(3600));

        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert!(schedule.is_due(Instant::now()));
    }
}
