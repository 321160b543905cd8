//! Vendor-family quirks activated by profile flags.

pub mod structured;
pub mod time_sync;

pub use time_sync::{send_time, TimeSyncSchedule};
