//! Cluster, attribute and command identifiers used by the engine.

/// Cluster ids.
pub mod cluster {
    pub const BASIC: u16 = 0x0000;
    pub const POWER_CONFIG: u16 = 0x0001;
    pub const DEVICE_TEMP: u16 = 0x0002;
    pub const IDENTIFY: u16 = 0x0003;
    pub const SCENES: u16 = 0x0005;
    pub const ON_OFF: u16 = 0x0006;
    pub const LEVEL_CONTROL: u16 = 0x0008;
    pub const MULTISTATE_INPUT: u16 = 0x0012;
    pub const WINDOW_COVERING: u16 = 0x0102;
    pub const THERMOSTAT: u16 = 0x0201;
    pub const COLOR_CONTROL: u16 = 0x0300;
    pub const ILLUMINANCE_MEASUREMENT: u16 = 0x0400;
    pub const TEMPERATURE_MEASUREMENT: u16 = 0x0402;
    pub const PRESSURE_MEASUREMENT: u16 = 0x0403;
    pub const HUMIDITY_MEASUREMENT: u16 = 0x0405;
    pub const OCCUPANCY_SENSING: u16 = 0x0406;
    pub const IAS_ZONE: u16 = 0x0500;
    pub const METERING: u16 = 0x0702;
    pub const ELECTRICAL_MEASUREMENT: u16 = 0x0B04;

    /// Vendor datapoint cluster.
    pub const TUYA: u16 = 0xEF00;
}

/// Basic cluster attributes.
pub mod basic_attrs {
    pub const ZCL_VERSION: u16 = 0x0000;
    pub const APPLICATION_VERSION: u16 = 0x0001;
    pub const MANUFACTURER_NAME: u16 = 0x0004;
    pub const MODEL_IDENTIFIER: u16 = 0x0005;
    pub const POWER_SOURCE: u16 = 0x0007;

    /// Lumi multi-field structured attribute.
    pub const LUMI_STRUCTURED: u16 = 0xFF01;
}

/// Power configuration attributes.
pub mod power_attrs {
    pub const BATTERY_VOLTAGE: u16 = 0x0020;
    pub const BATTERY_PERCENTAGE_REMAINING: u16 = 0x0021;
}

/// Commands on the vendor datapoint cluster.
pub mod tuya_cmd {
    /// Hub to device: set datapoints.
    pub const DATA_REQUEST: u8 = 0x00;
    /// Device to hub: answer to a data request or query.
    pub const DATA_RESPONSE: u8 = 0x01;
    /// Device to hub: unsolicited report.
    pub const DATA_REPORT: u8 = 0x02;
    /// Hub to device: ask for all current values.
    pub const DATA_QUERY: u8 = 0x03;
    /// Time request (device) and time reply (hub).
    pub const TIME_SYNC: u8 = 0x24;
}

/// Lumi structured attribute tags.
pub mod lumi_tag {
    pub const BATTERY_VOLTAGE: u8 = 0x01;
    pub const DEVICE_TEMPERATURE: u8 = 0x03;
}
