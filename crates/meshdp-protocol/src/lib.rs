//! Wire codecs for the vendor datapoint cluster.
//!
//! - [`datapoint`]: `[id][type][length][payload]` datapoint lists
//! - [`frame`]: sequence-numbered command envelope and inbound classification
//! - [`time_sync`]: the 10-byte time reply
//! - [`structured`]: Lumi multi-field attribute parser

pub mod datapoint;
pub mod error;
pub mod frame;
pub mod structured;
pub mod time_sync;

pub use datapoint::{
    decode, decode_detailed, encode, Datapoint, DatapointType, DatapointValue, DecodeReport,
};
pub use error::{CodecError, Result};
pub use frame::{encode_data_query, ClusterCommand, DatapointCommand, DatapointOrigin};
pub use structured::{battery_percent, StructuredReport, StructuredValue};
pub use time_sync::{TimeReply, TimeRequest, TIME_REPLY_LEN};
