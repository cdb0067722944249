//! PLC Data Block Mirror
//!
//! Continuously mirrors the raw memory image of PLC data blocks into typed,
//! individually addressable records, and writes local record edits back
//! through a scheduled, batched write path. Includes the S5/S7 value codecs
//! (BCD, S5TIME, DATE, TIME, TIME_OF_DAY, DATE_AND_TIME) the records use.

pub mod address;
pub mod cli;
pub mod codec;
pub mod config;
pub mod devices;
pub mod plc;
pub mod records;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use address::OffsetAddress;
pub use config::MirrorConfig;
pub use devices::{Group, Item, PlcDevice};
pub use plc::{PlcConnection, PlcDriver, SimulatedDriver};
pub use records::{create_record, Record, RecordKind};
pub use services::{AcquisitionPipeline, ChangeDispatcher, MirrorService, Scheduler};
pub use utils::error::MirrorError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
