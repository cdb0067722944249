pub mod driver;
pub mod simulated;
pub mod tag;

pub use driver::{
    PlcConnection, PlcDriver, ReadRequest, ReadResponse, TagReadResult, WriteEntry, WriteRequest,
    WriteResponse,
};
pub use simulated::{SimulatedDriver, SimulatedPlc};
pub use tag::{ItemTag, TagHandle};
