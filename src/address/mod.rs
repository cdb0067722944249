pub mod offset;

pub use offset::{resolve_into, OffsetAddress, WHOLE_BYTE};
