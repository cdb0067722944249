//! Device hierarchy: a device owns items (raw data block images), groups
//! (scan schedules over items) and the records viewing those items.

pub mod device;
pub mod group;
pub mod item;

pub use device::{GroupReadJob, PlcDevice};
pub use group::Group;
pub use item::Item;
