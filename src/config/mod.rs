pub mod settings;

pub use settings::{DeviceConfig, GroupConfig, ItemConfig, MirrorConfig, RecordConfig};
