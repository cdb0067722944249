use clap::ArgMatches;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::address::OffsetAddress;
use crate::records::RecordKind;
use crate::services::pipeline::{PipelineSettings, DEFAULT_QUEUE_CAPACITY};
use crate::utils::error::MirrorError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    // Instance identification
    pub instance_uuid: String,
    pub instance_name: String,
    #[serde(default)]
    pub version: String,

    // Runtime settings
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_stats_interval")]
    pub stats_interval_seconds: u64,

    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    /// Driver URL, e.g. `sim://plc1`. The scheme selects the driver.
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_capacity")]
    pub read_buffer_capacity: usize,
    #[serde(default = "default_capacity")]
    pub write_buffer_capacity: usize,
    #[serde(default = "default_max_write_batch")]
    pub max_write_batch: usize,
    #[serde(default)]
    pub items: Vec<ItemConfig>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    #[serde(default)]
    pub records: Vec<RecordConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemConfig {
    pub name: String,
    pub db_number: u16,
    pub start: u32,
    pub length: usize,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub period_ms: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub immediate: bool,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordConfig {
    pub name: String,
    pub kind: RecordKind,
    pub item: String,
    /// `"<byte>"` or `"<byte>.<bit>"` inside the item.
    pub offset: String,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_interval() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    5_000
}

fn default_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_max_write_batch() -> usize {
    64
}

impl DeviceConfig {
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            read_capacity: self.read_buffer_capacity,
            write_capacity: self.write_buffer_capacity,
            max_write_batch: self.max_write_batch,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    pub fn get_item(&self, name: &str) -> Option<&ItemConfig> {
        self.items.iter().find(|i| i.name == name)
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        let item = |name: &str, db_number, length| ItemConfig {
            name: name.to_string(),
            db_number,
            start: 0,
            length,
            enabled: true,
        };
        let group = |name: &str, period_ms, items: &[&str]| GroupConfig {
            name: name.to_string(),
            period_ms,
            enabled: true,
            immediate: true,
            items: items.iter().map(|s| s.to_string()).collect(),
        };
        let record = |name: &str, kind, item: &str, offset: &str| RecordConfig {
            name: name.to_string(),
            kind,
            item: item.to_string(),
            offset: offset.to_string(),
        };

        let demo_device = DeviceConfig {
            name: "plc1".to_string(),
            url: "sim://plc1".to_string(),
            enabled: true,
            request_timeout_ms: default_request_timeout(),
            read_buffer_capacity: DEFAULT_QUEUE_CAPACITY,
            write_buffer_capacity: DEFAULT_QUEUE_CAPACITY,
            max_write_batch: default_max_write_batch(),
            items: vec![
                item("analogs", 20, 32),
                item("valves", 30, 8),
                item("counters", 40, 4),
                item("timers", 50, 5),
                item("clock", 60, 26),
            ],
            groups: vec![
                group("fast", 200, &["analogs", "valves"]),
                group("slow", 1_000, &["counters", "timers", "clock"]),
            ],
            records: vec![
                record("TT101", RecordKind::AnalogInput, "analogs", "0"),
                record("FV201", RecordKind::AnalogOutput, "analogs", "18"),
                record("XV1", RecordKind::Valve, "valves", "0"),
                record("XV2", RecordKind::Valve, "valves", "4"),
                record("C1", RecordKind::Counter, "counters", "0"),
                record("T1", RecordKind::Timer, "timers", "0"),
                record("CLK", RecordKind::Clock, "clock", "0"),
            ],
        };

        Self {
            instance_uuid: Uuid::new_v4().to_string(),
            instance_name: "PLC Data Block Mirror".to_string(),
            version: crate::VERSION.to_string(),
            log_level: default_log_level(),
            stats_interval_seconds: default_stats_interval(),
            devices: vec![demo_device],
        }
    }
}

impl MirrorConfig {
    /// Loads the configuration named by `--config`, falling back to the
    /// built-in demo when the option is absent.
    pub fn from_matches(matches: &ArgMatches) -> Result<Self, MirrorError> {
        let mut config = match matches.get_one::<String>("config") {
            Some(path) => Self::from_file(path)?,
            None => {
                info!("📝 No configuration file given, using the built-in demo device");
                Self::default()
            }
        };

        if let Some(seconds) = matches.get_one::<u64>("stats-interval") {
            config.stats_interval_seconds = *seconds;
        }
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, MirrorError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: MirrorConfig = toml::from_str(&content)?;

        if config.instance_uuid.is_empty() {
            config.instance_uuid = Uuid::new_v4().to_string();
        }
        if config.version.is_empty() {
            config.version = crate::VERSION.to_string();
        }

        debug!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), MirrorError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Rejects structurally broken configurations. Malformed record offsets
    /// only warn; such records fall back to offset 0.
    pub fn validate(&self) -> Result<(), MirrorError> {
        let mut device_names = HashSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(MirrorError::ConfigError("Device name must not be empty".to_string()));
            }
            if !device_names.insert(device.name.as_str()) {
                return Err(MirrorError::ConfigError(format!(
                    "Duplicate device name '{}'",
                    device.name
                )));
            }
            if !device.url.contains("://") {
                return Err(MirrorError::ConfigError(format!(
                    "Device '{}' has no URL scheme in '{}'",
                    device.name, device.url
                )));
            }
            if device.request_timeout_ms == 0 {
                return Err(MirrorError::ConfigError(format!(
                    "Device '{}' needs a non-zero request timeout",
                    device.name
                )));
            }

            let mut item_names = HashSet::new();
            for item in &device.items {
                if item.length == 0 {
                    return Err(MirrorError::ConfigError(format!(
                        "Item '{}/{}' has zero length",
                        device.name, item.name
                    )));
                }
                if !item_names.insert(item.name.as_str()) {
                    return Err(MirrorError::ConfigError(format!(
                        "Duplicate item '{}/{}'",
                        device.name, item.name
                    )));
                }
            }

            for group in &device.groups {
                if group.period_ms == 0 {
                    return Err(MirrorError::ConfigError(format!(
                        "Group '{}/{}' needs a non-zero period",
                        device.name, group.name
                    )));
                }
                if let Some(missing) = group.items.iter().find(|i| !item_names.contains(i.as_str())) {
                    return Err(MirrorError::ConfigError(format!(
                        "Group '{}/{}' references unknown item '{}'",
                        device.name, group.name, missing
                    )));
                }
            }

            for record in &device.records {
                if !item_names.contains(record.item.as_str()) {
                    return Err(MirrorError::ConfigError(format!(
                        "Record '{}/{}' references unknown item '{}'",
                        device.name, record.name, record.item
                    )));
                }
                if OffsetAddress::parse(&record.offset).is_none() {
                    warn!(
                        "⚠️  Record '{}/{}' has malformed offset '{}'",
                        device.name, record.name, record.offset
                    );
                }
            }
        }
        Ok(())
    }

    pub fn get_enabled_devices(&self) -> Vec<&DeviceConfig> {
        self.devices.iter().filter(|d| d.enabled).collect()
    }

    pub fn get_device_by_name(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_is_valid() {
        let config = MirrorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.get_enabled_devices().len(), 1);
        let device = config.get_device_by_name("plc1").unwrap();
        assert_eq!(device.pipeline_settings().request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn round_trips_through_toml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("mirror.toml");

        let mut config = MirrorConfig::default();
        config.instance_name = "Line 4".to_string();
        config.save_to_file(&path).unwrap();

        let loaded = MirrorConfig::from_file(&path).unwrap();
        assert_eq!(loaded.instance_name, "Line 4");
        assert_eq!(loaded.instance_uuid, config.instance_uuid);
        assert_eq!(loaded.devices[0].records.len(), 7);
        assert_eq!(loaded.devices[0].records[1].kind, RecordKind::AnalogOutput);
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mirror.toml");
        std::fs::write(
            &path,
            r#"
instance_uuid = ""
instance_name = "bench"
devices = [{ name = "d", url = "sim://d" }]
"#,
        )
        .unwrap();

        let config = MirrorConfig::from_file(&path).unwrap();
        assert!(!config.instance_uuid.is_empty());
        assert_eq!(config.log_level, "info");
        let device = &config.devices[0];
        assert!(device.enabled);
        assert_eq!(device.max_write_batch, 64);
        assert_eq!(device.read_buffer_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn broken_references_are_rejected() {
        let mut config = MirrorConfig::default();
        config.devices[0].groups[0].items.push("nope".to_string());
        assert!(matches!(config.validate(), Err(MirrorError::ConfigError(_))));

        let mut config = MirrorConfig::default();
        config.devices[0].groups[0].period_ms = 0;
        assert!(config.validate().is_err());

        let mut config = MirrorConfig::default();
        config.devices[0].records[0].offset = "bad".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn garbage_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "devices = 3").unwrap();
        assert!(matches!(
            MirrorConfig::from_file(&path),
            Err(MirrorError::ConfigError(_))
        ));
    }
}
