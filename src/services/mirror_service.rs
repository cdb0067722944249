use log::{error, info, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::config::{DeviceConfig, MirrorConfig};
use crate::devices::{Group, Item, PlcDevice};
use crate::plc::{ItemTag, PlcDriver};
use crate::records::create_record;
use crate::services::scheduler::Scheduler;
use crate::utils::error::MirrorError;

/// Builds every configured device and drives them with one shared scheduler.
pub struct MirrorService {
    config: MirrorConfig,
    drivers: HashMap<String, Arc<dyn PlcDriver>>,
    scheduler: Arc<Scheduler>,
    devices: Vec<Arc<PlcDevice>>,
}

impl MirrorService {
    pub fn new(config: MirrorConfig) -> Result<Self, MirrorError> {
        info!("🚀 Initializing Mirror Service");
        info!("🏭 Instance: {} [{}]", config.instance_name, config.instance_uuid);
        info!("📦 Version: {}", config.version);
        config.validate()?;

        let mut devices = Vec::new();
        for device_config in &config.devices {
            if device_config.enabled {
                let device = build_device(device_config)?;
                info!(
                    "📋 Registered device '{}' at {} ({} items, {} groups, {} records)",
                    device_config.name,
                    device_config.url,
                    device_config.items.len(),
                    device_config.groups.len(),
                    device.record_count()
                );
                devices.push(Arc::new(device));
            } else {
                info!("⏸️  Device '{}' is disabled", device_config.name);
            }
        }

        info!("✅ Mirror Service initialized with {} device(s)", devices.len());
        Ok(Self {
            config,
            drivers: HashMap::new(),
            scheduler: Arc::new(Scheduler::new()),
            devices,
        })
    }

    /// Makes `driver` available for URLs with its protocol scheme.
    pub fn register_driver(&mut self, driver: Arc<dyn PlcDriver>) {
        info!("🔌 Registered '{}' driver", driver.protocol());
        self.drivers.insert(driver.protocol().to_string(), driver);
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn devices(&self) -> &[Arc<PlcDevice>] {
        &self.devices
    }

    pub fn device(&self, name: &str) -> Option<Arc<PlcDevice>> {
        self.devices.iter().find(|d| d.name() == name).cloned()
    }

    fn driver_for(&self, url: &str) -> Result<Arc<dyn PlcDriver>, MirrorError> {
        let scheme = url.split("://").next().unwrap_or_default();
        self.drivers
            .get(scheme)
            .cloned()
            .ok_or_else(|| MirrorError::ConnectionError(format!("No driver for URL '{}'", url)))
    }

    /// Starts every device. Devices that fail to start are logged and left
    /// stopped; it is an error only when none starts.
    pub async fn start(&self) -> Result<usize, MirrorError> {
        let mut started = 0;
        for device in &self.devices {
            let result = match self.driver_for(device.url()) {
                Ok(driver) => device.start(driver.as_ref(), self.scheduler.clone()).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => started += 1,
                Err(e) => error!("❌ Failed to start device '{}': {}", device.name(), e),
            }
        }

        if started == 0 && !self.devices.is_empty() {
            return Err(MirrorError::ConnectionError("No device could be started".to_string()));
        }
        info!("✅ {}/{} device(s) running", started, self.devices.len());
        Ok(started)
    }

    /// Logs pipeline statistics periodically until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), MirrorError>
    where
        F: Future<Output = ()>,
    {
        let period = Duration::from_secs(self.config.stats_interval_seconds.max(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("🛑 Shutdown requested");
                    break;
                }
                _ = ticker.tick() => self.log_stats(),
            }
        }
        Ok(())
    }

    pub fn log_stats(&self) {
        for device in &self.devices {
            match device.stats() {
                Some(stats) => info!(
                    "📊 [{}] reads {} ok / {} failed | writes {} ok / {} failed ({} entries) | backpressure {} | pauses {}",
                    device.name(),
                    stats.reads_ok,
                    stats.reads_failed,
                    stats.write_batches_ok,
                    stats.write_batches_failed,
                    stats.entries_written,
                    stats.backpressure,
                    stats.pauses
                ),
                None => warn!("⚠️  [{}] not running", device.name()),
            }
        }
    }

    pub fn snapshot(&self) -> Value {
        json!({
            "instance": {
                "uuid": self.config.instance_uuid,
                "name": self.config.instance_name,
                "version": self.config.version,
            },
            "devices": self.devices.iter().map(|d| d.to_json()).collect::<Vec<_>>(),
        })
    }

    pub async fn stop(&self) {
        for device in &self.devices {
            device.stop().await;
        }
        self.scheduler.shutdown().await;
        info!("👋 Mirror Service stopped");
    }
}

/// Builds a device from configuration. Records that cannot be attached are
/// logged and skipped.
pub fn build_device(config: &DeviceConfig) -> Result<PlcDevice, MirrorError> {
    let device = PlcDevice::new(&config.name, &config.url, config.pipeline_settings());

    for item_config in &config.items {
        let item = Item::new(
            &item_config.name,
            ItemTag::new(item_config.db_number, item_config.start, item_config.length),
        );
        item.set_enabled(item_config.enabled);
        device.add_item(item)?;
    }

    for group_config in &config.groups {
        let group = Group::new(&group_config.name, Duration::from_millis(group_config.period_ms))
            .with_immediate(group_config.immediate);
        group.set_enabled(group_config.enabled);
        device.add_group(group)?;
        for item in &group_config.items {
            device.assign_item(&group_config.name, item)?;
        }
    }

    for record_config in &config.records {
        let record = create_record(record_config.kind, &record_config.name, &record_config.offset);
        if let Err(e) = device.add_record(record, &record_config.item) {
            warn!(
                "⚠️  Skipping record '{}/{}': {}",
                config.name, record_config.name, e
            );
        }
    }
    Ok(device)
}
