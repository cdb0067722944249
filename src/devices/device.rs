use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::time::timeout;

use super::group::Group;
use super::item::Item;
use crate::codec::ScalarValue;
use crate::plc::{PlcConnection, PlcDriver};
use crate::records::{PendingWrite, Record, RecordId, RecordRegistry, SharedRecord};
use crate::services::dispatcher::ChangeDispatcher;
use crate::services::pipeline::{AcquisitionPipeline, PipelineSettings, PipelineStatsSnapshot};
use crate::services::scheduler::{Job, JobContext, ScheduleOptions, Scheduler};
use crate::utils::error::MirrorError;

/// Scheduled job that queues a scan of one group.
pub struct GroupReadJob {
    pipeline: Arc<AcquisitionPipeline>,
    group: Arc<Group>,
}

impl GroupReadJob {
    pub fn new(pipeline: Arc<AcquisitionPipeline>, group: Arc<Group>) -> Self {
        Self { pipeline, group }
    }
}

#[async_trait]
impl Job for GroupReadJob {
    async fn execute(&self, ctx: &JobContext) -> Result<(), MirrorError> {
        if !self.group.is_enabled() {
            return Ok(());
        }
        debug!("Scan #{} of group '{}'", ctx.fire_count, self.group.name());
        self.pipeline.submit_read(self.group.clone())
    }
}

struct Runtime {
    connection: Arc<dyn PlcConnection>,
    pipeline: Arc<AcquisitionPipeline>,
    scheduler: Arc<Scheduler>,
}

/// One PLC: its items, scan groups and records, plus the running pipeline
/// once started.
pub struct PlcDevice {
    name: String,
    url: String,
    settings: PipelineSettings,
    items: RwLock<BTreeMap<String, Arc<Item>>>,
    groups: RwLock<BTreeMap<String, Arc<Group>>>,
    records: Arc<RecordRegistry>,
    dispatcher: Mutex<ChangeDispatcher>,
    runtime: RwLock<Option<Arc<Runtime>>>,
}

impl PlcDevice {
    pub fn new(name: impl Into<String>, url: impl Into<String>, settings: PipelineSettings) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            settings,
            items: RwLock::new(BTreeMap::new()),
            groups: RwLock::new(BTreeMap::new()),
            records: Arc::new(RecordRegistry::new()),
            dispatcher: Mutex::new(ChangeDispatcher::new()),
            runtime: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_running(&self) -> bool {
        self.runtime().is_some()
    }

    fn runtime(&self) -> Option<Arc<Runtime>> {
        self.runtime.read().ok().and_then(|r| r.clone())
    }

    fn job_name(&self, group: &str) -> String {
        format!("{}/{}", self.name, group)
    }

    // ===== ITEMS =====

    pub fn add_item(&self, item: Item) -> Result<Arc<Item>, MirrorError> {
        let mut items = self.items.write().map_err(|_| MirrorError::LockError)?;
        if items.contains_key(item.name()) {
            return Err(MirrorError::ConfigError(format!(
                "Device '{}' already has an item '{}'",
                self.name,
                item.name()
            )));
        }
        let item = Arc::new(item);
        items.insert(item.name().to_string(), item.clone());
        debug!("[{}] Added item '{}' ({})", self.name, item.name(), item.tag());
        Ok(item)
    }

    pub fn item(&self, name: &str) -> Option<Arc<Item>> {
        self.items.read().ok()?.get(name).cloned()
    }

    pub fn items(&self) -> Vec<Arc<Item>> {
        self.items
            .read()
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes an item, detaching its records and dropping it from every group.
    pub fn remove_item(&self, name: &str) -> Result<(), MirrorError> {
        let item = self
            .items
            .write()
            .map_err(|_| MirrorError::LockError)?
            .remove(name)
            .ok_or_else(|| MirrorError::DeviceNotFound(format!("{}/{}", self.name, name)))?;

        for id in item.listeners() {
            if let Some(record) = self.records.get(&id) {
                if let Ok(mut record) = record.lock() {
                    record.detach();
                }
            }
        }
        for group in self.groups() {
            group.remove_item(name);
        }
        info!("🗑️  [{}] Removed item '{}'", self.name, name);
        Ok(())
    }

    // ===== GROUPS =====

    pub fn add_group(&self, group: Group) -> Result<Arc<Group>, MirrorError> {
        let group = Arc::new(group);
        {
            let mut groups = self.groups.write().map_err(|_| MirrorError::LockError)?;
            if groups.contains_key(group.name()) {
                return Err(MirrorError::ConfigError(format!(
                    "Device '{}' already has a group '{}'",
                    self.name,
                    group.name()
                )));
            }
            groups.insert(group.name().to_string(), group.clone());
        }

        if let Some(runtime) = self.runtime() {
            if group.is_enabled() {
                self.schedule_group(&runtime, &group)?;
            }
        }
        Ok(group)
    }

    pub fn group(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.read().ok()?.get(name).cloned()
    }

    pub fn groups(&self) -> Vec<Arc<Group>> {
        self.groups
            .read()
            .map(|groups| groups.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn assign_item(&self, group: &str, item: &str) -> Result<(), MirrorError> {
        let target = self
            .group(group)
            .ok_or_else(|| MirrorError::DeviceNotFound(format!("{}/{}", self.name, group)))?;
        let item = self
            .item(item)
            .ok_or_else(|| MirrorError::DeviceNotFound(format!("{}/{}", self.name, item)))?;
        target.add_item(item);
        Ok(())
    }

    pub fn remove_group(&self, name: &str) -> Result<(), MirrorError> {
        self.groups
            .write()
            .map_err(|_| MirrorError::LockError)?
            .remove(name)
            .ok_or_else(|| MirrorError::DeviceNotFound(format!("{}/{}", self.name, name)))?;
        if let Some(runtime) = self.runtime() {
            runtime.scheduler.unschedule(&self.job_name(name));
        }
        Ok(())
    }

    pub fn enable_group(&self, name: &str, enabled: bool) -> Result<(), MirrorError> {
        let group = self
            .group(name)
            .ok_or_else(|| MirrorError::DeviceNotFound(format!("{}/{}", self.name, name)))?;
        group.set_enabled(enabled);

        if let Some(runtime) = self.runtime() {
            if enabled {
                self.schedule_group(&runtime, &group)?;
            } else {
                runtime.scheduler.unschedule(&self.job_name(name));
            }
        }
        info!(
            "{} [{}] Group '{}' {}",
            if enabled { "▶️ " } else { "⏸️ " },
            self.name,
            name,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    fn schedule_group(&self, runtime: &Runtime, group: &Arc<Group>) -> Result<(), MirrorError> {
        let job = Arc::new(GroupReadJob::new(runtime.pipeline.clone(), group.clone()));
        let options = ScheduleOptions {
            immediate: group.immediate(),
            ..ScheduleOptions::every(group.period())
        };
        runtime
            .scheduler
            .schedule(&self.job_name(group.name()), job, options)
    }

    // ===== RECORDS =====

    /// Attaches `record` to `item` and starts tracking its edits.
    pub fn add_record(&self, mut record: Box<dyn Record>, item: &str) -> Result<RecordId, MirrorError> {
        if self.find_record(record.name()).is_some() {
            return Err(MirrorError::ConfigError(format!(
                "Device '{}' already has a record '{}'",
                self.name,
                record.name()
            )));
        }
        let item = self
            .item(item)
            .ok_or_else(|| MirrorError::DeviceNotFound(format!("{}/{}", self.name, item)))?;
        record.attach(&item)?;
        record.update();

        let id = record.id();
        self.dispatcher
            .lock()
            .map_err(|_| MirrorError::LockError)?
            .register(record.as_ref());
        self.records.insert(record)?;
        Ok(id)
    }

    pub fn remove_record(&self, id: &RecordId) -> Result<(), MirrorError> {
        let record = self
            .records
            .remove(id)
            .ok_or_else(|| MirrorError::DeviceNotFound(format!("{}/record {}", self.name, id)))?;
        if let Ok(mut record) = record.lock() {
            record.detach();
        }
        if let Ok(mut dispatcher) = self.dispatcher.lock() {
            dispatcher.unregister(id);
        }
        Ok(())
    }

    pub fn find_record(&self, name: &str) -> Option<SharedRecord> {
        self.records.find_by_name(name)
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Operator edit of one record field. Nothing is written until
    /// [`commit_changes`](Self::commit_changes).
    pub fn set_record_field(&self, record: &str, path: &str, value: ScalarValue) -> Result<(), MirrorError> {
        let shared = self
            .find_record(record)
            .ok_or_else(|| MirrorError::DeviceNotFound(format!("{}/{}", self.name, record)))?;
        let mut record = shared.lock().map_err(|_| MirrorError::LockError)?;
        record.set_field(path, value)
    }

    /// Dispatches the pending edits of every record as individual writes.
    /// Returns the number of writes queued. Edits whose write could not be
    /// queued stay pending for the next commit.
    pub fn commit_changes(&self) -> Result<usize, MirrorError> {
        let runtime = self.require_runtime()?;
        let dispatcher = self.dispatcher.lock().map_err(|_| MirrorError::LockError)?;
        let mut queued = 0;
        let mut first_error = None;
        for shared in self.records.all() {
            let mut record = shared.lock().map_err(|_| MirrorError::LockError)?;
            let Some(event) = record.take_changes() else {
                continue;
            };
            let writes = dispatcher.dispatch(&**record, &event);
            match self.submit_all(&runtime, &mut **record, writes) {
                Ok(n) => queued += n,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(queued),
        }
    }

    /// Writes the whole byte range of one record, outputs re-encoded.
    pub fn process_record(&self, name: &str) -> Result<bool, MirrorError> {
        let runtime = self.require_runtime()?;
        let shared = self
            .find_record(name)
            .ok_or_else(|| MirrorError::DeviceNotFound(format!("{}/{}", self.name, name)))?;
        let mut record = shared.lock().map_err(|_| MirrorError::LockError)?;
        let write = record.process();
        match write {
            Some(write) => self.submit_all(&runtime, &mut **record, vec![write]).map(|n| n > 0),
            None => Ok(false),
        }
    }

    /// Queues the writes of one record. A write the pipeline refuses hands
    /// its fields back to the record's pending set.
    fn submit_all(
        &self,
        runtime: &Runtime,
        record: &mut dyn Record,
        writes: Vec<PendingWrite>,
    ) -> Result<usize, MirrorError> {
        let total = writes.len();
        let mut first_error = None;
        let mut queued = 0;
        for write in writes {
            let fields = write.fields;
            match runtime.pipeline.submit_write(write) {
                Ok(()) => queued += 1,
                Err(e) => {
                    record.restore_pending(&fields);
                    error!("❌ [{}] Could not queue write for '{}': {}", self.name, record.name(), e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if total > 0 {
            debug!("[{}] Queued {}/{} writes for '{}'", self.name, queued, total, record.name());
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(queued),
        }
    }

    pub fn read_group_now(&self, name: &str) -> Result<(), MirrorError> {
        let runtime = self.require_runtime()?;
        let group = self
            .group(name)
            .ok_or_else(|| MirrorError::DeviceNotFound(format!("{}/{}", self.name, name)))?;
        runtime.pipeline.submit_read(group)
    }

    fn require_runtime(&self) -> Result<Arc<Runtime>, MirrorError> {
        self.runtime()
            .ok_or_else(|| MirrorError::ServiceNotAvailable(format!("Device '{}' is not running", self.name)))
    }

    pub fn record_snapshot(&self) -> Vec<Value> {
        let mut snapshot: Vec<Value> = self
            .records
            .all()
            .iter()
            .filter_map(|r| r.lock().ok().map(|r| r.to_json()))
            .collect();
        snapshot.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        snapshot
    }

    pub fn stats(&self) -> Option<PipelineStatsSnapshot> {
        self.runtime().map(|r| r.pipeline.stats())
    }

    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "url": self.url,
            "running": self.is_running(),
            "items": self.items().iter().map(|i| json!({
                "name": i.name(),
                "tag": i.tag().to_string(),
                "enabled": i.is_enabled(),
                "last_update": i.last_update().map(|t| t.to_rfc3339()),
            })).collect::<Vec<_>>(),
            "groups": self.groups().iter().map(|g| json!({
                "name": g.name(),
                "period_ms": g.period().as_millis() as u64,
                "enabled": g.is_enabled(),
                "items": g.items().iter().map(|i| i.name().to_string()).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
            "records": self.record_snapshot(),
            "stats": self.stats(),
        })
    }

    // ===== LIFECYCLE =====

    /// Connects, starts the pipeline and schedules every enabled group.
    pub async fn start(&self, driver: &dyn PlcDriver, scheduler: Arc<Scheduler>) -> Result<(), MirrorError> {
        if self.is_running() {
            warn!("⚠️  [{}] Already running", self.name);
            return Ok(());
        }

        info!("🔌 [{}] Connecting to {}", self.name, self.url);
        let connection = timeout(self.settings.request_timeout, driver.connect(&self.url)).await??;
        let pipeline = Arc::new(AcquisitionPipeline::start(
            &self.name,
            connection.clone(),
            self.records.clone(),
            self.settings.clone(),
        ));
        let runtime = Arc::new(Runtime {
            connection,
            pipeline,
            scheduler,
        });

        let mut scheduled: Vec<String> = Vec::new();
        for group in self.groups().iter().filter(|g| g.is_enabled()) {
            if let Err(e) = self.schedule_group(&runtime, group) {
                error!("❌ [{}] Could not schedule group '{}': {}", self.name, group.name(), e);
                for name in &scheduled {
                    runtime.scheduler.unschedule(&self.job_name(name));
                }
                runtime.pipeline.shutdown().await;
                runtime.connection.close().await;
                return Err(e);
            }
            scheduled.push(group.name().to_string());
        }
        *self.runtime.write().map_err(|_| MirrorError::LockError)? = Some(runtime);
        info!("✅ [{}] Device started", self.name);
        Ok(())
    }

    pub async fn stop(&self) {
        let runtime = match self.runtime.write() {
            Ok(mut runtime) => runtime.take(),
            Err(_) => None,
        };
        let Some(runtime) = runtime else {
            return;
        };

        for group in self.groups() {
            runtime.scheduler.unschedule(&self.job_name(group.name()));
        }
        runtime.pipeline.shutdown().await;
        runtime.connection.close().await;
        info!("🛑 [{}] Device stopped", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plc::{ItemTag, SimulatedDriver};
    use crate::records::schema::WRITE_ENABLE;
    use crate::records::{AnalogInput, Valve};
    use std::time::Duration;

    fn device() -> PlcDevice {
        let device = PlcDevice::new("plc1", "sim://plc1", PipelineSettings::default());
        device
            .add_item(Item::new("valves", ItemTag::new(30, 0, 8)))
            .unwrap();
        device
            .add_item(Item::new("analogs", ItemTag::new(20, 0, 18)))
            .unwrap();
        device
            .add_group(Group::new("fast", Duration::from_millis(100)))
            .unwrap();
        device.assign_item("fast", "valves").unwrap();
        device.assign_item("fast", "analogs").unwrap();
        device
            .add_record(Box::new(Valve::new("XV1", "4")), "valves")
            .unwrap();
        device
            .add_record(Box::new(AnalogInput::new("TT101", "0")), "analogs")
            .unwrap();
        device
    }

    #[test]
    fn rejects_duplicates_and_unknown_items() {
        let device = device();
        assert!(device
            .add_item(Item::new("valves", ItemTag::new(1, 0, 1)))
            .is_err());
        assert!(device
            .add_record(Box::new(Valve::new("XV1", "0")), "valves")
            .is_err());
        assert!(matches!(
            device.add_record(Box::new(Valve::new("XV2", "0")), "missing"),
            Err(MirrorError::DeviceNotFound(_))
        ));
        assert!(matches!(
            device.commit_changes(),
            Err(MirrorError::ServiceNotAvailable(_))
        ));
    }

    #[test]
    fn removing_item_detaches_records() {
        let device = device();
        device.remove_item("valves").unwrap();
        let valve = device.find_record("XV1").unwrap();
        assert!(!valve.lock().unwrap().is_attached());
        assert_eq!(device.group("fast").unwrap().items().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scans_and_writes_through_simulated_plc() {
        let driver = SimulatedDriver::new();
        let plc = driver.plc("plc1");
        plc.set_bytes(30, 4, &[0b0000_0001, 3]).unwrap();
        plc.set_bytes(20, 6, &3.1416f32.to_be_bytes()).unwrap();

        let scheduler = Arc::new(Scheduler::new());
        let device = device();
        device.start(&driver, scheduler.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = device.record_snapshot();
        assert_eq!(snapshot[0]["name"], "TT101");
        assert_eq!(snapshot[0]["r_value"].as_f64().map(|v| v as f32), Some(3.1416));
        assert_eq!(snapshot[1]["opened"], true);
        assert_eq!(snapshot[1]["i_mode"], 3);

        device
            .set_record_field("XV1", WRITE_ENABLE, ScalarValue::Bool(true))
            .unwrap();
        device
            .set_record_field("XV1", "out.open_cmd", ScalarValue::Bool(true))
            .unwrap();
        assert_eq!(device.commit_changes().unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(plc.bytes(30, 7, 1).unwrap(), vec![0b0000_0001]);
        assert_eq!(device.stats().unwrap().entries_written, 1);

        device.enable_group("fast", false).unwrap();
        assert!(scheduler.job_names().is_empty());

        device.stop().await;
        assert!(!device.is_running());
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn backpressured_edits_stay_pending() {
        let driver = SimulatedDriver::new();
        let plc = driver.plc("plc1");
        let settings = PipelineSettings {
            write_capacity: 1,
            ..PipelineSettings::default()
        };
        let device = PlcDevice::new("plc1", "sim://plc1", settings);
        device
            .add_item(Item::new("valves", ItemTag::new(30, 0, 8)))
            .unwrap();
        device
            .add_group(Group::new("fast", Duration::from_millis(100)))
            .unwrap();
        device.assign_item("fast", "valves").unwrap();
        device
            .add_record(Box::new(Valve::new("XV1", "0")), "valves")
            .unwrap();

        let scheduler = Arc::new(Scheduler::new());
        device.start(&driver, scheduler.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        device
            .set_record_field("XV1", WRITE_ENABLE, ScalarValue::Bool(true))
            .unwrap();
        device
            .set_record_field("XV1", "out.mode", ScalarValue::Byte(5))
            .unwrap();
        device
            .set_record_field("XV1", "out.open_cmd", ScalarValue::Bool(true))
            .unwrap();
        assert!(matches!(
            device.commit_changes(),
            Err(MirrorError::Backpressure(_))
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(device.commit_changes().unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(plc.bytes(30, 2, 2).unwrap(), vec![5, 1]);
        assert_eq!(device.stats().unwrap().entries_written, 2);
        assert_eq!(device.stats().unwrap().backpressure, 1);

        device.stop().await;
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_start_releases_everything() {
        let driver = SimulatedDriver::new();
        let plc = driver.plc("plc1");
        let device = PlcDevice::new("plc1", "sim://plc1", PipelineSettings::default());
        device
            .add_item(Item::new("valves", ItemTag::new(30, 0, 8)))
            .unwrap();
        device
            .add_group(Group::new("a", Duration::from_millis(100)))
            .unwrap();
        device.add_group(Group::new("b", Duration::ZERO)).unwrap();
        device.assign_item("a", "valves").unwrap();

        let scheduler = Arc::new(Scheduler::new());
        assert!(matches!(
            device.start(&driver, scheduler.clone()).await,
            Err(MirrorError::InvalidData(_))
        ));
        assert!(!device.is_running());
        assert!(scheduler.job_names().is_empty());

        let reads = plc.read_count();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(plc.read_count(), reads);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn start_fails_for_offline_plc() {
        let driver = SimulatedDriver::new();
        driver.plc("plc1").set_offline(true);
        let device = device();
        assert!(device
            .start(&driver, Arc::new(Scheduler::new()))
            .await
            .is_err());
        assert!(!device.is_running());
    }
}
