//! Per-device acquisition pipeline: one read worker and one write worker,
//! each draining its own bounded queue.
//!
//! Writes take priority. The first queued write pauses the read worker; the
//! write worker then drains whatever is queued (up to the batch limit) into a
//! single request and resumes reads once that request has finished, whatever
//! its outcome.

use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::devices::Group;
use crate::plc::{PlcConnection, ReadRequest, WriteRequest};
use crate::records::{PendingWrite, RecordRegistry};
use crate::utils::error::MirrorError;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub read_capacity: usize,
    pub write_capacity: usize,
    pub max_write_batch: usize,
    pub request_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            read_capacity: DEFAULT_QUEUE_CAPACITY,
            write_capacity: DEFAULT_QUEUE_CAPACITY,
            max_write_batch: 64,
            request_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
pub struct ReadEvent {
    pub group: Arc<Group>,
}

#[derive(Debug)]
pub struct WriteEvent {
    pub write: PendingWrite,
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    reads_ok: AtomicU64,
    reads_failed: AtomicU64,
    write_batches_ok: AtomicU64,
    write_batches_failed: AtomicU64,
    entries_written: AtomicU64,
    backpressure: AtomicU64,
    pauses: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatsSnapshot {
    pub reads_ok: u64,
    pub reads_failed: u64,
    pub write_batches_ok: u64,
    pub write_batches_failed: u64,
    pub entries_written: u64,
    pub backpressure: u64,
    pub pauses: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            reads_ok: self.reads_ok.load(Ordering::Relaxed),
            reads_failed: self.reads_failed.load(Ordering::Relaxed),
            write_batches_ok: self.write_batches_ok.load(Ordering::Relaxed),
            write_batches_failed: self.write_batches_failed.load(Ordering::Relaxed),
            entries_written: self.entries_written.load(Ordering::Relaxed),
            backpressure: self.backpressure.load(Ordering::Relaxed),
            pauses: self.pauses.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Gate the read worker waits on while writes are in flight.
#[derive(Debug, Clone)]
pub struct PauseGate {
    holders: Arc<watch::Sender<usize>>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0usize);
        Self {
            holders: Arc::new(tx),
        }
    }

    /// Closes the gate until the returned guard is dropped.
    pub fn pause(&self) -> ResumeGuard {
        self.holders.send_modify(|n| *n += 1);
        ResumeGuard {
            holders: self.holders.clone(),
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.holders.borrow() > 0
    }

    pub async fn wait_resumed(&self) {
        let mut rx = self.holders.subscribe();
        // The sender lives in `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

#[must_use = "reads resume as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ResumeGuard {
    holders: Arc<watch::Sender<usize>>,
}

impl Drop for ResumeGuard {
    fn drop(&mut self) {
        self.holders.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Shared state of both workers.
struct Worker {
    device: String,
    connection: Arc<dyn PlcConnection>,
    records: Arc<RecordRegistry>,
    io_lock: AsyncMutex<()>,
    gate: PauseGate,
    stats: Arc<PipelineStats>,
    settings: PipelineSettings,
}

impl Worker {
    async fn execute_read(&self, group: &Group) {
        let items = group.enabled_items();
        if items.is_empty() {
            debug!("Group '{}' has no enabled items", group.name());
            return;
        }

        let mut request = ReadRequest::new();
        for item in &items {
            request.add_tag(item.tag().clone());
        }

        let result = {
            let _io = self.io_lock.lock().await;
            timeout(self.settings.request_timeout, self.connection.read(&request)).await
        };

        let response = match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                PipelineStats::bump(&self.stats.reads_failed);
                if e.is_transient() {
                    warn!("⚠️  [{}] Read of group '{}' failed: {}", self.device, group.name(), e);
                } else {
                    error!("❌ [{}] Read of group '{}' failed: {}", self.device, group.name(), e);
                }
                return;
            }
            Err(_) => {
                PipelineStats::bump(&self.stats.reads_failed);
                warn!(
                    "⏱️  [{}] Read of group '{}' timed out after {:?}",
                    self.device,
                    group.name(),
                    self.settings.request_timeout
                );
                return;
            }
        };
        PipelineStats::bump(&self.stats.reads_ok);

        for item in &items {
            let data = match response.data_for(item.tag()) {
                Some(Ok(data)) => data.clone(),
                Some(Err(reason)) => {
                    warn!("⚠️  [{}] Item '{}' not read: {}", self.device, item.name(), reason);
                    continue;
                }
                None => {
                    warn!("⚠️  [{}] No data returned for item '{}'", self.device, item.name());
                    continue;
                }
            };
            if item.replace_buffer(data).is_err() {
                continue;
            }

            for id in item.listeners() {
                let Some(record) = self.records.get(&id) else {
                    continue;
                };
                let changed = match record.lock() {
                    Ok(mut record) => record.update(),
                    Err(_) => {
                        error!("❌ [{}] Record {} lock poisoned", self.device, id);
                        continue;
                    }
                };
                if !changed.is_empty() {
                    debug!("[{}] Record {} updated {} field(s)", self.device, id, changed.len());
                }
            }
        }
    }

    async fn flush(&self, batch: Vec<PendingWrite>, _resume: ResumeGuard) {
        let mut request = WriteRequest::new();
        for write in &batch {
            request.add(write.tag.clone(), write.payload.clone());
        }

        let result = {
            let _io = self.io_lock.lock().await;
            timeout(self.settings.request_timeout, self.connection.write(&request)).await
        };

        match result {
            Ok(Ok(response)) => {
                PipelineStats::bump(&self.stats.write_batches_ok);
                self.stats
                    .entries_written
                    .fetch_add(response.accepted as u64, Ordering::Relaxed);
                for (tag, reason) in &response.rejected {
                    warn!("⚠️  [{}] Device rejected write to {}: {}", self.device, tag, reason);
                }
                debug!("[{}] Wrote batch of {} entries", self.device, request.len());
            }
            Ok(Err(e)) => {
                PipelineStats::bump(&self.stats.write_batches_failed);
                error!(
                    "❌ [{}] Write batch of {} entries failed: {}",
                    self.device,
                    request.len(),
                    e
                );
            }
            Err(_) => {
                PipelineStats::bump(&self.stats.write_batches_failed);
                warn!(
                    "⏱️  [{}] Write batch of {} entries timed out",
                    self.device,
                    request.len()
                );
            }
        }
    }
}

pub struct AcquisitionPipeline {
    device: String,
    read_tx: mpsc::Sender<ReadEvent>,
    write_tx: mpsc::Sender<WriteEvent>,
    gate: PauseGate,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AcquisitionPipeline {
    /// Spawns the read and write workers. Must be called inside a tokio runtime.
    pub fn start(
        device: &str,
        connection: Arc<dyn PlcConnection>,
        records: Arc<RecordRegistry>,
        settings: PipelineSettings,
    ) -> Self {
        let (read_tx, read_rx) = mpsc::channel(settings.read_capacity.max(1));
        let (write_tx, write_rx) = mpsc::channel(settings.write_capacity.max(1));
        let gate = PauseGate::new();
        let stats = Arc::new(PipelineStats::default());
        let cancel = CancellationToken::new();

        let worker = Arc::new(Worker {
            device: device.to_string(),
            connection,
            records,
            io_lock: AsyncMutex::new(()),
            gate: gate.clone(),
            stats: stats.clone(),
            settings,
        });

        let read_task = tokio::spawn(read_loop(worker.clone(), read_rx, cancel.clone()));
        let write_task = tokio::spawn(write_loop(worker, write_rx, cancel.clone()));
        info!("🚀 [{}] Acquisition pipeline started", device);

        Self {
            device: device.to_string(),
            read_tx,
            write_tx,
            gate,
            stats,
            cancel,
            tasks: Mutex::new(vec![read_task, write_task]),
        }
    }

    pub fn submit_read(&self, group: Arc<Group>) -> Result<(), MirrorError> {
        self.read_tx
            .try_send(ReadEvent { group })
            .map_err(|e| self.rejected("read", e))
    }

    pub fn submit_write(&self, write: PendingWrite) -> Result<(), MirrorError> {
        debug!("[{}] Queued write to {}", self.device, write.tag);
        self.write_tx
            .try_send(WriteEvent { write })
            .map_err(|e| self.rejected("write", e))
    }

    fn rejected<T>(&self, queue: &str, e: mpsc::error::TrySendError<T>) -> MirrorError {
        match e {
            mpsc::error::TrySendError::Full(_) => {
                PipelineStats::bump(&self.stats.backpressure);
                warn!("⚠️  [{}] {} queue full", self.device, queue);
                MirrorError::Backpressure(format!("{} {} queue is full", self.device, queue))
            }
            mpsc::error::TrySendError::Closed(_) => MirrorError::ServiceNotAvailable(format!(
                "{} pipeline is shut down",
                self.device
            )),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stops both workers. Queued events are dropped unprocessed; a batch
    /// already handed to the driver runs to completion or timeout.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<_> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            if let Err(e) = task.await {
                error!("❌ [{}] Worker ended abnormally: {}", self.device, e);
            }
        }
        info!("🛑 [{}] Acquisition pipeline stopped", self.device);
    }
}

async fn read_loop(worker: Arc<Worker>, mut rx: mpsc::Receiver<ReadEvent>, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = worker.gate.wait_resumed() => {}
        }

        worker.execute_read(&event.group).await;
    }
    rx.close();
    debug!("[{}] Read worker exited", worker.device);
}

async fn write_loop(worker: Arc<Worker>, mut rx: mpsc::Receiver<WriteEvent>, cancel: CancellationToken) {
    let max_batch = worker.settings.max_write_batch.max(1);
    loop {
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let resume = worker.gate.pause();
        PipelineStats::bump(&worker.stats.pauses);

        let mut batch = vec![first.write];
        while batch.len() < max_batch {
            match rx.try_recv() {
                Ok(event) => batch.push(event.write),
                Err(_) => break,
            }
        }

        worker.flush(batch, resume).await;
    }
    rx.close();
    debug!("[{}] Write worker exited", worker.device);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::OffsetAddress;
    use crate::plc::{ItemTag, PlcDriver, SimulatedDriver, SimulatedPlc, TagHandle};
    use crate::records::Record;
    use bytes::Bytes;

    async fn pipeline(settings: PipelineSettings) -> (AcquisitionPipeline, Arc<SimulatedPlc>) {
        pipeline_with(settings, Arc::new(RecordRegistry::new())).await
    }

    async fn pipeline_with(
        settings: PipelineSettings,
        records: Arc<RecordRegistry>,
    ) -> (AcquisitionPipeline, Arc<SimulatedPlc>) {
        let driver = SimulatedDriver::new();
        let plc = driver.plc("test");
        let connection = driver.connect("sim://test").await.unwrap();
        let pipeline = AcquisitionPipeline::start("test", connection, records, settings);
        (pipeline, plc)
    }

    fn write(byte: i64) -> PendingWrite {
        PendingWrite {
            tag: TagHandle::new(ItemTag::new(1, 0, 16), OffsetAddress::bytes(byte)),
            values: Vec::new(),
            payload: Bytes::from_static(&[0xAB]),
            fields: crate::records::FieldMask::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn queued_writes_flush_as_one_batch() {
        let (pipeline, plc) = pipeline(PipelineSettings::default()).await;
        for byte in 0..5 {
            pipeline.submit_write(write(byte)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let journal = plc.write_journal();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].len(), 5);
        assert_eq!(plc.bytes(1, 0, 5).unwrap(), vec![0xAB; 5]);
        assert_eq!(pipeline.stats().entries_written, 5);
        pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn batch_size_is_capped() {
        let settings = PipelineSettings {
            max_write_batch: 2,
            ..PipelineSettings::default()
        };
        let (pipeline, plc) = pipeline(settings).await;
        for byte in 0..5 {
            pipeline.submit_write(write(byte)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sizes: Vec<_> = plc.write_journal().iter().map(|r| r.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reads_pause_during_failed_write_and_resume_after() {
        let (pipeline, plc) = pipeline(PipelineSettings::default()).await;
        plc.set_latency(Duration::from_millis(100));
        plc.set_fail_writes(true);

        let group = Arc::new(Group::new("fast", Duration::from_millis(100)));
        group.add_item(Arc::new(crate::devices::Item::new("a", ItemTag::new(1, 0, 4))));

        pipeline.submit_write(write(0)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(pipeline.is_paused());

        pipeline.submit_read(group).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(plc.read_count(), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!pipeline.is_paused());
        assert_eq!(plc.read_count(), 1);

        let stats = pipeline.stats();
        assert_eq!(stats.write_batches_failed, 1);
        assert_eq!(stats.pauses, 1);
        assert_eq!(stats.reads_ok, 1);
        pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_write_still_resumes_reads() {
        let settings = PipelineSettings {
            request_timeout: Duration::from_millis(50),
            ..PipelineSettings::default()
        };
        let (pipeline, plc) = pipeline(settings).await;
        plc.set_latency(Duration::from_secs(1));

        pipeline.submit_write(write(0)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(pipeline.is_paused());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!pipeline.is_paused());
        assert_eq!(pipeline.stats().write_batches_failed, 1);
        pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_read_keeps_last_image() {
        let item = Arc::new(crate::devices::Item::new("analogs", ItemTag::new(1, 0, 18)));
        let mut record = crate::records::AnalogInput::new("TT101", "0");
        record.attach(&item).unwrap();
        let records = Arc::new(RecordRegistry::new());
        let shared = records.insert(Box::new(record)).unwrap();

        let group = Arc::new(Group::new("fast", Duration::from_millis(100)));
        group.add_item(item.clone());

        let (pipeline, plc) = pipeline_with(PipelineSettings::default(), records).await;
        plc.set_bytes(1, 0, &[0x04, 0xD2]).unwrap();
        pipeline.submit_read(group.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(shared.lock().unwrap().to_json()["i_mode"], 1234);
        let image = item.buffer();

        plc.set_bytes(1, 0, &[0x00, 0x07]).unwrap();
        plc.set_fail_reads(true);
        pipeline.submit_read(group).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(item.buffer(), image);
        assert_eq!(shared.lock().unwrap().to_json()["i_mode"], 1234);
        let stats = pipeline.stats();
        assert_eq!(stats.reads_ok, 1);
        assert_eq!(stats.reads_failed, 1);
        pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_queued_writes() {
        let settings = PipelineSettings {
            max_write_batch: 1,
            ..PipelineSettings::default()
        };
        let (pipeline, plc) = pipeline(settings).await;
        plc.set_latency(Duration::from_millis(100));
        for byte in 0..3 {
            pipeline.submit_write(write(byte)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(pipeline.is_paused());

        pipeline.shutdown().await;
        assert_eq!(plc.write_journal().len(), 1);
        assert_eq!(pipeline.stats().entries_written, 1);
        assert_eq!(plc.bytes(1, 0, 3).unwrap(), vec![0xAB, 0, 0]);
    }

    #[tokio::test]
    async fn full_queue_reports_backpressure() {
        let settings = PipelineSettings {
            write_capacity: 2,
            ..PipelineSettings::default()
        };
        let (pipeline, _plc) = pipeline(settings).await;
        pipeline.submit_write(write(0)).unwrap();
        pipeline.submit_write(write(1)).unwrap();
        assert!(matches!(
            pipeline.submit_write(write(2)),
            Err(MirrorError::Backpressure(_))
        ));
        assert_eq!(pipeline.stats().backpressure, 1);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_queues() {
        let (pipeline, _plc) = pipeline(PipelineSettings::default()).await;
        pipeline.shutdown().await;
        assert!(!pipeline.is_running());
        assert!(matches!(
            pipeline.submit_write(write(0)),
            Err(MirrorError::ServiceNotAvailable(_))
        ));
    }

    #[test]
    fn gate_reopens_when_guard_drops() {
        let gate = PauseGate::new();
        let guard = gate.pause();
        assert!(gate.is_paused());
        drop(guard);
        assert!(!gate.is_paused());
    }
}
