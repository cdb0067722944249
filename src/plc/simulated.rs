//! In-memory PLC used by the command line demo and by tests.
//!
//! Data blocks grow on demand and start zero-filled. Reads and writes can be
//! slowed down or made to fail to exercise the acquisition pipeline.

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::driver::{
    PlcConnection, PlcDriver, ReadRequest, ReadResponse, TagReadResult, WriteRequest,
    WriteResponse,
};
use crate::codec::with_bit;
use crate::utils::error::MirrorError;

pub const SIM_SCHEME: &str = "sim";

#[derive(Debug, Default)]
pub struct SimulatedPlc {
    blocks: Mutex<HashMap<u16, Vec<u8>>>,
    journal: Mutex<Vec<WriteRequest>>,
    latency: Mutex<Duration>,
    read_count: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    offline: AtomicBool,
}

impl SimulatedPlc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Copies `bytes` into data block `db_number` starting at `start`.
    pub fn set_bytes(&self, db_number: u16, start: usize, bytes: &[u8]) -> Result<(), MirrorError> {
        let mut blocks = self.blocks.lock().map_err(|_| MirrorError::LockError)?;
        let block = blocks.entry(db_number).or_default();
        if block.len() < start + bytes.len() {
            block.resize(start + bytes.len(), 0);
        }
        block[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn bytes(&self, db_number: u16, start: usize, len: usize) -> Result<Vec<u8>, MirrorError> {
        let mut blocks = self.blocks.lock().map_err(|_| MirrorError::LockError)?;
        let block = blocks.entry(db_number).or_default();
        if block.len() < start + len {
            block.resize(start + len, 0);
        }
        Ok(block[start..start + len].to_vec())
    }

    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut guard) = self.latency.lock() {
            *guard = latency;
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::SeqCst)
    }

    /// Every write request executed so far, failed ones included.
    pub fn write_journal(&self) -> Vec<WriteRequest> {
        self.journal
            .lock()
            .map(|journal| journal.clone())
            .unwrap_or_default()
    }

    fn latency(&self) -> Duration {
        self.latency.lock().map(|l| *l).unwrap_or_default()
    }

    fn apply_write(&self, request: &WriteRequest) -> Result<WriteResponse, MirrorError> {
        let mut blocks = self.blocks.lock().map_err(|_| MirrorError::LockError)?;
        let mut response = WriteResponse::default();

        for entry in request.entries() {
            let block = blocks.entry(entry.target.item.db_number).or_default();
            let start = entry.target.absolute_byte() as usize;
            let end = start + entry.payload.len().max(1);
            if block.len() < end {
                block.resize(end, 0);
            }

            match entry.target.bit() {
                Some(bit) => {
                    let value = entry.payload.first().copied().unwrap_or(0) != 0;
                    block[start] = with_bit(block[start], bit, value);
                }
                None => block[start..start + entry.payload.len()].copy_from_slice(&entry.payload),
            }
            response.accepted += 1;
        }
        Ok(response)
    }
}

pub struct SimulatedConnection {
    plc: Arc<SimulatedPlc>,
    open: AtomicBool,
}

#[async_trait]
impl PlcConnection for SimulatedConnection {
    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.plc.offline.load(Ordering::SeqCst)
    }

    async fn read(&self, request: &ReadRequest) -> Result<ReadResponse, MirrorError> {
        if !self.is_connected() {
            return Err(MirrorError::ConnectionError("Simulated PLC is offline".to_string()));
        }
        let latency = self.plc.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.plc.read_count.fetch_add(1, Ordering::SeqCst);

        if self.plc.fail_reads.load(Ordering::SeqCst) {
            return Err(MirrorError::CommunicationError("Simulated read failure".to_string()));
        }

        let mut response = ReadResponse::default();
        for tag in request.tags() {
            let data = self
                .plc
                .bytes(tag.db_number, tag.start as usize, tag.length)
                .map(Bytes::from)
                .map_err(|e| e.to_string());
            response.results.push(TagReadResult {
                tag: tag.clone(),
                data,
            });
        }
        debug!("Simulated read of {} tags", request.len());
        Ok(response)
    }

    async fn write(&self, request: &WriteRequest) -> Result<WriteResponse, MirrorError> {
        if !self.is_connected() {
            return Err(MirrorError::ConnectionError("Simulated PLC is offline".to_string()));
        }
        let latency = self.plc.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.plc
            .journal
            .lock()
            .map_err(|_| MirrorError::LockError)?
            .push(request.clone());

        if self.plc.fail_writes.load(Ordering::SeqCst) {
            return Err(MirrorError::CommunicationError("Simulated write failure".to_string()));
        }
        self.plc.apply_write(request)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Driver for `sim://<name>` URLs. Each name maps to one shared [`SimulatedPlc`].
#[derive(Debug, Default)]
pub struct SimulatedDriver {
    plcs: Mutex<HashMap<String, Arc<SimulatedPlc>>>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the PLC behind `name`, creating it on first use.
    pub fn plc(&self, name: &str) -> Arc<SimulatedPlc> {
        match self.plcs.lock() {
            Ok(mut plcs) => plcs.entry(name.to_string()).or_insert_with(SimulatedPlc::new).clone(),
            Err(_) => {
                warn!("⚠️  Simulated PLC registry poisoned, handing out a detached PLC");
                SimulatedPlc::new()
            }
        }
    }
}

#[async_trait]
impl PlcDriver for SimulatedDriver {
    fn protocol(&self) -> &str {
        SIM_SCHEME
    }

    async fn connect(&self, url: &str) -> Result<Arc<dyn PlcConnection>, MirrorError> {
        let name = url
            .strip_prefix("sim://")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| MirrorError::ConnectionError(format!("Unsupported URL '{}'", url)))?;

        let plc = self.plc(name);
        if plc.offline.load(Ordering::SeqCst) {
            return Err(MirrorError::ConnectionError(format!("PLC '{}' is offline", name)));
        }

        info!("🔌 Connected to simulated PLC '{}'", name);
        Ok(Arc::new(SimulatedConnection {
            plc,
            open: AtomicBool::new(true),
        }))
    }
}
