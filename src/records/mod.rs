pub mod analog_input;
pub mod analog_output;
pub mod binding;
pub mod clock;
pub mod counter;
pub mod factory;
pub mod schema;
pub mod timer;
pub mod traits;
pub mod valve;

pub use analog_input::AnalogInput;
pub use analog_output::AnalogOutput;
pub use binding::RecordBinding;
pub use clock::Clock;
pub use counter::Counter;
pub use factory::{create_record, RecordKind};
pub use schema::{FieldBinding, FieldKind, FieldMask, RecordSchema};
pub use timer::Timer;
pub use traits::{FieldChangeEvent, PendingWrite, Record, RecordId};
pub use valve::Valve;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::utils::error::MirrorError;

pub type SharedRecord = Arc<Mutex<Box<dyn Record>>>;

/// Records of one device, shared between the control surface and the read
/// worker. Lock a record only for synchronous work; never across `.await`.
#[derive(Default)]
pub struct RecordRegistry {
    records: RwLock<HashMap<RecordId, SharedRecord>>,
}

impl RecordRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: Box<dyn Record>) -> Result<SharedRecord, MirrorError> {
        let id = record.id();
        let shared = Arc::new(Mutex::new(record));
        self.records
            .write()
            .map_err(|_| MirrorError::LockError)?
            .insert(id, shared.clone());
        Ok(shared)
    }

    pub fn remove(&self, id: &RecordId) -> Option<SharedRecord> {
        self.records.write().ok()?.remove(id)
    }

    pub fn get(&self, id: &RecordId) -> Option<SharedRecord> {
        self.records.read().ok()?.get(id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<SharedRecord> {
        let records = self.records.read().ok()?;
        records
            .values()
            .find(|r| r.lock().map(|r| r.name() == name).unwrap_or(false))
            .cloned()
    }

    pub fn all(&self) -> Vec<SharedRecord> {
        self.records
            .read()
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
