//! Turns record field edits into per-field device writes.

use bytes::Bytes;
use log::{debug, warn};
use std::collections::HashMap;

use crate::codec::SCRATCH_CAPACITY;
use crate::plc::TagHandle;
use crate::records::schema::{mask_indices, FieldMask};
use crate::records::{FieldChangeEvent, PendingWrite, Record, RecordId};

#[derive(Debug, Default)]
pub struct ChangeDispatcher {
    monitored: HashMap<RecordId, FieldMask>,
}

impl ChangeDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the monitored field set of `record` once.
    pub fn register(&mut self, record: &dyn Record) {
        let mask = record.schema().monitored_mask();
        debug!(
            "Monitoring {} fields of '{}' ({})",
            mask.len(),
            record.name(),
            record.schema().type_name
        );
        self.monitored.insert(record.id(), mask);
    }

    pub fn unregister(&mut self, id: &RecordId) {
        self.monitored.remove(id);
    }

    pub fn is_registered(&self, id: &RecordId) -> bool {
        self.monitored.contains_key(id)
    }

    /// One write per changed, monitored, byte-mapped field.
    pub fn dispatch(&self, record: &dyn Record, event: &FieldChangeEvent) -> Vec<PendingWrite> {
        let monitored = match self.monitored.get(&record.id()) {
            Some(mask) => *mask,
            None => return Vec::new(),
        };
        if !record.write_enabled() {
            return Vec::new();
        }
        let item = match record.attached_item() {
            Some(item) => item,
            None => {
                warn!("⚠️  Record '{}' has changes but no attached item", record.name());
                return Vec::new();
            }
        };

        if !event.overrun.is_empty() {
            warn!(
                "⚠️  Record '{}' overran {} pending field change(s)",
                record.name(),
                event.overrun.len()
            );
        }

        let schema = record.schema();
        let base = record.base_offset();
        let mut writes = Vec::new();

        for index in mask_indices(&(event.changed & monitored)) {
            let field = match schema.field(index) {
                Some(field) => field,
                None => continue,
            };
            let offset = match field.offset {
                Some(offset) => offset,
                None => {
                    debug!("Field '{}' of '{}' is not byte-mapped", field.path, record.name());
                    continue;
                }
            };
            let value = match record.field_value(index) {
                Some(value) => value,
                None => {
                    warn!("⚠️  Field '{}' of '{}' has no value", field.path, record.name());
                    continue;
                }
            };

            let mut scratch = [0u8; SCRATCH_CAPACITY];
            let len = value.encode_into(&mut scratch);
            let tag = TagHandle::new(item.tag().clone(), offset.relative_to(&base));
            debug!("Dispatching {} = {} to {}", field.path, value, tag);

            let mut fields = FieldMask::new();
            fields.set(index, true);
            writes.push(PendingWrite {
                tag,
                values: vec![value],
                payload: Bytes::copy_from_slice(&scratch[..len]),
                fields,
            });
        }
        writes
    }
}
