use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::binding::RecordBinding;
use super::schema::{FieldMask, RecordSchema, WRITE_ENABLE};
use crate::address::OffsetAddress;
use crate::codec::ScalarValue;
use crate::devices::Item;
use crate::plc::TagHandle;
use crate::utils::error::MirrorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fields edited since the last drain. `overrun` marks fields edited again
/// before their previous change was consumed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldChangeEvent {
    pub changed: FieldMask,
    pub overrun: FieldMask,
}

/// One serialized write destined for the device. `fields` names the record
/// fields it carries so a rejected write can be handed back.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub tag: TagHandle,
    pub values: Vec<ScalarValue>,
    pub payload: Bytes,
    pub fields: FieldMask,
}

/// A typed view over a byte range of an item.
///
/// Implementors provide the type-specific decode/encode rules; the lifecycle
/// is shared through [`RecordBinding`].
pub trait Record: Send + Sync {
    fn schema(&self) -> &'static RecordSchema;
    fn binding(&self) -> &RecordBinding;
    fn binding_mut(&mut self) -> &mut RecordBinding;

    /// Decodes the input fields from `view`, assigning only values that
    /// differ. Returns the mask of assigned fields.
    fn decode(&mut self, view: &[u8]) -> FieldMask;

    /// Writes the write-intent fields into a copy of the current view.
    fn encode_outputs(&self, out: &mut BytesMut);

    /// Device representation of a flattened field.
    fn field_value(&self, index: usize) -> Option<ScalarValue>;

    /// Assigns a write-intent field. `write_enable` is handled by the caller.
    fn assign_output(&mut self, path: &str, value: ScalarValue) -> Result<(), MirrorError>;

    fn to_json(&self) -> Value;

    fn id(&self) -> RecordId {
        self.binding().id()
    }

    fn name(&self) -> &str {
        self.binding().name()
    }

    fn base_offset(&self) -> OffsetAddress {
        self.binding().offset()
    }

    fn is_attached(&self) -> bool {
        self.binding().is_attached()
    }

    fn attached_item(&self) -> Option<Arc<Item>> {
        self.binding().item()
    }

    fn write_enabled(&self) -> bool {
        self.binding().write_enabled()
    }

    fn fields_to_monitor(&self) -> &'static str {
        self.schema().monitor
    }

    fn attach(&mut self, item: &Arc<Item>) -> Result<(), MirrorError> {
        let width = self.schema().byte_width;
        let writable = self.schema().is_writable();
        self.binding_mut().attach(item, width, writable)
    }

    fn detach(&mut self) {
        self.binding_mut().detach();
    }

    fn update(&mut self) -> FieldMask {
        match self.binding_mut().refresh_view() {
            Some(view) => self.decode(&view),
            None => FieldMask::new(),
        }
    }

    fn process(&mut self) -> Option<PendingWrite> {
        if !self.write_enabled() {
            return None;
        }
        let mut out = self.binding_mut().begin_write()?;
        self.encode_outputs(&mut out);

        let mut fields = FieldMask::new();
        let mut values = Vec::new();
        for field in self.schema().fields.iter().filter(|f| f.is_output() && f.offset.is_some()) {
            if let Some(value) = self.field_value(field.index) {
                fields.set(field.index, true);
                values.push(value);
            }
        }
        self.binding_mut().finish_write(out, values, fields)
    }

    fn set_field(&mut self, path: &str, value: ScalarValue) -> Result<(), MirrorError> {
        let schema = self.schema();
        let field = schema.find(path).ok_or_else(|| {
            MirrorError::InvalidData(format!("{} has no field '{}'", schema.type_name, path))
        })?;
        if field.scalar_kind() != Some(value.kind()) {
            return Err(MirrorError::InvalidData(format!(
                "Field '{}' of {} expects {:?}, got {:?}",
                path,
                schema.type_name,
                field.kind,
                value.kind()
            )));
        }

        if path == WRITE_ENABLE {
            let enabled = value.as_bool().unwrap_or(false);
            self.binding_mut().set_write_enabled(enabled);
        } else if field.is_output() {
            self.assign_output(path, value)?;
        } else {
            return Err(MirrorError::InvalidData(format!(
                "Field '{}' of {} is read-only",
                path, schema.type_name
            )));
        }

        self.binding_mut().mark_changed(field.index);
        Ok(())
    }

    fn take_changes(&mut self) -> Option<FieldChangeEvent> {
        self.binding_mut().take_changes()
    }

    /// Re-marks `fields` as pending after their write could not be queued.
    fn restore_pending(&mut self, fields: &FieldMask) {
        self.binding_mut().restore_pending(fields);
    }

    fn restore_state(&mut self, _state: &Value) -> Result<(), MirrorError> {
        Err(MirrorError::NotImplemented(format!(
            "{} does not restore persisted state",
            self.schema().type_name
        )))
    }
}
