//! Attach/detach state shared by every record type.

use bytes::{Bytes, BytesMut};
use log::{debug, warn};
use std::sync::{Arc, Weak};

use super::schema::FieldMask;
use super::traits::{FieldChangeEvent, PendingWrite, RecordId};
use crate::address::{resolve_into, OffsetAddress};
use crate::codec::ScalarValue;
use crate::devices::Item;
use crate::plc::TagHandle;
use crate::utils::error::MirrorError;

#[derive(Debug)]
pub struct RecordBinding {
    id: RecordId,
    name: String,
    offset_text: String,
    offset: OffsetAddress,
    width: usize,
    write_enabled: bool,
    view: Option<Bytes>,
    write_view: Option<BytesMut>,
    item: Option<Weak<Item>>,
    pending: FieldMask,
    overrun: FieldMask,
}

impl RecordBinding {
    pub fn new(name: impl Into<String>, offset_text: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            name: name.into(),
            offset_text: offset_text.into(),
            offset: OffsetAddress::default(),
            width: 0,
            write_enabled: false,
            view: None,
            write_view: None,
            item: None,
            pending: FieldMask::new(),
            overrun: FieldMask::new(),
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn offset_text(&self) -> &str {
        &self.offset_text
    }

    pub fn offset(&self) -> OffsetAddress {
        self.offset
    }

    pub fn write_enabled(&self) -> bool {
        self.write_enabled
    }

    pub fn set_write_enabled(&mut self, enabled: bool) {
        self.write_enabled = enabled;
    }

    /// The attached item, if it is still alive.
    pub fn item(&self) -> Option<Arc<Item>> {
        self.item.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_attached(&self) -> bool {
        self.item().is_some()
    }

    pub fn view(&self) -> Option<&Bytes> {
        self.view.as_ref()
    }

    pub fn attach(&mut self, item: &Arc<Item>, width: usize, writable: bool) -> Result<(), MirrorError> {
        if self.item.is_some() {
            self.detach();
        }

        resolve_into(&self.offset_text, &mut self.offset);
        let start = self.offset.index();
        if start + width > item.len() {
            return Err(MirrorError::InvalidData(format!(
                "Record '{}' at {} needs {} bytes but item '{}' holds {}",
                self.name,
                self.offset,
                width,
                item.name(),
                item.len()
            )));
        }

        let view = item.slice(start, width).ok_or_else(|| {
            MirrorError::InvalidData(format!("Item '{}' image shorter than declared", item.name()))
        })?;
        self.write_view = writable.then(|| BytesMut::from(view.as_ref()));
        self.view = Some(view);
        self.width = width;
        self.item = Some(Arc::downgrade(item));
        item.add_listener(self.id);

        debug!("Record '{}' attached to {} at {}", self.name, item.tag(), self.offset);
        Ok(())
    }

    pub fn detach(&mut self) {
        if let Some(item) = self.item.take().and_then(|w| w.upgrade()) {
            item.remove_listener(&self.id);
            debug!("Record '{}' detached from '{}'", self.name, item.name());
        }
        self.view = None;
        self.write_view = None;
    }

    /// Re-slices the item's current image. `None` while detached.
    pub fn refresh_view(&mut self) -> Option<Bytes> {
        let item = match self.item() {
            Some(item) => item,
            None => {
                if self.item.take().is_some() {
                    warn!("⚠️  Item of record '{}' was dropped, detaching", self.name);
                    self.view = None;
                    self.write_view = None;
                }
                return None;
            }
        };
        let view = item.slice(self.offset.index(), self.width)?;
        self.view = Some(view.clone());
        Some(view)
    }

    /// Copies the current view into the write buffer and hands it out for
    /// encoding. `None` while detached or for read-only records.
    pub fn begin_write(&mut self) -> Option<BytesMut> {
        let view = self.refresh_view()?;
        let mut out = self.write_view.take()?;
        out.clear();
        out.extend_from_slice(&view);
        Some(out)
    }

    /// Builds the write covering the whole record range and keeps the buffer
    /// for the next cycle.
    pub fn finish_write(
        &mut self,
        out: BytesMut,
        values: Vec<ScalarValue>,
        fields: FieldMask,
    ) -> Option<PendingWrite> {
        let item = self.item()?;
        let payload = Bytes::copy_from_slice(&out);
        self.write_view = Some(out);
        Some(PendingWrite {
            tag: TagHandle::new(item.tag().clone(), OffsetAddress::bytes(self.offset.byte_offset())),
            values,
            payload,
            fields,
        })
    }

    pub fn mark_changed(&mut self, index: usize) {
        if self.pending.get(index) {
            self.overrun.set(index, true);
        }
        self.pending.set(index, true);
    }

    /// Merges `fields` back into the pending set without flagging overruns.
    pub fn restore_pending(&mut self, fields: &FieldMask) {
        self.pending = self.pending | *fields;
    }

    pub fn take_changes(&mut self) -> Option<FieldChangeEvent> {
        if self.pending.is_empty() {
            return None;
        }
        let event = FieldChangeEvent {
            changed: self.pending,
            overrun: self.overrun,
        };
        self.pending = FieldMask::new();
        self.overrun = FieldMask::new();
        Some(event)
    }
}

/// Assigns `value` when it differs, flagging `index` in `mask`.
pub fn assign<T: PartialEq>(slot: &mut T, value: T, index: usize, mask: &mut FieldMask) {
    if *slot != value {
        *slot = value;
        mask.set(index, true);
    }
}

/// Like [`assign`] but compares floats by bit pattern so NaN payloads settle.
pub fn assign_f32(slot: &mut f32, value: f32, index: usize, mask: &mut FieldMask) {
    if slot.to_bits() != value.to_bits() {
        *slot = value;
        mask.set(index, true);
    }
}
