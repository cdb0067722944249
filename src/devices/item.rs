use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::plc::ItemTag;
use crate::records::RecordId;
use crate::utils::error::MirrorError;

/// The current memory image of one contiguous data block range.
///
/// An item only knows which records listen to it; it never owns them.
#[derive(Debug)]
pub struct Item {
    name: String,
    tag: ItemTag,
    enabled: AtomicBool,
    buffer: RwLock<Bytes>,
    listeners: RwLock<Vec<RecordId>>,
    last_update: RwLock<Option<DateTime<Utc>>>,
}

impl Item {
    pub fn new(name: impl Into<String>, tag: ItemTag) -> Self {
        let buffer = Bytes::from(vec![0u8; tag.length]);
        Self {
            name: name.into(),
            tag,
            enabled: AtomicBool::new(true),
            buffer: RwLock::new(buffer),
            listeners: RwLock::new(Vec::new()),
            last_update: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &ItemTag {
        &self.tag
    }

    pub fn len(&self) -> usize {
        self.tag.length
    }

    pub fn is_empty(&self) -> bool {
        self.tag.length == 0
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Cheap clone of the current image.
    pub fn buffer(&self) -> Bytes {
        self.buffer
            .read()
            .map(|b| b.clone())
            .unwrap_or_else(|_| Bytes::from(vec![0u8; self.tag.length]))
    }

    /// Swaps in a freshly read image. A buffer of the wrong length is rejected
    /// and the previous image kept.
    pub fn replace_buffer(&self, data: Bytes) -> Result<(), MirrorError> {
        if data.len() != self.tag.length {
            warn!(
                "⚠️  Item '{}' got {} bytes, expected {}; keeping stale image",
                self.name,
                data.len(),
                self.tag.length
            );
            return Err(MirrorError::InvalidData(format!(
                "Item '{}' expects {} bytes, got {}",
                self.name,
                self.tag.length,
                data.len()
            )));
        }

        *self.buffer.write().map_err(|_| MirrorError::LockError)? = data;
        if let Ok(mut last) = self.last_update.write() {
            *last = Some(Utc::now());
        }
        debug!("Item '{}' image replaced", self.name);
        Ok(())
    }

    /// Sub-range of the current image, or `None` when it does not fit.
    pub fn slice(&self, start: usize, len: usize) -> Option<Bytes> {
        let buffer = self.buffer();
        (start + len <= buffer.len()).then(|| buffer.slice(start..start + len))
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update.read().ok().and_then(|l| *l)
    }

    pub fn add_listener(&self, id: RecordId) {
        if let Ok(mut listeners) = self.listeners.write() {
            if !listeners.contains(&id) {
                listeners.push(id);
            }
        }
    }

    pub fn remove_listener(&self, id: &RecordId) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.retain(|l| l != id);
        }
    }

    pub fn listeners(&self) -> Vec<RecordId> {
        self.listeners
            .read()
            .map(|l| l.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_zero_filled() {
        let item = Item::new("motors", ItemTag::new(3, 0, 6));
        assert_eq!(item.buffer().as_ref(), &[0u8; 6]);
        assert!(item.last_update().is_none());
    }

    #[test]
    fn rejects_wrong_length_image() {
        let item = Item::new("motors", ItemTag::new(3, 0, 4));
        item.replace_buffer(Bytes::from_static(&[1, 2, 3, 4])).unwrap();
        assert!(item.replace_buffer(Bytes::from_static(&[9, 9])).is_err());
        assert_eq!(item.buffer().as_ref(), &[1, 2, 3, 4]);
        assert_eq!(item.slice(2, 2).unwrap().as_ref(), &[3, 4]);
        assert!(item.slice(3, 2).is_none());
    }

    #[test]
    fn listeners_are_unique() {
        let item = Item::new("motors", ItemTag::new(3, 0, 4));
        let id = RecordId::new();
        item.add_listener(id);
        item.add_listener(id);
        assert_eq!(item.listeners(), vec![id]);
        item.remove_listener(&id);
        assert!(item.listeners().is_empty());
    }
}
