use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use super::tag::{ItemTag, TagHandle};
use crate::utils::error::MirrorError;

/// One batched read. Tags are added before a single execute.
#[derive(Debug, Clone, Default)]
pub struct ReadRequest {
    tags: Vec<ItemTag>,
}

impl ReadRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tag(&mut self, tag: ItemTag) -> &mut Self {
        self.tags.push(tag);
        self
    }

    pub fn tags(&self) -> &[ItemTag] {
        &self.tags
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TagReadResult {
    pub tag: ItemTag,
    pub data: Result<Bytes, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReadResponse {
    pub results: Vec<TagReadResult>,
}

impl ReadResponse {
    pub fn data_for(&self, tag: &ItemTag) -> Option<&Result<Bytes, String>> {
        self.results.iter().find(|r| &r.tag == tag).map(|r| &r.data)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteEntry {
    pub target: TagHandle,
    pub payload: Bytes,
}

/// One batched write. Entries keep their submission order.
#[derive(Debug, Clone, Default)]
pub struct WriteRequest {
    entries: Vec<WriteEntry>,
}

impl WriteRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, target: TagHandle, payload: Bytes) -> &mut Self {
        self.entries.push(WriteEntry { target, payload });
        self
    }

    pub fn entries(&self) -> &[WriteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WriteResponse {
    pub accepted: usize,
    pub rejected: Vec<(TagHandle, String)>,
}

/// An open channel to one device. Implementations must tolerate being
/// shared between the read and write workers; the pipeline serializes calls.
#[async_trait]
pub trait PlcConnection: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn read(&self, request: &ReadRequest) -> Result<ReadResponse, MirrorError>;

    async fn write(&self, request: &WriteRequest) -> Result<WriteResponse, MirrorError>;

    async fn close(&self);
}

#[async_trait]
pub trait PlcDriver: Send + Sync {
    /// URL scheme handled by this driver, e.g. `"sim"`.
    fn protocol(&self) -> &str;

    async fn connect(&self, url: &str) -> Result<Arc<dyn PlcConnection>, MirrorError>;
}
