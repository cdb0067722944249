use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::item::Item;

/// A named set of items scanned together at one period.
#[derive(Debug)]
pub struct Group {
    name: String,
    period: Duration,
    immediate: bool,
    enabled: AtomicBool,
    items: RwLock<Vec<Arc<Item>>>,
}

impl Group {
    pub fn new(name: impl Into<String>, period: Duration) -> Self {
        Self {
            name: name.into(),
            period,
            immediate: true,
            enabled: AtomicBool::new(true),
            items: RwLock::new(Vec::new()),
        }
    }

    /// Whether the first scan runs right away instead of after one period.
    pub fn with_immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn immediate(&self) -> bool {
        self.immediate
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn add_item(&self, item: Arc<Item>) {
        if let Ok(mut items) = self.items.write() {
            if !items.iter().any(|i| i.name() == item.name()) {
                items.push(item);
            }
        }
    }

    pub fn remove_item(&self, name: &str) -> bool {
        match self.items.write() {
            Ok(mut items) => {
                let before = items.len();
                items.retain(|i| i.name() != name);
                items.len() != before
            }
            Err(_) => false,
        }
    }

    pub fn items(&self) -> Vec<Arc<Item>> {
        self.items.read().map(|i| i.clone()).unwrap_or_default()
    }

    pub fn enabled_items(&self) -> Vec<Arc<Item>> {
        self.items()
            .into_iter()
            .filter(|item| item.is_enabled())
            .collect()
    }
}
