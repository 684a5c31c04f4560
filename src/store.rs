//! In-memory alert store.
//!
//! Holds the alerts of the current scan cycle in insertion order. The store
//! is an explicit instance shared through `Arc`: the [`Scanner`](crate::scan::Scanner)
//! writes to it and HTTP handlers read from it.
//!
//! Writers are serialized by the scanner's scan lock, so the store itself
//! only needs to keep individual reads and writes atomic. Every read returns
//! an owned snapshot.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::Alert;

#[derive(Default)]
pub struct AlertStore {
    alerts: RwLock<Vec<Alert>>,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Alert>> {
        self.alerts.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Alert>> {
        self.alerts.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop every alert.
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Append alerts in order. No deduplication.
    pub fn add(&self, alerts: impl IntoIterator<Item = Alert>) {
        self.write().extend(alerts);
    }

    /// Up to `limit` alerts starting at `offset`, in insertion order.
    pub fn list(&self, offset: usize, limit: usize) -> Vec<Alert> {
        self.read().iter().skip(offset).take(limit).cloned().collect()
    }

    /// Every alert, in insertion order.
    pub fn snapshot(&self) -> Vec<Alert> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
