//! Per-property exclusive locks.
//!
//! Every decision that reads availability and then writes bookings or
//! calendar rows for a property runs while holding that property's lock, so
//! two overlapping requests can never both pass the check before either
//! writes. Properties do not contend with each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::model::PropertyId;

#[derive(Debug, Default)]
pub struct PropertyLocks {
    locks: Mutex<HashMap<PropertyId, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of one check-and-write on a property.
pub type PropertyGuard = OwnedMutexGuard<()>;

impl PropertyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, property_id: PropertyId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(property_id).or_default())
    }

    /// Wait up to `wait` for the property's lock. `None` means the lock stayed
    /// contended for the whole period.
    pub async fn acquire(&self, property_id: PropertyId, wait: Duration) -> Option<PropertyGuard> {
        let lock = self.handle(property_id);
        tokio::time::timeout(wait, lock.lock_owned()).await.ok()
    }
}
