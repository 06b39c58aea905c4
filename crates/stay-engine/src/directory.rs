//! Read access to the listing catalog.
//!
//! The catalog itself (titles, photos, amenities) lives outside this crate.
//! The engine only needs to look properties up by id and enumerate the
//! published ones for search.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use crate::model::{Property, PropertyId};

pub trait PropertyDirectory: Send + Sync {
    fn property(&self, id: PropertyId) -> Option<Property>;

    /// Every property currently visible to guests.
    fn published(&self) -> Vec<Property>;
}

/// Catalog held in memory, used by the CLI snapshot and in tests.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    properties: RwLock<BTreeMap<PropertyId, Property>>,
}

impl InMemoryDirectory {
    pub fn new(properties: impl IntoIterator<Item = Property>) -> Self {
        Self {
            properties: RwLock::new(properties.into_iter().map(|p| (p.id, p)).collect()),
        }
    }

    pub fn upsert(&self, property: Property) {
        self.properties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(property.id, property);
    }

    pub fn all(&self) -> Vec<Property> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

impl PropertyDirectory for InMemoryDirectory {
    fn property(&self, id: PropertyId) -> Option<Property> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn published(&self) -> Vec<Property> {
        self.all().into_iter().filter(|p| p.is_published).collect()
    }
}
