//! JSON snapshots of the whole engine state.
//!
//! Used by the `stayctl` operator tool to run one operation against a state
//! file and write the result back.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::booking::{Booking, BookingLedger};
use crate::calendar::{CalendarDay, InMemoryCalendar};
use crate::config::EngineConfig;
use crate::directory::InMemoryDirectory;
use crate::engine::BookingEngine;
use crate::error::{EngineError, Result};
use crate::feed::FeedFetcher;
use crate::model::Property;
use crate::reconciler::{ExternalSync, SyncRegistry};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSnapshot {
    pub properties: Vec<Property>,
    pub bookings: Vec<Booking>,
    pub calendar: Vec<CalendarDay>,
    pub syncs: Vec<ExternalSync>,
}

impl EngineSnapshot {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| EngineError::Snapshot(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::Snapshot(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Snapshot(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    /// Write the snapshot to a temp file next to `path` and rename it over
    /// `path`, so readers see either the old state or the new one.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let failed = |e: &dyn std::fmt::Display| {
            EngineError::Snapshot(format!("{}: {}", path.display(), e))
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let json = self.to_json()?;
        let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|e| failed(&e))?;
        file.write_all(json.as_bytes()).map_err(|e| failed(&e))?;
        file.as_file().sync_all().map_err(|e| failed(&e))?;
        file.persist(path).map_err(|e| failed(&e.error))?;
        Ok(())
    }

    /// Build an engine over in-memory stores seeded from this snapshot.
    pub fn into_engine(self, config: EngineConfig, fetcher: Arc<dyn FeedFetcher>) -> BookingEngine {
        BookingEngine::with_stores(
            config,
            Arc::new(InMemoryDirectory::new(self.properties)),
            Arc::new(InMemoryCalendar::from_rows(self.calendar)),
            Arc::new(BookingLedger::from_bookings(self.bookings)),
            SyncRegistry::new(self.syncs),
            fetcher,
        )
    }
}

impl BookingEngine {
    /// Capture the engine's current state. The catalog is owned elsewhere,
    /// so the caller passes the properties to store alongside.
    pub fn snapshot(&self, properties: Vec<Property>) -> EngineSnapshot {
        EngineSnapshot {
            properties,
            bookings: self.ledger().all(),
            calendar: self.calendar().rows(),
            syncs: self.syncs().all(),
        }
    }
}
