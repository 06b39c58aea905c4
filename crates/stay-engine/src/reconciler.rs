//! External calendar reconciliation.
//!
//! Each [`ExternalSync`] owns the calendar rows whose external id starts with
//! `ical_<sync_id>_`. A sync run fetches the feed, parses it, and only then
//! replaces that namespace with the freshly parsed blocks in one atomic store
//! call. Events that disappeared upstream lose their blocks; blocks of other
//! feeds, bookings and host edits are never touched. A failed fetch or parse
//! leaves the previous blocks in place until the next run.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Days, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::calendar::{ical_prefix, CalendarDay, CalendarSource, CalendarStore};
use crate::config::{BookingConfig, SyncConfig};
use crate::error::{EngineError, Result};
use crate::feed::FeedFetcher;
use crate::ical::parse_feed;
use crate::locks::PropertyLocks;
use crate::model::{PropertyId, SyncId};
use crate::range::StayRange;

/// Subscription of a property to a remote calendar feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSync {
    pub id: SyncId,
    pub property_id: PropertyId,
    pub feed_url: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Minimum time between scheduled runs.
    #[serde(default = "default_frequency")]
    pub sync_frequency_minutes: u32,
}

fn default_active() -> bool {
    true
}

fn default_frequency() -> u32 {
    60
}

impl ExternalSync {
    /// Whether a scheduled run should pick this sync up at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.last_sync_at.map_or(true, |last| {
                now - last >= Duration::minutes(i64::from(self.sync_frequency_minutes))
            })
    }
}

/// Result of one successful sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub sync_id: SyncId,
    pub property_id: PropertyId,
    /// Busy intervals imported (recurring events count once per occurrence).
    pub events: usize,
    /// Distinct dates now blocked by this feed.
    pub blocked_days: usize,
    /// Rows of the previous run that were replaced.
    pub removed_days: usize,
    /// Feed components ignored (cancelled, undated, shorter than a night).
    pub skipped_events: usize,
    /// Events cut down to the import window or dropped for lying outside it.
    #[serde(default)]
    pub clipped_events: usize,
    pub synced_at: DateTime<Utc>,
}

/// Per-sync result of a batch run. Failures are reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub sync_id: SyncId,
    pub property_id: PropertyId,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SyncReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The set of feed subscriptions.
#[derive(Debug, Default)]
pub struct SyncRegistry {
    syncs: RwLock<BTreeMap<SyncId, ExternalSync>>,
}

impl SyncRegistry {
    pub fn new(syncs: impl IntoIterator<Item = ExternalSync>) -> Self {
        Self {
            syncs: RwLock::new(syncs.into_iter().map(|s| (s.id, s)).collect()),
        }
    }

    pub fn upsert(&self, sync: ExternalSync) {
        self.syncs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sync.id, sync);
    }

    pub fn get(&self, id: SyncId) -> Option<ExternalSync> {
        self.syncs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn all(&self) -> Vec<ExternalSync> {
        self.syncs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn active(&self) -> Vec<ExternalSync> {
        self.all().into_iter().filter(|s| s.is_active).collect()
    }

    fn mark_synced(&self, id: SyncId, at: DateTime<Utc>) {
        if let Some(sync) = self
            .syncs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&id)
        {
            sync.last_sync_at = Some(at);
        }
    }
}

/// Runs feed syncs against the shared calendar.
pub struct Reconciler {
    registry: SyncRegistry,
    fetcher: Arc<dyn FeedFetcher>,
    calendar: Arc<dyn CalendarStore>,
    locks: Arc<PropertyLocks>,
    sync_config: SyncConfig,
    booking_config: BookingConfig,
}

impl Reconciler {
    pub fn new(
        registry: SyncRegistry,
        fetcher: Arc<dyn FeedFetcher>,
        calendar: Arc<dyn CalendarStore>,
        locks: Arc<PropertyLocks>,
        sync_config: SyncConfig,
        booking_config: BookingConfig,
    ) -> Self {
        Self {
            registry,
            fetcher,
            calendar,
            locks,
            sync_config,
            booking_config,
        }
    }

    pub fn registry(&self) -> &SyncRegistry {
        &self.registry
    }

    /// Sync one feed, using `now` as the sync time and the start of the
    /// recurrence horizon.
    #[instrument(skip(self), fields(property_id = tracing::field::Empty))]
    pub async fn sync_at(&self, sync_id: SyncId, now: DateTime<Utc>) -> Result<SyncReport> {
        let sync = self
            .registry
            .get(sync_id)
            .ok_or(EngineError::SyncNotFound(sync_id))?;
        tracing::Span::current().record("property_id", sync.property_id.0);
        if !sync.is_active {
            return Err(EngineError::Validation(format!(
                "external sync {} is inactive",
                sync_id
            )));
        }

        // Fetch and parse fully before touching the calendar.
        let payload = self.fetcher.fetch(&sync.feed_url).await.map_err(|e| {
            warn!(url = %sync.feed_url, error = %e, "feed fetch failed, calendar left unchanged");
            e
        })?;
        let today = now.date_naive();
        let horizon = StayRange::new(
            today,
            today
                .checked_add_days(Days::new(u64::from(self.sync_config.recurrence_horizon_days)))
                .unwrap_or(today),
        )?;
        let parsed = parse_feed(&payload, horizon).map_err(|e| {
            warn!(url = %sync.feed_url, error = %e, "feed parse failed, calendar left unchanged");
            e
        })?;

        let window = StayRange::new(
            today
                .checked_sub_days(Days::new(u64::from(self.sync_config.import_past_days)))
                .unwrap_or(NaiveDate::MIN),
            today
                .checked_add_days(Days::new(u64::from(self.sync_config.import_future_days)))
                .unwrap_or(NaiveDate::MAX),
        )?;

        let mut rows: BTreeMap<_, CalendarDay> = BTreeMap::new();
        let mut clipped_events = 0;
        for event in &parsed.events {
            let Some(span) = event.range().intersection(&window) else {
                clipped_events += 1;
                continue;
            };
            if span != event.range() {
                clipped_events += 1;
            }
            for date in span.dates() {
                // Overlapping events in one feed: the later one owns the day.
                rows.insert(
                    date,
                    CalendarDay {
                        property_id: sync.property_id,
                        date,
                        is_available: false,
                        price_override: None,
                        source: CalendarSource::Ical {
                            sync_id,
                            event_uid: event.uid.clone(),
                        },
                    },
                );
            }
        }
        let blocked_days = rows.len();

        let _guard = self
            .locks
            .acquire(sync.property_id, self.booking_config.lock_wait())
            .await
            .ok_or(EngineError::Contended(sync.property_id))?;
        let stats = self.calendar.replace_by_source_prefix(
            sync.property_id,
            &ical_prefix(sync_id),
            rows.into_values().collect(),
        );
        self.registry.mark_synced(sync_id, now);

        info!(
            events = parsed.events.len(),
            blocked_days,
            removed_days = stats.removed,
            "external calendar synced"
        );
        if parsed.skipped > 0 {
            debug!(skipped = parsed.skipped, "feed components ignored");
        }
        if clipped_events > 0 {
            debug!(clipped_events, "feed events clipped to the import window");
        }

        Ok(SyncReport {
            sync_id,
            property_id: sync.property_id,
            events: parsed.events.len(),
            blocked_days,
            removed_days: stats.removed,
            skipped_events: parsed.skipped,
            clipped_events,
            synced_at: now,
        })
    }

    /// Run each sync in turn, collecting failures instead of stopping.
    pub async fn sync_many(&self, syncs: Vec<ExternalSync>, now: DateTime<Utc>) -> Vec<SyncOutcome> {
        let mut outcomes = Vec::with_capacity(syncs.len());
        for sync in syncs {
            let outcome = match self.sync_at(sync.id, now).await {
                Ok(report) => SyncOutcome {
                    sync_id: sync.id,
                    property_id: sync.property_id,
                    ok: true,
                    report: Some(report),
                    error: None,
                },
                Err(e) => SyncOutcome {
                    sync_id: sync.id,
                    property_id: sync.property_id,
                    ok: false,
                    report: None,
                    error: Some(e.to_string()),
                },
            };
            outcomes.push(outcome);
        }
        let succeeded = outcomes.iter().filter(|o| o.ok).count();
        info!(succeeded, total = outcomes.len(), "sync batch finished");
        outcomes
    }
}
