//! Day-granular availability calendar.
//!
//! One [`CalendarDay`] per `(property, date)`. Three writers compete for rows:
//! hosts (manual edits), the booking state machine and the iCal reconciler.
//! Every write is a point replace keyed by `(property, date)`; the last writer
//! for a day wins and no history is kept. A date with no row is available.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{BookingId, Money, PropertyId, SyncId};
use crate::range::StayRange;

/// Which writer owns a calendar row, with its correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalendarSource {
    /// Host edit from the dashboard.
    Manual,
    /// Day held by a confirmed booking.
    Booking { booking_id: BookingId },
    /// Day imported from an external feed event.
    Ical { sync_id: SyncId, event_uid: String },
}

impl CalendarSource {
    /// Correlation id stored alongside the row: empty for manual edits,
    /// `booking_<id>` for bookings, `ical_<sync_id>_<uid>` for feed events.
    pub fn external_id(&self) -> String {
        match self {
            CalendarSource::Manual => String::new(),
            CalendarSource::Booking { booking_id } => booking_external_id(*booking_id),
            CalendarSource::Ical { sync_id, event_uid } => {
                format!("{}{}", ical_prefix(*sync_id), event_uid)
            }
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            CalendarSource::Manual => SourceKind::Manual,
            CalendarSource::Booking { .. } => SourceKind::Booking,
            CalendarSource::Ical { .. } => SourceKind::Ical,
        }
    }
}

/// Writer category without the correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Manual,
    Booking,
    Ical,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::Manual => "manual",
            SourceKind::Booking => "booking",
            SourceKind::Ical => "ical",
        })
    }
}

pub fn booking_external_id(booking_id: BookingId) -> String {
    format!("booking_{}", booking_id)
}

/// Namespace owned by one external sync. The trailing underscore keeps
/// `ical_1_` from matching rows of sync 10.
pub fn ical_prefix(sync_id: SyncId) -> String {
    format!("ical_{}_", sync_id)
}

/// One availability record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarDay {
    pub property_id: PropertyId,
    pub date: NaiveDate,
    pub is_available: bool,
    #[serde(default)]
    pub price_override: Option<Money>,
    pub source: CalendarSource,
}

impl CalendarDay {
    pub fn external_id(&self) -> String {
        self.source.external_id()
    }
}

/// Outcome of an atomic prefix replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceStats {
    pub removed: usize,
    pub written: usize,
}

/// Storage contract for calendar rows.
///
/// Range writes are total: implementations apply the whole range under one
/// exclusive section or nothing at all.
pub trait CalendarStore: Send + Sync {
    /// Point replace of one day. An existing `price_override` is kept.
    fn upsert(
        &self,
        property_id: PropertyId,
        date: NaiveDate,
        is_available: bool,
        source: CalendarSource,
    ) -> CalendarDay;

    /// Point replace of every day in `range`. Returns the number of rows written.
    fn bulk_upsert_range(
        &self,
        property_id: PropertyId,
        range: StayRange,
        is_available: bool,
        source: CalendarSource,
    ) -> usize;

    /// Delete every row of the property whose external id starts with `prefix`.
    /// Days holding a price override are kept as available manual rows.
    /// An empty prefix is rejected (returns 0) so manual rows cannot be wiped
    /// wholesale by accident.
    fn delete_by_source_prefix(&self, property_id: PropertyId, prefix: &str) -> usize;

    /// Delete every row of the property written by exactly `source`, keeping
    /// price overrides as with [`CalendarStore::delete_by_source_prefix`].
    fn delete_by_source(&self, property_id: PropertyId, source: &CalendarSource) -> usize;

    /// Delete the prefix and write `rows` as one atomic step.
    fn replace_by_source_prefix(
        &self,
        property_id: PropertyId,
        prefix: &str,
        rows: Vec<CalendarDay>,
    ) -> ReplaceStats;

    /// Set or clear the nightly price of one day. Creates an available manual
    /// row when the day has none.
    fn set_price_override(
        &self,
        property_id: PropertyId,
        date: NaiveDate,
        price: Option<Money>,
    ) -> CalendarDay;

    fn get(&self, property_id: PropertyId, date: NaiveDate) -> Option<CalendarDay>;

    fn list_in_range(&self, property_id: PropertyId, range: StayRange) -> Vec<CalendarDay>;

    fn list_unavailable_in_range(
        &self,
        property_id: PropertyId,
        range: StayRange,
    ) -> Vec<CalendarDay> {
        self.list_in_range(property_id, range)
            .into_iter()
            .filter(|day| !day.is_available)
            .collect()
    }

    /// Set-based exclusion used by search: every property with at least one
    /// unavailable day inside `range`.
    fn properties_blocked_in_range(&self, range: StayRange) -> BTreeSet<PropertyId>;

    /// All rows, ordered by `(property, date)`.
    fn rows(&self) -> Vec<CalendarDay>;
}

/// In-process calendar keyed by `(property, date)`.
#[derive(Debug, Default)]
pub struct InMemoryCalendar {
    days: RwLock<BTreeMap<(PropertyId, NaiveDate), CalendarDay>>,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a calendar from persisted rows. Later duplicates win.
    pub fn from_rows(rows: impl IntoIterator<Item = CalendarDay>) -> Self {
        let days = rows
            .into_iter()
            .map(|day| ((day.property_id, day.date), day))
            .collect();
        Self {
            days: RwLock::new(days),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<(PropertyId, NaiveDate), CalendarDay>> {
        self.days.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<(PropertyId, NaiveDate), CalendarDay>> {
        self.days.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn put(
    days: &mut BTreeMap<(PropertyId, NaiveDate), CalendarDay>,
    property_id: PropertyId,
    date: NaiveDate,
    is_available: bool,
    source: CalendarSource,
) -> CalendarDay {
    let price_override = days
        .get(&(property_id, date))
        .and_then(|existing| existing.price_override);
    let day = CalendarDay {
        property_id,
        date,
        is_available,
        price_override,
        source,
    };
    days.insert((property_id, date), day.clone());
    day
}

/// Release the property's rows matching `owned`. A released day that carries
/// a host price override goes back to an available manual row keeping the
/// price; any other released day is deleted.
fn release(
    days: &mut BTreeMap<(PropertyId, NaiveDate), CalendarDay>,
    property_id: PropertyId,
    owned: impl Fn(&CalendarDay) -> bool,
) -> usize {
    let released: Vec<(NaiveDate, Option<Money>)> = days
        .range((property_id, NaiveDate::MIN)..=(property_id, NaiveDate::MAX))
        .filter(|(_, day)| owned(day))
        .map(|((_, date), day)| (*date, day.price_override))
        .collect();
    for (date, price_override) in &released {
        match price_override {
            Some(price) => {
                days.insert(
                    (property_id, *date),
                    CalendarDay {
                        property_id,
                        date: *date,
                        is_available: true,
                        price_override: Some(*price),
                        source: CalendarSource::Manual,
                    },
                );
            }
            None => {
                days.remove(&(property_id, *date));
            }
        }
    }
    released.len()
}

fn remove_prefix(
    days: &mut BTreeMap<(PropertyId, NaiveDate), CalendarDay>,
    property_id: PropertyId,
    prefix: &str,
) -> usize {
    if prefix.is_empty() {
        return 0;
    }
    release(days, property_id, |day| day.external_id().starts_with(prefix))
}

impl CalendarStore for InMemoryCalendar {
    fn upsert(
        &self,
        property_id: PropertyId,
        date: NaiveDate,
        is_available: bool,
        source: CalendarSource,
    ) -> CalendarDay {
        put(&mut self.write(), property_id, date, is_available, source)
    }

    fn bulk_upsert_range(
        &self,
        property_id: PropertyId,
        range: StayRange,
        is_available: bool,
        source: CalendarSource,
    ) -> usize {
        let mut days = self.write();
        range
            .dates()
            .map(|date| put(&mut days, property_id, date, is_available, source.clone()))
            .count()
    }

    fn delete_by_source_prefix(&self, property_id: PropertyId, prefix: &str) -> usize {
        remove_prefix(&mut self.write(), property_id, prefix)
    }

    fn delete_by_source(&self, property_id: PropertyId, source: &CalendarSource) -> usize {
        release(&mut self.write(), property_id, |day| day.source == *source)
    }

    fn replace_by_source_prefix(
        &self,
        property_id: PropertyId,
        prefix: &str,
        rows: Vec<CalendarDay>,
    ) -> ReplaceStats {
        let mut days = self.write();
        let removed = remove_prefix(&mut days, property_id, prefix);
        let mut written = 0;
        for row in rows.into_iter().filter(|r| r.property_id == property_id) {
            put(&mut days, property_id, row.date, row.is_available, row.source);
            written += 1;
        }
        ReplaceStats { removed, written }
    }

    fn set_price_override(
        &self,
        property_id: PropertyId,
        date: NaiveDate,
        price: Option<Money>,
    ) -> CalendarDay {
        let mut days = self.write();
        let day = days
            .entry((property_id, date))
            .or_insert_with(|| CalendarDay {
                property_id,
                date,
                is_available: true,
                price_override: None,
                source: CalendarSource::Manual,
            });
        day.price_override = price;
        day.clone()
    }

    fn get(&self, property_id: PropertyId, date: NaiveDate) -> Option<CalendarDay> {
        self.read().get(&(property_id, date)).cloned()
    }

    fn list_in_range(&self, property_id: PropertyId, range: StayRange) -> Vec<CalendarDay> {
        self.read()
            .range((property_id, range.start)..(property_id, range.end))
            .map(|(_, day)| day.clone())
            .collect()
    }

    fn properties_blocked_in_range(&self, range: StayRange) -> BTreeSet<PropertyId> {
        self.read()
            .values()
            .filter(|day| !day.is_available && range.contains(day.date))
            .map(|day| day.property_id)
            .collect()
    }

    fn rows(&self) -> Vec<CalendarDay> {
        self.read().values().cloned().collect()
    }
}
