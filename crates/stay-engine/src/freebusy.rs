//! Busy and free spans of a property calendar.
//!
//! Collects every blocked date in a window (unavailable calendar rows and
//! dates held by active bookings), merges consecutive dates into busy spans,
//! then computes the gaps between them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::booking::BookingLedger;
use crate::calendar::{CalendarStore, SourceKind};
use crate::model::PropertyId;
use crate::range::StayRange;

/// Consecutive blocked dates, `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusySpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Writers that blocked at least one date of the span.
    pub sources: BTreeSet<SourceKind>,
}

/// Consecutive open dates, `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub nights: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarView {
    pub property_id: PropertyId,
    pub window: StayRange,
    /// Sorted by start, non-overlapping, non-adjacent.
    pub busy: Vec<BusySpan>,
    /// Gaps between busy spans within the window.
    pub free: Vec<FreeSpan>,
}

impl CalendarView {
    /// First free span that fits a stay of at least `nights` nights.
    pub fn first_free(&self, nights: i64) -> Option<&FreeSpan> {
        self.free.iter().find(|span| span.nights >= nights)
    }
}

/// Build the busy/free view of `property_id` over `window`.
pub fn calendar_view(
    property_id: PropertyId,
    window: StayRange,
    bookings: &BookingLedger,
    calendar: &dyn CalendarStore,
) -> CalendarView {
    let mut blocked: BTreeMap<NaiveDate, BTreeSet<SourceKind>> = BTreeMap::new();

    for day in calendar.list_unavailable_in_range(property_id, window) {
        blocked.entry(day.date).or_default().insert(day.source.kind());
    }
    for booking in bookings.active_overlapping(property_id, window, None) {
        for date in booking.range().dates().filter(|d| window.contains(*d)) {
            blocked.entry(date).or_default().insert(SourceKind::Booking);
        }
    }

    let busy = merge_blocked_dates(blocked);
    let free = free_between(&busy, window);

    CalendarView {
        property_id,
        window,
        busy,
        free,
    }
}

fn merge_blocked_dates(blocked: BTreeMap<NaiveDate, BTreeSet<SourceKind>>) -> Vec<BusySpan> {
    let mut merged: Vec<BusySpan> = Vec::new();
    for (date, sources) in blocked {
        let next = date.succ_opt().unwrap_or(date);
        if let Some(last) = merged.last_mut() {
            if last.end == date {
                // Adjacent: extend the current span.
                last.end = next;
                last.sources.extend(sources);
                continue;
            }
        }
        merged.push(BusySpan {
            start: date,
            end: next,
            sources,
        });
    }
    merged
}

fn free_between(busy: &[BusySpan], window: StayRange) -> Vec<FreeSpan> {
    let mut free = Vec::new();
    let mut cursor = window.start;

    for span in busy {
        if cursor < span.start {
            free.push(FreeSpan {
                start: cursor,
                end: span.start,
                nights: (span.start - cursor).num_days(),
            });
        }
        cursor = cursor.max(span.end);
    }

    // Trailing free span after the last busy one.
    if cursor < window.end {
        free.push(FreeSpan {
            start: cursor,
            end: window.end,
            nights: (window.end - cursor).num_days(),
        });
    }

    free
}
