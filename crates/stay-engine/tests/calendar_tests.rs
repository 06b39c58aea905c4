//! Tests for the day-granular calendar store.

use chrono::NaiveDate;
use stay_engine::calendar::{booking_external_id, ical_prefix, SourceKind};
use stay_engine::{
    BookingId, CalendarDay, CalendarSource, CalendarStore, InMemoryCalendar, Money, PropertyId,
    StayRange, SyncId,
};

// ── Helpers ─────────────────────────────────────────────────────────────────

const P1: PropertyId = PropertyId(1);
const P2: PropertyId = PropertyId(2);

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn range(start: &str, end: &str) -> StayRange {
    StayRange::new(d(start), d(end)).unwrap()
}

fn ical(sync: u64, uid: &str) -> CalendarSource {
    CalendarSource::Ical {
        sync_id: SyncId(sync),
        event_uid: uid.to_string(),
    }
}

fn booking(id: u64) -> CalendarSource {
    CalendarSource::Booking {
        booking_id: BookingId(id),
    }
}

fn ical_row(sync: u64, uid: &str, date: &str) -> CalendarDay {
    CalendarDay {
        property_id: P1,
        date: d(date),
        is_available: false,
        price_override: None,
        source: ical(sync, uid),
    }
}

// ── External ids ────────────────────────────────────────────────────────────

#[test]
fn external_ids_follow_source_namespaces() {
    assert_eq!(CalendarSource::Manual.external_id(), "");
    assert_eq!(booking(7).external_id(), "booking_7");
    assert_eq!(booking_external_id(BookingId(7)), "booking_7");
    assert_eq!(ical(3, "abc@airbnb").external_id(), "ical_3_abc@airbnb");
    assert_eq!(ical_prefix(SyncId(3)), "ical_3_");
}

#[test]
fn source_kind_strips_correlation_id() {
    assert_eq!(CalendarSource::Manual.kind(), SourceKind::Manual);
    assert_eq!(booking(1).kind(), SourceKind::Booking);
    assert_eq!(ical(1, "x").kind(), SourceKind::Ical);
}

// ── Point and range writes ──────────────────────────────────────────────────

#[test]
fn upsert_replaces_the_row_for_a_date() {
    let calendar = InMemoryCalendar::new();
    calendar.upsert(P1, d("2024-06-01"), false, CalendarSource::Manual);
    calendar.upsert(P1, d("2024-06-01"), false, booking(4));

    let day = calendar.get(P1, d("2024-06-01")).unwrap();
    assert_eq!(day.source, booking(4));
    assert_eq!(calendar.rows().len(), 1);
}

#[test]
fn missing_day_has_no_row() {
    let calendar = InMemoryCalendar::new();
    assert!(calendar.get(P1, d("2024-06-01")).is_none());
}

#[test]
fn bulk_upsert_writes_every_night_excluding_end() {
    let calendar = InMemoryCalendar::new();
    let written = calendar.bulk_upsert_range(P1, range("2024-06-01", "2024-06-04"), false, booking(1));

    assert_eq!(written, 3);
    assert!(calendar.get(P1, d("2024-06-03")).is_some());
    assert!(calendar.get(P1, d("2024-06-04")).is_none());
}

#[test]
fn upsert_keeps_an_existing_price_override() {
    let calendar = InMemoryCalendar::new();
    calendar.set_price_override(P1, d("2024-06-01"), Some(Money::from_major(180)));
    calendar.upsert(P1, d("2024-06-01"), false, booking(2));

    let day = calendar.get(P1, d("2024-06-01")).unwrap();
    assert!(!day.is_available);
    assert_eq!(day.price_override, Some(Money::from_major(180)));
}

#[test]
fn price_override_creates_an_available_manual_row() {
    let calendar = InMemoryCalendar::new();
    let day = calendar.set_price_override(P1, d("2024-06-01"), Some(Money::from_major(90)));

    assert!(day.is_available);
    assert_eq!(day.source, CalendarSource::Manual);

    let cleared = calendar.set_price_override(P1, d("2024-06-01"), None);
    assert_eq!(cleared.price_override, None);
}

// ── Listing ─────────────────────────────────────────────────────────────────

#[test]
fn list_unavailable_filters_by_property_range_and_flag() {
    let calendar = InMemoryCalendar::new();
    calendar.upsert(P1, d("2024-06-01"), false, CalendarSource::Manual);
    calendar.upsert(P1, d("2024-06-02"), true, CalendarSource::Manual);
    calendar.upsert(P1, d("2024-06-03"), false, booking(1));
    calendar.upsert(P1, d("2024-06-10"), false, CalendarSource::Manual);
    calendar.upsert(P2, d("2024-06-02"), false, CalendarSource::Manual);

    let days: Vec<NaiveDate> = calendar
        .list_unavailable_in_range(P1, range("2024-06-01", "2024-06-05"))
        .into_iter()
        .map(|day| day.date)
        .collect();
    assert_eq!(days, vec![d("2024-06-01"), d("2024-06-03")]);
}

#[test]
fn properties_blocked_in_range_ignores_available_rows() {
    let calendar = InMemoryCalendar::new();
    calendar.upsert(P1, d("2024-06-02"), true, CalendarSource::Manual);
    calendar.upsert(P2, d("2024-06-02"), false, CalendarSource::Manual);
    calendar.upsert(PropertyId(3), d("2024-06-09"), false, CalendarSource::Manual);

    let blocked = calendar.properties_blocked_in_range(range("2024-06-01", "2024-06-05"));
    assert_eq!(blocked.into_iter().collect::<Vec<_>>(), vec![P2]);
}

// ── Deletion by source ──────────────────────────────────────────────────────

#[test]
fn prefix_delete_only_touches_its_namespace() {
    let calendar = InMemoryCalendar::new();
    calendar.upsert(P1, d("2024-06-01"), false, ical(1, "a"));
    calendar.upsert(P1, d("2024-06-02"), false, ical(10, "b"));
    calendar.upsert(P1, d("2024-06-03"), false, booking(1));
    calendar.upsert(P1, d("2024-06-04"), false, CalendarSource::Manual);
    calendar.upsert(P2, d("2024-06-01"), false, ical(1, "a"));

    let removed = calendar.delete_by_source_prefix(P1, &ical_prefix(SyncId(1)));

    assert_eq!(removed, 1);
    assert!(calendar.get(P1, d("2024-06-01")).is_none());
    assert!(calendar.get(P1, d("2024-06-02")).is_some());
    assert!(calendar.get(P1, d("2024-06-03")).is_some());
    assert!(calendar.get(P1, d("2024-06-04")).is_some());
    assert!(calendar.get(P2, d("2024-06-01")).is_some());
}

#[test]
fn empty_prefix_deletes_nothing() {
    let calendar = InMemoryCalendar::new();
    calendar.upsert(P1, d("2024-06-01"), false, CalendarSource::Manual);

    assert_eq!(calendar.delete_by_source_prefix(P1, ""), 0);
    assert_eq!(calendar.rows().len(), 1);
}

#[test]
fn exact_source_delete_does_not_match_longer_ids() {
    let calendar = InMemoryCalendar::new();
    calendar.bulk_upsert_range(P1, range("2024-06-01", "2024-06-03"), false, booking(1));
    calendar.bulk_upsert_range(P1, range("2024-06-03", "2024-06-05"), false, booking(10));

    let removed = calendar.delete_by_source(P1, &booking(1));

    assert_eq!(removed, 2);
    assert_eq!(calendar.rows().len(), 2);
    assert!(calendar
        .rows()
        .iter()
        .all(|day| day.source == booking(10)));
}

// ── Atomic replace ──────────────────────────────────────────────────────────

#[test]
fn replace_swaps_old_rows_for_new_ones() {
    let calendar = InMemoryCalendar::new();
    calendar.upsert(P1, d("2024-06-01"), false, ical(1, "old"));
    calendar.upsert(P1, d("2024-06-02"), false, ical(1, "old"));
    calendar.upsert(P1, d("2024-06-09"), false, CalendarSource::Manual);

    let stats = calendar.replace_by_source_prefix(
        P1,
        &ical_prefix(SyncId(1)),
        vec![ical_row(1, "new", "2024-06-05")],
    );

    assert_eq!(stats.removed, 2);
    assert_eq!(stats.written, 1);
    let dates: Vec<NaiveDate> = calendar.rows().iter().map(|day| day.date).collect();
    assert_eq!(dates, vec![d("2024-06-05"), d("2024-06-09")]);
}

#[test]
fn replace_ignores_rows_for_other_properties() {
    let calendar = InMemoryCalendar::new();
    let mut foreign = ical_row(1, "x", "2024-06-01");
    foreign.property_id = P2;

    let stats = calendar.replace_by_source_prefix(P1, &ical_prefix(SyncId(1)), vec![foreign]);

    assert_eq!(stats.written, 0);
    assert!(calendar.rows().is_empty());
}

#[test]
fn from_rows_restores_persisted_state() {
    let rows = vec![ical_row(2, "a", "2024-06-01"), ical_row(2, "a", "2024-06-02")];
    let calendar = InMemoryCalendar::from_rows(rows.clone());
    assert_eq!(calendar.rows(), rows);
}
