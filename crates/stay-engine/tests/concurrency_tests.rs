//! Concurrent booking attempts must never double-book a property.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, TimeZone, Utc};
use stay_engine::booking::BookingLedger;
use stay_engine::calendar::ReplaceStats;
use stay_engine::error::Result;
use stay_engine::reconciler::SyncRegistry;
use stay_engine::{
    BookingEngine, BookingRequest, BookingStatus, BookingType, CalendarDay, CalendarSource,
    CalendarStore, EngineConfig, EngineError, ExternalSync, FeedFetcher, InMemoryCalendar,
    InMemoryDirectory, Money, Property, PropertyId, StayRange, SyncId, UserId,
};
use tokio::sync::Notify;
use tokio::task::JoinSet;

// ── Helpers ─────────────────────────────────────────────────────────────────

const OWNER: UserId = UserId(10);
const ATTEMPTS: u64 = 16;

struct NoFeeds;

#[async_trait]
impl FeedFetcher for NoFeeds {
    async fn fetch(&self, url: &str) -> Result<String> {
        Err(EngineError::ExternalFetch(url.to_string()))
    }
}

struct EmptyFeed;

#[async_trait]
impl FeedFetcher for EmptyFeed {
    async fn fetch(&self, _url: &str) -> Result<String> {
        Ok("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nEND:VCALENDAR\r\n".to_string())
    }
}

/// In-memory calendar whose next range write, once armed, stalls for `hold`
/// so the caller keeps the property lock that long.
struct SlowCalendar {
    inner: InMemoryCalendar,
    armed: AtomicBool,
    entered: Notify,
    hold: Duration,
}

impl SlowCalendar {
    fn new(hold: Duration) -> Self {
        Self {
            inner: InMemoryCalendar::new(),
            armed: AtomicBool::new(false),
            entered: Notify::new(),
            hold,
        }
    }

    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

impl CalendarStore for SlowCalendar {
    fn upsert(
        &self,
        property_id: PropertyId,
        date: NaiveDate,
        is_available: bool,
        source: CalendarSource,
    ) -> CalendarDay {
        self.inner.upsert(property_id, date, is_available, source)
    }

    fn bulk_upsert_range(
        &self,
        property_id: PropertyId,
        range: StayRange,
        is_available: bool,
        source: CalendarSource,
    ) -> usize {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            std::thread::sleep(self.hold);
        }
        self.inner
            .bulk_upsert_range(property_id, range, is_available, source)
    }

    fn delete_by_source_prefix(&self, property_id: PropertyId, prefix: &str) -> usize {
        self.inner.delete_by_source_prefix(property_id, prefix)
    }

    fn delete_by_source(&self, property_id: PropertyId, source: &CalendarSource) -> usize {
        self.inner.delete_by_source(property_id, source)
    }

    fn replace_by_source_prefix(
        &self,
        property_id: PropertyId,
        prefix: &str,
        rows: Vec<CalendarDay>,
    ) -> ReplaceStats {
        self.inner.replace_by_source_prefix(property_id, prefix, rows)
    }

    fn set_price_override(
        &self,
        property_id: PropertyId,
        date: NaiveDate,
        price: Option<Money>,
    ) -> CalendarDay {
        self.inner.set_price_override(property_id, date, price)
    }

    fn get(&self, property_id: PropertyId, date: NaiveDate) -> Option<CalendarDay> {
        self.inner.get(property_id, date)
    }

    fn list_in_range(&self, property_id: PropertyId, range: StayRange) -> Vec<CalendarDay> {
        self.inner.list_in_range(property_id, range)
    }

    fn properties_blocked_in_range(&self, range: StayRange) -> BTreeSet<PropertyId> {
        self.inner.properties_blocked_in_range(range)
    }

    fn rows(&self) -> Vec<CalendarDay> {
        self.inner.rows()
    }
}

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn property(id: u64, booking_type: BookingType) -> Property {
    Property {
        id: PropertyId(id),
        owner_id: OWNER,
        city: "Lisbon".to_string(),
        property_type: "apartment".to_string(),
        bedrooms: 2,
        max_guests: 4,
        min_nights: 1,
        max_nights: 30,
        base_price: Money::from_major(100),
        weekend_price: None,
        weekly_discount: 0,
        monthly_discount: 0,
        booking_type,
        is_published: true,
        is_verified: false,
        listed_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

fn engine(properties: Vec<Property>) -> Arc<BookingEngine> {
    Arc::new(BookingEngine::new(
        EngineConfig::default(),
        Arc::new(InMemoryDirectory::new(properties)),
        Arc::new(NoFeeds),
    ))
}

fn request(property_id: u64, guest: u64, check_in: NaiveDate, check_out: NaiveDate) -> BookingRequest {
    BookingRequest {
        property_id: PropertyId(property_id),
        guest_id: UserId(guest),
        check_in,
        check_out,
        guests_count: 2,
        notes: String::new(),
    }
}

fn assert_no_active_overlap(engine: &BookingEngine, property_id: u64) {
    assert!(
        engine.audit_overlaps(PropertyId(property_id)).is_empty(),
        "active bookings overlap on property {}",
        property_id
    );
}

// ── Same range ──────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_one_of_many_instant_bookings_for_the_same_range_succeeds() {
    let engine = engine(vec![property(1, BookingType::Instant)]);

    let mut tasks = JoinSet::new();
    for guest in 0..ATTEMPTS {
        let engine = Arc::clone(&engine);
        tasks.spawn(async move {
            engine
                .create_booking(request(1, 100 + guest, d("2024-06-01"), d("2024-06-05")))
                .await
        });
    }

    let mut succeeded = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(_) => succeeded += 1,
            Err(err) => assert!(matches!(err, EngineError::Unavailable { .. })),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(engine.ledger().all().len(), 1);
    assert_eq!(engine.calendar().rows().len(), 4);
    assert_no_active_overlap(&engine, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_confirmations_confirm_each_booking_once() {
    let engine = engine(vec![property(1, BookingType::Request)]);

    // Back-to-back pending bookings, each confirmed many times at once.
    let a = engine
        .create_booking(request(1, 100, d("2024-06-01"), d("2024-06-04")))
        .await
        .unwrap();
    let b = engine
        .create_booking(request(1, 101, d("2024-06-04"), d("2024-06-08")))
        .await
        .unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..ATTEMPTS {
        for id in [a.id, b.id] {
            let engine = Arc::clone(&engine);
            tasks.spawn(async move { engine.confirm_booking(id, OWNER).await });
        }
    }

    let mut confirmed = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(_) => confirmed += 1,
            Err(err) => assert!(matches!(err, EngineError::InvalidTransition { .. })),
        }
    }

    assert_eq!(confirmed, 2);
    assert_eq!(engine.booking(a.id).unwrap().status, BookingStatus::Confirmed);
    assert_eq!(engine.booking(b.id).unwrap().status, BookingStatus::Confirmed);
    assert_no_active_overlap(&engine, 1);
}

// ── Mixed ranges ────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn random_overlapping_requests_never_double_book() {
    let engine = engine(vec![
        property(1, BookingType::Instant),
        property(2, BookingType::Request),
    ]);
    let base = d("2024-06-01");

    let mut tasks = JoinSet::new();
    for i in 0..64u64 {
        let engine = Arc::clone(&engine);
        let start = base.checked_add_days(Days::new(i % 10)).unwrap();
        let end = start.checked_add_days(Days::new(1 + i % 4)).unwrap();
        let property_id = 1 + i % 2;
        tasks.spawn(async move {
            engine
                .create_booking(request(property_id, 100 + i, start, end))
                .await
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().ok();
    }

    assert_no_active_overlap(&engine, 1);
    assert_no_active_overlap(&engine, 2);
    assert!(!engine.ledger().all().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn properties_do_not_block_each_other() {
    let engine = engine((1..=8).map(|id| property(id, BookingType::Instant)).collect());

    let mut tasks = JoinSet::new();
    for id in 1..=8u64 {
        let engine = Arc::clone(&engine);
        tasks.spawn(async move {
            engine
                .create_booking(request(id, 100 + id, d("2024-06-01"), d("2024-06-05")))
                .await
        });
    }

    let results = tokio::time::timeout(Duration::from_secs(10), async {
        let mut ok = 0;
        while let Some(joined) = tasks.join_next().await {
            if joined.unwrap().is_ok() {
                ok += 1;
            }
        }
        ok
    })
    .await
    .unwrap();

    assert_eq!(results, 8);
}

// ── Lock contention ─────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn held_lock_surfaces_unavailable_for_bookings_and_contended_for_edits() {
    let calendar = Arc::new(SlowCalendar::new(Duration::from_millis(800)));
    let mut config = EngineConfig::default();
    config.booking.lock_wait_ms = 50;
    let engine = Arc::new(BookingEngine::with_stores(
        config,
        Arc::new(InMemoryDirectory::new(vec![property(1, BookingType::Request)])),
        calendar.clone(),
        Arc::new(BookingLedger::new()),
        SyncRegistry::new(vec![ExternalSync {
            id: SyncId(1),
            property_id: PropertyId(1),
            feed_url: "https://channel.example/a.ics".to_string(),
            is_active: true,
            last_sync_at: None,
            sync_frequency_minutes: 60,
        }]),
        Arc::new(EmptyFeed),
    ));

    let pending = engine
        .create_booking(request(1, 100, d("2024-06-10"), d("2024-06-12")))
        .await
        .unwrap();

    // The host's edit takes the lock and stalls inside the calendar write.
    calendar.arm();
    let holder = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .block_dates(PropertyId(1), OWNER, d("2024-07-01"), d("2024-07-03"))
                .await
        })
    };
    calendar.entered.notified().await;

    let err = engine
        .create_booking(request(1, 101, d("2024-08-01"), d("2024-08-03")))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unavailable { .. }));

    let err = engine.confirm_booking(pending.id, OWNER).await.unwrap_err();
    assert!(matches!(err, EngineError::Unavailable { .. }));
    assert_eq!(engine.booking(pending.id).unwrap().status, BookingStatus::Pending);

    let err = engine
        .block_dates(PropertyId(1), OWNER, d("2024-09-01"), d("2024-09-02"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Contended(PropertyId(1))));

    let err = engine.sync_calendar(SyncId(1)).await.unwrap_err();
    assert!(matches!(err, EngineError::Contended(PropertyId(1))));
    assert!(engine.syncs().get(SyncId(1)).unwrap().last_sync_at.is_none());

    assert_eq!(holder.await.unwrap().unwrap(), 2);

    // With the lock free again the same calls go through.
    let confirmed = engine.confirm_booking(pending.id, OWNER).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    engine
        .create_booking(request(1, 101, d("2024-08-01"), d("2024-08-03")))
        .await
        .unwrap();
    engine.sync_calendar(SyncId(1)).await.unwrap();
    assert_no_active_overlap(&engine, 1);
}
