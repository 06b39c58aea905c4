//! Property-based tests for the booking invariants using proptest.
//!
//! Whatever sequence of requests, confirmations and cancellations is applied,
//! the active bookings of a property never overlap, and the calendar rows
//! tagged with a booking are exactly the nights of its confirmed stay.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use stay_engine::error::Result;
use stay_engine::{
    BookingEngine, BookingId, BookingRequest, BookingStatus, BookingType, CalendarSource,
    EngineConfig, EngineError, FeedFetcher, InMemoryDirectory, Money, Property,
    PropertyId, UserId,
};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

const OWNER: UserId = UserId(10);
const GUEST: UserId = UserId(20);

#[derive(Debug, Clone)]
enum Op {
    Book { offset: u64, nights: u64 },
    Confirm { index: usize },
    Cancel { index: usize },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u64..20, 1u64..6).prop_map(|(offset, nights)| Op::Book { offset, nights }),
        2 => (0usize..16).prop_map(|index| Op::Confirm { index }),
        1 => (0usize..16).prop_map(|index| Op::Cancel { index }),
    ]
}

fn arb_booking_type() -> impl Strategy<Value = BookingType> {
    prop_oneof![Just(BookingType::Instant), Just(BookingType::Request)]
}

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: 128,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct NoFeeds;

#[async_trait]
impl FeedFetcher for NoFeeds {
    async fn fetch(&self, url: &str) -> Result<String> {
        Err(EngineError::ExternalFetch(url.to_string()))
    }
}

fn property(booking_type: BookingType) -> Property {
    Property {
        id: PropertyId(1),
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

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

async fn apply(engine: &BookingEngine, ops: &[Op]) {
    let mut created: Vec<BookingId> = Vec::new();
    for op in ops {
        match op {
            Op::Book { offset, nights } => {
                let check_in = base().checked_add_days(Days::new(*offset)).unwrap();
                let check_out = check_in.checked_add_days(Days::new(*nights)).unwrap();
                let request = BookingRequest {
                    property_id: PropertyId(1),
                    guest_id: GUEST,
                    check_in,
                    check_out,
                    guests_count: 1,
                    notes: String::new(),
                };
                if let Ok(booking) = engine.create_booking(request).await {
                    created.push(booking.id);
                }
            }
            Op::Confirm { index } => {
                if let Some(id) = created.get(*index) {
                    engine.confirm_booking(*id, OWNER).await.ok();
                }
            }
            Op::Cancel { index } => {
                if let Some(id) = created.get(*index) {
                    engine.cancel_booking(*id, GUEST, "").await.ok();
                }
            }
        }
    }
}

fn run(booking_type: BookingType, ops: &[Op]) -> BookingEngine {
    let engine = BookingEngine::new(
        EngineConfig::default(),
        Arc::new(InMemoryDirectory::new(vec![property(booking_type)])),
        Arc::new(NoFeeds),
    );
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    runtime.block_on(apply(&engine, ops));
    engine
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config())]

    #[test]
    fn active_bookings_never_overlap(
        booking_type in arb_booking_type(),
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        let engine = run(booking_type, &ops);
        prop_assert!(engine.audit_overlaps(PropertyId(1)).is_empty());
    }

    #[test]
    fn booking_rows_match_confirmed_stays(
        booking_type in arb_booking_type(),
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        let engine = run(booking_type, &ops);
        let rows = engine.calendar().rows();

        for booking in engine.ledger().all() {
            let owned: Vec<NaiveDate> = rows
                .iter()
                .filter(|day| day.source == CalendarSource::Booking { booking_id: booking.id })
                .map(|day| day.date)
                .collect();
            if booking.status == BookingStatus::Confirmed {
                let nights: Vec<NaiveDate> = booking.range().dates().collect();
                prop_assert_eq!(owned, nights);
            } else {
                prop_assert!(owned.is_empty());
            }
        }
    }
}
