//! Tests for date-range search over the catalog.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use stay_engine::error::Result;
use stay_engine::{
    BookingEngine, BookingRequest, BookingType, CalendarSource, EngineConfig,
    EngineError, FeedFetcher, InMemoryDirectory, Money, Property, PropertyId, SearchFilters,
    UserId,
};

// ── Helpers ─────────────────────────────────────────────────────────────────

struct NoFeeds;

#[async_trait]
impl FeedFetcher for NoFeeds {
    async fn fetch(&self, url: &str) -> Result<String> {
        Err(EngineError::ExternalFetch(url.to_string()))
    }
}

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn property(id: u64, city: &str, listed_day: u32) -> Property {
    Property {
        id: PropertyId(id),
        owner_id: UserId(10),
        city: city.to_string(),
        property_type: "apartment".to_string(),
        bedrooms: 2,
        max_guests: 4,
        min_nights: 1,
        max_nights: 14,
        base_price: Money::from_major(100),
        weekend_price: None,
        weekly_discount: 0,
        monthly_discount: 0,
        booking_type: BookingType::Request,
        is_published: true,
        is_verified: false,
        listed_at: Utc.with_ymd_and_hms(2024, 1, listed_day, 0, 0, 0).unwrap(),
    }
}

fn engine(properties: Vec<Property>) -> BookingEngine {
    BookingEngine::new(
        EngineConfig::default(),
        Arc::new(InMemoryDirectory::new(properties)),
        Arc::new(NoFeeds),
    )
}

fn search(engine: &BookingEngine, filters: SearchFilters) -> Vec<u64> {
    engine
        .search(d("2024-06-10"), d("2024-06-13"), &filters)
        .unwrap()
        .into_iter()
        .map(|id| id.0)
        .collect()
}

// ── Ordering ────────────────────────────────────────────────────────────────

#[test]
fn verified_first_then_most_recently_listed() {
    let mut verified_old = property(1, "Lisbon", 1);
    verified_old.is_verified = true;
    let unverified_new = property(2, "Lisbon", 20);
    let unverified_mid = property(3, "Lisbon", 10);
    let mut verified_new = property(4, "Lisbon", 15);
    verified_new.is_verified = true;

    let engine = engine(vec![verified_old, unverified_new, unverified_mid, verified_new]);

    assert_eq!(search(&engine, SearchFilters::default()), vec![4, 1, 2, 3]);
}

// ── Static filters ──────────────────────────────────────────────────────────

#[test]
fn city_matches_case_insensitive_substring() {
    let engine = engine(vec![
        property(1, "Lisbon", 1),
        property(2, "Porto", 2),
        property(3, "Lisbon Coast", 3),
    ]);

    let filters = SearchFilters {
        city: Some("lisb".to_string()),
        ..SearchFilters::default()
    };
    assert_eq!(search(&engine, filters), vec![3, 1]);
}

#[test]
fn price_bedrooms_guests_and_type_filters() {
    let mut pricey = property(1, "Lisbon", 1);
    pricey.base_price = Money::from_major(300);
    let mut small = property(2, "Lisbon", 2);
    small.bedrooms = 1;
    small.max_guests = 2;
    let mut house = property(3, "Lisbon", 3);
    house.property_type = "House".to_string();
    let plain = property(4, "Lisbon", 4);

    let engine = engine(vec![pricey, small, house, plain]);

    let cheap = SearchFilters {
        max_price: Some(Money::from_major(150)),
        ..SearchFilters::default()
    };
    assert_eq!(search(&engine, cheap), vec![4, 3, 2]);

    let roomy = SearchFilters {
        min_bedrooms: Some(2),
        min_guests: Some(3),
        ..SearchFilters::default()
    };
    assert_eq!(search(&engine, roomy), vec![4, 3, 1]);

    let houses = SearchFilters {
        property_type: Some("house".to_string()),
        ..SearchFilters::default()
    };
    assert_eq!(search(&engine, houses), vec![3]);
}

#[test]
fn unpublished_and_out_of_bounds_properties_are_excluded() {
    let mut hidden = property(1, "Lisbon", 1);
    hidden.is_published = false;
    let mut long_stays_only = property(2, "Lisbon", 2);
    long_stays_only.min_nights = 7;
    let visible = property(3, "Lisbon", 3);

    let engine = engine(vec![hidden, long_stays_only, visible]);

    assert_eq!(search(&engine, SearchFilters::default()), vec![3]);
}

// ── Availability ────────────────────────────────────────────────────────────

#[tokio::test]
async fn booked_and_blocked_properties_are_excluded() {
    let engine = engine(vec![
        property(1, "Lisbon", 1),
        property(2, "Lisbon", 2),
        property(3, "Lisbon", 3),
        property(4, "Lisbon", 4),
    ]);
    engine
        .create_booking(BookingRequest {
            property_id: PropertyId(1),
            guest_id: UserId(20),
            check_in: d("2024-06-12"),
            check_out: d("2024-06-15"),
            guests_count: 2,
            notes: String::new(),
        })
        .await
        .unwrap();
    engine
        .calendar()
        .upsert(PropertyId(2), d("2024-06-11"), false, CalendarSource::Manual);
    // Blocked only on the checkout date, so still free for the stay.
    engine
        .calendar()
        .upsert(PropertyId(3), d("2024-06-13"), false, CalendarSource::Manual);

    assert_eq!(search(&engine, SearchFilters::default()), vec![4, 3]);
}

#[test]
fn inverted_range_is_rejected() {
    let engine = engine(vec![property(1, "Lisbon", 1)]);
    let err = engine
        .search(d("2024-06-13"), d("2024-06-10"), &SearchFilters::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}
