//! Date-range search over the published catalog.
//!
//! Cheap static filters run first so the per-property availability check only
//! sees plausible candidates.

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};

use crate::availability::evaluate;
use crate::booking::BookingLedger;
use crate::calendar::CalendarStore;
use crate::directory::PropertyDirectory;
use crate::model::{Money, Property, PropertyId};
use crate::range::StayRange;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    /// Case-insensitive substring of the city name.
    pub city: Option<String>,
    /// Highest acceptable base nightly price.
    pub max_price: Option<Money>,
    pub property_type: Option<String>,
    pub min_bedrooms: Option<u32>,
    /// Party size the property must accommodate.
    pub min_guests: Option<u32>,
}

impl SearchFilters {
    fn matches(&self, property: &Property, nights: i64) -> bool {
        if !property.is_published || !property.accepts_nights(nights) {
            return false;
        }
        if let Some(city) = &self.city {
            if !property.city.to_lowercase().contains(&city.to_lowercase()) {
                return false;
            }
        }
        if let Some(max_price) = self.max_price {
            if property.base_price > max_price {
                return false;
            }
        }
        if let Some(kind) = &self.property_type {
            if !property.property_type.eq_ignore_ascii_case(kind) {
                return false;
            }
        }
        if let Some(bedrooms) = self.min_bedrooms {
            if property.bedrooms < bedrooms {
                return false;
            }
        }
        if let Some(guests) = self.min_guests {
            if property.max_guests < guests {
                return false;
            }
        }
        true
    }
}

/// Published properties free for the whole of `range`, verified first, then
/// most recently listed first.
pub fn search(
    range: StayRange,
    filters: &SearchFilters,
    directory: &dyn PropertyDirectory,
    bookings: &BookingLedger,
    calendar: &dyn CalendarStore,
) -> Vec<PropertyId> {
    let nights = range.nights();
    let booked = bookings.properties_with_active_overlap(range);
    let blocked = calendar.properties_blocked_in_range(range);

    let mut candidates: Vec<Property> = directory
        .published()
        .into_iter()
        .filter(|p| filters.matches(p, nights))
        .filter(|p| !booked.contains(&p.id) && !blocked.contains(&p.id))
        .collect();

    candidates.sort_by_key(|p| (Reverse(p.is_verified), Reverse(p.listed_at), p.id));

    candidates
        .into_iter()
        .filter(|p| evaluate(p, range, bookings, calendar, None).is_available())
        .map(|p| p.id)
        .collect()
}
