//! Identifiers, money and the property record the engine reads from the catalog.

use std::fmt;
use std::iter::Sum;
use std::ops::Add;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Catalog identifier of a rentable property.
    PropertyId
);
id_type!(
    /// Identifier of a reservation. Also the correlation id of the calendar
    /// days the reservation blocks (`booking_<id>`).
    BookingId
);
id_type!(
    /// Authenticated actor (guest or host), supplied by the transport layer.
    UserId
);
id_type!(
    /// Identifier of an external calendar feed subscription.
    SyncId
);

/// An amount in minor currency units (cents). Single currency only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(pub i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Whole currency units, e.g. `Money::from_major(100)` is 100.00.
    pub const fn from_major(units: i64) -> Self {
        Money(units * 100)
    }

    pub fn cents(self) -> i64 {
        self.0
    }

    /// Apply a percentage discount, rounding half up to the nearest cent.
    pub fn discounted(self, percent: u8) -> Self {
        let percent = i64::from(percent.min(100));
        Money((self.0 * (100 - percent) + 50).div_euclid(100))
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// How a reservation request is handled by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingType {
    /// Goes straight to `confirmed` and blocks the calendar.
    Instant,
    /// Waits in `pending` for the host to accept or reject.
    #[default]
    Request,
}

/// The slice of a catalog listing that the booking engine depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: PropertyId,
    pub owner_id: UserId,
    pub city: String,
    pub property_type: String,
    pub bedrooms: u32,
    pub max_guests: u32,
    pub min_nights: u32,
    pub max_nights: u32,
    pub base_price: Money,
    #[serde(default)]
    pub weekend_price: Option<Money>,
    /// Percent off when the stay is at least 7 nights.
    #[serde(default)]
    pub weekly_discount: u8,
    /// Percent off when the stay is at least 28 nights.
    #[serde(default)]
    pub monthly_discount: u8,
    #[serde(default)]
    pub booking_type: BookingType,
    #[serde(default = "default_true")]
    pub is_published: bool,
    #[serde(default)]
    pub is_verified: bool,
    pub listed_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Property {
    /// Whether a stay of `nights` nights is within the host's bounds.
    pub fn accepts_nights(&self, nights: i64) -> bool {
        nights >= i64::from(self.min_nights) && nights <= i64::from(self.max_nights)
    }
}
