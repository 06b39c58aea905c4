//! # stay-engine
//!
//! Availability and booking engine for a short-term-rental marketplace.
//!
//! The engine decides whether a property can be booked for a date range,
//! keeps a day-granular calendar consistent across three writers (host edits,
//! confirmed bookings and imported iCal feeds), and serializes every
//! check-then-write per property so concurrent requests can never
//! double-book.
//!
//! ## Modules
//!
//! - [`calendar`]: one availability row per (property, date), tagged by writer
//! - [`availability`]: the bookability verdict for a stay
//! - [`booking`]: reservation lifecycle and the booking ledger
//! - [`pricing`]: nightly, weekend and override rates, length-of-stay discounts
//! - [`reconciler`]: idempotent import of external calendar feeds
//! - [`ical`] / [`expander`]: feed parsing and RRULE expansion
//! - [`search`]: date-range search over the published catalog
//! - [`freebusy`]: busy/free spans of a property calendar
//! - [`engine`]: the entry point tying it all together under per-property locks
//! - [`error`]: Error types

pub mod availability;
pub mod booking;
pub mod calendar;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod expander;
pub mod feed;
pub mod freebusy;
pub mod ical;
pub mod locks;
pub mod model;
pub mod pricing;
pub mod range;
pub mod reconciler;
pub mod search;
pub mod snapshot;

pub use availability::{AvailabilityQuote, Verdict};
pub use booking::{Booking, BookingStatus, PaymentStatus};
pub use calendar::{CalendarDay, CalendarSource, CalendarStore, InMemoryCalendar};
pub use config::{CancellationPolicy, EngineConfig};
pub use directory::{InMemoryDirectory, PropertyDirectory};
pub use engine::{BookingEngine, BookingRequest};
pub use error::EngineError;
pub use feed::{FeedClient, FeedFetcher};
pub use model::{BookingId, BookingType, Money, Property, PropertyId, SyncId, UserId};
pub use range::StayRange;
pub use reconciler::{ExternalSync, SyncOutcome, SyncReport};
pub use search::SearchFilters;
pub use snapshot::EngineSnapshot;
