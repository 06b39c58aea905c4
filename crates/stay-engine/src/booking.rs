//! Reservation records, their lifecycle, and the booking ledger.
//!
//! ```text
//!            ┌──────── confirm (owner) ───────┐
//!   request ─┤                                 ▼
//!            └─► pending ──────────────────► confirmed ──► completed
//!                   │  reject / withdraw          │
//!                   ▼                             │ cancel
//!               cancelled ◄───────────────────────┘
//! ```
//!
//! State changes here are pure; calendar side effects are applied by the
//! engine while it holds the property lock.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::model::{BookingId, Money, PropertyId, UserId};
use crate::range::StayRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Pending and confirmed bookings hold their dates.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        })
    }
}

/// Payment is handled elsewhere; only its status is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Paid,
    /// A paid booking was cancelled and the payment provider owes a refund.
    RefundPending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub property_id: PropertyId,
    pub guest_id: UserId,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests_count: u32,
    pub total_price: Money,
    pub status: BookingStatus,
    #[serde(default)]
    pub owner_response: Option<bool>,
    #[serde(default)]
    pub owner_response_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn range(&self) -> StayRange {
        StayRange {
            start: self.check_in,
            end: self.check_out,
        }
    }

    pub fn nights(&self) -> i64 {
        self.range().nights()
    }

    fn require(&self, expected: BookingStatus, action: &'static str) -> Result<()> {
        if self.status != expected {
            return Err(self.invalid(action));
        }
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> EngineError {
        EngineError::InvalidTransition {
            booking_id: self.id,
            status: self.status.to_string(),
            action,
        }
    }

    /// `pending → confirmed` on host acceptance.
    pub fn confirm(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.require(BookingStatus::Pending, "confirm")?;
        self.status = BookingStatus::Confirmed;
        self.owner_response = Some(true);
        self.owner_response_at = Some(at);
        self.updated_at = at;
        Ok(())
    }

    /// `pending → cancelled` on host rejection.
    pub fn reject(&mut self, reason: String, at: DateTime<Utc>) -> Result<()> {
        self.require(BookingStatus::Pending, "reject")?;
        self.status = BookingStatus::Cancelled;
        self.owner_response = Some(false);
        self.owner_response_at = Some(at);
        self.mark_cancelled(reason, at);
        Ok(())
    }

    /// `pending | confirmed → cancelled`. Returns the status the booking had,
    /// so the caller knows whether calendar days must be released.
    pub fn cancel(&mut self, reason: String, at: DateTime<Utc>) -> Result<BookingStatus> {
        let previous = self.status;
        if !previous.is_active() {
            return Err(self.invalid("cancel"));
        }
        self.status = BookingStatus::Cancelled;
        self.mark_cancelled(reason, at);
        Ok(previous)
    }

    /// `confirmed → completed` once the checkout day has been reached.
    pub fn complete(&mut self, today: NaiveDate, at: DateTime<Utc>) -> Result<()> {
        self.require(BookingStatus::Confirmed, "complete")?;
        if today < self.check_out {
            return Err(EngineError::Validation(format!(
                "booking {} checks out on {}, cannot complete on {}",
                self.id, self.check_out, today
            )));
        }
        self.status = BookingStatus::Completed;
        self.updated_at = at;
        Ok(())
    }

    pub fn mark_paid(&mut self, at: DateTime<Utc>) -> Result<()> {
        if !self.status.is_active() {
            return Err(self.invalid("mark paid"));
        }
        self.payment_status = PaymentStatus::Paid;
        self.updated_at = at;
        Ok(())
    }

    fn mark_cancelled(&mut self, reason: String, at: DateTime<Utc>) {
        self.cancellation_reason = Some(reason).filter(|r| !r.is_empty());
        self.cancelled_at = Some(at);
        self.updated_at = at;
        if self.payment_status == PaymentStatus::Paid {
            self.payment_status = PaymentStatus::RefundPending;
        }
    }
}

/// A booking about to be inserted; the ledger assigns the id.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub property_id: PropertyId,
    pub guest_id: UserId,
    pub range: StayRange,
    pub guests_count: u32,
    pub total_price: Money,
    pub status: BookingStatus,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

type IndexKey = (PropertyId, NaiveDate, NaiveDate, BookingId);

#[derive(Debug, Default)]
struct LedgerState {
    by_id: BTreeMap<BookingId, Booking>,
    /// Secondary index `(property, check_in, check_out, id)` for overlap scans.
    by_property: BTreeSet<IndexKey>,
}

/// In-process booking table with a per-property date index.
#[derive(Debug)]
pub struct BookingLedger {
    state: RwLock<LedgerState>,
    next_id: AtomicU64,
}

impl Default for BookingLedger {
    fn default() -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl BookingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from persisted bookings. New ids continue after the
    /// highest existing one.
    pub fn from_bookings(bookings: impl IntoIterator<Item = Booking>) -> Self {
        let mut state = LedgerState::default();
        for booking in bookings {
            state.by_property.insert(index_key(&booking));
            state.by_id.insert(booking.id, booking);
        }
        let next = state.by_id.keys().next_back().map_or(1, |id| id.0 + 1);
        Self {
            state: RwLock::new(state),
            next_id: AtomicU64::new(next),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, new: NewBooking) -> Booking {
        let id = BookingId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let booking = Booking {
            id,
            property_id: new.property_id,
            guest_id: new.guest_id,
            check_in: new.range.start,
            check_out: new.range.end,
            guests_count: new.guests_count,
            total_price: new.total_price,
            status: new.status,
            owner_response: None,
            owner_response_at: None,
            cancellation_reason: None,
            cancelled_at: None,
            payment_status: PaymentStatus::Unpaid,
            notes: new.notes,
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        let mut state = self.write();
        state.by_property.insert(index_key(&booking));
        state.by_id.insert(id, booking.clone());
        booking
    }

    pub fn get(&self, id: BookingId) -> Option<Booking> {
        self.read().by_id.get(&id).cloned()
    }

    /// Replace a stored booking. Dates and property never change after
    /// creation, so the secondary index stays valid.
    pub fn update(&self, booking: Booking) -> Result<()> {
        let mut state = self.write();
        match state.by_id.get_mut(&booking.id) {
            Some(slot) => {
                *slot = booking;
                Ok(())
            }
            None => Err(EngineError::BookingNotFound(booking.id)),
        }
    }

    /// Pending or confirmed bookings of `property_id` overlapping `range`,
    /// optionally ignoring one booking (the one being confirmed).
    pub fn active_overlapping(
        &self,
        property_id: PropertyId,
        range: StayRange,
        exclude: Option<BookingId>,
    ) -> Vec<Booking> {
        let state = self.read();
        let lower = (property_id, NaiveDate::MIN, NaiveDate::MIN, BookingId(0));
        let upper = (property_id, range.end, NaiveDate::MIN, BookingId(0));
        let found: Vec<Booking> = state
            .by_property
            .range(lower..upper)
            .filter(|(_, _, check_out, id)| *check_out > range.start && Some(*id) != exclude)
            .filter_map(|(_, _, _, id)| state.by_id.get(id))
            .filter(|b| b.status.is_active())
            .cloned()
            .collect();
        found
    }

    /// Set-based exclusion used by search.
    pub fn properties_with_active_overlap(&self, range: StayRange) -> BTreeSet<PropertyId> {
        self.read()
            .by_id
            .values()
            .filter(|b| b.status.is_active() && b.range().overlaps(&range))
            .map(|b| b.property_id)
            .collect()
    }

    pub fn for_property(&self, property_id: PropertyId) -> Vec<Booking> {
        let state = self.read();
        let lower = (property_id, NaiveDate::MIN, NaiveDate::MIN, BookingId(0));
        let upper = (property_id, NaiveDate::MAX, NaiveDate::MAX, BookingId(u64::MAX));
        let found: Vec<Booking> = state
            .by_property
            .range(lower..=upper)
            .filter_map(|(_, _, _, id)| state.by_id.get(id))
            .cloned()
            .collect();
        found
    }

    pub fn for_guest(&self, guest_id: UserId) -> Vec<Booking> {
        self.read()
            .by_id
            .values()
            .filter(|b| b.guest_id == guest_id)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Booking> {
        self.read().by_id.values().cloned().collect()
    }
}

fn index_key(booking: &Booking) -> IndexKey {
    (
        booking.property_id,
        booking.check_in,
        booking.check_out,
        booking.id,
    )
}
