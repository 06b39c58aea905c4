//! The booking engine: the entry point request handlers call.
//!
//! Every operation that decides on availability and then writes (creating,
//! confirming, cancelling bookings, host calendar edits, feed syncs) runs
//! under the property's lock from [`PropertyLocks`]. Reads (quotes, search,
//! calendar views) do not lock and always re-evaluate against current state.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::availability::{evaluate, AvailabilityQuote};
use crate::booking::{Booking, BookingLedger, BookingStatus, NewBooking};
use crate::calendar::{CalendarDay, CalendarSource, CalendarStore, InMemoryCalendar};
use crate::config::{CancellationPolicy, EngineConfig};
use crate::directory::PropertyDirectory;
use crate::error::{EngineError, Result};
use crate::feed::FeedFetcher;
use crate::freebusy::{calendar_view, CalendarView};
use crate::locks::{PropertyGuard, PropertyLocks};
use crate::model::{BookingId, BookingType, Money, Property, PropertyId, SyncId, UserId};
use crate::pricing::{quote_stay, PriceQuote};
use crate::range::{find_conflicts, Conflict, StayRange};
use crate::reconciler::{ExternalSync, Reconciler, SyncOutcome, SyncRegistry, SyncReport};
use crate::search::{search, SearchFilters};

/// A guest's reservation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub property_id: PropertyId,
    pub guest_id: UserId,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests_count: u32,
    #[serde(default)]
    pub notes: String,
}

pub struct BookingEngine {
    config: EngineConfig,
    directory: Arc<dyn PropertyDirectory>,
    calendar: Arc<dyn CalendarStore>,
    bookings: Arc<BookingLedger>,
    locks: Arc<PropertyLocks>,
    reconciler: Reconciler,
}

impl BookingEngine {
    /// Engine with an empty in-memory calendar, ledger and sync registry.
    pub fn new(
        config: EngineConfig,
        directory: Arc<dyn PropertyDirectory>,
        fetcher: Arc<dyn FeedFetcher>,
    ) -> Self {
        Self::with_stores(
            config,
            directory,
            Arc::new(InMemoryCalendar::new()),
            Arc::new(BookingLedger::new()),
            SyncRegistry::default(),
            fetcher,
        )
    }

    /// Engine over existing stores.
    pub fn with_stores(
        config: EngineConfig,
        directory: Arc<dyn PropertyDirectory>,
        calendar: Arc<dyn CalendarStore>,
        bookings: Arc<BookingLedger>,
        syncs: SyncRegistry,
        fetcher: Arc<dyn FeedFetcher>,
    ) -> Self {
        let locks = Arc::new(PropertyLocks::new());
        let reconciler = Reconciler::new(
            syncs,
            fetcher,
            Arc::clone(&calendar),
            Arc::clone(&locks),
            config.sync.clone(),
            config.booking.clone(),
        );
        Self {
            config,
            directory,
            calendar,
            bookings,
            locks,
            reconciler,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn calendar(&self) -> &dyn CalendarStore {
        self.calendar.as_ref()
    }

    pub fn ledger(&self) -> &BookingLedger {
        &self.bookings
    }

    pub fn syncs(&self) -> &SyncRegistry {
        self.reconciler.registry()
    }

    fn property(&self, id: PropertyId) -> Result<Property> {
        self.directory
            .property(id)
            .ok_or(EngineError::PropertyNotFound(id))
    }

    fn load_booking(&self, id: BookingId) -> Result<Booking> {
        self.bookings
            .get(id)
            .ok_or(EngineError::BookingNotFound(id))
    }

    fn require_owner(property: &Property, actor: UserId) -> Result<()> {
        if property.owner_id != actor {
            return Err(EngineError::NotOwner(property.id));
        }
        Ok(())
    }

    fn unavailable(property_id: PropertyId, range: StayRange) -> EngineError {
        EngineError::Unavailable {
            property_id,
            check_in: range.start,
            check_out: range.end,
        }
    }

    /// Take the property lock for a booking decision. A lock that stays
    /// contended is reported as unavailability after one unlocked re-check.
    async fn lock_for_booking(
        &self,
        property: &Property,
        range: StayRange,
        ignore: Option<BookingId>,
    ) -> Result<PropertyGuard> {
        if let Some(guard) = self
            .locks
            .acquire(property.id, self.config.booking.lock_wait())
            .await
        {
            return Ok(guard);
        }
        let verdict = evaluate(property, range, &self.bookings, self.calendar.as_ref(), ignore);
        if verdict.is_available() {
            warn!(
                property_id = %property.id,
                check_in = %range.start,
                check_out = %range.end,
                "property lock contended, stay could not be secured"
            );
        } else {
            debug!(
                property_id = %property.id,
                reason = %verdict.describe(),
                "property lock contended, stay already unavailable"
            );
        }
        Err(Self::unavailable(property.id, range))
    }

    async fn lock_for_edit(&self, property_id: PropertyId) -> Result<PropertyGuard> {
        self.locks
            .acquire(property_id, self.config.booking.lock_wait())
            .await
            .ok_or(EngineError::Contended(property_id))
    }

    /// Itemized price of a stay at current rates and day overrides.
    pub fn quote(&self, property: &Property, range: StayRange) -> PriceQuote {
        let overrides: BTreeMap<NaiveDate, Money> = self
            .calendar
            .list_in_range(property.id, range)
            .into_iter()
            .filter_map(|day| day.price_override.map(|price| (day.date, price)))
            .collect();
        quote_stay(property, range, &overrides, &self.config.pricing.weekend_days)
    }

    /// Whether a stay can be booked right now, with its price when it can.
    pub fn check_availability(
        &self,
        property_id: PropertyId,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<AvailabilityQuote> {
        let range = StayRange::new(check_in, check_out)?;
        let property = self.property(property_id)?;
        let verdict = evaluate(&property, range, &self.bookings, self.calendar.as_ref(), None);
        let total_price = verdict
            .is_available()
            .then(|| self.quote(&property, range).total);
        Ok(AvailabilityQuote {
            available: verdict.is_available(),
            total_price,
            nights: range.nights(),
            verdict,
        })
    }

    /// Published properties free for the whole stay, best first.
    pub fn search(
        &self,
        check_in: NaiveDate,
        check_out: NaiveDate,
        filters: &SearchFilters,
    ) -> Result<Vec<PropertyId>> {
        let range = StayRange::new(check_in, check_out)?;
        Ok(search(
            range,
            filters,
            self.directory.as_ref(),
            &self.bookings,
            self.calendar.as_ref(),
        ))
    }

    /// Create a booking: `pending` for request-type properties, `confirmed`
    /// (with its days blocked) for instant-type ones.
    #[instrument(skip(self, request), fields(property_id = %request.property_id, guest_id = %request.guest_id))]
    pub async fn create_booking(&self, request: BookingRequest) -> Result<Booking> {
        let range = StayRange::new(request.check_in, request.check_out)?;
        if request.guests_count == 0 {
            return Err(EngineError::Validation(
                "guests_count must be at least 1".to_string(),
            ));
        }
        let property = self.property(request.property_id)?;
        if !property.is_published {
            return Err(EngineError::Validation(format!(
                "property {} is not accepting bookings",
                property.id
            )));
        }
        if request.guests_count > property.max_guests {
            return Err(EngineError::GuestLimit {
                requested: request.guests_count,
                max: property.max_guests,
            });
        }

        let _guard = self.lock_for_booking(&property, range, None).await?;

        let verdict = evaluate(&property, range, &self.bookings, self.calendar.as_ref(), None);
        if !verdict.is_available() {
            debug!(?verdict, "booking rejected");
            return Err(Self::unavailable(property.id, range));
        }

        let status = match property.booking_type {
            BookingType::Instant => BookingStatus::Confirmed,
            BookingType::Request => BookingStatus::Pending,
        };
        let booking = self.bookings.insert(NewBooking {
            property_id: property.id,
            guest_id: request.guest_id,
            range,
            guests_count: request.guests_count,
            total_price: self.quote(&property, range).total,
            status,
            notes: request.notes,
            created_at: Utc::now(),
        });

        if status == BookingStatus::Confirmed {
            self.block_for_booking(&booking);
        }

        info!(booking_id = %booking.id, %status, total = %booking.total_price, "booking created");
        Ok(booking)
    }

    /// Host accepts a pending booking. Availability is re-checked because the
    /// calendar may have changed since the request was made.
    #[instrument(skip(self))]
    pub async fn confirm_booking(&self, booking_id: BookingId, owner_id: UserId) -> Result<Booking> {
        let booking = self.load_booking(booking_id)?;
        let property = self.property(booking.property_id)?;
        Self::require_owner(&property, owner_id)?;

        let _guard = self
            .lock_for_booking(&property, booking.range(), Some(booking_id))
            .await?;

        let mut booking = self.load_booking(booking_id)?;
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::InvalidTransition {
                booking_id,
                status: booking.status.to_string(),
                action: "confirm",
            });
        }
        let verdict = evaluate(
            &property,
            booking.range(),
            &self.bookings,
            self.calendar.as_ref(),
            Some(booking_id),
        );
        if !verdict.is_available() {
            debug!(?verdict, "confirmation rejected");
            return Err(Self::unavailable(property.id, booking.range()));
        }

        booking.confirm(Utc::now())?;
        self.bookings.update(booking.clone())?;
        self.block_for_booking(&booking);

        info!(property_id = %property.id, "booking confirmed");
        Ok(booking)
    }

    /// Host declines a pending booking. Its days were never blocked.
    #[instrument(skip(self, reason))]
    pub async fn reject_booking(
        &self,
        booking_id: BookingId,
        owner_id: UserId,
        reason: &str,
    ) -> Result<Booking> {
        let booking = self.load_booking(booking_id)?;
        let property = self.property(booking.property_id)?;
        Self::require_owner(&property, owner_id)?;

        let _guard = self.lock_for_edit(property.id).await?;
        let mut booking = self.load_booking(booking_id)?;
        booking.reject(reason.to_string(), Utc::now())?;
        self.bookings.update(booking.clone())?;

        info!(property_id = %property.id, "booking rejected by owner");
        Ok(booking)
    }

    /// Cancel a pending or confirmed booking.
    ///
    /// The guest may always withdraw a pending request; whether they may
    /// cancel a confirmed stay is governed by the cancellation policy. The
    /// owner may cancel either. Cancelling a confirmed booking releases
    /// exactly the days it blocked.
    #[instrument(skip(self, reason))]
    pub async fn cancel_booking(
        &self,
        booking_id: BookingId,
        actor_id: UserId,
        reason: &str,
    ) -> Result<Booking> {
        let booking = self.load_booking(booking_id)?;
        let property = self.property(booking.property_id)?;

        let _guard = self.lock_for_edit(property.id).await?;
        let mut booking = self.load_booking(booking_id)?;
        self.authorize_cancel(&property, &booking, actor_id)?;

        let previous = booking.cancel(reason.to_string(), Utc::now())?;
        self.bookings.update(booking.clone())?;

        let released = if previous == BookingStatus::Confirmed {
            self.calendar.delete_by_source(
                property.id,
                &CalendarSource::Booking {
                    booking_id: booking.id,
                },
            )
        } else {
            0
        };

        info!(property_id = %property.id, %previous, released, "booking cancelled");
        Ok(booking)
    }

    fn authorize_cancel(&self, property: &Property, booking: &Booking, actor: UserId) -> Result<()> {
        let is_owner = property.owner_id == actor;
        let is_guest = booking.guest_id == actor;
        let allowed = match booking.status {
            BookingStatus::Pending => is_owner || is_guest,
            BookingStatus::Confirmed => {
                is_owner
                    || (is_guest
                        && self.config.booking.cancellation_policy
                            == CancellationPolicy::OwnerOrGuest)
            }
            // Terminal states fall through to the transition error.
            BookingStatus::Cancelled | BookingStatus::Completed => is_owner || is_guest,
        };
        if allowed {
            Ok(())
        } else {
            Err(EngineError::Forbidden(booking.id))
        }
    }

    /// Mark a confirmed stay as completed once `today` has reached checkout.
    /// Triggered by an external scheduler.
    pub async fn complete_booking(&self, booking_id: BookingId, today: NaiveDate) -> Result<Booking> {
        let booking = self.load_booking(booking_id)?;
        let _guard = self.lock_for_edit(booking.property_id).await?;
        let mut booking = self.load_booking(booking_id)?;
        booking.complete(today, Utc::now())?;
        self.bookings.update(booking.clone())?;
        info!(%booking_id, "booking completed");
        Ok(booking)
    }

    /// Record that the payment provider captured the booking's payment.
    pub async fn mark_paid(&self, booking_id: BookingId) -> Result<Booking> {
        let booking = self.load_booking(booking_id)?;
        let _guard = self.lock_for_edit(booking.property_id).await?;
        let mut booking = self.load_booking(booking_id)?;
        booking.mark_paid(Utc::now())?;
        self.bookings.update(booking.clone())?;
        Ok(booking)
    }

    fn block_for_booking(&self, booking: &Booking) {
        self.calendar.bulk_upsert_range(
            booking.property_id,
            booking.range(),
            false,
            CalendarSource::Booking {
                booking_id: booking.id,
            },
        );
    }

    /// Host closes dates by hand.
    pub async fn block_dates(
        &self,
        property_id: PropertyId,
        owner_id: UserId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<usize> {
        self.manual_edit(property_id, owner_id, start, end, false)
            .await
    }

    /// Host reopens dates by hand. Dates held by an active booking stay
    /// unbookable through the booking overlap rule.
    pub async fn release_dates(
        &self,
        property_id: PropertyId,
        owner_id: UserId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<usize> {
        self.manual_edit(property_id, owner_id, start, end, true)
            .await
    }

    async fn manual_edit(
        &self,
        property_id: PropertyId,
        owner_id: UserId,
        start: NaiveDate,
        end: NaiveDate,
        is_available: bool,
    ) -> Result<usize> {
        let range = StayRange::new(start, end)?;
        let property = self.property(property_id)?;
        Self::require_owner(&property, owner_id)?;

        let _guard = self.lock_for_edit(property_id).await?;
        let written =
            self.calendar
                .bulk_upsert_range(property_id, range, is_available, CalendarSource::Manual);
        info!(%property_id, %start, %end, is_available, "manual calendar edit");
        Ok(written)
    }

    /// Host sets or clears the nightly price of one date.
    pub async fn set_price_override(
        &self,
        property_id: PropertyId,
        owner_id: UserId,
        date: NaiveDate,
        price: Option<Money>,
    ) -> Result<CalendarDay> {
        let property = self.property(property_id)?;
        Self::require_owner(&property, owner_id)?;
        let _guard = self.lock_for_edit(property_id).await?;
        Ok(self.calendar.set_price_override(property_id, date, price))
    }

    pub fn booking(&self, booking_id: BookingId) -> Result<Booking> {
        self.load_booking(booking_id)
    }

    pub fn bookings_for_guest(&self, guest_id: UserId) -> Vec<Booking> {
        self.bookings.for_guest(guest_id)
    }

    /// Bookings on every property owned by `owner_id`.
    pub fn bookings_for_owner(&self, owner_id: UserId) -> Vec<Booking> {
        self.bookings
            .all()
            .into_iter()
            .filter(|b| {
                self.directory
                    .property(b.property_id)
                    .is_some_and(|p| p.owner_id == owner_id)
            })
            .collect()
    }

    pub fn calendar_view(
        &self,
        property_id: PropertyId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<CalendarView> {
        let window = StayRange::new(start, end)?;
        self.property(property_id)?;
        Ok(calendar_view(
            property_id,
            window,
            &self.bookings,
            self.calendar.as_ref(),
        ))
    }

    /// Pairs of active bookings on a property that overlap. Always empty
    /// while the engine is the only writer of bookings.
    pub fn audit_overlaps(&self, property_id: PropertyId) -> Vec<Conflict<BookingId>> {
        let active: Vec<(BookingId, StayRange)> = self
            .bookings
            .for_property(property_id)
            .into_iter()
            .filter(|b| b.status.is_active())
            .map(|b| (b.id, b.range()))
            .collect();
        find_conflicts(&active)
    }

    pub fn register_sync(&self, sync: ExternalSync) -> Result<()> {
        self.property(sync.property_id)?;
        self.reconciler.registry().upsert(sync);
        Ok(())
    }

    /// Re-import one feed now.
    pub async fn sync_calendar(&self, sync_id: SyncId) -> Result<SyncReport> {
        self.reconciler.sync_at(sync_id, Utc::now()).await
    }

    /// Re-import one feed as of `now`, which also anchors the recurrence horizon.
    pub async fn sync_calendar_at(
        &self,
        sync_id: SyncId,
        now: chrono::DateTime<Utc>,
    ) -> Result<SyncReport> {
        self.reconciler.sync_at(sync_id, now).await
    }

    /// Re-import every active feed. One failing feed does not stop the rest.
    pub async fn sync_all_active(&self) -> Vec<SyncOutcome> {
        let active = self.reconciler.registry().active();
        self.reconciler.sync_many(active, Utc::now()).await
    }

    /// Re-import every active feed of one property.
    pub async fn sync_property(&self, property_id: PropertyId) -> Vec<SyncOutcome> {
        let syncs = self
            .reconciler
            .registry()
            .active()
            .into_iter()
            .filter(|s| s.property_id == property_id)
            .collect();
        self.reconciler.sync_many(syncs, Utc::now()).await
    }

    /// Re-import the active feeds whose sync frequency has elapsed.
    pub async fn sync_due(&self) -> Vec<SyncOutcome> {
        let now = Utc::now();
        let due = self
            .reconciler
            .registry()
            .active()
            .into_iter()
            .filter(|s| s.is_due(now))
            .collect();
        self.reconciler.sync_many(due, now).await
    }
}
