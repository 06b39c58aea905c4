//! Error types for stay-engine operations.

use chrono::NaiveDate;
use thiserror::Error;

use crate::model::{BookingId, PropertyId, SyncId};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Property {property_id} is not available for dates {check_in}..{check_out}")]
    Unavailable {
        property_id: PropertyId,
        check_in: NaiveDate,
        check_out: NaiveDate,
    },

    #[error("Too many guests: {requested} requested, property allows {max}")]
    GuestLimit { requested: u32, max: u32 },

    #[error("Not the owner of property {0}")]
    NotOwner(PropertyId),

    #[error("Not allowed to act on booking {0}")]
    Forbidden(BookingId),

    #[error("Booking {booking_id} is {status}, cannot {action}")]
    InvalidTransition {
        booking_id: BookingId,
        status: String,
        action: &'static str,
    },

    #[error("Property not found: {0}")]
    PropertyNotFound(PropertyId),

    #[error("Booking not found: {0}")]
    BookingNotFound(BookingId),

    #[error("External sync not found: {0}")]
    SyncNotFound(SyncId),

    #[error("Calendar of property {0} is busy, retry later")]
    Contended(PropertyId),

    #[error("Feed fetch failed: {0}")]
    ExternalFetch(String),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

impl EngineError {
    /// True for failures of the external feed that leave the calendar untouched
    /// and are retried on the next scheduled run.
    pub fn is_recoverable_sync_failure(&self) -> bool {
        matches!(
            self,
            EngineError::ExternalFetch(_) | EngineError::Parse(_) | EngineError::Contended(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
