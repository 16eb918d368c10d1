//! Caller-facing error taxonomy for reservation operations.
//!
//! Every failure a caller can act on is a distinct variant carrying the
//! context needed to render a precise message (the relevant ceiling, the
//! dates framing a confirmation window, the remaining capacity). Validation
//! failures always abort the enclosing unit of work before anything is
//! committed; only [`BookingError::StockLocked`] is worth retrying.

use crate::store::StoreError;
use crate::types::{BookingId, Money, StockId, UserId};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Why a stock unit refused a reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum NotBookableReason {
    /// The stock unit was soft-deleted by its offerer.
    #[error("the stock has been withdrawn")]
    Deleted,
    /// The booking-limit deadline has passed.
    #[error("the booking window has closed")]
    BookingWindowClosed,
    /// The underlying event already took place.
    #[error("the event has already taken place")]
    EventInPast,
    /// The offer is unpublished.
    #[error("the offer is inactive")]
    OfferInactive,
    /// The venue has not been validated.
    #[error("the venue has not been validated")]
    VenueNotValidated,
    /// The managing organization has not been validated.
    #[error("the offerer has not been validated")]
    OffererNotValidated,
    /// Not enough units left for the requested quantity.
    #[error("only {remaining} unit(s) left")]
    SoldOut {
        /// Units still available on the stock.
        remaining: u32,
    },
}

/// Errors surfaced by reservation operations.
#[derive(Debug, Error)]
pub enum BookingError {
    /// The user may not book free offers.
    #[error("this user is not allowed to book free offers")]
    NotEligibleToBookFree,

    /// The identity/fraud gate refused the user.
    #[error("this user is not eligible to book")]
    NotEligible,

    /// The user already holds an active booking on the same offer.
    #[error("this offer has already been booked by the user")]
    AlreadyBooked,

    /// The stock unit cannot be booked in its current state.
    #[error("the stock is not bookable: {reason}")]
    StockNotBookable {
        /// Why the stock refused the reservation.
        reason: NotBookableReason,
    },

    /// The requested quantity violates the duo rule.
    #[error("quantity {quantity} is not allowed for this offer (duo: {is_duo})")]
    InvalidQuantity {
        /// Requested quantity.
        quantity: u32,
        /// Whether the offer accepts two-seat bookings.
        is_duo: bool,
    },

    /// The overall credit would be exceeded.
    #[error("insufficient credit: the overall ceiling of {cap} would be exceeded")]
    InsufficientFunds {
        /// The overall ceiling.
        cap: Money,
    },

    /// The physical-goods ceiling would be exceeded.
    #[error("the physical-goods ceiling of {cap} would be exceeded")]
    PhysicalCapReached {
        /// The physical-goods ceiling.
        cap: Money,
    },

    /// The digital-goods ceiling would be exceeded.
    #[error("the digital-goods ceiling of {cap} would be exceeded")]
    DigitalCapReached {
        /// The digital-goods ceiling.
        cap: Money,
    },

    /// The booking has already been redeemed.
    #[error("the booking has already been used")]
    AlreadyUsed,

    /// The booking has already been cancelled.
    #[error("the booking has already been cancelled")]
    AlreadyCancelled,

    /// The self-cancellation window has closed.
    #[error(
        "the booking made on {booked_at} was confirmed on {confirmation_date} \
         and can no longer be cancelled by the beneficiary"
    )]
    CannotCancelConfirmed {
        /// When the booking was created.
        booked_at: DateTime<Utc>,
        /// When the booking became confirmed.
        confirmation_date: DateTime<Utc>,
    },

    /// The booking cannot be redeemed before its confirmation date.
    #[error("the booking made on {booked_at} can only be validated from {confirmation_date}")]
    NotYetConfirmed {
        /// When the booking was created.
        booked_at: DateTime<Utc>,
        /// Earliest allowed validation date.
        confirmation_date: DateTime<Utc>,
    },

    /// The booking has not been redeemed.
    #[error("the booking has not been used")]
    NotUsed,

    /// A payment already references the booking; un-use is irreversible.
    #[error("a payment has been issued for this booking")]
    PaymentInProgress,

    /// The stock row is held by a concurrent request. Retryable.
    #[error("stock {0} is locked by a concurrent request, retry later")]
    StockLocked(StockId),

    /// No booking with this id.
    #[error("booking not found: {0}")]
    BookingNotFound(BookingId),

    /// No stock unit with this id.
    #[error("stock not found: {0}")]
    StockNotFound(StockId),

    /// No user with this id.
    #[error("user not found: {0}")]
    UserNotFound(UserId),

    /// The storage backend failed.
    #[error(transparent)]
    Store(StoreError),
}

impl BookingError {
    /// Whether the caller may retry the operation as-is (with backoff).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StockLocked(_))
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::StockLocked(id) => Self::StockLocked(id),
            StoreError::StockNotFound(id) => Self::StockNotFound(id),
            StoreError::BookingNotFound(id) => Self::BookingNotFound(id),
            StoreError::UserNotFound(id) => Self::UserNotFound(id),
            other @ StoreError::Backend(_) => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_keep_their_kind() {
        let id = StockId::new();
        assert!(matches!(
            BookingError::from(StoreError::StockLocked(id)),
            BookingError::StockLocked(got) if got == id
        ));
        assert!(matches!(
            BookingError::from(StoreError::Backend("boom".to_string())),
            BookingError::Store(_)
        ));
    }

    #[test]
    fn only_lock_contention_is_retryable() {
        assert!(BookingError::StockLocked(StockId::new()).is_retryable());
        assert!(!BookingError::AlreadyUsed.is_retryable());
        assert!(!BookingError::NotEligible.is_retryable());
    }
}
