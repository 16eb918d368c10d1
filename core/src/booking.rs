//! The booking entity and its lifecycle state machine.
//!
//! A booking is exactly one of `Active`, `Used` or `Cancelled`; the state is
//! a tagged union so that an impossible combination (used *and* cancelled)
//! cannot be represented. `Used` may revert to `Active` through the explicit
//! un-use and un-cancel paths only.
//!
//! ```text
//!            cancel(actor)
//!   Active ────────────────► Cancelled
//!     │  ▲                      │
//!     │  │ mark_unused          │ uncancel (mark_used with reversal)
//!     ▼  │                      ▼
//!    Used ◄──────────────── Active
//! ```

use crate::error::BookingError;
use crate::stock::StockUnit;
use crate::token::BookingToken;
use crate::types::{BookingId, Money, OfferId, StockId, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Cancellation vocabulary
// ============================================================================

/// Recorded reason of a cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancellationReason {
    /// The beneficiary cancelled within their window.
    Beneficiary,
    /// The offerer withdrew the stock or refused the booking.
    Offerer,
    /// The booking expired unredeemed.
    Expired,
    /// Cancelled by the fraud team.
    Fraud,
}

impl CancellationReason {
    /// Stable storage name of the reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Beneficiary => "beneficiary",
            Self::Offerer => "offerer",
            Self::Expired => "expired",
            Self::Fraud => "fraud",
        }
    }
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown cancellation reason.
#[derive(Debug, Error)]
#[error("unknown cancellation reason: {0}")]
pub struct ParseReasonError(String);

impl FromStr for CancellationReason {
    type Err = ParseReasonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "beneficiary" => Ok(Self::Beneficiary),
            "offerer" => Ok(Self::Offerer),
            "expired" => Ok(Self::Expired),
            "fraud" => Ok(Self::Fraud),
            other => Err(ParseReasonError(other.to_string())),
        }
    }
}

/// Who is asking for a cancellation. The actor decides which conflicts are
/// errors and which are tolerated as retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancellationActor {
    /// The beneficiary themselves; bound by the confirmation window.
    Beneficiary,
    /// The offerer; retry-tolerant (cancelling twice is a no-op).
    Offerer,
    /// The fraud team; strict.
    Fraud,
}

impl CancellationActor {
    /// The reason recorded when this actor cancels.
    #[must_use]
    pub const fn reason(self) -> CancellationReason {
        match self {
            Self::Beneficiary => CancellationReason::Beneficiary,
            Self::Offerer => CancellationReason::Offerer,
            Self::Fraud => CancellationReason::Fraud,
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// Lifecycle state of a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingState {
    /// Live reservation holding stock.
    Active,
    /// Redeemed with the counterpart.
    Used {
        /// When the booking was redeemed.
        used_at: DateTime<Utc>,
    },
    /// Cancelled; its quantity has been released back to the stock.
    Cancelled {
        /// When the cancellation happened.
        cancelled_at: DateTime<Utc>,
        /// Why it was cancelled.
        reason: CancellationReason,
    },
}

// ============================================================================
// Confirmation policy
// ============================================================================

/// Parameters of the confirmation-date computation.
#[derive(Clone, Copy, Debug)]
pub struct ConfirmationPolicy {
    /// How long before the event the booking locks in.
    pub lead_time: Duration,
    /// How long after creation the beneficiary keeps the right to cancel.
    pub grace_period: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            lead_time: Duration::hours(48),
            grace_period: Duration::hours(72),
        }
    }
}

/// Computes the instant after which a booking can no longer be self-cancelled
/// and becomes redeemable.
///
/// For event stock this is the earlier of "lead time before the event" and
/// "grace period after creation", clamped so it never precedes the creation
/// (or edit) instant itself. Non-event stock has no confirmation date: the
/// booking is immediately redeemable and stays self-cancellable until used.
#[must_use]
pub fn confirmation_date(
    event_start: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    policy: &ConfirmationPolicy,
) -> Option<DateTime<Utc>> {
    event_start.map(|start| {
        let candidate = (start - policy.lead_time).min(created_at + policy.grace_period);
        candidate.max(created_at)
    })
}

// ============================================================================
// Booking
// ============================================================================

/// A beneficiary's reservation against a stock unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Unique booking identifier.
    pub id: BookingId,
    /// Owning beneficiary.
    pub user_id: UserId,
    /// Stock unit the quantity is carved out of.
    pub stock_id: StockId,
    /// Parent offer, denormalized for duplicate checks and reindexing.
    pub offer_id: OfferId,
    /// Human-readable redemption token, unique across all bookings.
    pub token: BookingToken,
    /// Number of seats or copies (1, or 2 on duo offers).
    pub quantity: u32,
    /// Unit price snapshot taken at creation; later price edits do not
    /// affect existing bookings.
    pub amount: Money,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Instant after which self-cancellation closes; `None` for non-event
    /// stock.
    pub confirmation_date: Option<DateTime<Utc>>,
    /// Lifecycle state.
    pub state: BookingState,
}

impl Booking {
    /// Creates an `Active` booking against `stock`.
    ///
    /// Snapshots the unit price and computes the confirmation date. The
    /// caller is responsible for capacity and spend validation, and for
    /// reserving the quantity on the stock afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidQuantity`] when `quantity` is zero or
    /// exceeds what the offer's duo flag allows.
    pub fn create(
        user_id: UserId,
        stock: &StockUnit,
        quantity: u32,
        token: BookingToken,
        now: DateTime<Utc>,
        policy: &ConfirmationPolicy,
    ) -> Result<Self, BookingError> {
        let max = stock.offer.max_quantity_per_booking();
        if quantity == 0 || quantity > max {
            return Err(BookingError::InvalidQuantity {
                quantity,
                is_duo: stock.offer.is_duo,
            });
        }

        Ok(Self {
            id: BookingId::new(),
            user_id,
            stock_id: stock.id,
            offer_id: stock.offer.id,
            token,
            quantity,
            amount: stock.price,
            created_at: now,
            confirmation_date: confirmation_date(stock.event_start, now, policy),
            state: BookingState::Active,
        })
    }

    /// Total price of the booking (unit price × quantity).
    #[must_use]
    pub const fn total_amount(&self) -> Money {
        self.amount.saturating_mul(self.quantity)
    }

    /// Whether the self-cancellation window has closed.
    #[must_use]
    pub fn is_confirmed(&self, now: DateTime<Utc>) -> bool {
        self.confirmation_date.is_some_and(|date| date <= now)
    }

    /// Whether the booking is a live reservation.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, BookingState::Active)
    }

    /// Whether the booking has been redeemed.
    #[must_use]
    pub const fn is_used(&self) -> bool {
        matches!(self.state, BookingState::Used { .. })
    }

    /// Whether the booking has been cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.state, BookingState::Cancelled { .. })
    }

    /// Cancels the booking on behalf of `actor`.
    ///
    /// Returns `true` when the state actually transitioned — the caller must
    /// then release the quantity back to the stock. `Ok(false)` is the
    /// offerer-path retry: the booking was already cancelled and nothing
    /// must be released again.
    ///
    /// # Errors
    ///
    /// - [`BookingError::AlreadyUsed`] — a redeemed booking cannot be
    ///   cancelled by anyone.
    /// - [`BookingError::AlreadyCancelled`] — beneficiary and fraud paths
    ///   reject double cancellation.
    /// - [`BookingError::CannotCancelConfirmed`] — the beneficiary's window
    ///   has closed.
    pub fn cancel(
        &mut self,
        actor: CancellationActor,
        now: DateTime<Utc>,
    ) -> Result<bool, BookingError> {
        match self.state {
            BookingState::Used { .. } => Err(BookingError::AlreadyUsed),
            BookingState::Cancelled { .. } => match actor {
                CancellationActor::Offerer => Ok(false),
                CancellationActor::Beneficiary | CancellationActor::Fraud => {
                    Err(BookingError::AlreadyCancelled)
                }
            },
            BookingState::Active => {
                if actor == CancellationActor::Beneficiary {
                    if let Some(confirmed_on) = self.confirmation_date {
                        if confirmed_on <= now {
                            return Err(BookingError::CannotCancelConfirmed {
                                booked_at: self.created_at,
                                confirmation_date: confirmed_on,
                            });
                        }
                    }
                }
                self.state = BookingState::Cancelled {
                    cancelled_at: now,
                    reason: actor.reason(),
                };
                Ok(true)
            }
        }
    }

    /// Cancels an active booking unconditionally, recording `reason`.
    ///
    /// Used by the bulk paths (stock withdrawal, expiry sweep) where the
    /// per-actor conflict rules of [`Booking::cancel`] do not apply: a
    /// terminal booking is skipped silently so the sweep can be re-run.
    /// Returns `true` when the state transitioned — the caller must then
    /// release the quantity back to the stock.
    pub const fn force_cancel(&mut self, reason: CancellationReason, now: DateTime<Utc>) -> bool {
        match self.state {
            BookingState::Active => {
                self.state = BookingState::Cancelled {
                    cancelled_at: now,
                    reason,
                };
                true
            }
            BookingState::Used { .. } | BookingState::Cancelled { .. } => false,
        }
    }

    /// Redeems the booking. Returns `false` when it was already used (the
    /// counter-marking is retry-tolerant).
    ///
    /// # Errors
    ///
    /// - [`BookingError::AlreadyCancelled`] — a cancelled booking must be
    ///   un-cancelled (with stock re-reserved) first.
    /// - [`BookingError::NotYetConfirmed`] — event bookings cannot be
    ///   redeemed before their confirmation date; the error carries the
    ///   booking date and the earliest allowed validation date.
    pub fn mark_used(&mut self, now: DateTime<Utc>) -> Result<bool, BookingError> {
        match self.state {
            BookingState::Used { .. } => Ok(false),
            BookingState::Cancelled { .. } => Err(BookingError::AlreadyCancelled),
            BookingState::Active => {
                if let Some(confirmed_on) = self.confirmation_date {
                    if confirmed_on > now {
                        return Err(BookingError::NotYetConfirmed {
                            booked_at: self.created_at,
                            confirmation_date: confirmed_on,
                        });
                    }
                }
                self.state = BookingState::Used { used_at: now };
                Ok(true)
            }
        }
    }

    /// Reverts a redeemed booking to `Active`.
    ///
    /// The payment-record guard lives with the orchestrator, which consults
    /// the payment lookup before calling this.
    ///
    /// # Errors
    ///
    /// - [`BookingError::AlreadyCancelled`] — cancelled bookings have no
    ///   usage to revert.
    /// - [`BookingError::NotUsed`] — the booking was never redeemed.
    pub const fn mark_unused(&mut self) -> Result<(), BookingError> {
        match self.state {
            BookingState::Cancelled { .. } => Err(BookingError::AlreadyCancelled),
            BookingState::Active => Err(BookingError::NotUsed),
            BookingState::Used { .. } => {
                self.state = BookingState::Active;
                Ok(())
            }
        }
    }

    /// Reverses a cancellation back to `Active`, so the booking can be
    /// redeemed after all. The caller must re-reserve the quantity on the
    /// stock under the row lock before committing.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::AlreadyUsed`] when the booking is redeemed;
    /// an already-active booking is left untouched.
    pub const fn uncancel(&mut self) -> Result<(), BookingError> {
        match self.state {
            BookingState::Used { .. } => Err(BookingError::AlreadyUsed),
            BookingState::Active => Ok(()),
            BookingState::Cancelled { .. } => {
                self.state = BookingState::Active;
                Ok(())
            }
        }
    }
}
