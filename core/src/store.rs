//! Storage contracts for the reservation core.
//!
//! The storage layer is the single source of truth for "how much of this
//! stock unit is committed", and the stock row lock it hands out is the only
//! serialization point in the system. Keeping the lock at the storage layer
//! (rather than in an in-process mutex) is what lets the invariant hold
//! across several service instances sharing one database.
//!
//! # Design
//!
//! Two traits split reads from transactional writes:
//!
//! - [`BookingStore`] serves lock-free reads (user, booking history, token
//!   and payment probes) and opens units of work;
//! - [`UnitOfWork`] is one transaction: it acquires the per-stock row lock,
//!   stages writes, and either commits atomically or discards everything
//!   when dropped.
//!
//! # Implementations
//!
//! - `PostgresStore` (in `encore-postgres`): production engine, `SELECT …
//!   FOR UPDATE` inside a database transaction.
//! - `MemoryStore` (in `encore-testing`): deterministic engine, per-stock
//!   async mutex plus staged writes, for fast tests.
//!
//! # Dyn compatibility
//!
//! Both traits use `async_trait` so the service can hold `Arc<dyn
//! BookingStore>` and move `Box<dyn UnitOfWork>` values around; `commit`
//! consumes the box so a committed unit of work cannot be reused.

use crate::booking::Booking;
use crate::offer::Offer;
use crate::spend::User;
use crate::stock::StockUnit;
use crate::token::BookingToken;
use crate::types::{BookingId, StockId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced by storage engines.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The stock row lock was not acquired within the bounded wait.
    /// Retryable by the caller.
    #[error("stock {0} is locked by another transaction")]
    StockLocked(StockId),

    /// No stock unit with this id.
    #[error("stock not found: {0}")]
    StockNotFound(StockId),

    /// No booking with this id.
    #[error("booking not found: {0}")]
    BookingNotFound(BookingId),

    /// No user with this id.
    #[error("user not found: {0}")]
    UserNotFound(UserId),

    /// The engine itself failed (connectivity, corrupt row, ...).
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Read side of the store, plus the transaction factory.
///
/// All reads here run without any lock; the spend computation deliberately
/// tolerates reading slightly stale booking history (the ceilings are soft
/// limits, the stock counter is the hard one).
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Opens a unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when a transaction cannot be opened.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    /// Loads a user.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UserNotFound`] for an unknown id.
    async fn get_user(&self, id: UserId) -> Result<User, StoreError>;

    /// Loads a booking.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BookingNotFound`] for an unknown id.
    async fn find_booking(&self, id: BookingId) -> Result<Booking, StoreError>;

    /// All bookings of a user, each with its offer (for spend classification
    /// and duplicate checks).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on engine failure.
    async fn user_bookings(&self, id: UserId) -> Result<Vec<(Booking, Offer)>, StoreError>;

    /// Whether any booking already carries this redemption token.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on engine failure.
    async fn token_exists(&self, token: &BookingToken) -> Result<bool, StoreError>;

    /// Whether a payment record references the booking.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on engine failure.
    async fn payment_exists(&self, id: BookingId) -> Result<bool, StoreError>;

    /// Active bookings created before `cutoff` whose offer can expire.
    /// Feed of the expiry sweep.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on engine failure.
    async fn expired_booking_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError>;
}

/// One transaction against the store.
///
/// Dropping a unit of work without calling [`UnitOfWork::commit`] rolls back
/// every staged write and releases every held row lock.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Acquires the exclusive row lock on a stock unit and returns its
    /// current state.
    ///
    /// Blocks while another unit of work holds the same row, up to the
    /// engine's bounded wait. This is the sole serialization point that
    /// prevents oversell.
    ///
    /// # Errors
    ///
    /// - [`StoreError::StockLocked`] when the bounded wait elapses
    ///   (retryable).
    /// - [`StoreError::StockNotFound`] for an unknown id.
    async fn lock_stock(&mut self, id: StockId) -> Result<StockUnit, StoreError>;

    /// Reads a booking inside this transaction (sees staged writes).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BookingNotFound`] for an unknown id.
    async fn get_booking(&mut self, id: BookingId) -> Result<Booking, StoreError>;

    /// All bookings referencing a stock unit, staged writes included.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on engine failure.
    async fn bookings_for_stock(&mut self, id: StockId) -> Result<Vec<Booking>, StoreError>;

    /// Stages a new booking row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on engine failure.
    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError>;

    /// Stages an update of an existing booking row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on engine failure.
    async fn update_booking(&mut self, booking: &Booking) -> Result<(), StoreError>;

    /// Stages an update of a stock row (the reserved counter).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on engine failure.
    async fn update_stock(&mut self, stock: &StockUnit) -> Result<(), StoreError>;

    /// Commits every staged write atomically and releases the held locks.
    /// This is the instant the reservation becomes visible to others.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when the commit fails; nothing is
    /// applied in that case.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
