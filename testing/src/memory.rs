//! In-memory storage engine.
//!
//! Implements the exact transactional semantics of the production engine so
//! concurrency scenarios can run deterministically in-process:
//!
//! - one `tokio::sync::Mutex` per stock id plays the role of the row lock;
//!   acquisition waits at most the configured timeout and then fails with
//!   the retryable [`StoreError::StockLocked`];
//! - a unit of work stages its writes privately and applies them to the
//!   shared state in one step on `commit`; dropping it without committing
//!   discards the staged writes and releases the held locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use encore_core::store::{BookingStore, StoreError, UnitOfWork};
use encore_core::{Booking, BookingId, BookingToken, Offer, StockId, StockUnit, User, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

/// Shared mutable state behind the engine.
#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, User>,
    stocks: HashMap<StockId, StockUnit>,
    bookings: HashMap<BookingId, Booking>,
    payments: HashSet<BookingId>,
}

#[derive(Debug)]
struct Inner {
    state: RwLock<State>,
    /// One async mutex per stock id; the owned guard is the row lock.
    locks: Mutex<HashMap<StockId, Arc<tokio::sync::Mutex<()>>>>,
    lock_timeout: Duration,
}

/// Deterministic in-memory storage engine.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Default bounded wait for the per-stock lock.
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates an empty store with the default lock timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lock_timeout(Self::DEFAULT_LOCK_TIMEOUT)
    }

    /// Creates an empty store with a custom lock timeout (tests exercising
    /// contention want it short).
    #[must_use]
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                locks: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }

    /// Inserts or replaces a user. Seeding helper; registration is not part
    /// of the reservation core.
    pub fn upsert_user(&self, user: User) {
        let mut state = self.write_state();
        state.users.insert(user.id, user);
    }

    /// Inserts or replaces a stock unit. Seeding helper; catalog import is
    /// not part of the reservation core.
    pub fn upsert_stock(&self, stock: StockUnit) {
        let mut state = self.write_state();
        state.stocks.insert(stock.id, stock);
    }

    /// Records a payment referencing a booking, as the payment export would.
    pub fn add_payment(&self, booking_id: BookingId) {
        let mut state = self.write_state();
        state.payments.insert(booking_id);
    }

    /// Reads the current committed state of a stock unit.
    #[must_use]
    pub fn stock_snapshot(&self, id: StockId) -> Option<StockUnit> {
        self.read_state().stocks.get(&id).cloned()
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Ok(Box::new(MemoryUnitOfWork {
            inner: Arc::clone(&self.inner),
            guards: HashMap::new(),
            staged_stocks: HashMap::new(),
            staged_bookings: HashMap::new(),
        }))
    }

    async fn get_user(&self, id: UserId) -> Result<User, StoreError> {
        self.read_state()
            .users
            .get(&id)
            .cloned()
            .ok_or(StoreError::UserNotFound(id))
    }

    async fn find_booking(&self, id: BookingId) -> Result<Booking, StoreError> {
        self.read_state()
            .bookings
            .get(&id)
            .cloned()
            .ok_or(StoreError::BookingNotFound(id))
    }

    async fn user_bookings(&self, id: UserId) -> Result<Vec<(Booking, Offer)>, StoreError> {
        let state = self.read_state();
        state
            .bookings
            .values()
            .filter(|booking| booking.user_id == id)
            .map(|booking| {
                state
                    .stocks
                    .get(&booking.stock_id)
                    .map(|stock| (booking.clone(), stock.offer.clone()))
                    .ok_or_else(|| {
                        StoreError::Backend(format!(
                            "booking {} references missing stock {}",
                            booking.id, booking.stock_id
                        ))
                    })
            })
            .collect()
    }

    async fn token_exists(&self, token: &BookingToken) -> Result<bool, StoreError> {
        Ok(self
            .read_state()
            .bookings
            .values()
            .any(|booking| booking.token == *token))
    }

    async fn payment_exists(&self, id: BookingId) -> Result<bool, StoreError> {
        Ok(self.read_state().payments.contains(&id))
    }

    async fn expired_booking_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError> {
        let state = self.read_state();
        Ok(state
            .bookings
            .values()
            .filter(|booking| booking.is_active() && booking.created_at < cutoff)
            .filter(|booking| {
                state
                    .stocks
                    .get(&booking.stock_id)
                    .is_some_and(|stock| stock.offer.can_expire)
            })
            .cloned()
            .collect())
    }
}

/// One in-memory transaction: held row locks plus staged writes.
struct MemoryUnitOfWork {
    inner: Arc<Inner>,
    guards: HashMap<StockId, OwnedMutexGuard<()>>,
    staged_stocks: HashMap<StockId, StockUnit>,
    staged_bookings: HashMap<BookingId, Booking>,
}

impl MemoryUnitOfWork {
    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_handle(&self, id: StockId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.inner.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id).or_default())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_stock(&mut self, id: StockId) -> Result<StockUnit, StoreError> {
        if !self.guards.contains_key(&id) {
            // Clone the handle out of the map first: the map mutex must not
            // be held across the await below.
            let handle = self.lock_handle(id);
            let guard = tokio::time::timeout(self.inner.lock_timeout, handle.lock_owned())
                .await
                .map_err(|_| StoreError::StockLocked(id))?;
            self.guards.insert(id, guard);
        }

        if let Some(staged) = self.staged_stocks.get(&id) {
            return Ok(staged.clone());
        }
        self.read_state()
            .stocks
            .get(&id)
            .cloned()
            .ok_or(StoreError::StockNotFound(id))
    }

    async fn get_booking(&mut self, id: BookingId) -> Result<Booking, StoreError> {
        if let Some(staged) = self.staged_bookings.get(&id) {
            return Ok(staged.clone());
        }
        self.read_state()
            .bookings
            .get(&id)
            .cloned()
            .ok_or(StoreError::BookingNotFound(id))
    }

    async fn bookings_for_stock(&mut self, id: StockId) -> Result<Vec<Booking>, StoreError> {
        let mut by_id: HashMap<BookingId, Booking> = self
            .read_state()
            .bookings
            .values()
            .filter(|booking| booking.stock_id == id)
            .map(|booking| (booking.id, booking.clone()))
            .collect();
        for staged in self.staged_bookings.values() {
            if staged.stock_id == id {
                by_id.insert(staged.id, staged.clone());
            }
        }
        Ok(by_id.into_values().collect())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        self.staged_bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        self.staged_bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn update_stock(&mut self, stock: &StockUnit) -> Result<(), StoreError> {
        if !self.guards.contains_key(&stock.id) {
            return Err(StoreError::Backend(format!(
                "stock {} updated without holding its row lock",
                stock.id
            )));
        }
        self.staged_stocks.insert(stock.id, stock.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut state = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
        for (id, stock) in &self.staged_stocks {
            state.stocks.insert(*id, stock.clone());
        }
        for (id, booking) in &self.staged_bookings {
            state.bookings.insert(*id, booking.clone());
        }
        // guards drop with self, releasing the row locks after the writes
        // became visible
        Ok(())
    }
}
