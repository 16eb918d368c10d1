//! The reservation orchestrator.
//!
//! Every operation is one unit of work against the store: acquire the stock
//! row lock where stock moves, validate, apply the state machine, commit.
//! The commit is the instant a change becomes visible; everything before it
//! rolls back on failure with no side effects. Notifications and search
//! reindexing run after the commit and never affect the outcome.

use crate::config::BookingConfig;
use crate::gateways::{
    ApproveAll, EligibilityGate, LoggingNotifier, NoopSearchIndex, NotificationGateway,
    SearchIndexQueue,
};
use encore_core::store::{BookingStore, StoreError, UnitOfWork};
use encore_core::{
    Booking, BookingError, BookingId, BookingToken, CancellationActor, CancellationReason, Clock,
    NotBookableReason, Offer, OfferId, SpendItem, SpendSnapshot, StockId, StockUnit, UserId,
    generate_token,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Attempts at drawing an unused redemption token before giving up. With a
/// 31-symbol alphabet over 6 characters, hitting this bound means the token
/// space is effectively exhausted.
const MAX_TOKEN_ATTEMPTS: u32 = 16;

/// Orchestrates reservations over a storage engine and the external
/// gateways.
///
/// Cloning is cheap; all dependencies sit behind `Arc`.
#[derive(Clone)]
pub struct ReservationService {
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
    eligibility: Arc<dyn EligibilityGate>,
    notifier: Arc<dyn NotificationGateway>,
    search_index: Arc<dyn SearchIndexQueue>,
    config: BookingConfig,
}

impl ReservationService {
    /// Creates a service with default gateways (approve-all eligibility,
    /// logging notifier, no-op search queue).
    #[must_use]
    pub fn new(store: Arc<dyn BookingStore>, clock: Arc<dyn Clock>, config: BookingConfig) -> Self {
        Self {
            store,
            clock,
            eligibility: Arc::new(ApproveAll),
            notifier: Arc::new(LoggingNotifier),
            search_index: Arc::new(NoopSearchIndex),
            config,
        }
    }

    /// Replaces the eligibility gate.
    #[must_use]
    pub fn with_eligibility_gate(mut self, gate: Arc<dyn EligibilityGate>) -> Self {
        self.eligibility = gate;
        self
    }

    /// Replaces the notification gateway.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationGateway>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replaces the search-index queue.
    #[must_use]
    pub fn with_search_index(mut self, search_index: Arc<dyn SearchIndexQueue>) -> Self {
        self.search_index = search_index;
        self
    }

    // ========================================================================
    // Booking
    // ========================================================================

    /// Reserves `quantity` units of a stock for a user.
    ///
    /// # Errors
    ///
    /// The full taxonomy applies: eligibility (`NotEligible`,
    /// `NotEligibleToBookFree`), availability (`AlreadyBooked`,
    /// `StockNotBookable`, `InvalidQuantity`), budget (`InsufficientFunds`,
    /// `PhysicalCapReached`, `DigitalCapReached`), concurrency
    /// (`StockLocked`, retryable) and lookups (`UserNotFound`,
    /// `StockNotFound`). Any failure aborts the unit of work with no side
    /// effects.
    pub async fn book(
        &self,
        user_id: UserId,
        stock_id: StockId,
        quantity: u32,
    ) -> Result<Booking, BookingError> {
        let user = self.store.get_user(user_id).await?;
        if !self.eligibility.is_eligible_to_book(user_id).await {
            return Err(BookingError::NotEligible);
        }

        // One lock-free read feeds both the duplicate check and the spend
        // ceilings. The ceilings tolerate racing a concurrent booking by the
        // same user; the stock counter below does not race, it is only read
        // and written under the row lock.
        let history = self.store.user_bookings(user_id).await?;

        let mut uow = self.store.begin().await?;
        let mut stock = uow.lock_stock(stock_id).await?;
        let now = self.clock.now();

        if stock.price.is_zero() && !user.can_book_free_offers {
            return Err(BookingError::NotEligibleToBookFree);
        }
        if history
            .iter()
            .any(|(booking, _)| booking.offer_id == stock.offer.id && !booking.is_cancelled())
        {
            return Err(BookingError::AlreadyBooked);
        }
        if quantity == 0 || quantity > stock.offer.max_quantity_per_booking() {
            return Err(BookingError::InvalidQuantity {
                quantity,
                is_duo: stock.offer.is_duo,
            });
        }
        stock.check_bookable(now)?;
        if !stock.has_capacity(quantity) {
            return Err(sold_out(&stock));
        }

        let snapshot = Self::snapshot(&user.deposit, &history);
        snapshot.check_can_afford(stock.price.saturating_mul(quantity), stock.offer.cap_bucket())?;

        let token = self.unique_token().await?;
        let mut booking = Booking::create(
            user_id,
            &stock,
            quantity,
            token,
            now,
            &self.config.confirmation_policy(),
        )?;
        if stock.offer.is_digital && self.config.auto_activate_digital {
            // digital stock has no event schedule, so no confirmation gate
            booking.mark_used(now)?;
        }

        stock.reserve(quantity);
        uow.insert_booking(&booking).await?;
        uow.update_stock(&stock).await?;
        uow.commit().await?;

        info!(
            booking = %booking.id,
            token = %booking.token,
            stock = %stock_id,
            user = %user_id,
            quantity,
            "booking created"
        );
        self.notify_created(&booking).await;
        self.reindex(booking.offer_id).await;
        Ok(booking)
    }

    /// The user's current spend position, for display surfaces.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` for an unknown user, or a storage error.
    pub async fn spend_for_user(&self, user_id: UserId) -> Result<SpendSnapshot, BookingError> {
        let user = self.store.get_user(user_id).await?;
        let history = self.store.user_bookings(user_id).await?;
        Ok(Self::snapshot(&user.deposit, &history))
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancels a booking on behalf of its beneficiary.
    ///
    /// # Errors
    ///
    /// `BookingNotFound` for an unknown id or a booking owned by someone
    /// else; `AlreadyUsed`, `AlreadyCancelled` or `CannotCancelConfirmed`
    /// on lifecycle conflicts; `StockLocked` under contention.
    pub async fn cancel(&self, user_id: UserId, booking_id: BookingId) -> Result<(), BookingError> {
        self.cancel_with_actor(booking_id, CancellationActor::Beneficiary, Some(user_id))
            .await
            .map(|_| ())
    }

    /// Cancels a booking on behalf of the offerer. Retry-tolerant: an
    /// already-cancelled booking is a silent no-op and stock is never
    /// released twice.
    ///
    /// # Errors
    ///
    /// `BookingNotFound` for an unknown id; `AlreadyUsed` when the booking
    /// was redeemed; `StockLocked` under contention.
    pub async fn cancel_by_offerer(&self, booking_id: BookingId) -> Result<(), BookingError> {
        self.cancel_with_actor(booking_id, CancellationActor::Offerer, None)
            .await
            .map(|_| ())
    }

    /// Cancels a booking on behalf of the fraud team.
    ///
    /// # Errors
    ///
    /// `BookingNotFound` for an unknown id; `AlreadyUsed` or
    /// `AlreadyCancelled` on lifecycle conflicts; `StockLocked` under
    /// contention.
    pub async fn cancel_for_fraud(&self, booking_id: BookingId) -> Result<(), BookingError> {
        self.cancel_with_actor(booking_id, CancellationActor::Fraud, None)
            .await
            .map(|_| ())
    }

    async fn cancel_with_actor(
        &self,
        booking_id: BookingId,
        actor: CancellationActor,
        requester: Option<UserId>,
    ) -> Result<Option<Booking>, BookingError> {
        let known = self.store.find_booking(booking_id).await?;
        if let Some(user_id) = requester {
            if known.user_id != user_id {
                // a foreign booking id must not leak existence
                return Err(BookingError::BookingNotFound(booking_id));
            }
        }

        let mut uow = self.store.begin().await?;
        let mut stock = uow.lock_stock(known.stock_id).await?;
        let mut booking = uow.get_booking(booking_id).await?;
        let now = self.clock.now();

        if !booking.cancel(actor, now)? {
            // offerer retry on an already-cancelled booking: nothing to
            // release, nothing to notify
            return Ok(None);
        }

        stock.release(booking.quantity);
        uow.update_booking(&booking).await?;
        uow.update_stock(&stock).await?;
        uow.commit().await?;

        let reason = actor.reason();
        info!(booking = %booking.id, stock = %stock.id, %reason, "booking cancelled");
        self.notify_cancelled(&booking, reason).await;
        self.reindex(booking.offer_id).await;
        Ok(Some(booking))
    }

    /// Bulk-cancels every active booking on a stock unit, e.g. when the
    /// offerer withdraws it. Returns the cancelled bookings for downstream
    /// notification; redeemed and already-cancelled bookings are left
    /// untouched.
    ///
    /// # Errors
    ///
    /// `StockNotFound` for an unknown stock; `StockLocked` under
    /// contention.
    pub async fn cancel_all_for_stock(
        &self,
        stock_id: StockId,
        reason: CancellationReason,
    ) -> Result<Vec<Booking>, BookingError> {
        let mut uow = self.store.begin().await?;
        let mut stock = uow.lock_stock(stock_id).await?;
        let now = self.clock.now();

        let mut cancelled = Vec::new();
        let mut released: u32 = 0;
        for mut booking in uow.bookings_for_stock(stock_id).await? {
            if booking.force_cancel(reason, now) {
                released = released.saturating_add(booking.quantity);
                uow.update_booking(&booking).await?;
                cancelled.push(booking);
            }
        }

        if cancelled.is_empty() {
            return Ok(cancelled);
        }

        stock.release(released);
        uow.update_stock(&stock).await?;
        uow.commit().await?;

        info!(
            stock = %stock_id,
            count = cancelled.len(),
            released,
            %reason,
            "bookings cancelled for stock withdrawal"
        );
        for booking in &cancelled {
            self.notify_cancelled(booking, reason).await;
        }
        self.reindex(stock.offer.id).await;
        Ok(cancelled)
    }

    /// Expiry sweep: cancels unredeemed bookings on expirable offers that
    /// outlived the configured TTL. Locks and commits per booking so the
    /// sweep never holds a lock across the whole fan-out. Returns the
    /// expired bookings.
    ///
    /// # Errors
    ///
    /// Storage errors only; individual lock contention skips the booking
    /// (the next sweep will catch it).
    pub async fn cancel_expired_bookings(&self) -> Result<Vec<Booking>, BookingError> {
        let now = self.clock.now();
        let cutoff = now - self.config.booking_ttl();
        let candidates = self.store.expired_booking_candidates(cutoff).await?;

        let mut expired = Vec::new();
        for candidate in candidates {
            let mut uow = self.store.begin().await?;
            let mut stock = match uow.lock_stock(candidate.stock_id).await {
                Ok(stock) => stock,
                Err(StoreError::StockLocked(id)) => {
                    warn!(stock = %id, booking = %candidate.id, "expiry sweep skipped a contended stock");
                    continue;
                }
                Err(other) => return Err(other.into()),
            };
            let mut booking = uow.get_booking(candidate.id).await?;

            // re-check under the lock: the booking may have been redeemed or
            // cancelled since the candidate list was read
            if !booking.force_cancel(CancellationReason::Expired, now) {
                continue;
            }

            stock.release(booking.quantity);
            uow.update_booking(&booking).await?;
            uow.update_stock(&stock).await?;
            uow.commit().await?;

            info!(booking = %booking.id, stock = %stock.id, "booking expired");
            self.notify_cancelled(&booking, CancellationReason::Expired).await;
            self.reindex(booking.offer_id).await;
            expired.push(booking);
        }
        Ok(expired)
    }

    // ========================================================================
    // Redemption
    // ========================================================================

    /// Marks a booking used (redeemed at the venue). Already-used bookings
    /// are a no-op. With `allow_uncancel`, a cancelled booking is revived
    /// first: its quantity is re-reserved under the stock row lock, subject
    /// to remaining capacity.
    ///
    /// # Errors
    ///
    /// `BookingNotFound`; `AlreadyCancelled` (without `allow_uncancel`);
    /// `NotYetConfirmed` for event bookings before their confirmation date;
    /// `StockNotBookable { SoldOut }` when the reversal no longer fits;
    /// `StockLocked` under contention.
    pub async fn mark_used(
        &self,
        booking_id: BookingId,
        allow_uncancel: bool,
    ) -> Result<Booking, BookingError> {
        let known = self.store.find_booking(booking_id).await?;
        let now = self.clock.now();

        if known.is_cancelled() {
            if !allow_uncancel {
                return Err(BookingError::AlreadyCancelled);
            }
            return self.revive_and_mark_used(known.stock_id, booking_id, now).await;
        }

        // no stock moves: a lighter transaction without the row lock
        let mut uow = self.store.begin().await?;
        let mut booking = uow.get_booking(booking_id).await?;
        if booking.mark_used(now)? {
            uow.update_booking(&booking).await?;
            uow.commit().await?;
            info!(booking = %booking.id, token = %booking.token, "booking marked used");
        }
        Ok(booking)
    }

    async fn revive_and_mark_used(
        &self,
        stock_id: StockId,
        booking_id: BookingId,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Booking, BookingError> {
        let mut uow = self.store.begin().await?;
        let mut stock = uow.lock_stock(stock_id).await?;
        let mut booking = uow.get_booking(booking_id).await?;

        if booking.is_cancelled() {
            if !stock.has_capacity(booking.quantity) {
                return Err(sold_out(&stock));
            }
            booking.uncancel()?;
            stock.reserve(booking.quantity);
            uow.update_stock(&stock).await?;
        }
        booking.mark_used(now)?;
        uow.update_booking(&booking).await?;
        uow.commit().await?;

        info!(
            booking = %booking.id,
            stock = %stock.id,
            "cancelled booking revived and marked used"
        );
        Ok(booking)
    }

    /// Reverts a redeemed booking to active, e.g. after a counter-marking
    /// mistake. Refused once a payment record references the booking.
    ///
    /// # Errors
    ///
    /// `BookingNotFound`; `AlreadyCancelled`; `NotUsed`;
    /// `PaymentInProgress` once money has moved.
    pub async fn mark_unused(&self, booking_id: BookingId) -> Result<Booking, BookingError> {
        let known = self.store.find_booking(booking_id).await?;
        if known.is_cancelled() {
            return Err(BookingError::AlreadyCancelled);
        }
        if !known.is_used() {
            return Err(BookingError::NotUsed);
        }
        if self.store.payment_exists(booking_id).await? {
            return Err(BookingError::PaymentInProgress);
        }

        let mut uow = self.store.begin().await?;
        let mut booking = uow.get_booking(booking_id).await?;
        booking.mark_unused()?;
        uow.update_booking(&booking).await?;
        uow.commit().await?;

        info!(booking = %booking.id, "booking marked unused");
        Ok(booking)
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Recomputes `reserved_quantity` from the authoritative sum of
    /// non-cancelled booking quantities, one stock unit at a time. Drift
    /// repair for operators, not a hot-path operation.
    ///
    /// # Errors
    ///
    /// `StockNotFound` for an unknown id; `StockLocked` under contention;
    /// storage errors.
    pub async fn recompute_reserved(&self, stock_ids: &[StockId]) -> Result<(), BookingError> {
        for &stock_id in stock_ids {
            let mut uow = self.store.begin().await?;
            let mut stock = uow.lock_stock(stock_id).await?;
            let committed: u32 = uow
                .bookings_for_stock(stock_id)
                .await?
                .iter()
                .filter(|booking| !booking.is_cancelled())
                .map(|booking| booking.quantity)
                .sum();

            if committed != stock.reserved_quantity {
                warn!(
                    stock = %stock_id,
                    stored = stock.reserved_quantity,
                    committed,
                    "reserved counter drift repaired"
                );
                stock.reserved_quantity = committed;
                uow.update_stock(&stock).await?;
                uow.commit().await?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn snapshot(deposit: &encore_core::Deposit, history: &[(Booking, Offer)]) -> SpendSnapshot {
        SpendSnapshot::compute(
            deposit,
            history
                .iter()
                .filter(|(booking, _)| !booking.is_cancelled())
                .map(|(booking, offer)| SpendItem {
                    amount: booking.total_amount(),
                    bucket: offer.cap_bucket(),
                }),
        )
    }

    async fn unique_token(&self) -> Result<BookingToken, BookingError> {
        for _ in 0..MAX_TOKEN_ATTEMPTS {
            let candidate = {
                let mut rng = rand::thread_rng();
                generate_token(&mut rng)
            };
            if !self.store.token_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(BookingError::Store(StoreError::Backend(
            "could not draw an unused redemption token".to_string(),
        )))
    }

    async fn notify_created(&self, booking: &Booking) {
        if let Err(err) = self.notifier.booking_created(booking).await {
            warn!(booking = %booking.id, error = %err, "booking-created notification failed");
        }
    }

    async fn notify_cancelled(&self, booking: &Booking, reason: CancellationReason) {
        if let Err(err) = self.notifier.booking_cancelled(booking, reason).await {
            warn!(booking = %booking.id, error = %err, "booking-cancelled notification failed");
        }
    }

    async fn reindex(&self, offer_id: OfferId) {
        if !self.config.reindex_offers {
            return;
        }
        if let Err(err) = self.search_index.enqueue_offer(offer_id).await {
            warn!(offer = %offer_id, error = %err, "search reindex enqueue failed");
        }
    }
}

fn sold_out(stock: &StockUnit) -> BookingError {
    BookingError::StockNotBookable {
        reason: NotBookableReason::SoldOut {
            remaining: stock.remaining().unwrap_or(0),
        },
    }
}
