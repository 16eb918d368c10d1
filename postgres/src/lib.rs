//! PostgreSQL storage engine for the Encore booking platform.
//!
//! Implements the storage contracts from `encore-core` on PostgreSQL via
//! sqlx:
//!
//! - a unit of work is a database transaction; dropping it without commit
//!   rolls back;
//! - the stock row lock is `SELECT … FOR UPDATE` with a `SET LOCAL
//!   lock_timeout` bounded wait — lock timeouts surface as the retryable
//!   [`StoreError::StockLocked`];
//! - queries are runtime-checked (`sqlx::query`), so the crate builds
//!   without a live database;
//! - the schema (see `schema.sql`) keeps a `CHECK` constraint on the
//!   reserved counter and on the lifecycle columns as defense in depth; the
//!   application-level lock+check remains authoritative.

mod rows;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use encore_core::store::{BookingStore, StoreError, UnitOfWork};
use encore_core::{
    Booking, BookingId, BookingToken, Offer, StockId, StockUnit, User, UserId,
};
use rows::{
    BOOKING_COLUMNS, backend, booking_from_row, cents_param, offer_from_row, quantity_param,
    state_columns, stock_from_row, user_from_row,
};
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::Transaction;
use std::time::Duration;

/// PostgreSQL-backed storage engine.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    /// Default bounded wait for the stock row lock.
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

    /// Connects a small pool to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when the pool cannot connect.
    pub async fn connect(url: &str, lock_timeout: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(backend)?;
        Ok(Self::from_pool(pool, lock_timeout))
    }

    /// Wraps an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Access the underlying pool, e.g. for health checks.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies `schema.sql` (idempotent).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when a statement fails.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(include_str!("../schema.sql"))
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        tracing::info!("database schema ensured");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Seeding helpers. Catalog import and user registration are external;
    // these exist for integration tests and operational backfills.
    // ------------------------------------------------------------------

    /// Inserts or replaces a user row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on engine failure.
    pub async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, can_book_free_offers, deposit_cents, physical_cap_cents, digital_cap_cents)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE SET
                 can_book_free_offers = EXCLUDED.can_book_free_offers,
                 deposit_cents = EXCLUDED.deposit_cents,
                 physical_cap_cents = EXCLUDED.physical_cap_cents,
                 digital_cap_cents = EXCLUDED.digital_cap_cents",
        )
        .bind(*user.id.as_uuid())
        .bind(user.can_book_free_offers)
        .bind(cents_param(user.deposit.amount)?)
        .bind(user.deposit.physical_cap.map(cents_param).transpose()?)
        .bind(user.deposit.digital_cap.map(cents_param).transpose()?)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    /// Inserts or replaces a stock unit together with its offer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on engine failure.
    pub async fn upsert_stock(&self, stock: &StockUnit) -> Result<(), StoreError> {
        let offer = &stock.offer;
        sqlx::query(
            "INSERT INTO offers (id, name, category, is_duo, is_digital, is_active, can_expire,
                                 venue_name, venue_validated, offerer_name, offerer_validated)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (id) DO UPDATE SET
                 name = EXCLUDED.name,
                 category = EXCLUDED.category,
                 is_duo = EXCLUDED.is_duo,
                 is_digital = EXCLUDED.is_digital,
                 is_active = EXCLUDED.is_active,
                 can_expire = EXCLUDED.can_expire,
                 venue_name = EXCLUDED.venue_name,
                 venue_validated = EXCLUDED.venue_validated,
                 offerer_name = EXCLUDED.offerer_name,
                 offerer_validated = EXCLUDED.offerer_validated",
        )
        .bind(*offer.id.as_uuid())
        .bind(&offer.name)
        .bind(offer.category.as_str())
        .bind(offer.is_duo)
        .bind(offer.is_digital)
        .bind(offer.is_active)
        .bind(offer.can_expire)
        .bind(&offer.venue.name)
        .bind(offer.venue.is_validated)
        .bind(&offer.venue.offerer.name)
        .bind(offer.venue.offerer.is_validated)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            "INSERT INTO stocks (id, offer_id, price_cents, quantity, reserved_quantity,
                                 event_start, booking_limit, is_soft_deleted)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
                 price_cents = EXCLUDED.price_cents,
                 quantity = EXCLUDED.quantity,
                 reserved_quantity = EXCLUDED.reserved_quantity,
                 event_start = EXCLUDED.event_start,
                 booking_limit = EXCLUDED.booking_limit,
                 is_soft_deleted = EXCLUDED.is_soft_deleted",
        )
        .bind(*stock.id.as_uuid())
        .bind(*offer.id.as_uuid())
        .bind(cents_param(stock.price)?)
        .bind(stock.quantity.map(quantity_param).transpose()?)
        .bind(quantity_param(stock.reserved_quantity)?)
        .bind(stock.event_start)
        .bind(stock.booking_limit)
        .bind(stock.is_soft_deleted)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    /// Records a payment referencing a booking, as the payment export does.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on engine failure.
    pub async fn add_payment(&self, booking_id: BookingId) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO payments (booking_id) VALUES ($1) ON CONFLICT (booking_id) DO NOTHING",
        )
        .bind(*booking_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    /// Reads the committed state of a stock unit, without locking.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on engine failure.
    pub async fn stock_snapshot(&self, id: StockId) -> Result<Option<StockUnit>, StoreError> {
        let row = sqlx::query(
            "SELECT s.id, s.price_cents, s.quantity, s.reserved_quantity, s.event_start,
                    s.booking_limit, s.is_soft_deleted,
                    o.id AS offer_id, o.name AS offer_name, o.category, o.is_duo, o.is_digital,
                    o.is_active, o.can_expire, o.venue_name, o.venue_validated,
                    o.offerer_name, o.offerer_validated
             FROM stocks s
             JOIN offers o ON o.id = s.offer_id
             WHERE s.id = $1",
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(stock_from_row).transpose()
    }
}

#[async_trait]
impl BookingStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        // bounded wait on row locks for the whole transaction
        let timeout_ms = self.lock_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL lock_timeout = '{timeout_ms}ms'"))
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        Ok(Box::new(PostgresUnitOfWork { tx }))
    }

    async fn get_user(&self, id: UserId) -> Result<User, StoreError> {
        let row = sqlx::query(
            "SELECT id, can_book_free_offers, deposit_cents, physical_cap_cents, digital_cap_cents
             FROM users WHERE id = $1",
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref()
            .map(user_from_row)
            .transpose()?
            .ok_or(StoreError::UserNotFound(id))
    }

    async fn find_booking(&self, id: BookingId) -> Result<Booking, StoreError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref()
            .map(booking_from_row)
            .transpose()?
            .ok_or(StoreError::BookingNotFound(id))
    }

    async fn user_bookings(&self, id: UserId) -> Result<Vec<(Booking, Offer)>, StoreError> {
        let rows = sqlx::query(
            "SELECT b.id, b.user_id, b.stock_id, b.offer_id, b.token, b.quantity,
                    b.amount_cents, b.created_at, b.confirmation_date, b.used_at,
                    b.cancelled_at, b.cancellation_reason,
                    o.id AS offer_id, o.name AS offer_name, o.category, o.is_duo, o.is_digital,
                    o.is_active, o.can_expire, o.venue_name, o.venue_validated,
                    o.offerer_name, o.offerer_validated
             FROM bookings b
             JOIN offers o ON o.id = b.offer_id
             WHERE b.user_id = $1",
        )
        .bind(*id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter()
            .map(|row| Ok((booking_from_row(row)?, offer_from_row(row)?)))
            .collect()
    }

    async fn token_exists(&self, token: &BookingToken) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM bookings WHERE token = $1)")
            .bind(token.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(backend)
    }

    async fn payment_exists(&self, id: BookingId) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM payments WHERE booking_id = $1)")
            .bind(*id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(backend)
    }

    async fn expired_booking_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError> {
        let rows = sqlx::query(
            "SELECT b.id, b.user_id, b.stock_id, b.offer_id, b.token, b.quantity,
                    b.amount_cents, b.created_at, b.confirmation_date, b.used_at,
                    b.cancelled_at, b.cancellation_reason
             FROM bookings b
             JOIN offers o ON o.id = b.offer_id
             WHERE o.can_expire
               AND b.used_at IS NULL
               AND b.cancelled_at IS NULL
               AND b.created_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(booking_from_row).collect()
    }
}

/// One database transaction.
struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn lock_stock(&mut self, id: StockId) -> Result<StockUnit, StoreError> {
        let row = sqlx::query(
            "SELECT s.id, s.price_cents, s.quantity, s.reserved_quantity, s.event_start,
                    s.booking_limit, s.is_soft_deleted,
                    o.id AS offer_id, o.name AS offer_name, o.category, o.is_duo, o.is_digital,
                    o.is_active, o.can_expire, o.venue_name, o.venue_validated,
                    o.offerer_name, o.offerer_validated
             FROM stocks s
             JOIN offers o ON o.id = s.offer_id
             WHERE s.id = $1
             FOR UPDATE OF s",
        )
        .bind(*id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| lock_error(err, id))?;
        row.as_ref()
            .map(stock_from_row)
            .transpose()?
            .ok_or(StoreError::StockNotFound(id))
    }

    async fn get_booking(&mut self, id: BookingId) -> Result<Booking, StoreError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(backend)?;
        row.as_ref()
            .map(booking_from_row)
            .transpose()?
            .ok_or(StoreError::BookingNotFound(id))
    }

    async fn bookings_for_stock(&mut self, id: StockId) -> Result<Vec<Booking>, StoreError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE stock_id = $1");
        let rows = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(backend)?;
        rows.iter().map(booking_from_row).collect()
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        let (used_at, cancelled_at, reason) = state_columns(&booking.state);
        sqlx::query(
            "INSERT INTO bookings (id, user_id, stock_id, offer_id, token, quantity,
                                   amount_cents, created_at, confirmation_date,
                                   used_at, cancelled_at, cancellation_reason)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(*booking.id.as_uuid())
        .bind(*booking.user_id.as_uuid())
        .bind(*booking.stock_id.as_uuid())
        .bind(*booking.offer_id.as_uuid())
        .bind(booking.token.as_str())
        .bind(quantity_param(booking.quantity)?)
        .bind(cents_param(booking.amount)?)
        .bind(booking.created_at)
        .bind(booking.confirmation_date)
        .bind(used_at)
        .bind(cancelled_at)
        .bind(reason)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        let (used_at, cancelled_at, reason) = state_columns(&booking.state);
        let result = sqlx::query(
            "UPDATE bookings
             SET confirmation_date = $2, used_at = $3, cancelled_at = $4,
                 cancellation_reason = $5
             WHERE id = $1",
        )
        .bind(*booking.id.as_uuid())
        .bind(booking.confirmation_date)
        .bind(used_at)
        .bind(cancelled_at)
        .bind(reason)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::BookingNotFound(booking.id));
        }
        Ok(())
    }

    async fn update_stock(&mut self, stock: &StockUnit) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE stocks SET reserved_quantity = $2 WHERE id = $1")
            .bind(*stock.id.as_uuid())
            .bind(quantity_param(stock.reserved_quantity)?)
            .execute(&mut *self.tx)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::StockNotFound(stock.id));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(backend)
    }
}

/// PostgreSQL reports a lock-timeout as SQLSTATE 55P03
/// (`lock_not_available`); everything else is a backend failure.
fn lock_error(err: sqlx::Error, id: StockId) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("55P03") {
            return StoreError::StockLocked(id);
        }
    }
    backend(err)
}
