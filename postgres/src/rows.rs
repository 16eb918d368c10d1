//! Row ↔ domain conversions.
//!
//! The relational schema stores lifecycle state as nullable timestamps; the
//! conversions here rebuild the explicit state enum and refuse rows whose
//! timestamp cluster is inconsistent, so corruption surfaces at the storage
//! boundary instead of deep inside a lifecycle decision.

use chrono::{DateTime, Utc};
use encore_core::store::StoreError;
use encore_core::{
    Booking, BookingId, BookingState, Deposit, Money, Offer, OfferId, Offerer, StockId, StockUnit,
    User, UserId, Venue,
};
use sqlx::Row;
use sqlx::postgres::PgRow;
use std::fmt::Display;
use uuid::Uuid;

/// Booking columns as selected by every booking query (unprefixed).
pub(crate) const BOOKING_COLUMNS: &str = "id, user_id, stock_id, offer_id, token, quantity, \
     amount_cents, created_at, confirmation_date, used_at, cancelled_at, cancellation_reason";

pub(crate) fn backend(err: impl Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

pub(crate) fn money_from_cents(cents: i64) -> Result<Money, StoreError> {
    u64::try_from(cents)
        .map(Money::from_cents)
        .map_err(|_| backend(format!("negative amount in storage: {cents}")))
}

pub(crate) fn cents_param(amount: Money) -> Result<i64, StoreError> {
    i64::try_from(amount.cents())
        .map_err(|_| backend(format!("amount out of range for storage: {amount}")))
}

pub(crate) fn quantity_from(value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| backend(format!("negative quantity in storage: {value}")))
}

pub(crate) fn quantity_param(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| backend(format!("quantity out of range for storage: {value}")))
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<T, _>(column).map_err(backend)
}

/// Rebuilds an offer from the aliased columns of a join
/// (`offer_id`, `offer_name`, `category`, flags, venue and offerer fields).
pub(crate) fn offer_from_row(row: &PgRow) -> Result<Offer, StoreError> {
    let category: String = get(row, "category")?;
    Ok(Offer {
        id: OfferId::from_uuid(get::<Uuid>(row, "offer_id")?),
        name: get(row, "offer_name")?,
        category: category.parse().map_err(backend)?,
        is_duo: get(row, "is_duo")?,
        is_digital: get(row, "is_digital")?,
        is_active: get(row, "is_active")?,
        can_expire: get(row, "can_expire")?,
        venue: Venue::new(
            get(row, "venue_name")?,
            get(row, "venue_validated")?,
            Offerer::new(get(row, "offerer_name")?, get(row, "offerer_validated")?),
        ),
    })
}

/// Rebuilds a stock unit from a `stocks` row joined with its offer.
pub(crate) fn stock_from_row(row: &PgRow) -> Result<StockUnit, StoreError> {
    let quantity: Option<i32> = get(row, "quantity")?;
    Ok(StockUnit {
        id: StockId::from_uuid(get::<Uuid>(row, "id")?),
        offer: offer_from_row(row)?,
        price: money_from_cents(get(row, "price_cents")?)?,
        quantity: quantity.map(quantity_from).transpose()?,
        reserved_quantity: quantity_from(get(row, "reserved_quantity")?)?,
        event_start: get(row, "event_start")?,
        booking_limit: get(row, "booking_limit")?,
        is_soft_deleted: get(row, "is_soft_deleted")?,
    })
}

/// Rebuilds a booking, reconstructing the state enum from the timestamp
/// cluster.
pub(crate) fn booking_from_row(row: &PgRow) -> Result<Booking, StoreError> {
    let id = BookingId::from_uuid(get::<Uuid>(row, "id")?);
    let used_at: Option<DateTime<Utc>> = get(row, "used_at")?;
    let cancelled_at: Option<DateTime<Utc>> = get(row, "cancelled_at")?;
    let reason: Option<String> = get(row, "cancellation_reason")?;

    let state = match (used_at, cancelled_at, reason) {
        (None, None, None) => BookingState::Active,
        (Some(used_at), None, None) => BookingState::Used { used_at },
        (None, Some(cancelled_at), Some(reason)) => BookingState::Cancelled {
            cancelled_at,
            reason: reason.parse().map_err(backend)?,
        },
        _ => {
            return Err(backend(format!(
                "inconsistent lifecycle columns on booking {id}"
            )));
        }
    };

    let token: String = get(row, "token")?;
    Ok(Booking {
        id,
        user_id: UserId::from_uuid(get::<Uuid>(row, "user_id")?),
        stock_id: StockId::from_uuid(get::<Uuid>(row, "stock_id")?),
        offer_id: OfferId::from_uuid(get::<Uuid>(row, "offer_id")?),
        token: token.parse().map_err(backend)?,
        quantity: quantity_from(get(row, "quantity")?)?,
        amount: money_from_cents(get(row, "amount_cents")?)?,
        created_at: get(row, "created_at")?,
        confirmation_date: get(row, "confirmation_date")?,
        state,
    })
}

/// Rebuilds a user from a `users` row.
pub(crate) fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let physical: Option<i64> = get(row, "physical_cap_cents")?;
    let digital: Option<i64> = get(row, "digital_cap_cents")?;
    Ok(User {
        id: UserId::from_uuid(get::<Uuid>(row, "id")?),
        can_book_free_offers: get(row, "can_book_free_offers")?,
        deposit: Deposit::new(
            money_from_cents(get(row, "deposit_cents")?)?,
            physical.map(money_from_cents).transpose()?,
            digital.map(money_from_cents).transpose()?,
        ),
    })
}

/// Decomposes a state enum into the nullable columns the schema stores.
pub(crate) const fn state_columns(
    state: &BookingState,
) -> (
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    Option<&'static str>,
) {
    match state {
        BookingState::Active => (None, None, None),
        BookingState::Used { used_at } => (Some(*used_at), None, None),
        BookingState::Cancelled {
            cancelled_at,
            reason,
        } => (None, Some(*cancelled_at), Some(reason.as_str())),
    }
}
