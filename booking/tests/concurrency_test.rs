//! Oversell-resistance under concurrent load.
//!
//! The only serialization point in the system is the per-stock row lock, so
//! these tests hammer a single stock unit from many tasks and check the
//! invariant: the sum of quantities of non-cancelled bookings never exceeds
//! the stock's total quantity, regardless of interleaving.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Utc;
use encore_booking::{BookingConfig, ReservationService};
use encore_core::store::{BookingStore, UnitOfWork};
use encore_core::{Booking, BookingError, NotBookableReason, UserId};
use encore_testing::fixtures::{StockBuilder, UserBuilder};
use encore_testing::{FixedClock, MemoryStore};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn service_over(store: &MemoryStore) -> ReservationService {
    ReservationService::new(
        Arc::new(store.clone()),
        Arc::new(FixedClock::new(Utc::now())),
        BookingConfig::default(),
    )
}

#[tokio::test]
async fn exactly_the_capacity_wins_under_contention() {
    init_tracing();
    const CAPACITY: u32 = 10;
    const CONTENDERS: usize = 25;

    let store = MemoryStore::new();
    let service = service_over(&store);
    let stock = StockBuilder::new().quantity(CAPACITY).build();
    store.upsert_stock(stock.clone());

    let users: Vec<UserId> = (0..CONTENDERS)
        .map(|_| {
            let user = UserBuilder::beneficiary().build();
            let id = user.id;
            store.upsert_user(user);
            id
        })
        .collect();

    let handles: Vec<_> = users
        .iter()
        .map(|&user_id| {
            let service = service.clone();
            let stock_id = stock.id;
            tokio::spawn(async move { service.book(user_id, stock_id, 1).await })
        })
        .collect();

    let results: Vec<Result<Booking, BookingError>> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let won = results.iter().filter(|result| result.is_ok()).count();
    let lost = results.len() - won;
    assert_eq!(won, CAPACITY as usize);
    assert_eq!(lost, CONTENDERS - CAPACITY as usize);

    for result in &results {
        if let Err(err) = result {
            assert!(matches!(
                err,
                BookingError::StockNotBookable {
                    reason: NotBookableReason::SoldOut { .. }
                }
            ));
        }
    }

    assert_eq!(store.stock_snapshot(stock.id).unwrap().reserved_quantity, CAPACITY);
}

#[tokio::test]
async fn interleaved_cancellations_and_bookings_keep_the_counter_exact() {
    init_tracing();
    const CAPACITY: u32 = 10;

    let store = MemoryStore::new();
    let service = service_over(&store);
    let stock = StockBuilder::new().quantity(CAPACITY).build();
    store.upsert_stock(stock.clone());

    let seed_user = || {
        let user = UserBuilder::beneficiary().build();
        let id = user.id;
        store.upsert_user(user);
        id
    };

    // fill the stock
    let mut winners = Vec::new();
    for _ in 0..CAPACITY {
        let user_id = seed_user();
        let booking = service.book(user_id, stock.id, 1).await.unwrap();
        winners.push((user_id, booking.id));
    }

    // half the winners cancel while ten newcomers fight for the freed units
    let mut handles = Vec::new();
    for (user_id, booking_id) in winners.into_iter().take(5) {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.cancel(user_id, booking_id).await.map(|()| None)
        }));
    }
    for _ in 0..10 {
        let user_id = seed_user();
        let service = service.clone();
        let stock_id = stock.id;
        handles.push(tokio::spawn(async move {
            service.book(user_id, stock_id, 1).await.map(Some)
        }));
    }
    let _ = futures::future::join_all(handles).await;

    // invariant: the counter equals the sum of non-cancelled quantities and
    // never exceeds capacity
    let snapshot = store.stock_snapshot(stock.id).unwrap();
    let committed: u32 = gather_committed(&store, &stock).await;
    assert_eq!(snapshot.reserved_quantity, committed);
    assert!(snapshot.reserved_quantity <= CAPACITY);
}

async fn gather_committed(store: &MemoryStore, stock: &encore_core::StockUnit) -> u32 {
    let mut uow = store.begin().await.unwrap();
    uow.bookings_for_stock(stock.id)
        .await
        .unwrap()
        .iter()
        .filter(|booking| !booking.is_cancelled())
        .map(|booking| booking.quantity)
        .sum()
}

#[tokio::test]
async fn lock_contention_surfaces_as_a_retryable_error() {
    init_tracing();
    let store = MemoryStore::with_lock_timeout(Duration::from_millis(50));
    let service = service_over(&store);
    let stock = StockBuilder::new().quantity(5).build();
    store.upsert_stock(stock.clone());
    let user = UserBuilder::beneficiary().build();
    let user_id = user.id;
    store.upsert_user(user);

    // an out-of-band transaction holds the row
    let mut holder = store.begin().await.unwrap();
    holder.lock_stock(stock.id).await.unwrap();

    let err = service.book(user_id, stock.id, 1).await.unwrap_err();
    assert!(matches!(err, BookingError::StockLocked(id) if id == stock.id));
    assert!(err.is_retryable());

    // nothing was committed while the row was held
    assert_eq!(store.stock_snapshot(stock.id).unwrap().reserved_quantity, 0);

    drop(holder);
    assert!(service.book(user_id, stock.id, 1).await.is_ok());
}
