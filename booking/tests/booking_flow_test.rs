//! End-to-end booking scenarios through the service and the in-memory
//! engine: eligibility, availability, quantity and spend-ceiling rules.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use encore_booking::{BookingConfig, EligibilityGate, ReservationService};
use encore_core::{
    BookingError, Clock, Money, NotBookableReason, OfferCategory, StockUnit, User, UserId,
};
use encore_testing::fixtures::{StockBuilder, UserBuilder};
use encore_testing::{FixedClock, MemoryStore};
use std::sync::Arc;

struct Harness {
    store: MemoryStore,
    clock: Arc<FixedClock>,
    service: ReservationService,
}

fn harness() -> Harness {
    harness_with(BookingConfig::default())
}

fn harness_with(config: BookingConfig) -> Harness {
    let store = MemoryStore::new();
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let service = ReservationService::new(Arc::new(store.clone()), clock.clone(), config);
    Harness {
        store,
        clock,
        service,
    }
}

impl Harness {
    fn seed_user(&self, user: User) -> UserId {
        let id = user.id;
        self.store.upsert_user(user);
        id
    }

    fn seed_stock(&self, stock: StockUnit) -> StockUnit {
        self.store.upsert_stock(stock.clone());
        stock
    }
}

struct DenyAll;

#[async_trait]
impl EligibilityGate for DenyAll {
    async fn is_eligible_to_book(&self, _user_id: UserId) -> bool {
        false
    }
}

#[tokio::test]
async fn booking_reserves_stock_and_snapshots_the_price() {
    let h = harness();
    let user_id = h.seed_user(UserBuilder::beneficiary().build());
    let stock = h.seed_stock(StockBuilder::new().quantity(10).price(Money::from_euros(20)).build());

    let booking = h.service.book(user_id, stock.id, 1).await.unwrap();

    assert!(booking.is_active());
    assert_eq!(booking.amount, Money::from_euros(20));
    assert_eq!(booking.total_amount(), Money::from_euros(20));
    assert_eq!(booking.token.as_str().len(), 6);
    assert_eq!(booking.confirmation_date, None);
    assert_eq!(h.store.stock_snapshot(stock.id).unwrap().reserved_quantity, 1);
}

#[tokio::test]
async fn event_bookings_get_a_confirmation_date() {
    let h = harness();
    let now = h.clock.now();
    let user_id = h.seed_user(UserBuilder::beneficiary().build());
    let stock = h.seed_stock(StockBuilder::new().event_start(now + Duration::days(10)).build());

    let booking = h.service.book(user_id, stock.id, 1).await.unwrap();
    assert_eq!(booking.confirmation_date, Some(now + Duration::hours(72)));
}

#[tokio::test]
async fn duo_rule_governs_the_quantity() {
    let h = harness();
    let user_id = h.seed_user(UserBuilder::beneficiary().build());
    let solo = h.seed_stock(StockBuilder::new().build());
    let duo = h.seed_stock(StockBuilder::new().duo().build());

    let err = h.service.book(user_id, solo.id, 2).await.unwrap_err();
    assert!(matches!(
        err,
        BookingError::InvalidQuantity { quantity: 2, is_duo: false }
    ));

    let booking = h.service.book(user_id, duo.id, 2).await.unwrap();
    assert_eq!(booking.quantity, 2);
    assert_eq!(h.store.stock_snapshot(duo.id).unwrap().reserved_quantity, 2);
}

#[tokio::test]
async fn free_offers_require_the_policy_flag() {
    let h = harness();
    let denied = h.seed_user(UserBuilder::beneficiary().cannot_book_free_offers().build());
    let allowed = h.seed_user(UserBuilder::beneficiary().build());
    let stock = h.seed_stock(StockBuilder::new().free().build());

    assert!(matches!(
        h.service.book(denied, stock.id, 1).await,
        Err(BookingError::NotEligibleToBookFree)
    ));
    assert!(h.service.book(allowed, stock.id, 1).await.is_ok());
}

#[tokio::test]
async fn the_fraud_gate_blocks_before_any_stock_is_touched() {
    let h = harness();
    let service = h.service.clone().with_eligibility_gate(Arc::new(DenyAll));
    let user_id = h.seed_user(UserBuilder::beneficiary().build());
    let stock = h.seed_stock(StockBuilder::new().quantity(5).build());

    assert!(matches!(
        service.book(user_id, stock.id, 1).await,
        Err(BookingError::NotEligible)
    ));
    assert_eq!(h.store.stock_snapshot(stock.id).unwrap().reserved_quantity, 0);
}

#[tokio::test]
async fn one_active_booking_per_offer() {
    let h = harness();
    let user_id = h.seed_user(UserBuilder::beneficiary().build());
    let stock = h.seed_stock(StockBuilder::new().quantity(10).build());

    let first = h.service.book(user_id, stock.id, 1).await.unwrap();
    assert!(matches!(
        h.service.book(user_id, stock.id, 1).await,
        Err(BookingError::AlreadyBooked)
    ));

    // once cancelled, the offer can be booked again
    h.service.cancel(user_id, first.id).await.unwrap();
    assert!(h.service.book(user_id, stock.id, 1).await.is_ok());
}

#[tokio::test]
async fn unbookable_stock_reports_its_reason() {
    let h = harness();
    let now = h.clock.now();
    let user_id = h.seed_user(UserBuilder::beneficiary().build());

    let cases = [
        (
            h.seed_stock(StockBuilder::new().soft_deleted().build()),
            NotBookableReason::Deleted,
        ),
        (
            h.seed_stock(StockBuilder::new().inactive_offer().build()),
            NotBookableReason::OfferInactive,
        ),
        (
            h.seed_stock(StockBuilder::new().unvalidated_venue().build()),
            NotBookableReason::VenueNotValidated,
        ),
        (
            h.seed_stock(StockBuilder::new().unvalidated_offerer().build()),
            NotBookableReason::OffererNotValidated,
        ),
        (
            h.seed_stock(StockBuilder::new().booking_limit(now - Duration::hours(1)).build()),
            NotBookableReason::BookingWindowClosed,
        ),
        (
            h.seed_stock(StockBuilder::new().event_start(now - Duration::hours(1)).build()),
            NotBookableReason::EventInPast,
        ),
    ];

    for (stock, expected) in cases {
        let err = h.service.book(user_id, stock.id, 1).await.unwrap_err();
        match err {
            BookingError::StockNotBookable { reason } => assert_eq!(reason, expected),
            other => panic!("expected StockNotBookable, got {other}"),
        }
    }
}

#[tokio::test]
async fn sold_out_stock_reports_remaining_capacity() {
    let h = harness();
    let first = h.seed_user(UserBuilder::beneficiary().build());
    let second = h.seed_user(UserBuilder::beneficiary().build());
    let stock = h.seed_stock(StockBuilder::new().duo().quantity(3).build());

    h.service.book(first, stock.id, 2).await.unwrap();
    let err = h.service.book(second, stock.id, 2).await.unwrap_err();
    assert!(matches!(
        err,
        BookingError::StockNotBookable {
            reason: NotBookableReason::SoldOut { remaining: 1 }
        }
    ));
}

#[tokio::test]
async fn spending_exactly_to_the_credit_succeeds_one_cent_more_fails() {
    let h = harness();
    let exact = h.seed_user(
        UserBuilder::beneficiary()
            .credit(Money::from_euros(50))
            .build(),
    );
    let over = h.seed_user(
        UserBuilder::beneficiary()
            .credit(Money::from_euros(50))
            .build(),
    );
    let at_cap = h.seed_stock(StockBuilder::new().price(Money::from_euros(50)).build());
    let past_cap = h.seed_stock(StockBuilder::new().price(Money::from_cents(5_001)).build());

    assert!(h.service.book(exact, at_cap.id, 1).await.is_ok());

    let err = h.service.book(over, past_cap.id, 1).await.unwrap_err();
    assert!(matches!(
        err,
        BookingError::InsufficientFunds { cap } if cap == Money::from_euros(50)
    ));
}

#[tokio::test]
async fn digital_goods_are_capped_by_the_digital_ceiling() {
    let h = harness();
    let user_id = h.seed_user(UserBuilder::beneficiary().build());
    let fills_cap = h.seed_stock(
        StockBuilder::new()
            .category(OfferCategory::Audiovisual)
            .digital()
            .price(Money::from_euros(100))
            .build(),
    );
    let one_cent_more = h.seed_stock(
        StockBuilder::new()
            .category(OfferCategory::Press)
            .digital()
            .price(Money::from_cents(1))
            .build(),
    );

    h.service.book(user_id, fills_cap.id, 1).await.unwrap();
    let err = h.service.book(user_id, one_cent_more.id, 1).await.unwrap_err();
    assert!(matches!(
        err,
        BookingError::DigitalCapReached { cap } if cap == Money::from_euros(100)
    ));
}

#[tokio::test]
async fn physical_goods_are_capped_by_the_physical_ceiling() {
    let h = harness();
    let user_id = h.seed_user(UserBuilder::beneficiary().build());
    let fills_cap = h.seed_stock(
        StockBuilder::new()
            .category(OfferCategory::Instrument)
            .price(Money::from_euros(200))
            .build(),
    );
    let one_cent_more = h.seed_stock(
        StockBuilder::new()
            .category(OfferCategory::Book)
            .price(Money::from_cents(1))
            .build(),
    );

    h.service.book(user_id, fills_cap.id, 1).await.unwrap();
    let err = h.service.book(user_id, one_cent_more.id, 1).await.unwrap_err();
    assert!(matches!(
        err,
        BookingError::PhysicalCapReached { cap } if cap == Money::from_euros(200)
    ));
}

#[tokio::test]
async fn exempt_categories_still_consume_overall_credit() {
    let h = harness();
    let user_id = h.seed_user(UserBuilder::beneficiary().build());
    // 250 € subscription: above the 200 € physical ceiling, but exempt
    let subscription = h.seed_stock(
        StockBuilder::new()
            .category(OfferCategory::Subscription)
            .price(Money::from_euros(250))
            .build(),
    );
    let outing = h.seed_stock(StockBuilder::new().price(Money::from_euros(60)).build());

    h.service.book(user_id, subscription.id, 1).await.unwrap();

    // 250 + 60 > 300: overall credit is what stops the next booking
    let err = h.service.book(user_id, outing.id, 1).await.unwrap_err();
    assert!(matches!(
        err,
        BookingError::InsufficientFunds { cap } if cap == Money::from_euros(300)
    ));
}

#[tokio::test]
async fn digital_bookings_auto_activate_when_the_policy_is_on() {
    let h = harness();
    let user_id = h.seed_user(UserBuilder::beneficiary().build());
    let stock = h.seed_stock(
        StockBuilder::new()
            .category(OfferCategory::Audiovisual)
            .digital()
            .price(Money::from_euros(5))
            .build(),
    );

    let booking = h.service.book(user_id, stock.id, 1).await.unwrap();
    assert!(booking.is_used());
}

#[tokio::test]
async fn digital_bookings_stay_active_when_the_policy_is_off() {
    let config = BookingConfig {
        auto_activate_digital: false,
        ..BookingConfig::default()
    };
    let h = harness_with(config);
    let user_id = h.seed_user(UserBuilder::beneficiary().build());
    let stock = h.seed_stock(
        StockBuilder::new()
            .category(OfferCategory::Audiovisual)
            .digital()
            .price(Money::from_euros(5))
            .build(),
    );

    let booking = h.service.book(user_id, stock.id, 1).await.unwrap();
    assert!(booking.is_active());
}

#[tokio::test]
async fn the_spend_snapshot_ignores_cancelled_bookings() {
    let h = harness();
    let user_id = h.seed_user(UserBuilder::beneficiary().build());
    let kept = h.seed_stock(StockBuilder::new().price(Money::from_euros(40)).build());
    let dropped = h.seed_stock(StockBuilder::new().price(Money::from_euros(25)).build());

    h.service.book(user_id, kept.id, 1).await.unwrap();
    let cancelled = h.service.book(user_id, dropped.id, 1).await.unwrap();
    h.service.cancel(user_id, cancelled.id).await.unwrap();

    let snapshot = h.service.spend_for_user(user_id).await.unwrap();
    assert_eq!(snapshot.all.spent, Money::from_euros(40));
    assert_eq!(snapshot.all.cap, Money::from_euros(300));
}

#[tokio::test]
async fn unknown_ids_are_reported_as_such() {
    let h = harness();
    let user_id = h.seed_user(UserBuilder::beneficiary().build());
    let ghost_stock = encore_core::StockId::new();

    assert!(matches!(
        h.service.book(user_id, ghost_stock, 1).await,
        Err(BookingError::StockNotFound(id)) if id == ghost_stock
    ));
    assert!(matches!(
        h.service.book(UserId::new(), ghost_stock, 1).await,
        Err(BookingError::UserNotFound(_))
    ));
}
