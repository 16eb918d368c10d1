//! Core domain model for the Encore booking platform.
//!
//! Encore lets beneficiaries reserve limited-quantity stock of cultural
//! offers against a fixed monetary credit. This crate holds the pure heart
//! of the reservation core:
//!
//! - the domain model ([`types`], [`offer`], [`stock`], [`spend`]);
//! - the booking lifecycle state machine ([`booking`]);
//! - redemption tokens ([`token`]);
//! - the caller-facing error taxonomy ([`error`]);
//! - the storage contracts every engine implements ([`store`]);
//! - the clock abstraction ([`clock`]).
//!
//! Orchestration lives in `encore-booking`; the storage engines live in
//! `encore-postgres` (production) and `encore-testing` (deterministic).

pub mod booking;
pub mod clock;
pub mod error;
pub mod offer;
pub mod spend;
pub mod stock;
pub mod store;
pub mod token;
pub mod types;

pub use booking::{
    Booking, BookingState, CancellationActor, CancellationReason, ConfirmationPolicy,
    confirmation_date,
};
pub use clock::{Clock, SystemClock};
pub use error::{BookingError, NotBookableReason};
pub use offer::{CapBucketKind, Offer, OfferCategory, Offerer, Venue};
pub use spend::{Deposit, SpendBucket, SpendItem, SpendSnapshot, User};
pub use stock::StockUnit;
pub use store::{BookingStore, StoreError, UnitOfWork};
pub use token::{BookingToken, TOKEN_LENGTH, generate_token};
pub use types::{BookingId, Money, OfferId, StockId, UserId};
