//! Reservation orchestration for the Encore booking platform.
//!
//! This crate wires the pure domain core (`encore-core`) to a storage
//! engine and the external collaborators, exposing the operations the rest
//! of the platform calls:
//!
//! - [`ReservationService::book`] — carve a reservation out of finite stock
//!   under the row lock, enforcing eligibility, availability and spend
//!   ceilings;
//! - the cancellation family (beneficiary, offerer, fraud, bulk withdrawal,
//!   expiry sweep);
//! - redemption ([`ReservationService::mark_used`] /
//!   [`ReservationService::mark_unused`]);
//! - reconciliation ([`ReservationService::recompute_reserved`]) and the
//!   on-demand spend snapshot.
//!
//! Configuration comes from [`BookingConfig`]; collaborators are the traits
//! in [`gateways`].

pub mod config;
pub mod gateways;
pub mod service;

pub use config::BookingConfig;
pub use gateways::{
    ApproveAll, EligibilityGate, GatewayError, LoggingNotifier, NoopSearchIndex,
    NotificationGateway, SearchIndexQueue,
};
pub use service::ReservationService;
