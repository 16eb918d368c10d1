//! Contracts for the collaborators around the reservation core.
//!
//! These systems are out of scope here — identity/fraud scoring, mail
//! delivery, search indexing — but the service needs seams to call them
//! through. Gateway calls happen after the unit of work commits and their
//! failures are logged, never propagated: a lost email must not undo a
//! committed reservation.

use async_trait::async_trait;
use encore_core::{Booking, CancellationReason, OfferId, UserId};
use thiserror::Error;
use tracing::info;

/// Failure of an external collaborator. Always recovered locally.
#[derive(Debug, Error)]
#[error("gateway error: {0}")]
pub struct GatewayError(pub String);

/// Identity/fraud gate consulted before any stock is touched.
#[async_trait]
pub trait EligibilityGate: Send + Sync {
    /// Whether the user may book at all.
    async fn is_eligible_to_book(&self, user_id: UserId) -> bool;
}

/// Gate that approves everyone; the default when no fraud service is wired.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApproveAll;

#[async_trait]
impl EligibilityGate for ApproveAll {
    async fn is_eligible_to_book(&self, _user_id: UserId) -> bool {
        true
    }
}

/// Outbound notification dispatch (mail, push).
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// A booking was created and committed.
    ///
    /// # Errors
    ///
    /// Implementations report delivery failures; the service logs and
    /// swallows them.
    async fn booking_created(&self, booking: &Booking) -> Result<(), GatewayError>;

    /// A booking was cancelled and the cancellation committed.
    ///
    /// # Errors
    ///
    /// Implementations report delivery failures; the service logs and
    /// swallows them.
    async fn booking_cancelled(
        &self,
        booking: &Booking,
        reason: CancellationReason,
    ) -> Result<(), GatewayError>;
}

/// Notifier that only writes to the log. Default wiring for tests and local
/// runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl NotificationGateway for LoggingNotifier {
    async fn booking_created(&self, booking: &Booking) -> Result<(), GatewayError> {
        info!(booking = %booking.id, user = %booking.user_id, "would notify: booking created");
        Ok(())
    }

    async fn booking_cancelled(
        &self,
        booking: &Booking,
        reason: CancellationReason,
    ) -> Result<(), GatewayError> {
        info!(
            booking = %booking.id,
            user = %booking.user_id,
            %reason,
            "would notify: booking cancelled"
        );
        Ok(())
    }
}

/// Search-index invalidation queue.
#[async_trait]
pub trait SearchIndexQueue: Send + Sync {
    /// Enqueues the offer for reindexing.
    ///
    /// # Errors
    ///
    /// Implementations report enqueue failures; the service logs and
    /// swallows them.
    async fn enqueue_offer(&self, offer_id: OfferId) -> Result<(), GatewayError>;
}

/// Queue that discards everything; the default when reindexing is off.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSearchIndex;

#[async_trait]
impl SearchIndexQueue for NoopSearchIndex {
    async fn enqueue_offer(&self, _offer_id: OfferId) -> Result<(), GatewayError> {
        Ok(())
    }
}
