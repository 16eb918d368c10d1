//! Stock units and the committed-reservation counter.
//!
//! A stock unit is the quantity-limited, priced representation of an offer.
//! Its `reserved_quantity` counter is the authoritative record of committed
//! reservations; it is only ever adjusted while the caller holds the stock
//! row lock of the enclosing unit of work, which is what makes oversell
//! impossible regardless of request interleaving.

use crate::error::{BookingError, NotBookableReason};
use crate::offer::Offer;
use crate::types::{Money, StockId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bookable unit of an offer: a priced seat allotment or a copy count.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockUnit {
    /// Unique stock identifier.
    pub id: StockId,
    /// Parent offer, loaded alongside the stock row.
    pub offer: Offer,
    /// Unit price.
    pub price: Money,
    /// Total sellable quantity; `None` means unlimited.
    pub quantity: Option<u32>,
    /// Quantity committed by non-cancelled bookings.
    pub reserved_quantity: u32,
    /// Start of the underlying event, when there is one.
    pub event_start: Option<DateTime<Utc>>,
    /// Deadline after which the stock may no longer be booked.
    pub booking_limit: Option<DateTime<Utc>>,
    /// Soft-delete marker; withdrawn stock keeps its booking history.
    pub is_soft_deleted: bool,
}

impl StockUnit {
    /// Creates a stock unit with no schedule and unlimited quantity.
    #[must_use]
    pub const fn new(id: StockId, offer: Offer, price: Money) -> Self {
        Self {
            id,
            offer,
            price,
            quantity: None,
            reserved_quantity: 0,
            event_start: None,
            booking_limit: None,
            is_soft_deleted: false,
        }
    }

    /// Units still available, `None` when the stock is unlimited.
    #[must_use]
    pub const fn remaining(&self) -> Option<u32> {
        match self.quantity {
            Some(total) => Some(total.saturating_sub(self.reserved_quantity)),
            None => None,
        }
    }

    /// Whether `quantity` more units can be committed.
    #[must_use]
    pub const fn has_capacity(&self, quantity: u32) -> bool {
        match self.remaining() {
            Some(remaining) => remaining >= quantity,
            None => true,
        }
    }

    /// Validates every bookability rule except capacity.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::StockNotBookable`] naming the first rule the
    /// stock violates: withdrawn, closed booking window, past event, or an
    /// inactive/unvalidated offer, venue or organization.
    pub fn check_bookable(&self, now: DateTime<Utc>) -> Result<(), BookingError> {
        let reason = if self.is_soft_deleted {
            Some(NotBookableReason::Deleted)
        } else if !self.offer.is_active {
            Some(NotBookableReason::OfferInactive)
        } else if !self.offer.venue.is_validated {
            Some(NotBookableReason::VenueNotValidated)
        } else if !self.offer.venue.offerer.is_validated {
            Some(NotBookableReason::OffererNotValidated)
        } else if self.booking_limit.is_some_and(|limit| limit < now) {
            Some(NotBookableReason::BookingWindowClosed)
        } else if self.event_start.is_some_and(|start| start < now) {
            Some(NotBookableReason::EventInPast)
        } else {
            None
        };

        match reason {
            Some(reason) => Err(BookingError::StockNotBookable { reason }),
            None => Ok(()),
        }
    }

    /// Commits `quantity` units. Caller holds the row lock and has already
    /// validated capacity.
    pub const fn reserve(&mut self, quantity: u32) {
        self.reserved_quantity = self.reserved_quantity.saturating_add(quantity);
    }

    /// Returns `quantity` units to the pool after a cancellation.
    pub const fn release(&mut self, quantity: u32) {
        self.reserved_quantity = self.reserved_quantity.saturating_sub(quantity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offer::{OfferCategory, Offerer, Venue};
    use crate::types::OfferId;
    use chrono::Duration;

    fn offer() -> Offer {
        Offer {
            id: OfferId::new(),
            name: "Concert".to_string(),
            category: OfferCategory::Show,
            is_duo: false,
            is_digital: false,
            is_active: true,
            can_expire: false,
            venue: Venue::new(
                "Salle Pleyel".to_string(),
                true,
                Offerer::new("Philharmonie".to_string(), true),
            ),
        }
    }

    fn stock() -> StockUnit {
        StockUnit::new(StockId::new(), offer(), Money::from_euros(20))
    }

    #[test]
    fn unlimited_stock_always_has_capacity() {
        let stock = stock();
        assert_eq!(stock.remaining(), None);
        assert!(stock.has_capacity(u32::MAX));
    }

    #[test]
    fn finite_stock_tracks_remaining() {
        let mut stock = stock();
        stock.quantity = Some(3);
        stock.reserve(2);
        assert_eq!(stock.remaining(), Some(1));
        assert!(stock.has_capacity(1));
        assert!(!stock.has_capacity(2));
        stock.release(1);
        assert_eq!(stock.remaining(), Some(2));
    }

    #[test]
    fn release_never_underflows() {
        let mut stock = stock();
        stock.release(5);
        assert_eq!(stock.reserved_quantity, 0);
    }

    #[test]
    fn bookability_rules_fire_in_order() {
        let now = Utc::now();

        let mut s = stock();
        s.is_soft_deleted = true;
        assert!(matches!(
            s.check_bookable(now),
            Err(BookingError::StockNotBookable { reason: NotBookableReason::Deleted })
        ));

        let mut s = stock();
        s.offer.is_active = false;
        assert!(matches!(
            s.check_bookable(now),
            Err(BookingError::StockNotBookable { reason: NotBookableReason::OfferInactive })
        ));

        let mut s = stock();
        s.offer.venue.is_validated = false;
        assert!(matches!(
            s.check_bookable(now),
            Err(BookingError::StockNotBookable { reason: NotBookableReason::VenueNotValidated })
        ));

        let mut s = stock();
        s.offer.venue.offerer.is_validated = false;
        assert!(matches!(
            s.check_bookable(now),
            Err(BookingError::StockNotBookable { reason: NotBookableReason::OffererNotValidated })
        ));

        let mut s = stock();
        s.booking_limit = Some(now - Duration::hours(1));
        assert!(matches!(
            s.check_bookable(now),
            Err(BookingError::StockNotBookable { reason: NotBookableReason::BookingWindowClosed })
        ));

        let mut s = stock();
        s.event_start = Some(now - Duration::hours(1));
        assert!(matches!(
            s.check_bookable(now),
            Err(BookingError::StockNotBookable { reason: NotBookableReason::EventInPast })
        ));

        assert!(stock().check_bookable(now).is_ok());
    }
}
