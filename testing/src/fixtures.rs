//! Builders for the entities tests keep constructing.
//!
//! Defaults describe the common case: a validated venue, a published
//! non-duo physical offer with unlimited stock, and a beneficiary holding
//! the standard credit (300 € overall, 200 € physical, 100 € digital).

use chrono::{DateTime, Utc};
use encore_core::{
    Deposit, Money, Offer, OfferCategory, OfferId, Offerer, StockId, StockUnit, User, UserId,
    Venue,
};

/// Standard beneficiary credit used across tests.
#[must_use]
pub fn standard_deposit() -> Deposit {
    Deposit::new(
        Money::from_euros(300),
        Some(Money::from_euros(200)),
        Some(Money::from_euros(100)),
    )
}

/// Builder for test users.
#[derive(Debug)]
pub struct UserBuilder {
    can_book_free_offers: bool,
    deposit: Deposit,
}

impl UserBuilder {
    /// A beneficiary with the standard credit.
    #[must_use]
    pub fn beneficiary() -> Self {
        Self {
            can_book_free_offers: true,
            deposit: standard_deposit(),
        }
    }

    /// Denies the free-offer policy flag.
    #[must_use]
    pub const fn cannot_book_free_offers(mut self) -> Self {
        self.can_book_free_offers = false;
        self
    }

    /// Overrides the whole deposit.
    #[must_use]
    pub const fn deposit(mut self, deposit: Deposit) -> Self {
        self.deposit = deposit;
        self
    }

    /// Overrides just the overall credit, keeping the standard sub-ceilings.
    #[must_use]
    pub const fn credit(mut self, amount: Money) -> Self {
        self.deposit.amount = amount;
        self
    }

    /// Builds the user.
    #[must_use]
    pub fn build(self) -> User {
        User {
            id: UserId::new(),
            can_book_free_offers: self.can_book_free_offers,
            deposit: self.deposit,
        }
    }
}

/// Builder for test stock units (and their offer).
#[derive(Debug)]
pub struct StockBuilder {
    price: Money,
    quantity: Option<u32>,
    event_start: Option<DateTime<Utc>>,
    booking_limit: Option<DateTime<Utc>>,
    is_soft_deleted: bool,
    category: OfferCategory,
    is_duo: bool,
    is_digital: bool,
    is_active: bool,
    can_expire: bool,
    venue_validated: bool,
    offerer_validated: bool,
}

impl StockBuilder {
    /// A published, validated, unlimited physical stock at 10 €.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            price: Money::from_euros(10),
            quantity: None,
            event_start: None,
            booking_limit: None,
            is_soft_deleted: false,
            category: OfferCategory::Show,
            is_duo: false,
            is_digital: false,
            is_active: true,
            can_expire: false,
            venue_validated: true,
            offerer_validated: true,
        }
    }

    /// Sets the unit price.
    #[must_use]
    pub const fn price(mut self, price: Money) -> Self {
        self.price = price;
        self
    }

    /// Makes the stock free.
    #[must_use]
    pub const fn free(mut self) -> Self {
        self.price = Money::ZERO;
        self
    }

    /// Caps the sellable quantity.
    #[must_use]
    pub const fn quantity(mut self, quantity: u32) -> Self {
        self.quantity = Some(quantity);
        self
    }

    /// Schedules the underlying event.
    #[must_use]
    pub const fn event_start(mut self, start: DateTime<Utc>) -> Self {
        self.event_start = Some(start);
        self
    }

    /// Sets the booking-limit deadline.
    #[must_use]
    pub const fn booking_limit(mut self, limit: DateTime<Utc>) -> Self {
        self.booking_limit = Some(limit);
        self
    }

    /// Marks the stock withdrawn.
    #[must_use]
    pub const fn soft_deleted(mut self) -> Self {
        self.is_soft_deleted = true;
        self
    }

    /// Sets the offer category.
    #[must_use]
    pub const fn category(mut self, category: OfferCategory) -> Self {
        self.category = category;
        self
    }

    /// Allows two-seat bookings.
    #[must_use]
    pub const fn duo(mut self) -> Self {
        self.is_duo = true;
        self
    }

    /// Makes the offer digital.
    #[must_use]
    pub const fn digital(mut self) -> Self {
        self.is_digital = true;
        self
    }

    /// Unpublishes the offer.
    #[must_use]
    pub const fn inactive_offer(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Lets unredeemed bookings on this offer expire.
    #[must_use]
    pub const fn can_expire(mut self) -> Self {
        self.can_expire = true;
        self
    }

    /// Leaves the venue unvalidated.
    #[must_use]
    pub const fn unvalidated_venue(mut self) -> Self {
        self.venue_validated = false;
        self
    }

    /// Leaves the managing organization unvalidated.
    #[must_use]
    pub const fn unvalidated_offerer(mut self) -> Self {
        self.offerer_validated = false;
        self
    }

    /// Builds the stock unit with a fresh offer.
    #[must_use]
    pub fn build(self) -> StockUnit {
        let offer = Offer {
            id: OfferId::new(),
            name: "Une offre culturelle".to_string(),
            category: self.category,
            is_duo: self.is_duo,
            is_digital: self.is_digital,
            is_active: self.is_active,
            can_expire: self.can_expire,
            venue: Venue::new(
                "Le Vingt-Sept".to_string(),
                self.venue_validated,
                Offerer::new("Compagnie du Détour".to_string(), self.offerer_validated),
            ),
        };

        StockUnit {
            id: StockId::new(),
            offer,
            price: self.price,
            quantity: self.quantity,
            reserved_quantity: 0,
            event_start: self.event_start,
            booking_limit: self.booking_limit,
            is_soft_deleted: self.is_soft_deleted,
        }
    }
}

impl Default for StockBuilder {
    fn default() -> Self {
        Self::new()
    }
}
