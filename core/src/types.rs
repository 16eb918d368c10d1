//! Identifiers and money for the booking domain.
//!
//! All entity identifiers are UUID newtypes so that a stock id can never be
//! passed where a booking id is expected. Monetary amounts are exact integer
//! euro-cents; the platform never does floating-point arithmetic on money.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a beneficiary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a `UserId` from an existing `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfferId(Uuid);

impl OfferId {
    /// Creates a new random `OfferId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an `OfferId` from an existing `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OfferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a stock unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockId(Uuid);

impl StockId {
    /// Creates a new random `StockId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a `StockId` from an existing `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for StockId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingId(Uuid);

impl BookingId {
    /// Creates a new random `BookingId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a `BookingId` from an existing `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BookingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Money (euro-cents, exact integer arithmetic)
// ============================================================================

/// A monetary amount in euro-cents.
///
/// Comparisons against spend ceilings are exact: spending up to a ceiling is
/// allowed, one cent past it is not, so the representation must never round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero euros.
    pub const ZERO: Self = Self(0);

    /// Creates an amount from euro-cents.
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates an amount from whole euros.
    ///
    /// # Panics
    ///
    /// Panics if the conversion overflows. Use [`Money::checked_from_euros`]
    /// for a non-panicking conversion.
    #[must_use]
    #[allow(clippy::panic)]
    pub const fn from_euros(euros: u64) -> Self {
        match euros.checked_mul(100) {
            Some(cents) => Self(cents),
            None => panic!("Money::from_euros overflow"),
        }
    }

    /// Creates an amount from whole euros with overflow checking.
    #[must_use]
    pub const fn checked_from_euros(euros: u64) -> Option<Self> {
        match euros.checked_mul(100) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Returns the amount in euro-cents.
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Returns `true` for a zero amount (a free offer).
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two amounts with overflow checking.
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Adds two amounts, clamping at the representable maximum.
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Subtracts `other`, clamping at zero.
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Multiplies by a quantity with overflow checking.
    #[must_use]
    pub const fn checked_mul(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Multiplies by a quantity, clamping at the representable maximum.
    #[must_use]
    pub const fn saturating_mul(self, quantity: u32) -> Self {
        Self(self.0.saturating_mul(quantity as u64))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02} €", self.0 / 100, self.0 % 100)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn money_from_euros() {
        assert_eq!(Money::from_euros(3).cents(), 300);
        assert_eq!(Money::checked_from_euros(u64::MAX), None);
    }

    #[test]
    fn money_checked_arithmetic() {
        let a = Money::from_cents(150);
        assert_eq!(a.checked_add(Money::from_cents(50)), Some(Money::from_euros(2)));
        assert_eq!(a.checked_mul(2), Some(Money::from_cents(300)));
        assert_eq!(Money::from_cents(u64::MAX).checked_add(Money::from_cents(1)), None);
        assert_eq!(Money::from_cents(100).saturating_sub(Money::from_cents(250)), Money::ZERO);
    }

    #[test]
    fn money_display_is_euros_and_cents() {
        assert_eq!(Money::from_cents(1234).to_string(), "12.34 €");
        assert_eq!(Money::from_cents(5).to_string(), "0.05 €");
    }

    #[test]
    fn ids_are_distinct_types_with_distinct_values() {
        assert_ne!(BookingId::new(), BookingId::new());
        let uuid = Uuid::new_v4();
        assert_eq!(StockId::from_uuid(uuid).as_uuid(), &uuid);
    }
}
