//! Spend ceilings: the beneficiary's credit and its per-category buckets.
//!
//! A beneficiary holds a fixed credit (`Deposit`). Every non-cancelled
//! booking consumes overall credit; bookings on capped goods additionally
//! consume a physical or digital sub-ceiling. The snapshot is recomputed on
//! demand from the booking history and never persisted.
//!
//! Ceilings are soft UX limits, not ledger balances: the snapshot is read
//! without holding any stock lock, so two simultaneous bookings by one user
//! can jointly overshoot a ceiling by a small margin. That slack is accepted;
//! the hard safety invariant of the platform is the stock counter, not the
//! ceilings.

use crate::error::BookingError;
use crate::offer::CapBucketKind;
use crate::types::{Money, UserId};
use serde::{Deserialize, Serialize};

/// A beneficiary's fixed credit and optional per-category ceilings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    /// Overall credit granted to the beneficiary.
    pub amount: Money,
    /// Ceiling on physical goods, when the grant carries one.
    pub physical_cap: Option<Money>,
    /// Ceiling on digital goods, when the grant carries one.
    pub digital_cap: Option<Money>,
}

impl Deposit {
    /// Creates a deposit.
    #[must_use]
    pub const fn new(amount: Money, physical_cap: Option<Money>, digital_cap: Option<Money>) -> Self {
        Self {
            amount,
            physical_cap,
            digital_cap,
        }
    }
}

/// The beneficiary as seen by the booking core: credit plus policy flags.
/// Registration and identity checks live elsewhere.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique user identifier.
    pub id: UserId,
    /// Whether the user may book zero-price offers.
    pub can_book_free_offers: bool,
    /// Granted credit.
    pub deposit: Deposit,
}

/// One ceiling and the amount already counted against it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendBucket {
    /// The ceiling.
    pub cap: Money,
    /// Sum of non-cancelled booking amounts counted against the ceiling.
    pub spent: Money,
}

impl SpendBucket {
    /// Creates an empty bucket under `cap`.
    #[must_use]
    pub const fn new(cap: Money) -> Self {
        Self {
            cap,
            spent: Money::ZERO,
        }
    }

    /// Credit left under the ceiling.
    #[must_use]
    pub const fn remaining(&self) -> Money {
        self.cap.saturating_sub(self.spent)
    }

    /// Whether adding `amount` would push past the ceiling. Spending exactly
    /// up to the ceiling is allowed.
    #[must_use]
    pub fn would_exceed(&self, amount: Money) -> bool {
        self.spent.saturating_add(amount) > self.cap
    }

    const fn add(&mut self, amount: Money) {
        self.spent = self.spent.saturating_add(amount);
    }
}

/// One booking's contribution to the snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpendItem {
    /// The booking's total amount.
    pub amount: Money,
    /// Which sub-ceiling the amount counts against, per the offer's
    /// classification; `None` consumes overall credit only.
    pub bucket: Option<CapBucketKind>,
}

/// A user's spend position across the three ceilings, computed on demand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendSnapshot {
    /// Overall credit.
    pub all: SpendBucket,
    /// Physical-goods ceiling, when the deposit carries one.
    pub physical: Option<SpendBucket>,
    /// Digital-goods ceiling, when the deposit carries one.
    pub digital: Option<SpendBucket>,
}

impl SpendSnapshot {
    /// Builds the snapshot from the deposit and the user's non-cancelled
    /// bookings.
    pub fn compute(deposit: &Deposit, items: impl IntoIterator<Item = SpendItem>) -> Self {
        let mut snapshot = Self {
            all: SpendBucket::new(deposit.amount),
            physical: deposit.physical_cap.map(SpendBucket::new),
            digital: deposit.digital_cap.map(SpendBucket::new),
        };

        for item in items {
            snapshot.all.add(item.amount);
            match item.bucket {
                Some(CapBucketKind::Physical) => {
                    if let Some(bucket) = snapshot.physical.as_mut() {
                        bucket.add(item.amount);
                    }
                }
                Some(CapBucketKind::Digital) => {
                    if let Some(bucket) = snapshot.digital.as_mut() {
                        bucket.add(item.amount);
                    }
                }
                None => {}
            }
        }

        snapshot
    }

    /// Checks that a candidate amount fits under every eligible ceiling.
    ///
    /// # Errors
    ///
    /// - [`BookingError::InsufficientFunds`] when overall credit would be
    ///   exceeded.
    /// - [`BookingError::PhysicalCapReached`] / [`BookingError::DigitalCapReached`]
    ///   when the offer's sub-ceiling would be exceeded. Each error carries
    ///   the ceiling for display.
    pub fn check_can_afford(
        &self,
        amount: Money,
        bucket: Option<CapBucketKind>,
    ) -> Result<(), BookingError> {
        if self.all.would_exceed(amount) {
            return Err(BookingError::InsufficientFunds { cap: self.all.cap });
        }

        match bucket {
            Some(CapBucketKind::Physical) => {
                if let Some(physical) = &self.physical {
                    if physical.would_exceed(amount) {
                        return Err(BookingError::PhysicalCapReached { cap: physical.cap });
                    }
                }
            }
            Some(CapBucketKind::Digital) => {
                if let Some(digital) = &self.digital {
                    if digital.would_exceed(amount) {
                        return Err(BookingError::DigitalCapReached { cap: digital.cap });
                    }
                }
            }
            None => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit() -> Deposit {
        Deposit::new(
            Money::from_euros(300),
            Some(Money::from_euros(200)),
            Some(Money::from_euros(100)),
        )
    }

    fn item(amount: Money, bucket: Option<CapBucketKind>) -> SpendItem {
        SpendItem { amount, bucket }
    }

    #[test]
    fn every_item_counts_toward_overall_credit() {
        let snapshot = SpendSnapshot::compute(
            &deposit(),
            [
                item(Money::from_euros(10), None),
                item(Money::from_euros(20), Some(CapBucketKind::Physical)),
                item(Money::from_euros(30), Some(CapBucketKind::Digital)),
            ],
        );
        assert_eq!(snapshot.all.spent, Money::from_euros(60));
        assert_eq!(snapshot.physical.map(|b| b.spent), Some(Money::from_euros(20)));
        assert_eq!(snapshot.digital.map(|b| b.spent), Some(Money::from_euros(30)));
    }

    #[test]
    fn spending_exactly_to_the_cap_is_allowed() {
        let snapshot = SpendSnapshot::compute(
            &deposit(),
            [item(Money::from_cents(29_999), None)],
        );
        assert!(snapshot.check_can_afford(Money::from_cents(1), None).is_ok());
    }

    #[test]
    fn one_cent_past_the_cap_is_rejected_with_the_cap() {
        let snapshot = SpendSnapshot::compute(
            &deposit(),
            [item(Money::from_euros(300), None)],
        );
        let err = snapshot.check_can_afford(Money::from_cents(1), None);
        assert!(matches!(
            err,
            Err(BookingError::InsufficientFunds { cap }) if cap == Money::from_euros(300)
        ));
    }

    #[test]
    fn sub_ceilings_only_bind_their_bucket() {
        let snapshot = SpendSnapshot::compute(
            &deposit(),
            [item(Money::from_euros(100), Some(CapBucketKind::Digital))],
        );

        // digital bucket is full: one more digital cent is refused
        assert!(matches!(
            snapshot.check_can_afford(Money::from_cents(1), Some(CapBucketKind::Digital)),
            Err(BookingError::DigitalCapReached { cap }) if cap == Money::from_euros(100)
        ));
        // but outings and physical goods still fit
        assert!(snapshot.check_can_afford(Money::from_euros(50), None).is_ok());
        assert!(snapshot
            .check_can_afford(Money::from_euros(50), Some(CapBucketKind::Physical))
            .is_ok());
    }

    #[test]
    fn physical_ceiling_is_enforced() {
        let snapshot = SpendSnapshot::compute(
            &deposit(),
            [item(Money::from_euros(200), Some(CapBucketKind::Physical))],
        );
        assert!(matches!(
            snapshot.check_can_afford(Money::from_cents(1), Some(CapBucketKind::Physical)),
            Err(BookingError::PhysicalCapReached { cap }) if cap == Money::from_euros(200)
        ));
    }

    #[test]
    fn deposit_without_sub_ceilings_only_checks_overall_credit() {
        let free_deposit = Deposit::new(Money::from_euros(300), None, None);
        let snapshot = SpendSnapshot::compute(
            &free_deposit,
            [item(Money::from_euros(250), Some(CapBucketKind::Digital))],
        );
        assert!(snapshot
            .check_can_afford(Money::from_euros(50), Some(CapBucketKind::Digital))
            .is_ok());
        assert!(snapshot
            .check_can_afford(Money::from_cents(5_001), Some(CapBucketKind::Digital))
            .is_err());
    }

    #[test]
    fn remaining_is_clamped_at_zero() {
        let bucket = SpendBucket {
            cap: Money::from_euros(10),
            spent: Money::from_euros(15),
        };
        assert_eq!(bucket.remaining(), Money::ZERO);
    }
}
