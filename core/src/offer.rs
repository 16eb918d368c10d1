//! Offers, venues and the spend-ceiling classification.
//!
//! An offer is the catalog entity a stock unit belongs to. The booking core
//! never creates offers (catalog import is external); it reads their flags to
//! validate bookability and to decide which spend ceiling a booking counts
//! against.

use crate::types::OfferId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Spend-ceiling bucket a booking's amount counts against, on top of the
/// overall credit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapBucketKind {
    /// Physical-goods ceiling.
    Physical,
    /// Digital-goods ceiling.
    Digital,
}

/// Catalog category of an offer.
///
/// The category drives ceiling eligibility: goods are capped, outings are
/// not, and a handful of subscription products are deliberately exempt from
/// the sub-ceilings while still consuming overall credit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfferCategory {
    /// Books, paper or digital.
    Book,
    /// Musical instruments.
    Instrument,
    /// Recurring subscription products (media libraries, presses passes).
    Subscription,
    /// Films and series.
    Audiovisual,
    /// Recorded music, physical or streamed.
    Music,
    /// Press articles and online press.
    Press,
    /// Video games.
    VideoGame,
    /// Live shows and concerts.
    Show,
    /// Museums and exhibitions.
    Museum,
    /// Conferences and meet-the-artist events.
    Conference,
}

impl OfferCategory {
    /// Returns which sub-ceiling an offer of this category counts against.
    ///
    /// `None` means the amount consumes overall credit only: outings are
    /// never capped by goods ceilings, and subscriptions are exempt by
    /// policy. Goods follow their delivery medium.
    #[must_use]
    pub const fn cap_bucket(self, is_digital: bool) -> Option<CapBucketKind> {
        match self {
            Self::Show | Self::Museum | Self::Conference | Self::Subscription => None,
            Self::Instrument => Some(CapBucketKind::Physical),
            Self::Book | Self::Audiovisual | Self::Music | Self::Press | Self::VideoGame => {
                if is_digital {
                    Some(CapBucketKind::Digital)
                } else {
                    Some(CapBucketKind::Physical)
                }
            }
        }
    }

    /// Stable storage name of the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Book => "book",
            Self::Instrument => "instrument",
            Self::Subscription => "subscription",
            Self::Audiovisual => "audiovisual",
            Self::Music => "music",
            Self::Press => "press",
            Self::VideoGame => "video_game",
            Self::Show => "show",
            Self::Museum => "museum",
            Self::Conference => "conference",
        }
    }
}

impl fmt::Display for OfferCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown category name.
#[derive(Debug, Error)]
#[error("unknown offer category: {0}")]
pub struct ParseCategoryError(String);

impl FromStr for OfferCategory {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "book" => Ok(Self::Book),
            "instrument" => Ok(Self::Instrument),
            "subscription" => Ok(Self::Subscription),
            "audiovisual" => Ok(Self::Audiovisual),
            "music" => Ok(Self::Music),
            "press" => Ok(Self::Press),
            "video_game" => Ok(Self::VideoGame),
            "show" => Ok(Self::Show),
            "museum" => Ok(Self::Museum),
            "conference" => Ok(Self::Conference),
            other => Err(ParseCategoryError(other.to_string())),
        }
    }
}

/// The organization managing a venue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offerer {
    /// Legal name.
    pub name: String,
    /// Whether the organization passed validation and may sell.
    pub is_validated: bool,
}

impl Offerer {
    /// Creates a new `Offerer`.
    #[must_use]
    pub const fn new(name: String, is_validated: bool) -> Self {
        Self { name, is_validated }
    }
}

/// The venue an offer is attached to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    /// Venue name (e.g. "Librairie du Canal").
    pub name: String,
    /// Whether the venue passed validation.
    pub is_validated: bool,
    /// Managing organization.
    pub offerer: Offerer,
}

impl Venue {
    /// Creates a new `Venue`.
    #[must_use]
    pub const fn new(name: String, is_validated: bool, offerer: Offerer) -> Self {
        Self {
            name,
            is_validated,
            offerer,
        }
    }
}

/// A bookable catalog offer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    /// Unique offer identifier.
    pub id: OfferId,
    /// Display name.
    pub name: String,
    /// Catalog category.
    pub category: OfferCategory,
    /// Whether one booking may cover two seats.
    pub is_duo: bool,
    /// Whether the offer is delivered online.
    pub is_digital: bool,
    /// Whether the offer is currently published.
    pub is_active: bool,
    /// Whether unredeemed bookings on this offer eventually expire.
    pub can_expire: bool,
    /// Venue carrying the offer.
    pub venue: Venue,
}

impl Offer {
    /// Largest quantity a single booking may carry for this offer.
    #[must_use]
    pub const fn max_quantity_per_booking(&self) -> u32 {
        if self.is_duo { 2 } else { 1 }
    }

    /// Returns which sub-ceiling a booking of this offer counts against.
    #[must_use]
    pub const fn cap_bucket(&self) -> Option<CapBucketKind> {
        self.category.cap_bucket(self.is_digital)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goods_follow_delivery_medium() {
        assert_eq!(OfferCategory::Book.cap_bucket(false), Some(CapBucketKind::Physical));
        assert_eq!(OfferCategory::Book.cap_bucket(true), Some(CapBucketKind::Digital));
        assert_eq!(OfferCategory::Press.cap_bucket(true), Some(CapBucketKind::Digital));
        assert_eq!(OfferCategory::Music.cap_bucket(false), Some(CapBucketKind::Physical));
    }

    #[test]
    fn instruments_are_always_physical() {
        assert_eq!(OfferCategory::Instrument.cap_bucket(false), Some(CapBucketKind::Physical));
        assert_eq!(OfferCategory::Instrument.cap_bucket(true), Some(CapBucketKind::Physical));
    }

    #[test]
    fn outings_and_subscriptions_consume_overall_credit_only() {
        assert_eq!(OfferCategory::Show.cap_bucket(false), None);
        assert_eq!(OfferCategory::Museum.cap_bucket(false), None);
        assert_eq!(OfferCategory::Conference.cap_bucket(true), None);
        assert_eq!(OfferCategory::Subscription.cap_bucket(false), None);
        assert_eq!(OfferCategory::Subscription.cap_bucket(true), None);
    }

    #[test]
    fn category_names_round_trip() {
        for category in [
            OfferCategory::Book,
            OfferCategory::Instrument,
            OfferCategory::Subscription,
            OfferCategory::Audiovisual,
            OfferCategory::Music,
            OfferCategory::Press,
            OfferCategory::VideoGame,
            OfferCategory::Show,
            OfferCategory::Museum,
            OfferCategory::Conference,
        ] {
            assert_eq!(category.as_str().parse::<OfferCategory>().ok(), Some(category));
        }
        assert!("karaoke".parse::<OfferCategory>().is_err());
    }
}
