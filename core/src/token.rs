//! Redemption tokens.
//!
//! The token is the 6-character code a beneficiary shows at the venue to
//! redeem a booking. The alphabet drops the glyphs people misread over a
//! counter (0/O, 1/I/L), and uniqueness is enforced at creation by checking
//! the candidate against every existing token and regenerating on collision.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of characters in a redemption token.
pub const TOKEN_LENGTH: usize = 6;

/// Unambiguous alphanumeric alphabet (31 symbols).
const ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";

/// A booking's human-readable redemption code.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingToken(String);

impl BookingToken {
    /// Returns the token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error returned when parsing a malformed token.
#[derive(Debug, Error)]
#[error("invalid redemption token: {0:?}")]
pub struct InvalidToken(String);

impl FromStr for BookingToken {
    type Err = InvalidToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let well_formed =
            s.len() == TOKEN_LENGTH && s.bytes().all(|byte| ALPHABET.contains(&byte));
        if well_formed {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidToken(s.to_string()))
        }
    }
}

/// Draws a random candidate token.
///
/// The caller owns uniqueness: check the candidate against the existing
/// token set and draw again on collision.
pub fn generate_token<R: Rng + ?Sized>(rng: &mut R) -> BookingToken {
    let text: String = (0..TOKEN_LENGTH)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect();
    BookingToken(text)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn parsing_rejects_malformed_tokens() {
        assert!("ABC234".parse::<BookingToken>().is_ok());
        assert!("abc234".parse::<BookingToken>().is_err()); // lowercase
        assert!("ABC23".parse::<BookingToken>().is_err()); // too short
        assert!("ABC2345".parse::<BookingToken>().is_err()); // too long
        assert!("ABC10Z".parse::<BookingToken>().is_err()); // ambiguous glyphs
        assert!("ABCO2Z".parse::<BookingToken>().is_err());
    }

    #[test]
    fn collision_checked_generation_yields_distinct_tokens() {
        // Mirrors the creation protocol: draw, check against every existing
        // token, redraw on collision.
        let mut rng = rand::thread_rng();
        let mut seen: HashSet<String> = HashSet::with_capacity(10_000);
        for _ in 0..10_000 {
            let token = loop {
                let candidate = generate_token(&mut rng);
                if !seen.contains(candidate.as_str()) {
                    break candidate;
                }
            };
            seen.insert(token.as_str().to_string());
        }
        assert_eq!(seen.len(), 10_000);
    }

    proptest! {
        #[test]
        fn generated_tokens_round_trip_through_parsing(seed in any::<u64>()) {
            use rand::SeedableRng;
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            let token = generate_token(&mut rng);
            prop_assert_eq!(token.as_str().len(), TOKEN_LENGTH);
            prop_assert!(token.as_str().parse::<BookingToken>().is_ok());
        }
    }
}
