//! Runtime configuration for the reservation service.
//!
//! Loaded from environment variables with sensible defaults. Behavior
//! toggles that the platform historically flipped at runtime (digital
//! auto-activation, search reindexing) are plain fields here, threaded into
//! the service at construction: no ambient global state.

use chrono::Duration;
use encore_core::ConfirmationPolicy;
use serde::{Deserialize, Serialize};
use std::env;

/// Configuration of the reservation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfig {
    /// Hours before an event at which bookings lock in.
    pub confirmation_lead_time_hours: i64,
    /// Hours after creation during which self-cancellation stays open.
    pub confirmation_grace_period_hours: i64,
    /// Days an unredeemed booking on an expirable offer survives.
    pub booking_ttl_days: i64,
    /// Bounded wait on the stock row lock, in milliseconds. Consumed by the
    /// storage engine at construction.
    pub stock_lock_timeout_ms: u64,
    /// Mark digital bookings used at creation.
    pub auto_activate_digital: bool,
    /// Enqueue the offer for search reindexing on booking changes.
    pub reindex_offers: bool,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            confirmation_lead_time_hours: 48,
            confirmation_grace_period_hours: 72,
            booking_ttl_days: 30,
            stock_lock_timeout_ms: 5_000,
            auto_activate_digital: true,
            reindex_offers: false,
        }
    }
}

impl BookingConfig {
    /// Loads a local `.env` file when one is present, then reads the
    /// configuration.
    #[must_use]
    pub fn from_env_with_dotfile() -> Self {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Loads configuration from environment variables, falling back to the
    /// defaults above.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            confirmation_lead_time_hours: env::var("BOOKING_CONFIRMATION_LEAD_TIME_HOURS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.confirmation_lead_time_hours),
            confirmation_grace_period_hours: env::var("BOOKING_CONFIRMATION_GRACE_PERIOD_HOURS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.confirmation_grace_period_hours),
            booking_ttl_days: env::var("BOOKING_TTL_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.booking_ttl_days),
            stock_lock_timeout_ms: env::var("STOCK_LOCK_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.stock_lock_timeout_ms),
            auto_activate_digital: env::var("BOOKING_AUTO_ACTIVATE_DIGITAL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.auto_activate_digital),
            reindex_offers: env::var("BOOKING_REINDEX_OFFERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.reindex_offers),
        }
    }

    /// Confirmation-window parameters derived from this configuration.
    #[must_use]
    pub fn confirmation_policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy {
            lead_time: Duration::hours(self.confirmation_lead_time_hours),
            grace_period: Duration::hours(self.confirmation_grace_period_hours),
        }
    }

    /// How long an unredeemed expirable booking survives.
    #[must_use]
    pub fn booking_ttl(&self) -> Duration {
        Duration::days(self.booking_ttl_days)
    }

    /// Bounded wait on the stock row lock.
    #[must_use]
    pub const fn stock_lock_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.stock_lock_timeout_ms)
    }
}
