//! Time abstraction.
//!
//! Confirmation windows, cancellation deadlines and expiry sweeps all depend
//! on "now", so the service reads time through a trait. Production code uses
//! [`SystemClock`]; tests use the fixed clock from `encore-testing`.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
