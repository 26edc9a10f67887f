//! Injected dependencies.
//!
//! The Lifecycle Engine reads the current time through [`Clock`] so tests can
//! pin it (see `curare_testing::FixedClock`).

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability.
///
/// # Example
///
/// ```
/// use curare_core::environment::{Clock, SystemClock};
///
/// let now = SystemClock.now();
/// assert!(now <= chrono::Utc::now());
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}
