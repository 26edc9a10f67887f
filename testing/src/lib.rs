//! # Curare Testing
//!
//! Testing utilities for the Curare care-request core.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - [`InMemoryRequestStore`]: a `RequestStore` + `CatalogStore` that honours
//!   transition guards exactly like the PostgreSQL store
//! - [`fixtures`]: catalog entries and submission builders
//!
//! ## Example
//!
//! ```
//! use curare_testing::{fixtures, test_clock, InMemoryRequestStore};
//!
//! let store = InMemoryRequestStore::with_catalog(
//!     vec![fixtures::service_type()],
//!     fixtures::symptoms(),
//! );
//! assert!(store.is_empty());
//! let _clock = test_clock();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use curare_core::environment::Clock;

pub mod fixtures;
mod store_mocks;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use curare_testing::mocks::FixedClock;
    /// use curare_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep one handle and pass
    /// another into the service under test.
    ///
    /// # Example
    ///
    /// ```
    /// use curare_testing::mocks::ManualClock;
    /// use curare_core::environment::Clock;
    /// use chrono::Duration;
    ///
    /// let clock = ManualClock::new(chrono::Utc::now());
    /// let start = clock.now();
    /// clock.advance(Duration::minutes(5));
    /// assert_eq!(clock.now() - start, Duration::minutes(5));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time.
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(super::fixtures::epoch())
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use store_mocks::InMemoryRequestStore;
