//! # Dishware Ledger Testing
//!
//! Testing utilities and helpers for the dishware inventory ledger.
//!
//! This crate provides:
//! - Mock implementations of the environment traits (clocks, role directory)
//! - [`InMemoryLedgerStore`], a deterministic [`LedgerStore`] implementation
//! - [`MovementTest`], a Given-When-Then harness for the movement pipeline
//! - proptest strategies for movement sequences
//!
//! ## Example
//!
//! ```ignore
//! use dishware_ledger_testing::{InMemoryLedgerStore, StaticRoleDirectory, test_clock};
//! use dishware_ledger_runtime::LedgerService;
//!
//! #[tokio::test]
//! async fn test_opening_stock() {
//!     let roles = StaticRoleDirectory::new();
//!     let clerk = roles.add(Role::Staff);
//!     let service = LedgerService::new(
//!         Arc::new(InMemoryLedgerStore::new()),
//!         Arc::new(test_clock()),
//!         Arc::new(roles),
//!         LedgerSettings::default(),
//!     );
//!     // ...
//! }
//! ```
//!
//! [`LedgerStore`]: dishware_ledger_core::ledger_store::LedgerStore

use chrono::{DateTime, Utc};
use dishware_ledger_core::environment::{Clock, RoleDirectory};

/// Mock implementations of environment traits.
pub mod mocks {
    #![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

    use super::{Clock, DateTime, RoleDirectory, Utc};
    use chrono::Duration;
    use dishware_ledger_core::types::{Role, UserId};
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use dishware_ledger_testing::mocks::FixedClock;
    /// use dishware_ledger_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
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

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep one handle and give the
    /// other to the service.
    ///
    /// ```
    /// use dishware_ledger_testing::mocks::ManualClock;
    /// use dishware_ledger_core::environment::Clock;
    /// use chrono::Duration;
    ///
    /// let clock = ManualClock::starting_at_test_epoch();
    /// let before = clock.now();
    /// clock.advance(Duration::days(8));
    /// assert_eq!(clock.now() - before, Duration::days(8));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Clock stopped at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Clock stopped at the same instant as [`test_clock`]
        #[must_use]
        pub fn starting_at_test_epoch() -> Self {
            Self::new(test_clock().now())
        }

        /// Move time forward
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.write().unwrap();
            *time += by;
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.write().unwrap() = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap()
        }
    }

    /// Role directory backed by a map.
    #[derive(Debug, Clone, Default)]
    pub struct StaticRoleDirectory {
        roles: Arc<RwLock<HashMap<UserId, Role>>>,
    }

    impl StaticRoleDirectory {
        /// Empty directory; every user is unknown
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a fresh user with `role` and return their id
        #[must_use]
        pub fn add(&self, role: Role) -> UserId {
            let user = UserId::new();
            self.assign(user, role);
            user
        }

        /// Give `user` the role `role`
        pub fn assign(&self, user: UserId, role: Role) {
            self.roles.write().unwrap().insert(user, role);
        }
    }

    impl RoleDirectory for StaticRoleDirectory {
        fn role_of(&self, user: &UserId) -> Option<Role> {
            self.roles.read().unwrap().get(user).copied()
        }
    }
}

/// In-memory ledger store
pub mod ledger_mocks;

/// Given-When-Then harness for the movement pipeline
pub mod movement_test;

/// proptest strategies for ledger types
pub mod strategies;

/// Route `tracing` output through the test harness.
///
/// Honours `RUST_LOG`; safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use ledger_mocks::InMemoryLedgerStore;
pub use mocks::{FixedClock, ManualClock, StaticRoleDirectory, test_clock};
pub use movement_test::MovementTest;
