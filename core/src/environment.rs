//! Collaborators injected into the ledger services.
//!
//! All external dependencies are abstracted behind traits so that tests can
//! substitute deterministic implementations (see the testing crate).

use crate::types::{Role, UserId};
use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```
/// use dishware_ledger_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let before = clock.now();
/// assert!(clock.now() >= before);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock reading the system time
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// User role lookup, owned by the authentication collaborator.
///
/// Returns `None` for users the directory does not know; the ledger treats
/// them as unauthorized for everything.
pub trait RoleDirectory: Send + Sync {
    /// Role of `user`
    fn role_of(&self, user: &UserId) -> Option<Role>;
}
