//! Tunable ledger policy values.

use serde::{Deserialize, Serialize};

/// Policy windows and thresholds consulted lazily at check time.
///
/// None of these drive a background timer: the auto-confirm and archive
/// windows are compared against the clock whenever a movement or transition
/// is validated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Days after the first movement at which the opening balance locks
    /// even without an outflow
    pub opening_balance_auto_confirm_days: u32,
    /// Days without movements required before an item may be archived
    pub archive_inactivity_days: u32,
    /// Audit variance, in percent of the book quantity, above which a line
    /// counts as a large variance
    pub large_variance_threshold_pct: u32,
    /// Whether large variances force the approval gate even for surpluses
    pub large_variance_requires_approval: bool,
}

impl LedgerSettings {
    /// Set the auto-confirm window
    #[must_use]
    pub const fn with_opening_balance_auto_confirm_days(mut self, days: u32) -> Self {
        self.opening_balance_auto_confirm_days = days;
        self
    }

    /// Set the archive inactivity window
    #[must_use]
    pub const fn with_archive_inactivity_days(mut self, days: u32) -> Self {
        self.archive_inactivity_days = days;
        self
    }

    /// Set the large-variance threshold
    #[must_use]
    pub const fn with_large_variance_threshold_pct(mut self, pct: u32) -> Self {
        self.large_variance_threshold_pct = pct;
        self
    }

    /// Toggle whether large variances require approval
    #[must_use]
    pub const fn with_large_variance_requires_approval(mut self, required: bool) -> Self {
        self.large_variance_requires_approval = required;
        self
    }
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            opening_balance_auto_confirm_days: 7,
            archive_inactivity_days: 365,
            large_variance_threshold_pct: 10,
            large_variance_requires_approval: true,
        }
    }
}
