//! Ledger trait and helpers shared by the implementations.

use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};
use pbs_core::{PrivacyBudgetRecord, PrivacyBudgetUnit, Result};

/// Storage contract for one coordinator's budget ledger.
///
/// Implementations must make each unit's check-and-increment a single atomic
/// step: concurrent consumers of the same (origin, key, window) can never
/// push `consumed_budget_count` past `limit`.
pub trait BudgetLedger: Send + Sync {
    /// Charge every distinct unit once under `origin`.
    ///
    /// Returns the units whose count was already at `limit`; those records are
    /// left unchanged. Each unit's fate is independent of the others.
    fn consume(
        &self,
        origin: &str,
        units: &[PrivacyBudgetUnit],
        limit: u32,
    ) -> Result<Vec<PrivacyBudgetUnit>>;

    /// Current records for the given units. Units never charged are omitted.
    fn get_records(
        &self,
        origin: &str,
        units: &[PrivacyBudgetUnit],
    ) -> Result<Vec<PrivacyBudgetRecord>>;

    /// Drop records whose expiry is at or before `now`. Returns how many.
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Expiry policy for ledger rows: window + reporting offset + buffer.
#[derive(Debug, Clone, Copy)]
pub struct RecordTtl {
    pub reporting_window_offset_days: u32,
    pub buffer_days: u32,
}

impl RecordTtl {
    pub fn new(reporting_window_offset_days: u32, buffer_days: u32) -> Self {
        Self {
            reporting_window_offset_days,
            buffer_days,
        }
    }

    pub fn expires_at(&self, reporting_window: DateTime<Utc>) -> DateTime<Utc> {
        reporting_window
            + TimeDelta::days(i64::from(self.reporting_window_offset_days))
            + TimeDelta::days(i64::from(self.buffer_days))
    }
}

impl Default for RecordTtl {
    fn default() -> Self {
        Self::new(
            pbs_core::config::DEFAULT_REPORTING_WINDOW_OFFSET_DAYS,
            pbs_core::config::DEFAULT_RECORD_TTL_BUFFER_DAYS,
        )
    }
}

/// Drop repeated units, keeping first-appearance order.
pub fn dedupe_units(units: &[PrivacyBudgetUnit]) -> Vec<&PrivacyBudgetUnit> {
    let mut seen = HashSet::new();
    units.iter().filter(|u| seen.insert(*u)).collect()
}
