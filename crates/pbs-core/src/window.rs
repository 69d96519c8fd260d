//! Reporting-window freshness checks.
//!
//! A unit may only be charged if its reporting window lies strictly inside
//! `(now - offset_days, now)`. Both boundaries are exclusive: the current
//! instant is still in flux and anything at or past the horizon is beyond
//! retention.

use chrono::{DateTime, TimeDelta, Utc};

use crate::model::PrivacyBudgetUnit;

/// Rejects units whose reporting window falls outside the freshness range.
#[derive(Debug, Clone, Copy)]
pub struct ReportingWindowValidator {
    offset_days: u32,
}

impl ReportingWindowValidator {
    pub fn new(offset_days: u32) -> Self {
        Self { offset_days }
    }

    pub fn offset_days(&self) -> u32 {
        self.offset_days
    }

    /// Returns the units with invalid windows, judged against the current time.
    pub fn check(&self, units: &[PrivacyBudgetUnit]) -> Vec<PrivacyBudgetUnit> {
        self.check_at(units, Utc::now())
    }

    /// Returns the units with invalid windows, judged against `now`.
    ///
    /// `now` is fixed for the whole batch.
    pub fn check_at(
        &self,
        units: &[PrivacyBudgetUnit],
        now: DateTime<Utc>,
    ) -> Vec<PrivacyBudgetUnit> {
        let min = now - TimeDelta::days(i64::from(self.offset_days));
        units
            .iter()
            .filter(|u| !(u.reporting_window > min && u.reporting_window < now))
            .cloned()
            .collect()
    }
}

/// Free-function form of [`ReportingWindowValidator::check`].
pub fn check_for_invalid_reporting_windows(
    units: &[PrivacyBudgetUnit],
    offset_days: u32,
) -> Vec<PrivacyBudgetUnit> {
    ReportingWindowValidator::new(offset_days).check(units)
}
