//! Budget clearance for one unit of work.

use chrono::{DateTime, Utc};
use pbs_core::{ConsumePrivacyBudgetRequest, PrivacyBudgetUnit, ReportingWindowValidator};
use tracing::{info, warn};

use crate::distributed::DistributedPrivacyBudgetClient;
use crate::error::{DistributedBudgetError, ErrorKind};

/// Outcome of a clearance attempt that reached a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clearance {
    /// Every coordinator charged every unit; the work may proceed.
    Cleared,
    /// Units with reporting windows outside the freshness range. Nothing
    /// was sent to any coordinator.
    Rejected(Vec<PrivacyBudgetUnit>),
    /// Units at least one coordinator reported as exhausted.
    Exhausted(Vec<PrivacyBudgetUnit>),
}

impl Clearance {
    pub fn is_cleared(&self) -> bool {
        matches!(self, Self::Cleared)
    }

    /// Error classification when the work may not proceed.
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Cleared | Self::Exhausted(_) => None,
            Self::Rejected(_) => Some(ErrorKind::InvalidWindow),
        }
    }
}

/// Screens reporting windows locally, then consumes budget at every
/// coordinator.
pub struct BudgetGate {
    client: DistributedPrivacyBudgetClient,
    validator: ReportingWindowValidator,
    limit: Option<u32>,
}

impl BudgetGate {
    pub fn new(client: DistributedPrivacyBudgetClient, offset_days: u32) -> Self {
        Self {
            client,
            validator: ReportingWindowValidator::new(offset_days),
            limit: None,
        }
    }

    /// Send an explicit budget limit with every request instead of relying on
    /// each coordinator's default.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn client(&self) -> &DistributedPrivacyBudgetClient {
        &self.client
    }

    pub async fn clear(
        &self,
        origin: &str,
        units: Vec<PrivacyBudgetUnit>,
    ) -> Result<Clearance, DistributedBudgetError> {
        self.clear_at(origin, units, Utc::now()).await
    }

    /// Clear `units` for `origin`, judging windows against `now`.
    pub async fn clear_at(
        &self,
        origin: &str,
        units: Vec<PrivacyBudgetUnit>,
        now: DateTime<Utc>,
    ) -> Result<Clearance, DistributedBudgetError> {
        let invalid = self.validator.check_at(&units, now);
        if !invalid.is_empty() {
            warn!(
                origin,
                invalid = invalid.len(),
                offset_days = self.validator.offset_days(),
                "rejecting units outside the reporting window range"
            );
            return Ok(Clearance::Rejected(invalid));
        }

        let mut request = ConsumePrivacyBudgetRequest::new(origin, units)
            .map_err(|e| DistributedBudgetError::InvalidRequest(e.to_string()))?;
        if let Some(limit) = self.limit {
            request = request
                .with_limit(limit)
                .map_err(|e| DistributedBudgetError::InvalidRequest(e.to_string()))?;
        }

        let response = self.client.consume_privacy_budget(&request).await?;
        if response.is_fully_cleared() {
            info!(origin, units = request.units().len(), "budget cleared");
            Ok(Clearance::Cleared)
        } else {
            info!(
                origin,
                exhausted = response.exhausted_privacy_budget_units.len(),
                "budget exhausted"
            );
            Ok(Clearance::Exhausted(response.exhausted_privacy_budget_units))
        }
    }
}
