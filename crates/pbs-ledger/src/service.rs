//! Coordinator-side handling of a consume request.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pbs_core::{
    ConsumePrivacyBudgetRequest, ConsumePrivacyBudgetResponse, Error, ReportingWindowValidator,
    Result,
};
use tracing::info;

use crate::ledger::BudgetLedger;

/// Validates consume requests and applies them to a ledger.
pub struct ConsumeBudgetService {
    ledger: Arc<dyn BudgetLedger>,
    default_limit: u32,
    validator: ReportingWindowValidator,
}

impl ConsumeBudgetService {
    pub fn new(ledger: Arc<dyn BudgetLedger>, default_limit: u32, offset_days: u32) -> Self {
        Self {
            ledger,
            default_limit,
            validator: ReportingWindowValidator::new(offset_days),
        }
    }

    pub fn ledger(&self) -> &Arc<dyn BudgetLedger> {
        &self.ledger
    }

    pub fn default_limit(&self) -> u32 {
        self.default_limit
    }

    /// Validate and consume, judging reporting windows against the wall clock.
    pub fn handle(
        &self,
        request: &ConsumePrivacyBudgetRequest,
    ) -> Result<ConsumePrivacyBudgetResponse> {
        self.handle_at(request, Utc::now())
    }

    /// Validate and consume with an explicit `now`.
    ///
    /// Invalid requests are rejected before the ledger is touched.
    pub fn handle_at(
        &self,
        request: &ConsumePrivacyBudgetRequest,
        now: DateTime<Utc>,
    ) -> Result<ConsumePrivacyBudgetResponse> {
        request.validate()?;

        let invalid = self.validator.check_at(request.units(), now);
        if !invalid.is_empty() {
            let listed: Vec<String> = invalid.iter().map(|u| u.to_string()).collect();
            return Err(Error::InvalidArgument(format!(
                "Reporting windows need to be within the last {} days; invalid units: [{}]",
                self.validator.offset_days(),
                listed.join(", ")
            )));
        }

        let limit = request.privacy_budget_limit().unwrap_or(self.default_limit);
        let exhausted =
            self.ledger
                .consume(request.attribution_report_to(), request.units(), limit)?;

        info!(
            origin = request.attribution_report_to(),
            units = request.units().len(),
            exhausted = exhausted.len(),
            limit,
            "Processed consume request"
        );
        Ok(ConsumePrivacyBudgetResponse::exhausted(exhausted))
    }
}
