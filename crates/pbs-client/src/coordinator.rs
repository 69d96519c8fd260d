//! The per-coordinator client interface.

use async_trait::async_trait;
use pbs_core::{ConsumePrivacyBudgetRequest, ConsumePrivacyBudgetResponse};

use crate::error::BudgetServiceError;

/// One coordinator's budget ledger, as reached from the client.
///
/// Implementations must be safe for concurrent use and keep no per-call
/// mutable state; a retry resends the request unmodified.
#[async_trait]
pub trait PrivacyBudgetClient: Send + Sync {
    /// Name used to identify this coordinator in logs and errors.
    fn coordinator(&self) -> &str;

    /// Charge the request's units. The response lists units that were
    /// already exhausted at this coordinator.
    async fn consume(
        &self,
        request: &ConsumePrivacyBudgetRequest,
    ) -> Result<ConsumePrivacyBudgetResponse, BudgetServiceError>;
}
