//! Shared application state.

use std::collections::HashMap;
use std::sync::Arc;

use pbs_core::BudgetConfig;
use pbs_ledger::{BudgetLedger, ConsumeBudgetService};

/// Origin entry that lets a token charge any reporting origin.
pub const ANY_ORIGIN: &str = "*";

/// Result of checking a caller's credentials against a claimed origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Allowed,
    /// No bearer token, or one this coordinator does not know.
    Unauthenticated,
    /// Known token that may not charge the claimed origin.
    Forbidden,
}

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: BudgetConfig,
    pub service: ConsumeBudgetService,
    allowed_identities: HashMap<String, Vec<String>>,
}

impl AppState {
    pub fn new(config: BudgetConfig, ledger: Arc<dyn BudgetLedger>) -> Self {
        let service = ConsumeBudgetService::new(
            ledger,
            config.budget_limit,
            config.reporting_window_offset_days,
        );
        let allowed_identities = config.allowed_identities.clone();
        Self {
            config,
            service,
            allowed_identities,
        }
    }

    /// Check whether `token` may charge budget on behalf of `origin`.
    pub fn authorize(&self, token: Option<&str>, origin: &str) -> Authorization {
        let Some(origins) = token.and_then(|t| self.allowed_identities.get(t)) else {
            return Authorization::Unauthenticated;
        };
        if origins.iter().any(|o| o == origin || o == ANY_ORIGIN) {
            Authorization::Allowed
        } else {
            Authorization::Forbidden
        }
    }
}
