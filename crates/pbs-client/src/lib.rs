//! Privacy budget clients.
//!
//! [`HttpPrivacyBudgetClient`] talks to one coordinator's budget service.
//! [`DistributedPrivacyBudgetClient`] fans a request out to every configured
//! coordinator and unions their exhausted sets; any coordinator failure fails
//! the whole call. [`BudgetGate`] is the entry point for a unit of work: it
//! screens reporting windows locally before any budget is charged.

pub mod auth;
pub mod coordinator;
pub mod distributed;
pub mod error;
pub mod gate;
pub mod http;
pub mod retry;

pub use auth::{AuthEndpointTokenSource, StaticTokenSource, TokenSource};
pub use coordinator::PrivacyBudgetClient;
pub use distributed::DistributedPrivacyBudgetClient;
pub use error::{BudgetServiceError, CoordinatorFailure, DistributedBudgetError, ErrorKind, StatusCode};
pub use gate::{BudgetGate, Clearance};
pub use http::HttpPrivacyBudgetClient;
pub use retry::RetryConfig;
