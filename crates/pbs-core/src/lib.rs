//! Privacy budget core: key/unit model, reporting-window validation, configuration.

pub mod config;
pub mod error;
pub mod model;
pub mod window;

pub use config::{BudgetConfig, CoordinatorEndpoint};
pub use error::{Error, Result};
pub use model::*;
pub use window::ReportingWindowValidator;
