//! Coordinator budget service: the HTTP surface over one coordinator's ledger.

pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::{AppState, Authorization};
