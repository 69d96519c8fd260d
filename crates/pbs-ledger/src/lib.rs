//! Budget ledger: per-coordinator store of consumed privacy budget.
//!
//! [`BudgetLedger`] is the storage contract: a saturating, per-unit atomic
//! check-and-increment keyed by (origin, key, reporting window).
//! [`InMemoryLedger`] is the reference implementation; [`SqliteLedger`] is the
//! durable one. [`ConsumeBudgetService`] validates requests before they reach
//! either.

pub mod ledger;
pub mod memory;
pub mod schema;
pub mod service;
pub mod sqlite;

pub use ledger::{dedupe_units, BudgetLedger, RecordTtl};
pub use memory::InMemoryLedger;
pub use service::ConsumeBudgetService;
pub use sqlite::SqliteLedger;
