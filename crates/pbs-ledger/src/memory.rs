//! In-memory reference ledger.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pbs_core::{PrivacyBudgetKey, PrivacyBudgetRecord, PrivacyBudgetUnit, Result};
use tracing::debug;

use crate::ledger::{dedupe_units, BudgetLedger, RecordTtl};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LedgerKey {
    origin: String,
    key: PrivacyBudgetKey,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    consumed_budget_count: u32,
    expires_at: DateTime<Utc>,
}

/// Ledger held in a process-local map. Each check-and-increment runs under
/// the map lock, which makes it atomic with respect to other consumers.
pub struct InMemoryLedger {
    records: Mutex<HashMap<LedgerKey, Entry>>,
    ttl: RecordTtl,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_ttl(RecordTtl::default())
    }

    pub fn with_ttl(ttl: RecordTtl) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Number of (origin, key, window) rows held.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl BudgetLedger for InMemoryLedger {
    fn consume(
        &self,
        origin: &str,
        units: &[PrivacyBudgetUnit],
        limit: u32,
    ) -> Result<Vec<PrivacyBudgetUnit>> {
        let mut exhausted = Vec::new();
        for unit in dedupe_units(units) {
            let ledger_key = LedgerKey {
                origin: origin.to_string(),
                key: PrivacyBudgetKey::from(unit),
            };
            let expires_at = self.ttl.expires_at(unit.reporting_window);

            let mut records = self.records.lock();
            let entry = records.entry(ledger_key).or_insert(Entry {
                consumed_budget_count: 0,
                expires_at,
            });
            if entry.consumed_budget_count >= limit {
                exhausted.push(unit.clone());
            } else {
                entry.consumed_budget_count += 1;
                entry.expires_at = expires_at;
            }
        }
        debug!(
            origin,
            units = units.len(),
            exhausted = exhausted.len(),
            "in-memory consume"
        );
        Ok(exhausted)
    }

    fn get_records(
        &self,
        origin: &str,
        units: &[PrivacyBudgetUnit],
    ) -> Result<Vec<PrivacyBudgetRecord>> {
        let records = self.records.lock();
        Ok(dedupe_units(units)
            .into_iter()
            .filter_map(|unit| {
                let key = PrivacyBudgetKey::from(unit);
                let ledger_key = LedgerKey {
                    origin: origin.to_string(),
                    key: key.clone(),
                };
                records
                    .get(&ledger_key)
                    .map(|e| PrivacyBudgetRecord::new(&key, e.consumed_budget_count))
            })
            .collect())
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, e| e.expires_at > now);
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    }

    #[test]
    fn test_idempotent_consumption_at_limit_one() {
        let ledger = InMemoryLedger::new();
        let unit = PrivacyBudgetUnit::new("k1", t0());

        let first = ledger.consume("abc.com", &[unit.clone()], 1).unwrap();
        assert!(first.is_empty());

        let second = ledger.consume("abc.com", &[unit.clone()], 1).unwrap();
        assert_eq!(second, vec![unit.clone()]);

        let records = ledger.get_records("abc.com", &[unit]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].consumed_budget_count, 1);
    }

    #[test]
    fn test_units_are_independent() {
        let ledger = InMemoryLedger::new();
        let k1 = PrivacyBudgetUnit::new("k1", t0());
        let k2 = PrivacyBudgetUnit::new("k2", t0());

        ledger.consume("abc.com", &[k1.clone()], 1).unwrap();
        let exhausted = ledger.consume("abc.com", &[k1.clone(), k2.clone()], 1).unwrap();
        assert_eq!(exhausted, vec![k1]);

        // k2 was charged even though k1 was exhausted in the same batch
        let records = ledger.get_records("abc.com", &[k2]).unwrap();
        assert_eq!(records[0].consumed_budget_count, 1);
    }

    #[test]
    fn test_origins_are_separate_budgets() {
        let ledger = InMemoryLedger::new();
        let unit = PrivacyBudgetUnit::new("k", t0());
        assert!(ledger.consume("a.com", &[unit.clone()], 1).unwrap().is_empty());
        assert!(ledger.consume("b.com", &[unit], 1).unwrap().is_empty());
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_higher_limit_allows_more_charges() {
        let ledger = InMemoryLedger::new();
        let unit = PrivacyBudgetUnit::new("k", t0());
        for _ in 0..3 {
            assert!(ledger.consume("a.com", &[unit.clone()], 3).unwrap().is_empty());
        }
        assert_eq!(ledger.consume("a.com", &[unit.clone()], 3).unwrap(), vec![unit]);
    }

    #[test]
    fn test_duplicate_units_charged_once() {
        let ledger = InMemoryLedger::new();
        let unit = PrivacyBudgetUnit::new("k", t0());
        let exhausted = ledger.consume("a.com", &[unit.clone(), unit.clone()], 1).unwrap();
        assert!(exhausted.is_empty());
        assert_eq!(ledger.get_records("a.com", &[unit]).unwrap()[0].consumed_budget_count, 1);
    }

    #[test]
    fn test_concurrent_consumers_never_pass_limit() {
        let ledger = Arc::new(InMemoryLedger::new());
        let unit = PrivacyBudgetUnit::new("contended", t0());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                let unit = unit.clone();
                std::thread::spawn(move || ledger.consume("a.com", &[unit], 1).unwrap().is_empty())
            })
            .collect();
        let charged = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(charged, 1);
        assert_eq!(ledger.get_records("a.com", &[unit]).unwrap()[0].consumed_budget_count, 1);
    }

    #[test]
    fn test_purge_expired() {
        let ledger = InMemoryLedger::with_ttl(RecordTtl::new(1, 0));
        let unit = PrivacyBudgetUnit::new("k", t0());
        ledger.consume("a.com", &[unit], 1).unwrap();

        assert_eq!(ledger.purge_expired(t0()).unwrap(), 0);
        assert_eq!(ledger.purge_expired(t0() + TimeDelta::days(1)).unwrap(), 1);
        assert!(ledger.is_empty());
    }
}
