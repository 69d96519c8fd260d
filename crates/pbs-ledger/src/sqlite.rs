//! Durable SQLite ledger.
//!
//! Consumption is a single conditional upsert per unit (see
//! [`CONSUME_SQL`](crate::schema::CONSUME_SQL)), so the cap is enforced by the
//! database rather than by a read followed by a write. A batch runs inside one
//! transaction; a storage failure part way through leaves no unit charged.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::ledger::{dedupe_units, BudgetLedger, RecordTtl};
use crate::schema::{CONSUME_SQL, SCHEMA_SQL, SELECT_RECORD_SQL};
use pbs_core::{Error, PrivacyBudgetKey, PrivacyBudgetRecord, PrivacyBudgetUnit, Result};

/// SQLite-backed budget ledger.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    ttl: RecordTtl,
}

impl SqliteLedger {
    /// Open or create the ledger database at `db_path`.
    pub fn open(db_path: impl AsRef<Path>, ttl: RecordTtl) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Database(e.to_string()))?;
        }

        let conn = Self::create_connection(&db_path)?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;

        let ledger = Self {
            conn: Mutex::new(conn),
            db_path,
            ttl,
        };
        info!(
            "SqliteLedger initialized: {} records, path={}",
            ledger.count_records()?,
            ledger.db_path.display()
        );
        Ok(ledger)
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(|e| Error::Database(e.to_string()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(conn)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn count_records(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM privacy_budget", [], |row| row.get(0))
            .map_err(|e| Error::Database(e.to_string()))
    }
}

impl BudgetLedger for SqliteLedger {
    fn consume(
        &self,
        origin: &str,
        units: &[PrivacyBudgetUnit],
        limit: u32,
    ) -> Result<Vec<PrivacyBudgetUnit>> {
        if limit == 0 {
            return Ok(dedupe_units(units).into_iter().cloned().collect());
        }

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(e.to_string()))?;
        let mut exhausted = Vec::new();
        {
            let mut stmt = tx
                .prepare_cached(CONSUME_SQL)
                .map_err(|e| Error::Database(e.to_string()))?;
            for unit in dedupe_units(units) {
                let expires_at = self.ttl.expires_at(unit.reporting_window);
                let changed = stmt
                    .execute(params![
                        origin,
                        unit.privacy_budget_key,
                        unit.reporting_window.timestamp_millis(),
                        limit,
                        expires_at.timestamp_millis(),
                    ])
                    .map_err(|e| Error::Database(e.to_string()))?;
                if changed == 0 {
                    exhausted.push(unit.clone());
                }
            }
        }
        tx.commit().map_err(|e| Error::Database(e.to_string()))?;

        debug!(
            origin,
            units = units.len(),
            exhausted = exhausted.len(),
            "sqlite consume"
        );
        Ok(exhausted)
    }

    fn get_records(
        &self,
        origin: &str,
        units: &[PrivacyBudgetUnit],
    ) -> Result<Vec<PrivacyBudgetRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(SELECT_RECORD_SQL)
            .map_err(|e| Error::Database(e.to_string()))?;
        let mut records = Vec::new();
        for unit in dedupe_units(units) {
            let count: Option<u32> = stmt
                .query_row(
                    params![
                        origin,
                        unit.privacy_budget_key,
                        unit.reporting_window.timestamp_millis()
                    ],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| Error::Database(e.to_string()))?;
            if let Some(count) = count {
                records.push(PrivacyBudgetRecord::new(&PrivacyBudgetKey::from(unit), count));
            }
        }
        Ok(records)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn
            .execute(
                "DELETE FROM privacy_budget WHERE expires_at <= ?1",
                params![now.timestamp_millis()],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        if removed > 0 {
            info!("Purged {} expired budget records", removed);
        }
        Ok(removed)
    }
}
