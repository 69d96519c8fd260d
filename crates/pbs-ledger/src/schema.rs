//! Ledger schema SQL.

/// One row per (origin, key, reporting window). Windows and expiry are epoch
/// milliseconds.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS privacy_budget (
    origin TEXT NOT NULL,
    budget_key TEXT NOT NULL,
    reporting_window INTEGER NOT NULL,
    consumed_budget_count INTEGER NOT NULL DEFAULT 0 CHECK (consumed_budget_count >= 0),
    expires_at INTEGER NOT NULL,
    PRIMARY KEY (origin, budget_key, reporting_window)
);

CREATE INDEX IF NOT EXISTS idx_privacy_budget_expires ON privacy_budget(expires_at);
"#;

/// Saturating upsert. Inserts a fresh row at count 1, or increments an
/// existing row only while it is below the limit (?4). A row already at the
/// limit matches no update, so `changes()` is 0 and the unit is exhausted.
pub const CONSUME_SQL: &str = r#"
INSERT INTO privacy_budget (origin, budget_key, reporting_window, consumed_budget_count, expires_at)
VALUES (?1, ?2, ?3, 1, ?5)
ON CONFLICT (origin, budget_key, reporting_window) DO UPDATE
    SET consumed_budget_count = consumed_budget_count + 1,
        expires_at = excluded.expires_at
    WHERE consumed_budget_count < ?4
"#;

pub const SELECT_RECORD_SQL: &str = r#"
SELECT consumed_budget_count FROM privacy_budget
WHERE origin = ?1 AND budget_key = ?2 AND reporting_window = ?3
"#;
