//! Versioned schema for the local key store.

use crate::error::CryptoError;
use rusqlite::Connection;

const MIGRATIONS: &[(i32, &str)] = &[(1, MIGRATION_001), (2, MIGRATION_002)];

const MIGRATION_001: &str = "
CREATE TABLE IF NOT EXISTS workspace_keys (
    workspace_id TEXT PRIMARY KEY,
    public_key   TEXT NOT NULL,
    private_key  TEXT NOT NULL,
    updated_at   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS workspace_key_history (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    workspace_id TEXT NOT NULL,
    public_key   TEXT NOT NULL,
    private_key  TEXT NOT NULL,
    rotated_at   INTEGER NOT NULL,
    UNIQUE (workspace_id, public_key)
);
";

const MIGRATION_002: &str = "
CREATE INDEX IF NOT EXISTS idx_workspace_key_history_rotated
    ON workspace_key_history (workspace_id, rotated_at DESC);
";

pub fn run_key_store_migrations(conn: &Connection) -> Result<(), CryptoError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _key_store_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )?;

    let current: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _key_store_migrations",
        [],
        |row| row.get(0),
    )?;

    for &(version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO _key_store_migrations (version) VALUES (?1)",
            [version],
        )?;
        tx.commit()?;
        tracing::debug!(version, "applied key store migration");
    }

    Ok(())
}
