//! Encrypted local copy of workspace key pairs.
//!
//! Lets a device decrypt messages while the key service is unreachable. The
//! whole database is encrypted with SQLCipher, so private keys are stored as
//! plain PKCS#8 PEM inside it.

pub mod migrations;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use taskvault_shared::ids::WorkspaceId;

use crate::asymmetric::KeyPair;
use crate::config::CryptoConfig;
use crate::error::CryptoError;
use crate::master_key::{is_encrypted, MasterKeySource, StoreKey};

/// A key pair that used to be active, with the time it was replaced.
#[derive(Debug, Clone)]
pub struct HistoricalKeyPair {
    pub keys: KeyPair,
    pub rotated_at: DateTime<Utc>,
}

pub struct LocalKeyStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for LocalKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeyStore").finish_non_exhaustive()
    }
}

impl LocalKeyStore {
    /// Open (creating if needed) the store at `path`, keyed with `key`.
    ///
    /// An existing database that is readable without a key is refused
    /// rather than keyed.
    pub fn open(path: impl AsRef<Path>, key: &StoreKey) -> Result<Self, CryptoError> {
        let path = path.as_ref();
        if path.metadata().map(|m| m.len() > 0).unwrap_or(false)
            && !is_encrypted(&Connection::open(path)?)?
        {
            tracing::error!(path = %path.display(), "local key store is not encrypted");
            return Err(CryptoError::StorageError(
                "existing key store is not encrypted".into(),
            ));
        }
        let conn = Connection::open(path)?;
        key.apply(&conn)?;
        Self::from_keyed_connection(conn)
    }

    /// Open the store at `config.key_store_path`, unlocking it with the
    /// master key from `source`.
    pub fn open_with_config(
        config: &CryptoConfig,
        source: &MasterKeySource,
    ) -> Result<Self, CryptoError> {
        let master = source.resolve(&config.kdf)?;
        let key = StoreKey::derive(&master)?;
        tracing::debug!(path = %config.key_store_path.display(), source = ?source, "opening local key store");
        Self::open(&config.key_store_path, &key)
    }

    pub fn open_in_memory(key: &StoreKey) -> Result<Self, CryptoError> {
        let conn = Connection::open_in_memory()?;
        key.apply(&conn)?;
        Self::from_keyed_connection(conn)
    }

    fn from_keyed_connection(conn: Connection) -> Result<Self, CryptoError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrations::run_key_store_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CryptoError> {
        self.conn
            .lock()
            .map_err(|_| CryptoError::StorageError("key store lock poisoned".into()))
    }

    /// Make `keys` the workspace's current pair. A different pair that was
    /// current before is moved into history.
    pub fn save_keys(&self, workspace_id: &WorkspaceId, keys: &KeyPair) -> Result<(), CryptoError> {
        let public_pem = keys.public_pem()?;
        let private_pem = keys.private_pem()?;
        let now = Utc::now().timestamp_millis();
        let ws = workspace_id.to_string();

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let previous: Option<(String, String)> = tx
            .query_row(
                "SELECT public_key, private_key FROM workspace_keys WHERE workspace_id = ?1",
                [&ws],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((old_public, old_private)) = previous {
            if old_public != public_pem {
                tx.execute(
                    "INSERT OR IGNORE INTO workspace_key_history
                        (workspace_id, public_key, private_key, rotated_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![ws, old_public, old_private, now],
                )?;
            }
        }

        tx.execute(
            "INSERT INTO workspace_keys (workspace_id, public_key, private_key, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (workspace_id) DO UPDATE SET
                public_key = excluded.public_key,
                private_key = excluded.private_key,
                updated_at = excluded.updated_at",
            params![ws, public_pem, private_pem.as_str(), now],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_keys(&self, workspace_id: &WorkspaceId) -> Result<Option<KeyPair>, CryptoError> {
        let conn = self.conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT public_key, private_key FROM workspace_keys WHERE workspace_id = ?1",
                [workspace_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(public_pem, private_pem)| KeyPair::from_pem(&public_pem, &private_pem))
            .transpose()
    }

    /// Previous pairs for the workspace, most recently retired first.
    pub fn get_key_history(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<HistoricalKeyPair>, CryptoError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT public_key, private_key, rotated_at FROM workspace_key_history
             WHERE workspace_id = ?1
             ORDER BY rotated_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([workspace_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut history = Vec::new();
        for row in rows {
            let (public_pem, private_pem, rotated_at) = row?;
            history.push(HistoricalKeyPair {
                keys: KeyPair::from_pem(&public_pem, &private_pem)?,
                rotated_at: millis_to_datetime(rotated_at)?,
            });
        }
        Ok(history)
    }

    /// Add a retired pair learned from elsewhere (e.g. the key service).
    /// Pairs already present are left untouched.
    pub fn record_history(
        &self,
        workspace_id: &WorkspaceId,
        keys: &KeyPair,
        rotated_at: DateTime<Utc>,
    ) -> Result<(), CryptoError> {
        let public_pem = keys.public_pem()?;
        let private_pem = keys.private_pem()?;
        self.conn()?.execute(
            "INSERT OR IGNORE INTO workspace_key_history
                (workspace_id, public_key, private_key, rotated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                workspace_id.to_string(),
                public_pem,
                private_pem.as_str(),
                rotated_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    /// Forget everything stored for a workspace.
    pub fn delete_keys(&self, workspace_id: &WorkspaceId) -> Result<(), CryptoError> {
        let ws = workspace_id.to_string();
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM workspace_keys WHERE workspace_id = ?1", [&ws])?;
        tx.execute(
            "DELETE FROM workspace_key_history WHERE workspace_id = ?1",
            [&ws],
        )?;
        tx.commit()?;
        Ok(())
    }
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, CryptoError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| CryptoError::StorageError(format!("invalid timestamp {millis}")))
}

/// In-memory SQLCipher connection keyed with an all-zero key.
#[cfg(test)]
pub(crate) fn test_connection() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "PRAGMA key = \"x'0000000000000000000000000000000000000000000000000000000000000000'\";",
    )
    .unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    conn
}

#[cfg(test)]
pub(crate) fn test_store() -> LocalKeyStore {
    LocalKeyStore::from_keyed_connection(test_connection()).unwrap()
}
