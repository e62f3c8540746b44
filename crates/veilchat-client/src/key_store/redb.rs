//! Redb-backed durable key store.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. A
//! replaced key is swapped in one write transaction, so a crash leaves
//! either the old or the new key on disk, never neither.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use redb::{Database, TableDefinition};
use zeroize::Zeroizing;

use super::{KeyStore, StorageError, StoredKey};

/// Table: keys
/// Key: user id (UTF-8)
/// Value: CBOR-encoded `StoredKey`
const KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("keys");

/// Durable key store backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc). Every
/// operation runs on the blocking pool.
#[derive(Clone)]
pub struct RedbKeyStore {
    db: Arc<Database>,
}

impl RedbKeyStore {
    /// Open or create a Redb database at the given path.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(KEYS).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    async fn with_db<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StorageError::Io(format!("storage task failed: {e}")))?
    }
}

impl std::fmt::Debug for RedbKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbKeyStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl KeyStore for RedbKeyStore {
    async fn store(&self, user_id: &str, key: &StoredKey) -> Result<(), StorageError> {
        let user_id = user_id.to_owned();
        let value = encode_key(key)?;
        self.with_db(move |db| write_record(db, &user_id, Some(value.as_slice()))).await
    }

    async fn retrieve(&self, user_id: &str) -> Result<Option<StoredKey>, StorageError> {
        let user_id = user_id.to_owned();
        self.with_db(move |db| {
            let txn = db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
            let table = txn.open_table(KEYS).map_err(|e| StorageError::Io(e.to_string()))?;

            let Some(value) =
                table.get(user_id.as_str()).map_err(|e| StorageError::Io(e.to_string()))?
            else {
                return Ok(None);
            };

            decode_key(value.value()).map(Some)
        })
        .await
    }

    async fn clear(&self, user_id: &str) -> Result<(), StorageError> {
        let user_id = user_id.to_owned();
        self.with_db(move |db| write_record(db, &user_id, None)).await
    }

    async fn replace(&self, user_id: &str, key: &StoredKey) -> Result<(), StorageError> {
        // `insert` overwrites inside a single transaction
        self.store(user_id, key).await
    }
}

/// Insert (`Some`) or remove (`None`) the record in one write transaction.
fn write_record(db: &Database, user_id: &str, value: Option<&[u8]>) -> Result<(), StorageError> {
    let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
    {
        let mut table = txn.open_table(KEYS).map_err(|e| StorageError::Io(e.to_string()))?;
        match value {
            Some(bytes) => {
                table.insert(user_id, bytes).map_err(|e| StorageError::Io(e.to_string()))?;
            },
            None => {
                table.remove(user_id).map_err(|e| StorageError::Io(e.to_string()))?;
            },
        }
    }
    txn.commit().map_err(|e| StorageError::Io(e.to_string()))
}

fn encode_key(key: &StoredKey) -> Result<Zeroizing<Vec<u8>>, StorageError> {
    let mut bytes = Zeroizing::new(Vec::new());
    ciborium::into_writer(key, &mut *bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode_key(bytes: &[u8]) -> Result<StoredKey, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}
