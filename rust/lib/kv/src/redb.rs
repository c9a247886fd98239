use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use crate::error::{KVError, validate_key};
use crate::traits::{KVStore, Record};

/// Reserved entry in the index table holding the ordered list of keys.
const INDEX_ENTRY: &str = "all_names";

type StrTable<'a> = TableDefinition<'a, &'static str, &'static str>;

/// RedbStore is a KVStore implementation backed by a single redb file.
///
/// Records live in a table named after the value column. A second table
/// (`{key_column}_index`) holds one reserved entry: the JSON-encoded list of
/// keys in insertion order. Every write updates the record and the index in
/// the same write transaction, so the two never disagree.
///
/// All operations, reads included, go through one instance-wide mutex.
/// Nothing protects against a second process opening the same file.
pub struct RedbStore {
    path: PathBuf,
    records_table: String,
    index_table: String,
    db: Mutex<Option<Database>>,
}

impl RedbStore {
    /// Open or create the store file `{base_dir}/{namespace}_kvstore.redb`.
    /// `base_dir` is created if it doesn't exist.
    pub fn open(
        base_dir: &Path,
        namespace: &str,
        key_column: &str,
        value_column: &str,
    ) -> Result<Self, KVError> {
        if namespace.is_empty() {
            return Err(KVError::Config("namespace must not be empty".to_string()));
        }
        let index_table = format!("{}_index", key_column);
        if key_column.is_empty() || value_column.is_empty() || value_column == index_table {
            return Err(KVError::Config(format!(
                "invalid column names: key={:?} value={:?}",
                key_column, value_column
            )));
        }

        fs::create_dir_all(base_dir).map_err(|e| KVError::Storage(e.to_string()))?;
        let path = base_dir.join(format!("{}_kvstore.redb", namespace));

        let store = Self {
            records_table: value_column.to_string(),
            index_table,
            db: Mutex::new(None),
            path,
        };
        let db = store.create_database()?;
        *store.lock()? = Some(db);

        debug!("RedbStore: opened {:?}", store.path);
        Ok(store)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn records(&self) -> StrTable<'_> {
        TableDefinition::new(&self.records_table)
    }

    fn index(&self) -> StrTable<'_> {
        TableDefinition::new(&self.index_table)
    }

    /// Create the database file and make sure both tables exist.
    fn create_database(&self) -> Result<Database, KVError> {
        let db = Database::create(&self.path).map_err(|e| KVError::Storage(e.to_string()))?;

        let write_txn = db
            .begin_write()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        {
            write_txn
                .open_table(self.records())
                .map_err(|e| KVError::Storage(e.to_string()))?;
            write_txn
                .open_table(self.index())
                .map_err(|e| KVError::Storage(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| KVError::Storage(e.to_string()))?;

        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Database>>, KVError> {
        self.db
            .lock()
            .map_err(|e| KVError::Storage(e.to_string()))
    }

    /// The open database. Recreated here if a failed `clear` left the store
    /// without one.
    fn open_db<'g>(
        &self,
        guard: &'g mut MutexGuard<'_, Option<Database>>,
    ) -> Result<&'g Database, KVError> {
        if guard.is_none() {
            debug!("RedbStore: reopening {:?}", self.path);
            **guard = Some(self.create_database()?);
        }
        match &**guard {
            Some(db) => Ok(db),
            None => Err(KVError::Storage("store is not open".to_string())),
        }
    }
}

/// Read the key index from any table handle. A missing entry is an empty index.
fn read_index<T: ReadableTable<&'static str, &'static str>>(
    table: &T,
) -> Result<Vec<String>, KVError> {
    match table
        .get(INDEX_ENTRY)
        .map_err(|e| KVError::Storage(e.to_string()))?
    {
        Some(raw) => serde_json::from_str(raw.value())
            .map_err(|e| KVError::Serialization(e.to_string())),
        None => Ok(Vec::new()),
    }
}

fn encode_index(names: &[String]) -> Result<String, KVError> {
    serde_json::to_string(names).map_err(|e| KVError::Serialization(e.to_string()))
}

impl KVStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<String>, KVError> {
        let mut guard = self.lock()?;
        let db = self.open_db(&mut guard)?;

        let read_txn = db
            .begin_read()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(self.records())
            .map_err(|e| KVError::Storage(e.to_string()))?;

        match table.get(key) {
            Ok(Some(val)) => Ok(Some(val.value().to_string())),
            Ok(None) => Ok(None),
            Err(e) => Err(KVError::Storage(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KVError> {
        validate_key(key)?;

        let mut guard = self.lock()?;
        let db = self.open_db(&mut guard)?;

        let write_txn = db
            .begin_write()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        {
            let mut index = write_txn
                .open_table(self.index())
                .map_err(|e| KVError::Storage(e.to_string()))?;
            let mut names = read_index(&index)?;
            if !names.iter().any(|name| name == key) {
                names.push(key.to_string());
                let encoded = encode_index(&names)?;
                index
                    .insert(INDEX_ENTRY, encoded.as_str())
                    .map_err(|e| KVError::Storage(e.to_string()))?;
            }

            let mut table = write_txn
                .open_table(self.records())
                .map_err(|e| KVError::Storage(e.to_string()))?;
            table
                .insert(key, value)
                .map_err(|e| KVError::Storage(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), KVError> {
        let mut guard = self.lock()?;
        let db = self.open_db(&mut guard)?;

        let write_txn = db
            .begin_write()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        {
            let mut index = write_txn
                .open_table(self.index())
                .map_err(|e| KVError::Storage(e.to_string()))?;
            let mut names = read_index(&index)?;
            let before = names.len();
            names.retain(|name| name != key);
            if names.len() != before {
                let encoded = encode_index(&names)?;
                index
                    .insert(INDEX_ENTRY, encoded.as_str())
                    .map_err(|e| KVError::Storage(e.to_string()))?;
            }

            let mut table = write_txn
                .open_table(self.records())
                .map_err(|e| KVError::Storage(e.to_string()))?;
            table
                .remove(key)
                .map_err(|e| KVError::Storage(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        Ok(())
    }

    fn clear(&self) -> Result<(), KVError> {
        let mut guard = self.lock()?;

        // Close the file before removing it.
        drop(guard.take());
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(KVError::Storage(e.to_string())),
        }
        *guard = Some(self.create_database()?);

        debug!("RedbStore: cleared {:?}", self.path);
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>, KVError> {
        let mut guard = self.lock()?;
        let db = self.open_db(&mut guard)?;

        let read_txn = db
            .begin_read()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        let index = read_txn
            .open_table(self.index())
            .map_err(|e| KVError::Storage(e.to_string()))?;
        read_index(&index)
    }

    fn all_items(&self) -> Result<Vec<Record>, KVError> {
        let mut guard = self.lock()?;
        let db = self.open_db(&mut guard)?;

        let read_txn = db
            .begin_read()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        let index = read_txn
            .open_table(self.index())
            .map_err(|e| KVError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(self.records())
            .map_err(|e| KVError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        for name in read_index(&index)? {
            let value = table
                .get(name.as_str())
                .map_err(|e| KVError::Storage(e.to_string()))?;
            if let Some(value) = value {
                let value = value.value().to_string();
                results.push(Record::new(name, value));
            }
        }
        Ok(results)
    }
}
