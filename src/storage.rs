use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use crate::error::{LedgerError, Result};

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    Put(String, Vec<u8>),
    Delete(String),
}

/// Ordered set of mutations applied atomically by [`KvStore::write`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put(key.into(), value));
    }

    /// Serialize `value` as JSON and queue it under `key`.
    pub fn put_json<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<()> {
        let data = serde_json::to_vec(value)?;
        self.put(key, data);
        Ok(())
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

/// Ordered byte-string store the ledger persists into.
///
/// Single-key operations are atomic. Multi-key atomicity is only provided by
/// [`KvStore::write`].
pub trait KvStore: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn delete(&self, key: &str) -> Result<()>;
    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
    fn write(&self, batch: WriteBatch) -> Result<()>;
}

// Generic Helpers (JSON records)

pub fn put_json<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    let data = serde_json::to_vec(value)?;
    store.put(key, &data)
}

pub fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
        None => Ok(None),
    }
}

/// In-process store backed by a `BTreeMap`.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.write()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read()?.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.write()?.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let entries = self.entries.read()?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut entries = self.entries.write()?;
        for op in batch.ops {
            match op {
                BatchOp::Put(k, v) => {
                    entries.insert(k, v);
                }
                BatchOp::Delete(k) => {
                    entries.remove(&k);
                }
            }
        }
        Ok(())
    }
}

/// On-disk store backed by sled.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl KvStore for SledStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db.insert(key.as_bytes(), value)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.db.remove(key.as_bytes())?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (k, v) = item?;
            let key = String::from_utf8(k.to_vec())
                .map_err(|e| LedgerError::Structural(format!("non-utf8 key: {}", e)))?;
            out.push((key, v.to_vec()));
        }
        Ok(out)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut sled_batch = sled::Batch::default();
        for op in batch.ops {
            match op {
                BatchOp::Put(k, v) => sled_batch.insert(k.as_bytes(), v),
                BatchOp::Delete(k) => sled_batch.remove(k.as_bytes()),
            }
        }
        self.db.apply_batch(sled_batch)?;
        Ok(())
    }
}
