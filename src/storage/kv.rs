//! Key-value store abstraction
//!
//! The core reads and writes ledger state only through `KvStore`. Keys are
//! ordered bytewise, so prefix scans return records in key order.

use std::collections::BTreeMap;
use std::fmt;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Store and codec errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("corrupt record under key {0}")]
    Corrupt(String),
}

/// A single write in a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Set(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Ordered byte key-value store
pub trait KvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError>;

    /// All entries whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Apply `ops` in order. Persistent stores override this to commit atomically.
    fn commit_batch(&mut self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        for op in ops {
            match op {
                WriteOp::Set(key, value) => self.set(&key, &value)?,
                WriteOp::Delete(key) => self.delete(&key)?,
            }
        }
        Ok(())
    }
}

impl<T: KvStore + ?Sized> KvStore for &mut T {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        (**self).delete(key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        (**self).scan_prefix(prefix)
    }

    fn commit_batch(&mut self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        (**self).commit_batch(ops)
    }
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self
            .entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

/// Write overlay on top of another store.
///
/// Reads see the overlay first. Nothing reaches the parent until `write`;
/// dropping the cache discards every buffered write.
pub struct CacheStore<'a, S: KvStore + ?Sized> {
    parent: &'a mut S,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a, S: KvStore + ?Sized> CacheStore<'a, S> {
    pub fn new(parent: &'a mut S) -> Self {
        Self { parent, writes: BTreeMap::new() }
    }

    /// Number of buffered writes
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Flush buffered writes to the parent as one batch
    pub fn write(self) -> Result<(), StoreError> {
        let ops = self
            .writes
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => WriteOp::Set(key, value),
                None => WriteOp::Delete(key),
            })
            .collect();
        self.parent.commit_batch(ops)
    }

    /// Drop buffered writes
    pub fn discard(self) {}
}

impl<S: KvStore + ?Sized> fmt::Debug for CacheStore<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore").field("pending_writes", &self.writes.len()).finish()
    }
}

impl<S: KvStore + ?Sized> KvStore for CacheStore<'_, S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self.writes.get(key) {
            Some(value) => Ok(value.clone()),
            None => self.parent.get(key),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.writes.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.parent.scan_prefix(prefix)?.into_iter().collect();
        for (key, value) in self
            .writes
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            match value {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_iter().collect())
    }
}

/// Decode the record under `key`
pub fn get_record<T, S>(store: &S, key: &[u8]) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned,
    S: KvStore + ?Sized,
{
    match store.get(key)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

/// Encode `record` under `key`
pub fn put_record<T, S>(store: &mut S, key: &[u8], record: &T) -> Result<(), StoreError>
where
    T: Serialize,
    S: KvStore + ?Sized,
{
    let bytes = bincode::serialize(record)?;
    store.set(key, &bytes)
}

/// Decode every record under `prefix`, in key order
pub fn scan_records<T, S>(store: &S, prefix: &[u8]) -> Result<Vec<(Vec<u8>, T)>, StoreError>
where
    T: DeserializeOwned,
    S: KvStore + ?Sized,
{
    store
        .scan_prefix(prefix)?
        .into_iter()
        .map(|(key, bytes)| Ok((key, bincode::deserialize(&bytes)?)))
        .collect()
}
