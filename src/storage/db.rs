//! Database persistence layer using Sled
//!
//! Ledger state lives in a single tree; chain metadata in a second one.
//! Each block is committed as one `sled::Batch` and flushed.

use std::path::Path;

use sled::{Db, Tree};

use super::{KvStore, StoreError, WriteOp};

const STATE_TREE: &str = "state";
const METADATA_TREE: &str = "metadata";
const HEIGHT_KEY: &str = "height";

/// Sled-backed `KvStore`
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    state_tree: Tree,
    metadata_tree: Tree,
}

impl SledStore {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// Database that is deleted when dropped
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        let state_tree = db.open_tree(STATE_TREE)?;
        let metadata_tree = db.open_tree(METADATA_TREE)?;
        Ok(Self { db, state_tree, metadata_tree })
    }

    /// Record the last committed block height
    pub fn save_height(&self, height: u64) -> Result<(), StoreError> {
        self.metadata_tree.insert(HEIGHT_KEY, height.to_be_bytes().as_ref())?;
        self.db.flush()?;
        Ok(())
    }

    /// Last committed block height, if any block was committed
    pub fn load_height(&self) -> Result<Option<u64>, StoreError> {
        match self.metadata_tree.get(HEIGHT_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StoreError::Corrupt(HEIGHT_KEY.to_string()))?;
                Ok(Some(u64::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.state_tree.get(key)?.map(|value| value.to_vec()))
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.state_tree.insert(key, value)?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.state_tree.remove(key)?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.state_tree
            .scan_prefix(prefix)
            .map(|item| {
                let (key, value) = item?;
                Ok((key.to_vec(), value.to_vec()))
            })
            .collect()
    }

    fn commit_batch(&mut self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        for op in ops {
            match op {
                WriteOp::Set(key, value) => batch.insert(key, value),
                WriteOp::Delete(key) => batch.remove(key),
            }
        }
        self.state_tree.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }
}
