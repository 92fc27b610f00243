//! Ordered key-value store underneath the partitions.
//!
//! Only an in-memory implementation exists. Keys are byte strings kept in
//! sorted order so a whole subtree can be read with one prefix scan.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::{DirError, Result};

/// A key-value pair as returned by scans.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Storage abstraction used by `MemoryPartition`.
pub trait KvStore: Send + Sync {
    /// Value stored under `key`, if any.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite.
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;

    /// Remove `key`; absent keys are not an error.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Every pair whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KvPair>>;

    /// True if `key` is present.
    fn contains_key(&self, key: &[u8]) -> Result<bool>;

    /// Apply puts and deletes as one unit; readers see all or none.
    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()>;
}

/// One step of a `write_batch`.
#[derive(Debug)]
pub enum BatchOp {
    /// Insert or overwrite.
    Put {
        /// Key.
        key: Vec<u8>,
        /// Value.
        value: Vec<u8>,
    },
    /// Remove.
    Delete {
        /// Key.
        key: Vec<u8>,
    },
}

/// `BTreeMap` behind a `RwLock`.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryKvStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned(e: impl std::fmt::Display) -> DirError {
    DirError::LockPoisoned(format!("kv store: {}", e))
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.get(key).cloned())
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let mut data = self.data.write().map_err(poisoned)?;
        data.insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut data = self.data.write().map_err(poisoned)?;
        data.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KvPair>> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data
            .range::<Vec<u8>, _>(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.contains_key(key))
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut data = self.data.write().map_err(poisoned)?;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let kv = MemoryKvStore::new();
        kv.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        assert_eq!(kv.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert!(kv.contains_key(b"a").unwrap());
        kv.delete(b"a").unwrap();
        kv.delete(b"a").unwrap();
        assert_eq!(kv.get(b"a").unwrap(), None);
    }

    #[test]
    fn test_scan_prefix_stops_at_boundary() {
        let kv = MemoryKvStore::new();
        for k in ["e/a\0", "e/a\0b\0", "e/ab\0", "f/a\0"] {
            kv.put(k.as_bytes().to_vec(), vec![]).unwrap();
        }
        let keys: Vec<_> = kv
            .scan_prefix(b"e/a\0")
            .unwrap()
            .into_iter()
            .map(|(k, _)| String::from_utf8(k).unwrap())
            .collect();
        assert_eq!(keys, vec!["e/a\0", "e/a\0b\0"]);
    }

    #[test]
    fn test_write_batch() {
        let kv = MemoryKvStore::new();
        kv.put(b"old".to_vec(), b"v".to_vec()).unwrap();
        kv.write_batch(vec![
            BatchOp::Delete { key: b"old".to_vec() },
            BatchOp::Put {
                key: b"new".to_vec(),
                value: b"v".to_vec(),
            },
        ])
        .unwrap();
        assert!(!kv.contains_key(b"old").unwrap());
        assert!(kv.contains_key(b"new").unwrap());
    }

    #[test]
    fn test_clones_share_data() {
        let kv = MemoryKvStore::new();
        let other = kv.clone();
        kv.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        assert!(other.contains_key(b"k").unwrap());
    }
}
