//! Ordered, transactional key-value engine.
//!
//! The node only relies on the operations exposed here: point reads and
//! writes, ordered range scans, range deletes, and write transactions whose
//! effects become visible atomically at commit. The in-memory engine below
//! is the one shipped; the surface is kept narrow enough that an mdbx-style
//! engine can replace it without touching callers.

use std::{
    collections::BTreeMap,
    ops::RangeBounds,
    sync::{Arc, RwLock},
};

type Table = BTreeMap<Vec<u8>, Vec<u8>>;
type Tables = BTreeMap<&'static str, Table>;

/// Handle to the database. Clones share the underlying data.
#[derive(Debug, Clone, Default)]
pub struct MemDb {
    tables: Arc<RwLock<Tables>>,
}

impl MemDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a consistent read-only snapshot.
    pub fn begin_read(&self) -> ReadTransaction {
        let tables = self.tables.read().expect("storage lock is poisoned");
        ReadTransaction {
            snapshot: tables.clone(),
        }
    }

    /// Opens a write transaction. Writes are buffered and applied atomically
    /// by [`WriteTransaction::commit`]; dropping the transaction discards
    /// them. The transaction is consumed by commit, so writing through a
    /// committed transaction is unrepresentable.
    pub fn begin_write(&self) -> WriteTransaction {
        WriteTransaction {
            db: self.clone(),
            pending: BTreeMap::new(),
        }
    }
}

/// A consistent snapshot of the database.
#[derive(Debug)]
pub struct ReadTransaction {
    snapshot: Tables,
}

impl ReadTransaction {
    pub fn get(&self, table: &'static str, key: &[u8]) -> Option<Vec<u8>> {
        self.snapshot.get(table)?.get(key).cloned()
    }

    pub fn range(
        &self,
        table: &'static str,
        bounds: impl RangeBounds<Vec<u8>>,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        match self.snapshot.get(table) {
            Some(entries) => entries
                .range(bounds)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn last(&self, table: &'static str) -> Option<(Vec<u8>, Vec<u8>)> {
        self.snapshot
            .get(table)?
            .iter()
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone()))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Pending {
    Put(Vec<u8>),
    Delete,
}

/// A buffered write transaction over [`MemDb`].
#[derive(Debug)]
pub struct WriteTransaction {
    db: MemDb,
    pending: BTreeMap<(&'static str, Vec<u8>), Pending>,
}

impl WriteTransaction {
    pub fn get(&self, table: &'static str, key: &[u8]) -> Option<Vec<u8>> {
        match self.pending.get(&(table, key.to_vec())) {
            Some(Pending::Put(value)) => Some(value.clone()),
            Some(Pending::Delete) => None,
            None => {
                let tables = self.db.tables.read().expect("storage lock is poisoned");
                tables.get(table)?.get(key).cloned()
            }
        }
    }

    /// Ordered scan merging buffered writes over the committed state.
    pub fn range(
        &self,
        table: &'static str,
        bounds: impl RangeBounds<Vec<u8>> + Clone,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        let tables = self.db.tables.read().expect("storage lock is poisoned");
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = match tables.get(table) {
            Some(entries) => entries
                .range(bounds.clone())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => BTreeMap::new(),
        };
        for ((pending_table, key), change) in &self.pending {
            if *pending_table != table || !bounds.contains(key) {
                continue;
            }
            match change {
                Pending::Put(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                Pending::Delete => {
                    merged.remove(key);
                }
            }
        }
        merged.into_iter().collect()
    }

    pub fn last(&self, table: &'static str) -> Option<(Vec<u8>, Vec<u8>)> {
        self.range(table, ..).into_iter().next_back()
    }

    pub fn put(&mut self, table: &'static str, key: Vec<u8>, value: Vec<u8>) {
        self.pending.insert((table, key), Pending::Put(value));
    }

    pub fn delete(&mut self, table: &'static str, key: &[u8]) {
        self.pending.insert((table, key.to_vec()), Pending::Delete);
    }

    /// Deletes every key of `table` within `bounds`. The only bulk-destructive
    /// operation; used by unwind.
    pub fn delete_range(&mut self, table: &'static str, bounds: impl RangeBounds<Vec<u8>> + Clone) {
        for (key, _) in self.range(table, bounds) {
            self.pending.insert((table, key), Pending::Delete);
        }
    }

    /// Applies the buffered writes atomically.
    pub fn commit(self) {
        let mut tables = self.db.tables.write().expect("storage lock is poisoned");
        for ((table, key), change) in self.pending {
            let entries = tables.entry(table).or_default();
            match change {
                Pending::Put(value) => {
                    entries.insert(key, value);
                }
                Pending::Delete => {
                    entries.remove(&key);
                }
            }
        }
    }

    /// Discards the buffered writes.
    pub fn rollback(self) {
        drop(self);
    }
}

/// Big-endian key for a u64-ordered table.
pub fn u64_key(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn u64_from_key(key: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&key[..8]);
    u64::from_be_bytes(bytes)
}
