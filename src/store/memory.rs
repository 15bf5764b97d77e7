//! In-memory encrypted store for tests and ephemeral sessions.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Result, SealdexError};
use crate::store::{EncryptedStore, Region, StoreTransaction, TransactionMode};

type RegionMap = AHashMap<Region, BTreeMap<Vec<u8>, Vec<u8>>>;

/// An in-memory implementation of [`EncryptedStore`].
///
/// Read-write transactions are serialized by a writer lock that is held from
/// `begin` until commit or drop. Read-only transactions never wait.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    /// Committed contents of every region.
    regions: Arc<RwLock<RegionMap>>,
    /// Serializes writers.
    writer: Arc<Mutex<()>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed entries in `region`.
    pub fn entry_count(&self, region: Region) -> usize {
        self.regions
            .read()
            .get(&region)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Committed value under `key`, bypassing transactions.
    pub fn raw_get(&self, region: Region, key: &[u8]) -> Option<Vec<u8>> {
        self.regions
            .read()
            .get(&region)
            .and_then(|entries| entries.get(key).cloned())
    }

    /// Clear all regions.
    pub fn clear(&self) {
        self.regions.write().clear();
    }
}

#[async_trait]
impl EncryptedStore for MemoryStore {
    async fn begin(
        &self,
        mode: TransactionMode,
        regions: &[Region],
    ) -> Result<Box<dyn StoreTransaction>> {
        if regions.is_empty() {
            return Err(SealdexError::programming(
                "transaction must declare at least one region",
            ));
        }
        let writer_guard = match mode {
            TransactionMode::ReadOnly => None,
            TransactionMode::ReadWrite => Some(Arc::clone(&self.writer).lock_owned().await),
        };

        Ok(Box::new(MemoryTransaction {
            regions: Arc::clone(&self.regions),
            declared: regions.to_vec(),
            mode,
            staged: Vec::new(),
            _writer_guard: writer_guard,
        }))
    }
}

#[derive(Debug, Clone)]
enum StagedWrite {
    Put(Region, Vec<u8>, Vec<u8>),
    Delete(Region, Vec<u8>),
}

/// A transaction over a [`MemoryStore`].
struct MemoryTransaction {
    regions: Arc<RwLock<RegionMap>>,
    declared: Vec<Region>,
    mode: TransactionMode,
    staged: Vec<StagedWrite>,
    _writer_guard: Option<OwnedMutexGuard<()>>,
}

impl MemoryTransaction {
    fn check_region(&self, region: Region) -> Result<()> {
        if self.declared.contains(&region) {
            Ok(())
        } else {
            Err(SealdexError::programming(format!(
                "region {region} was not declared for this transaction"
            )))
        }
    }

    fn check_writable(&self, region: Region) -> Result<()> {
        self.check_region(region)?;
        if self.mode == TransactionMode::ReadOnly {
            return Err(SealdexError::programming(format!(
                "write to {region} in a read-only transaction"
            )));
        }
        Ok(())
    }

    /// Latest staged state of `key`: `Some(Some(v))` written, `Some(None)` deleted.
    fn staged_value(&self, region: Region, key: &[u8]) -> Option<Option<&Vec<u8>>> {
        self.staged.iter().rev().find_map(|write| match write {
            StagedWrite::Put(r, k, v) if *r == region && k.as_slice() == key => Some(Some(v)),
            StagedWrite::Delete(r, k) if *r == region && k.as_slice() == key => Some(None),
            _ => None,
        })
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get(&mut self, region: Region, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_region(region)?;
        if let Some(staged) = self.staged_value(region, key) {
            return Ok(staged.cloned());
        }
        Ok(self
            .regions
            .read()
            .get(&region)
            .and_then(|entries| entries.get(key).cloned()))
    }

    async fn put(&mut self, region: Region, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.check_writable(region)?;
        self.staged.push(StagedWrite::Put(region, key, value));
        Ok(())
    }

    async fn delete(&mut self, region: Region, key: Vec<u8>) -> Result<()> {
        self.check_writable(region)?;
        self.staged.push(StagedWrite::Delete(region, key));
        Ok(())
    }

    async fn scan_prefix(
        &mut self,
        region: Region,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check_region(region)?;
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .regions
            .read()
            .get(&region)
            .map(|entries| {
                entries
                    .range(prefix.to_vec()..)
                    .take_while(|(k, _)| k.starts_with(prefix))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();

        for write in &self.staged {
            match write {
                StagedWrite::Put(r, k, v) if *r == region && k.starts_with(prefix) => {
                    merged.insert(k.clone(), v.clone());
                }
                StagedWrite::Delete(r, k) if *r == region && k.starts_with(prefix) => {
                    merged.remove(k);
                }
                _ => {}
            }
        }

        Ok(merged.into_iter().collect())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            regions,
            staged,
            _writer_guard,
            ..
        } = *self;
        if staged.is_empty() {
            return Ok(());
        }
        let mut regions = regions.write();
        for write in staged {
            match write {
                StagedWrite::Put(region, key, value) => {
                    regions.entry(region).or_default().insert(key, value);
                }
                StagedWrite::Delete(region, key) => {
                    if let Some(entries) = regions.get_mut(&region) {
                        entries.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }
}
