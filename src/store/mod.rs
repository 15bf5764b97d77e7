//! Encrypted transactional key-value store abstraction.
//!
//! The platform storage engine is an external collaborator. The engine only
//! needs named regions, byte keys and values, and transactions that declare
//! the regions they touch up front. A read-write transaction stages its
//! writes and makes them visible atomically on [`StoreTransaction::commit`];
//! dropping it without committing discards everything.
//!
//! Values written by the index are already encrypted by the
//! [`crate::crypto::IndexCipher`]; the store itself never sees plaintext.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod db;
pub mod locks;
pub mod memory;

pub use db::Db;
pub use locks::ListLocks;
pub use memory::MemoryStore;

/// Named regions ("object stores") of the encrypted store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Region {
    /// Search index rows: row key → framed encrypted postings.
    SearchIndex,
    /// Per-token metadata: index key → encrypted metadata row.
    SearchIndexMeta,
    /// Per-element bookkeeping: encrypted id → encrypted element data.
    ElementData,
    /// Per-group indexing progress.
    GroupData,
    /// Counters and other bookkeeping.
    Meta,
    /// Encrypted suggestion tables keyed by lowercased type name.
    SearchTermSuggestions,
    /// Cached list elements: kind/list/element → encrypted JSON.
    CacheEntities,
    /// Cached ranges: kind/list → range bounds.
    CacheRanges,
}

impl Region {
    /// Stable region name.
    pub fn name(&self) -> &'static str {
        match self {
            Region::SearchIndex => "SearchIndex",
            Region::SearchIndexMeta => "SearchIndexMeta",
            Region::ElementData => "ElementData",
            Region::GroupData => "GroupData",
            Region::Meta => "Meta",
            Region::SearchTermSuggestions => "SearchTermSuggestions",
            Region::CacheEntities => "CacheEntities",
            Region::CacheRanges => "CacheRanges",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a transaction may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// A store that hands out transactions over a declared set of regions.
#[async_trait]
pub trait EncryptedStore: Send + Sync + fmt::Debug {
    /// Open a transaction touching exactly `regions`.
    async fn begin(
        &self,
        mode: TransactionMode,
        regions: &[Region],
    ) -> Result<Box<dyn StoreTransaction>>;
}

/// One open transaction.
///
/// Reads observe the transaction's own staged writes.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Read the value stored under `key`.
    async fn get(&mut self, region: Region, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Stage a write.
    async fn put(&mut self, region: Region, key: Vec<u8>, value: Vec<u8>) -> Result<()>;

    /// Stage a delete.
    async fn delete(&mut self, region: Region, key: Vec<u8>) -> Result<()>;

    /// All entries whose key starts with `prefix`, in key order.
    async fn scan_prefix(&mut self, region: Region, prefix: &[u8])
    -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply all staged writes atomically.
    async fn commit(self: Box<Self>) -> Result<()>;
}
