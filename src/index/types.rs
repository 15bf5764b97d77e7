//! Data structures of the encrypted inverted index.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::entity::{AttributeId, EntityKind};

/// Group index timestamp meaning everything is indexed.
pub const FULL_INDEXED_TIMESTAMP: u64 = 0;

/// Group index timestamp meaning nothing is indexed yet.
pub const NOTHING_INDEXED_TIMESTAMP: u64 = (1 << 42) - 1;

/// Occurrences of one token in one attribute of one element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Element id.
    pub id: String,
    pub attribute: AttributeId,
    /// Token offsets within the attribute, strictly increasing.
    pub positions: Vec<u32>,
}

impl IndexEntry {
    pub fn new(id: &str, attribute: AttributeId, position: u32) -> Self {
        IndexEntry {
            id: id.to_string(),
            attribute,
            positions: vec![position],
        }
    }
}

/// The part of a posting that is encrypted as one payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PostingPayload {
    pub attribute: AttributeId,
    pub positions: Vec<u32>,
}

/// A posting ready to be written to a search index row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedIndexEntry {
    /// Storage key of the token.
    pub index_key: Vec<u8>,
    /// Framed posting block, see [`crate::index::encoding`].
    pub block: Vec<u8>,
    /// Creation time of the element, used to pick its row.
    pub timestamp: u64,
}

/// All postings of one element, encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedElement {
    pub kind: EntityKind,
    pub encrypted_id: Vec<u8>,
    pub list_id: String,
    pub owner_group: String,
    pub entries: Vec<EncryptedIndexEntry>,
}

/// A decrypted posting as seen by the query engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedPosting {
    pub id: String,
    pub encrypted_id: Vec<u8>,
    pub attribute: AttributeId,
    pub positions: Vec<u32>,
}

/// Pointer to one search index row of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub kind: EntityKind,
    /// Key of the row in the search index region.
    pub key: u64,
    /// Number of postings in the row.
    pub size: usize,
    /// Lower bound of the creation time of every element in the row.
    pub oldest_element_timestamp: u64,
}

/// Rows of one token, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRow {
    pub entries: Vec<MetadataEntry>,
}

impl MetadataRow {
    /// Rows of `kind`, newest first.
    pub fn rows_of(&self, kind: EntityKind) -> impl Iterator<Item = &MetadataEntry> {
        self.entries.iter().filter(move |entry| entry.kind == kind)
    }

    /// Row that receives a posting of an element created at `timestamp`:
    /// the newest row starting at or before it, else the oldest row.
    pub fn row_for_timestamp(&self, kind: EntityKind, timestamp: u64) -> Option<usize> {
        let mut oldest = None;
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.kind != kind {
                continue;
            }
            if entry.oldest_element_timestamp <= timestamp {
                return Some(index);
            }
            oldest = Some(index);
        }
        oldest
    }

    /// Restore newest-first order.
    pub fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| b.oldest_element_timestamp.cmp(&a.oldest_element_timestamp));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Indexing progress of one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupData {
    /// Elements created at or after this time are indexed.
    pub index_timestamp: u64,
    /// Recently applied batches, oldest first.
    pub last_batch_ids: VecDeque<(EntityKind, String)>,
}

impl Default for GroupData {
    fn default() -> Self {
        GroupData {
            index_timestamp: NOTHING_INDEXED_TIMESTAMP,
            last_batch_ids: VecDeque::new(),
        }
    }
}

impl GroupData {
    pub fn has_processed(&self, kind: EntityKind, batch_id: &str) -> bool {
        self.last_batch_ids
            .iter()
            .any(|(k, id)| *k == kind && id == batch_id)
    }

    /// Remember a batch, forgetting the oldest beyond `limit`.
    pub fn record_batch(&mut self, kind: EntityKind, batch_id: &str, limit: usize) {
        if self.has_processed(kind, batch_id) {
            return;
        }
        self.last_batch_ids.push_back((kind, batch_id.to_string()));
        while self.last_batch_ids.len() > limit {
            self.last_batch_ids.pop_front();
        }
    }
}

/// Bookkeeping of one indexed element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementData {
    pub kind: EntityKind,
    pub list_id: String,
    pub owner_group: String,
    /// Index keys of every token the element has postings under.
    pub index_keys: Vec<Vec<u8>>,
}
