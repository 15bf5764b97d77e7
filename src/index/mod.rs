//! The encrypted inverted search index.
//!
//! Tokens are stored under a keyed hash ([`crate::crypto::IndexCipher::index_key`])
//! and every posting is encrypted. For each token a [`MetadataRow`] lists
//! the rows holding its postings, newest first, together with the oldest
//! element timestamp of each row. Queries use those timestamps to skip rows
//! outside the time window they are interested in.
//!
//! Writes go through [`IndexUpdate`] command lists that
//! [`IndexerCore::write_index_update`] applies in one transaction.

pub mod core;
pub mod encoding;
pub mod mail_indexer;
pub mod suggestion;
pub mod type_indexer;
pub mod types;
pub mod update;

pub use self::core::{EntriesByToken, INDEX_REGIONS, IndexerCore};
pub use mail_indexer::MailIndexer;
pub use suggestion::SuggestionStore;
pub use type_indexer::{KindIndexer, StagedUpdate, TypeIndexer};
pub use types::{
    DecryptedPosting, ElementData, EncryptedElement, EncryptedIndexEntry, FULL_INDEXED_TIMESTAMP,
    GroupData, IndexEntry, MetadataEntry, MetadataRow, NOTHING_INDEXED_TIMESTAMP,
};
pub use update::{IndexCommand, IndexUpdate};
