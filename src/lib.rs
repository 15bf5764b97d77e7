//! # Sealdex
//!
//! A client-side encrypted full-text search index and range-bounded entity
//! cache.
//!
//! ## Features
//!
//! - Encrypted inverted index: tokens are stored under keyed hashes and every
//!   posting is encrypted
//! - Time-bucketed metadata rows that let queries skip rows outside their
//!   time window without decrypting them
//! - AND, phrase and prefix (suggestion) queries with incremental paging
//! - Incremental maintenance from batches of entity change events
//! - A per-list range cache that never has gaps inside its range
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use sealdex::config::SealdexConfig;
//! use sealdex::context::SearchContext;
//! use sealdex::crypto::AesIndexCipher;
//! use sealdex::entity::id::timestamp_to_generated_id;
//! use sealdex::entity::{Contact, ContactList, EntityKind, IdTuple, MemoryRestClient};
//! use sealdex::search::SearchRestriction;
//! use sealdex::store::MemoryStore;
//!
//! # tokio_test::block_on(async {
//! let rest = Arc::new(MemoryRestClient::new());
//! let id = IdTuple::new("contacts", timestamp_to_generated_id(1_700_000_000_000));
//! rest.put(&Contact::new(id, "group", "Anne", "Smith")).unwrap();
//!
//! let context = SearchContext::new(
//!     Arc::new(MemoryStore::new()),
//!     rest,
//!     SealdexConfig::default(),
//! )
//! .unwrap();
//! let contacts = ContactList {
//!     owner_group: "group".to_string(),
//!     contacts: "contacts".to_string(),
//! };
//! context
//!     .init_indexer(Arc::new(AesIndexCipher::generate()), Some(contacts), Vec::new())
//!     .await
//!     .unwrap();
//!
//! let result = context
//!     .search("smith", SearchRestriction::new(EntityKind::Contact), 0, Some(10))
//!     .await
//!     .unwrap();
//! assert_eq!(result.results.len(), 1);
//! # });
//! ```

pub mod analysis;
pub mod cache;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod crypto;
pub mod entity;
pub mod error;
pub mod events;
pub mod index;
pub mod search;
pub mod store;
pub mod util;

pub mod prelude {
    pub use crate::cache::{Range, RangeCache};
    pub use crate::config::SealdexConfig;
    pub use crate::context::SearchContext;
    pub use crate::coordinator::EventCoordinator;
    pub use crate::crypto::{AesIndexCipher, IndexCipher};
    pub use crate::entity::{EntityKind, IdTuple};
    pub use crate::error::{Result, SealdexError};
    pub use crate::events::{EntityUpdate, EventBatch, OperationType};
    pub use crate::search::{QueryEngine, SearchRestriction, SearchResult};
    pub use crate::store::{EncryptedStore, MemoryStore};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
