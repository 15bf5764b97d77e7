//! Query execution over the encrypted index.
//!
//! [`QueryEngine::search`] answers AND queries, optionally as phrase
//! (quoted) or prefix (suggestion) queries, and returns a [`SearchResult`]
//! that [`QueryEngine::get_more_search_results`] can continue page by page.

pub mod engine;
pub mod types;

pub use engine::QueryEngine;
pub use types::{MoreResultsEntry, RowCursor, SearchRestriction, SearchResult};
