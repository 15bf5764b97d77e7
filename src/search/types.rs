//! Query inputs and the search result accumulator.

use serde::{Deserialize, Serialize};

use crate::entity::{AttributeId, EntityKind, IdTuple};

/// What a query is restricted to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRestriction {
    pub kind: EntityKind,
    /// Newest creation time to include, in milliseconds.
    pub start: Option<u64>,
    /// Oldest creation time to include, in milliseconds.
    pub end: Option<u64>,
    /// Only match postings of these attributes.
    pub attribute_ids: Option<Vec<AttributeId>>,
    /// Only return elements contained in one of these sets (folders).
    pub folder_ids: Vec<String>,
}

impl SearchRestriction {
    pub fn new(kind: EntityKind) -> Self {
        SearchRestriction {
            kind,
            start: None,
            end: None,
            attribute_ids: None,
            folder_ids: Vec::new(),
        }
    }

    pub fn with_time_range(mut self, start: Option<u64>, end: Option<u64>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_attributes(mut self, attribute_ids: Vec<AttributeId>) -> Self {
        self.attribute_ids = Some(attribute_ids);
        self
    }

    pub fn with_folders(mut self, folder_ids: Vec<String>) -> Self {
        self.folder_ids = folder_ids;
        self
    }

    pub(crate) fn allows_attribute(&self, attribute: AttributeId) -> bool {
        self.attribute_ids
            .as_ref()
            .is_none_or(|ids| ids.contains(&attribute))
    }
}

/// How far the rows of a token have been read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowCursor {
    /// Nothing read yet.
    Unread,
    /// Rows whose oldest element is older than this timestamp remain.
    OlderThan(u64),
    /// Every row has been read.
    Exhausted,
}

/// A matched element whose list has not been resolved yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoreResultsEntry {
    pub id: String,
    pub encrypted_id: Vec<u8>,
}

/// Result of a query, also carrying the state needed to fetch more.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub query: String,
    pub restriction: SearchRestriction,
    /// Matches, newest first. No id appears twice.
    pub results: Vec<IdTuple>,
    /// Oldest point in time the index covered for this query.
    pub current_index_timestamp: u64,
    /// Per query token, how far its rows have been read. Only the first
    /// token's cursor advances.
    pub last_read_search_index_row: Vec<(String, RowCursor)>,
    pub match_word_order: bool,
    /// Matches found but not returned yet.
    pub more_results: Vec<MoreResultsEntry>,
}

impl SearchResult {
    /// Whether [`crate::search::QueryEngine::get_more_search_results`] can
    /// find anything else.
    pub fn is_exhausted(&self) -> bool {
        self.more_results.is_empty()
            && self
                .last_read_search_index_row
                .first()
                .is_none_or(|(_, cursor)| *cursor == RowCursor::Exhausted)
    }
}
