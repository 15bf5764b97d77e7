//! AND queries over the encrypted index.
//!
//! A query page runs through these steps:
//!
//! 1. read the metadata of every query token and pick the rows to read; the
//!    first token leads and bounds the time window the other tokens read,
//! 2. intersect the postings of all tokens by the hash of their encrypted id,
//! 3. decrypt the survivors,
//! 4. drop postings outside the restriction and intersect again by id,
//! 5. check word order for phrase queries,
//! 6. drop ids already returned,
//! 7. resolve list ids, apply the folder restriction and keep what is left
//!    over for the next page.

use std::cmp::Ordering;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, trace};

use crate::analysis::{AlphanumericTokenizer, Tokenizer};
use crate::config::SealdexConfig;
use crate::crypto::{IndexCipher, id_hash};
use crate::entity::id::{compare_generated_ids, timestamp_to_generated_id};
use crate::entity::{EntityKind, IdTuple};
use crate::error::{Result, SealdexError};
use crate::index::core::read_metadata;
use crate::index::encoding::{decrypt_payload, open_record, row_key, split_posting_block};
use crate::index::mail_indexer::{now_millis, start_of_day_days_ago};
use crate::index::{
    DecryptedPosting, ElementData, FULL_INDEXED_TIMESTAMP, KindIndexer, MailIndexer,
    MetadataEntry, MetadataRow, NOTHING_INDEXED_TIMESTAMP, SuggestionStore,
};
use crate::search::types::{MoreResultsEntry, RowCursor, SearchRestriction, SearchResult};
use crate::store::{Db, Region, TransactionMode};
use crate::util::varint::iterate_binary_blocks;

/// Index extension attempts per query page.
const MAX_INDEX_EXTENSIONS: usize = 3;

/// A posting as read from a row, before decryption.
struct EncryptedPosting {
    encrypted_id: Vec<u8>,
    id_hash: u32,
    payload: Vec<u8>,
}

/// Rows selected from the leading token's metadata.
struct LeadingRows {
    rows: Vec<MetadataEntry>,
    oldest_timestamp: u64,
    newest_row_timestamp: u64,
    cursor: RowCursor,
}

/// Executes queries against the index.
pub struct QueryEngine {
    db: Arc<Db>,
    config: SealdexConfig,
    tokenizer: Arc<dyn Tokenizer>,
    indexers: AHashMap<EntityKind, Arc<dyn KindIndexer>>,
    mail_indexer: Option<Arc<MailIndexer>>,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("db", &self.db)
            .field("tokenizer", &self.tokenizer.name())
            .field("kinds", &self.indexers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl QueryEngine {
    pub fn new(db: Arc<Db>, config: SealdexConfig) -> Self {
        QueryEngine {
            db,
            config,
            tokenizer: Arc::new(AlphanumericTokenizer::new()),
            indexers: AHashMap::new(),
            mail_indexer: None,
        }
    }

    /// Tokenize queries with `tokenizer`. Must match the indexers' tokenizer.
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Use the indexer of a kind for suggestions and entity lookups.
    pub fn with_indexer(mut self, indexer: Arc<dyn KindIndexer>) -> Self {
        self.indexers.insert(indexer.kind(), indexer);
        self
    }

    /// Register the mail indexer, which also enables index extension.
    pub fn with_mail_indexer(mut self, mail_indexer: Arc<MailIndexer>) -> Self {
        self.indexers.insert(EntityKind::Mail, mail_indexer.clone());
        self.mail_indexer = Some(mail_indexer);
        self
    }

    /// Run an AND query.
    ///
    /// With `min_suggestion_count > 0` and a suggestion store for the
    /// restricted kind, the last query token is treated as the prefix of a
    /// word. Results are ordered newest first.
    pub async fn search(
        &self,
        query: &str,
        restriction: SearchRestriction,
        min_suggestion_count: usize,
        max_results: Option<usize>,
    ) -> Result<SearchResult> {
        self.db.initialized().await?;
        let tokens = self.tokenize(query)?;
        let trimmed = query.trim();
        let mut result = SearchResult {
            query: query.to_string(),
            current_index_timestamp: self.get_search_end_timestamp(&restriction),
            restriction,
            results: Vec::new(),
            last_read_search_index_row: tokens
                .iter()
                .map(|token| (token.clone(), RowCursor::Unread))
                .collect(),
            match_word_order: tokens.len() > 1
                && trimmed.len() > 1
                && trimmed.starts_with('"')
                && trimmed.ends_with('"'),
            more_results: Vec::new(),
        };
        if tokens.is_empty() {
            return Ok(result);
        }

        let suggestions = self
            .indexers
            .get(&result.restriction.kind)
            .and_then(|indexer| indexer.suggestions().cloned());
        match suggestions {
            Some(store) if min_suggestion_count > 0 && tokens.len() == 1 => {
                self.add_suggestions(&tokens[0], &store, min_suggestion_count, &mut result)
                    .await?;
                if result.results.len() < min_suggestion_count {
                    self.start_or_continue_search(&mut result, None).await?;
                }
            }
            Some(_) if min_suggestion_count > 0 => {
                let suggestion_token = result
                    .last_read_search_index_row
                    .pop()
                    .map(|(token, _)| token)
                    .unwrap_or_default();
                self.start_or_continue_search(&mut result, None).await?;
                sort_newest_first(&mut result.results);
                self.load_and_reduce(&mut result, &suggestion_token, min_suggestion_count)
                    .await?;
            }
            _ => match max_results {
                Some(count) => self.fill_results(&mut result, count).await?,
                None => self.start_or_continue_search(&mut result, None).await?,
            },
        }

        sort_newest_first(&mut result.results);
        debug!(
            kind = %result.restriction.kind,
            tokens = tokens.len(),
            results = result.results.len(),
            more = result.more_results.len(),
            "search finished"
        );
        Ok(result)
    }

    /// Continue a search, adding up to `count` results that were not
    /// returned before.
    pub async fn get_more_search_results(
        &self,
        mut result: SearchResult,
        count: usize,
    ) -> Result<SearchResult> {
        self.db.initialized().await?;
        self.fill_results(&mut result, count).await?;
        Ok(result)
    }

    /// Oldest creation time a query can match.
    pub fn get_search_end_timestamp(&self, restriction: &SearchRestriction) -> u64 {
        if let Some(end) = restriction.end {
            return end;
        }
        match (&self.mail_indexer, restriction.kind) {
            (Some(mail_indexer), EntityKind::Mail) => {
                match mail_indexer.current_index_timestamp() {
                    NOTHING_INDEXED_TIMESTAMP => now_millis(),
                    timestamp => timestamp,
                }
            }
            _ => FULL_INDEXED_TIMESTAMP,
        }
    }

    fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        Ok(self.tokenizer.tokenize(text)?.map(|token| token.text).collect())
    }

    async fn fill_results(&self, result: &mut SearchResult, count: usize) -> Result<()> {
        let target = result.results.len() + count;
        while result.results.len() < target && !result.is_exhausted() {
            let missing = target - result.results.len();
            self.start_or_continue_search(result, Some(missing)).await?;
        }
        Ok(())
    }

    /// Search every completion of `token` until enough results are found.
    async fn add_suggestions(
        &self,
        token: &str,
        store: &SuggestionStore,
        min_suggestion_count: usize,
        result: &mut SearchResult,
    ) -> Result<()> {
        for suggestion in store.get_suggestions(token) {
            if result.results.len() >= min_suggestion_count {
                break;
            }
            let mut suggestion_result = SearchResult {
                query: suggestion.clone(),
                restriction: result.restriction.clone(),
                results: std::mem::take(&mut result.results),
                current_index_timestamp: result.current_index_timestamp,
                last_read_search_index_row: vec![(suggestion, RowCursor::Unread)],
                match_word_order: false,
                more_results: Vec::new(),
            };
            let outcome = self
                .start_or_continue_search(&mut suggestion_result, None)
                .await;
            result.results = suggestion_result.results;
            outcome?;
        }
        Ok(())
    }

    /// Keep results having a word that starts with `suggestion_token`, or
    /// containing the whole query for phrase searches.
    async fn load_and_reduce(
        &self,
        result: &mut SearchResult,
        suggestion_token: &str,
        min_suggestion_count: usize,
    ) -> Result<()> {
        let Some(indexer) = self.indexers.get(&result.restriction.kind) else {
            return Ok(());
        };
        let needle = if result.match_word_order {
            self.tokenize(&result.query)?.join(" ")
        } else {
            suggestion_token.to_string()
        };

        let mut reduced = Vec::new();
        for id in &result.results {
            if reduced.len() >= min_suggestion_count {
                break;
            }
            let values = match indexer.load_attribute_values(id).await {
                Ok(values) => values,
                Err(e) if e.is_entity_gone() => {
                    debug!(id = %id, "result is gone, dropping it");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let mut found = false;
            for (attribute, value) in &values {
                if !result.restriction.allows_attribute(*attribute) {
                    continue;
                }
                let words = self.tokenize(value)?;
                found = if result.match_word_order {
                    words.join(" ").contains(&needle)
                } else {
                    words.iter().any(|word| word.starts_with(&needle))
                };
                if found {
                    break;
                }
            }
            if found {
                reduced.push(id.clone());
            }
        }
        result.results = reduced;
        Ok(())
    }

    async fn start_or_continue_search(
        &self,
        result: &mut SearchResult,
        max_results: Option<usize>,
    ) -> Result<()> {
        self.extend_index_if_needed(result).await?;

        let entries = if max_results.is_some_and(|max| result.more_results.len() >= max) {
            std::mem::take(&mut result.more_results)
        } else {
            let mut found = self.find_new_entries(result, max_results).await?;
            found.append(&mut result.more_results);
            found
        };
        self.filter_by_list_id_and_group_search_results(entries, result, max_results)
            .await
    }

    /// Make the mail index cover the queried window before searching it.
    async fn extend_index_if_needed(&self, result: &mut SearchResult) -> Result<()> {
        let Some(mail_indexer) = &self.mail_indexer else {
            return Ok(());
        };
        if result.restriction.kind != EntityKind::Mail || !result.more_results.is_empty() {
            return Ok(());
        }
        let required_end = result.restriction.end.unwrap_or_else(|| {
            start_of_day_days_ago(self.config.initial_mail_index_interval_days)
        });
        for _ in 0..MAX_INDEX_EXTENSIONS {
            let before = mail_indexer.current_index_timestamp();
            if before <= required_end {
                break;
            }
            debug!(required_end, current = before, "extending mail index");
            mail_indexer.extend_index_if_needed(required_end).await?;
            if mail_indexer.current_index_timestamp() >= before {
                break;
            }
        }
        result.current_index_timestamp = self.get_search_end_timestamp(&result.restriction);
        Ok(())
    }

    /// Steps 1 to 6 for the next page of the leading token.
    async fn find_new_entries(
        &self,
        result: &mut SearchResult,
        max_results: Option<usize>,
    ) -> Result<Vec<MoreResultsEntry>> {
        let Some((_, leading_cursor)) = result.last_read_search_index_row.first().cloned() else {
            return Ok(Vec::new());
        };
        let must_be_older_than = match leading_cursor {
            RowCursor::Exhausted => return Ok(Vec::new()),
            RowCursor::Unread => u64::MAX,
            RowCursor::OlderThan(timestamp) => timestamp,
        };

        let cipher = self.db.initialized().await?;
        let kind = result.restriction.kind;
        let mut transaction = self
            .db
            .store()
            .begin(
                TransactionMode::ReadOnly,
                &[Region::SearchIndex, Region::SearchIndexMeta],
            )
            .await?;

        let mut metadata = Vec::with_capacity(result.last_read_search_index_row.len());
        for (token, _) in &result.last_read_search_index_row {
            let index_key = cipher.index_key(token);
            metadata.push(
                read_metadata(transaction.as_mut(), cipher.as_ref(), &index_key)
                    .await?
                    .unwrap_or_default(),
            );
        }

        let budget = max_results.map(|_| self.config.leading_row_budget);
        let leading = find_rows_to_read(&metadata[0], kind, must_be_older_than, budget);
        result.last_read_search_index_row[0].1 = leading.cursor;
        if leading.rows.is_empty() {
            transaction.commit().await?;
            return Ok(Vec::new());
        }

        let mut rows_per_token = vec![leading.rows.clone()];
        for row in &metadata[1..] {
            rows_per_token.push(find_rows_to_read_by_time_range(
                row,
                kind,
                leading.newest_row_timestamp,
                leading.oldest_timestamp,
            ));
        }

        let mut postings_per_token = Vec::with_capacity(rows_per_token.len());
        for rows in &rows_per_token {
            let mut postings = Vec::new();
            for row in rows {
                let Some(bytes) = transaction
                    .get(Region::SearchIndex, &row_key(row.key))
                    .await?
                else {
                    continue;
                };
                for block in iterate_binary_blocks(&bytes) {
                    let (encrypted_id, payload) = split_posting_block(block?)?;
                    postings.push(EncryptedPosting {
                        encrypted_id: encrypted_id.to_vec(),
                        id_hash: id_hash(encrypted_id),
                        payload: payload.to_vec(),
                    });
                }
            }
            postings_per_token.push(postings);
        }
        transaction.commit().await?;

        let postings_per_token = filter_by_encrypted_id(postings_per_token);
        let postings_per_token = decrypt_postings(cipher.as_ref(), postings_per_token)?;
        let end_timestamp = self.get_search_end_timestamp(&result.restriction);
        let postings_per_token = filter_by_type_and_attribute_and_time(
            postings_per_token,
            &result.restriction,
            end_timestamp,
        );
        let postings = reduce_words(postings_per_token, result.match_word_order);
        let entries = reduce_to_unique_element_ids(postings, result);
        trace!(entries = entries.len(), cursor = ?leading.cursor, "read index page");
        Ok(entries)
    }

    /// Step 7: resolve up to `max_results` entries and keep the rest.
    async fn filter_by_list_id_and_group_search_results(
        &self,
        mut entries: Vec<MoreResultsEntry>,
        result: &mut SearchResult,
        max_results: Option<usize>,
    ) -> Result<()> {
        entries.sort_by(|a, b| compare_generated_ids(&b.id, &a.id));
        let take = max_results.unwrap_or(entries.len()).min(entries.len());
        let remaining = entries.split_off(take);

        let cipher = self.db.initialized().await?;
        let resolved: Vec<Option<IdTuple>> = stream::iter(entries)
            .map(|entry| self.resolve_list_id(cipher.as_ref(), entry))
            .buffered(self.config.result_lookup_concurrency)
            .try_collect()
            .await?;
        let mut ids: Vec<IdTuple> = resolved.into_iter().flatten().collect();

        if !result.restriction.folder_ids.is_empty() {
            ids = self.filter_by_folder(ids, &result.restriction).await?;
        }

        result.results.extend(ids);
        result.more_results = remaining;
        Ok(())
    }

    async fn resolve_list_id(
        &self,
        cipher: &dyn IndexCipher,
        entry: MoreResultsEntry,
    ) -> Result<Option<IdTuple>> {
        let mut transaction = self
            .db
            .store()
            .begin(TransactionMode::ReadOnly, &[Region::ElementData])
            .await?;
        let sealed = transaction
            .get(Region::ElementData, &entry.encrypted_id)
            .await?;
        transaction.commit().await?;
        match sealed {
            Some(sealed) => {
                let data: ElementData = open_record(cipher, &sealed)?;
                Ok(Some(IdTuple::new(data.list_id, entry.id)))
            }
            None => {
                debug!(id = %entry.id, "index references an element without element data");
                Ok(None)
            }
        }
    }

    async fn filter_by_folder(
        &self,
        ids: Vec<IdTuple>,
        restriction: &SearchRestriction,
    ) -> Result<Vec<IdTuple>> {
        let indexer = self.indexers.get(&restriction.kind).ok_or_else(|| {
            SealdexError::query(format!(
                "folder restriction needs an indexer for {}",
                restriction.kind
            ))
        })?;
        let mut kept = Vec::with_capacity(ids.len());
        for id in ids {
            match indexer.load_set_ids(&id).await {
                Ok(sets) => {
                    if sets.iter().any(|set| restriction.folder_ids.contains(set)) {
                        kept.push(id);
                    }
                }
                Err(e) if e.is_entity_gone() => {
                    debug!(id = %id, "could not load result to check its folders");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(kept)
    }
}

fn sort_newest_first(ids: &mut [IdTuple]) {
    ids.sort_by(|a, b| compare_generated_ids(&b.element_id, &a.element_id));
}

/// Rows of the leading token for one page: newest first, older than the
/// cursor, until the posting budget is spent.
fn find_rows_to_read(
    metadata: &MetadataRow,
    kind: EntityKind,
    must_be_older_than: u64,
    budget: Option<usize>,
) -> LeadingRows {
    let mut rows = Vec::new();
    let mut postings = 0;
    let mut oldest_timestamp = 0;
    let mut newest_row_timestamp = u64::MAX;
    let mut exhausted = true;

    for row in metadata.rows_of(kind) {
        if row.oldest_element_timestamp >= must_be_older_than {
            newest_row_timestamp = row.oldest_element_timestamp;
            continue;
        }
        if budget.is_some_and(|budget| postings >= budget) {
            exhausted = false;
            break;
        }
        postings += row.size;
        oldest_timestamp = row.oldest_element_timestamp;
        rows.push(*row);
    }
    if budget.is_none() {
        oldest_timestamp = 0;
    }

    LeadingRows {
        rows,
        oldest_timestamp,
        newest_row_timestamp,
        cursor: if exhausted {
            RowCursor::Exhausted
        } else {
            RowCursor::OlderThan(oldest_timestamp)
        },
    }
}

/// Rows of a non-leading token that may hold elements created between
/// `to_oldest` and `from_newest`.
fn find_rows_to_read_by_time_range(
    metadata: &MetadataRow,
    kind: EntityKind,
    from_newest: u64,
    to_oldest: u64,
) -> Vec<MetadataEntry> {
    let mut rows = Vec::new();
    for row in metadata.rows_of(kind) {
        if row.oldest_element_timestamp < from_newest {
            rows.push(*row);
            if row.oldest_element_timestamp <= to_oldest {
                break;
            }
        }
    }
    rows
}

/// Keep postings whose id hash occurs for every token.
fn filter_by_encrypted_id(tokens: Vec<Vec<EncryptedPosting>>) -> Vec<Vec<EncryptedPosting>> {
    let mut matching: Option<AHashSet<u32>> = None;
    for postings in &tokens {
        let hashes = postings.iter().map(|posting| posting.id_hash);
        matching = Some(match matching {
            None => hashes.collect(),
            Some(previous) => hashes.filter(|hash| previous.contains(hash)).collect(),
        });
    }
    let matching = matching.unwrap_or_default();
    tokens
        .into_iter()
        .map(|postings| {
            postings
                .into_iter()
                .filter(|posting| matching.contains(&posting.id_hash))
                .collect()
        })
        .collect()
}

fn decrypt_postings(
    cipher: &dyn IndexCipher,
    tokens: Vec<Vec<EncryptedPosting>>,
) -> Result<Vec<Vec<DecryptedPosting>>> {
    let mut ids: AHashMap<Vec<u8>, String> = AHashMap::new();
    let mut decrypted = Vec::with_capacity(tokens.len());
    for postings in tokens {
        let mut token_postings = Vec::with_capacity(postings.len());
        for posting in postings {
            let id = match ids.get(&posting.encrypted_id) {
                Some(id) => id.clone(),
                None => {
                    let id = cipher.decrypt_id(&posting.encrypted_id)?;
                    ids.insert(posting.encrypted_id.clone(), id.clone());
                    id
                }
            };
            let payload = decrypt_payload(cipher, &posting.payload)?;
            token_postings.push(DecryptedPosting {
                id,
                encrypted_id: posting.encrypted_id,
                attribute: payload.attribute,
                positions: payload.positions,
            });
        }
        decrypted.push(token_postings);
    }
    Ok(decrypted)
}

/// Apply attribute and time restrictions, then keep ids matched by every
/// token.
fn filter_by_type_and_attribute_and_time(
    tokens: Vec<Vec<DecryptedPosting>>,
    restriction: &SearchRestriction,
    end_timestamp: u64,
) -> Vec<Vec<DecryptedPosting>> {
    let min_included_id = timestamp_to_generated_id(end_timestamp);
    let max_excluded_id = restriction
        .start
        .map(|start| timestamp_to_generated_id(start.saturating_add(1)));

    let tokens: Vec<Vec<DecryptedPosting>> = tokens
        .into_iter()
        .map(|postings| {
            postings
                .into_iter()
                .filter(|posting| {
                    restriction.allows_attribute(posting.attribute)
                        && max_excluded_id.as_deref().is_none_or(|max| {
                            compare_generated_ids(max, &posting.id) == Ordering::Greater
                        })
                        && compare_generated_ids(&min_included_id, &posting.id)
                            != Ordering::Greater
                })
                .collect()
        })
        .collect();

    let mut matching: Option<AHashSet<String>> = None;
    for postings in &tokens {
        let ids = postings.iter().map(|posting| posting.id.clone());
        matching = Some(match matching {
            None => ids.collect(),
            Some(previous) => ids.filter(|id| previous.contains(id)).collect(),
        });
    }
    let matching = matching.unwrap_or_default();
    tokens
        .into_iter()
        .map(|postings| {
            postings
                .into_iter()
                .filter(|posting| matching.contains(&posting.id))
                .collect()
        })
        .collect()
}

/// Postings of the first token that satisfy the word order, if required.
fn reduce_words(tokens: Vec<Vec<DecryptedPosting>>, match_word_order: bool) -> Vec<DecryptedPosting> {
    let mut tokens = tokens.into_iter();
    let Some(first) = tokens.next() else {
        return Vec::new();
    };
    if !match_word_order {
        return first;
    }
    let following: Vec<Vec<DecryptedPosting>> = tokens.collect();
    first
        .into_iter()
        .filter(|first_posting| {
            let mut positions = first_posting.positions.clone();
            for (offset, postings) in following.iter().enumerate() {
                let offset = offset as u32 + 1;
                match postings.iter().find(|posting| {
                    posting.id == first_posting.id && posting.attribute == first_posting.attribute
                }) {
                    Some(posting) => {
                        positions.retain(|position| posting.positions.contains(&(position + offset)))
                    }
                    None => positions.clear(),
                }
            }
            !positions.is_empty()
        })
        .collect()
}

/// One entry per id, skipping ids already returned or buffered.
fn reduce_to_unique_element_ids(
    postings: Vec<DecryptedPosting>,
    result: &SearchResult,
) -> Vec<MoreResultsEntry> {
    let mut seen: AHashSet<String> = result
        .results
        .iter()
        .map(|id| id.element_id.clone())
        .chain(result.more_results.iter().map(|entry| entry.id.clone()))
        .collect();
    postings
        .into_iter()
        .filter(|posting| seen.insert(posting.id.clone()))
        .map(|posting| MoreResultsEntry {
            id: posting.id,
            encrypted_id: posting.encrypted_id,
        })
        .collect()
}
