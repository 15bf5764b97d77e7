//! Progressive mail indexing.
//!
//! Mailboxes are indexed from the newest mail backwards, one time window at
//! a time. Each group remembers how far back it is indexed in its
//! [`GroupData`](crate::index::types::GroupData) index timestamp, and the
//! index can be extended further back when a search needs it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{Days, NaiveTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::entity::id::{GENERATED_MAX_ID, generated_id_to_timestamp, timestamp_to_generated_id};
use crate::entity::{AttributeId, EntityClient, EntityKind, IdTuple, Mail, MailBox};
use crate::error::{Result, SealdexError};
use crate::events::EventBatch;
use crate::index::core::IndexerCore;
use crate::index::suggestion::SuggestionStore;
use crate::index::type_indexer::{KindIndexer, StagedUpdate, TypeIndexer};
use crate::index::types::{FULL_INDEXED_TIMESTAMP, NOTHING_INDEXED_TIMESTAMP};
use crate::index::update::IndexUpdate;

/// Start of the day `days` days before today (UTC), in milliseconds.
pub fn start_of_day_days_ago(days: i64) -> u64 {
    let today = Utc::now().date_naive();
    let day = today
        .checked_sub_days(Days::new(days.max(0) as u64))
        .unwrap_or(today);
    day.and_time(NaiveTime::MIN)
        .and_utc()
        .timestamp_millis()
        .max(0) as u64
}

/// Current time in milliseconds.
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Indexes mailboxes back to a point in time and keeps them current.
#[derive(Debug)]
pub struct MailIndexer {
    indexer: TypeIndexer<Mail>,
    mailboxes: Mutex<Vec<MailBox>>,
    current_index_timestamp: AtomicU64,
    indexing: AtomicBool,
    run_lock: tokio::sync::Mutex<()>,
}

impl MailIndexer {
    pub fn new(core: Arc<IndexerCore>, client: EntityClient) -> Self {
        MailIndexer {
            indexer: TypeIndexer::new(core, client),
            mailboxes: Mutex::new(Vec::new()),
            current_index_timestamp: AtomicU64::new(NOTHING_INDEXED_TIMESTAMP),
            indexing: AtomicBool::new(false),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The underlying mail indexer.
    pub fn indexer(&self) -> &TypeIndexer<Mail> {
        &self.indexer
    }

    /// Oldest point in time every registered mailbox is indexed back to.
    pub fn current_index_timestamp(&self) -> u64 {
        self.current_index_timestamp.load(Ordering::SeqCst)
    }

    /// Whether an indexing run is in progress.
    pub fn is_indexing(&self) -> bool {
        self.indexing.load(Ordering::SeqCst)
    }

    /// Register the mailboxes to index and pick up their persisted progress.
    pub async fn register_mailboxes(&self, mailboxes: Vec<MailBox>) -> Result<()> {
        *self.mailboxes.lock() = mailboxes;
        self.refresh_current_index_timestamp().await
    }

    /// Index the registered mailboxes for the initial window.
    pub async fn init(&self, mailboxes: Vec<MailBox>) -> Result<()> {
        self.register_mailboxes(mailboxes).await?;
        let days = self.indexer.core().config().initial_mail_index_interval_days;
        self.extend_index_if_needed(start_of_day_days_ago(days)).await
    }

    /// Index back to `end_timestamp` unless the index already reaches it.
    pub async fn extend_index_if_needed(&self, end_timestamp: u64) -> Result<()> {
        if self.current_index_timestamp() > end_timestamp {
            self.index_mailboxes(end_timestamp).await
        } else {
            Ok(())
        }
    }

    /// Index every registered mailbox back to `end_timestamp`.
    pub async fn index_mailboxes(&self, end_timestamp: u64) -> Result<()> {
        let _run = self.run_lock.lock().await;
        self.indexing.store(true, Ordering::SeqCst);
        let result = self.index_mailboxes_until(end_timestamp).await;
        self.indexing.store(false, Ordering::SeqCst);
        result?;
        self.refresh_current_index_timestamp().await
    }

    async fn index_mailboxes_until(&self, end_timestamp: u64) -> Result<()> {
        let cipher = self.indexer.core().db().initialized().await?;
        let limit = self.indexer.core().config().load_multiple_limit;
        let mailboxes = self.mailboxes.lock().clone();

        for mailbox in mailboxes {
            let group_timestamp = self
                .indexer
                .get_index_timestamp(&mailbox.owner_group)
                .await?
                .unwrap_or(NOTHING_INDEXED_TIMESTAMP);
            if group_timestamp <= end_timestamp {
                continue;
            }

            let mut update = IndexUpdate::new(EntityKind::Mail);
            let mut words = Vec::new();
            let mut exhausted = true;
            for list_id in &mailbox.mail_lists {
                let mut start = if group_timestamp == NOTHING_INDEXED_TIMESTAMP {
                    GENERATED_MAX_ID.to_string()
                } else {
                    timestamp_to_generated_id(group_timestamp)
                };
                loop {
                    let page = match self
                        .indexer
                        .client()
                        .load_range::<Mail>(list_id, &start, limit, true)
                        .await
                    {
                        Ok(page) => page,
                        Err(SealdexError::NotFound(_)) => {
                            debug!(list_id = %list_id, "mail list not found");
                            break;
                        }
                        Err(e) => return Err(e),
                    };
                    let short_page = page.len() < limit;
                    let mut reached_end = false;
                    for mail in &page {
                        if generated_id_to_timestamp(&mail.id.element_id)? < end_timestamp {
                            reached_end = true;
                            break;
                        }
                        self.indexer
                            .add_entity(cipher.as_ref(), mail, &mut update, &mut words)?;
                    }
                    if reached_end {
                        exhausted = false;
                        break;
                    }
                    match page.last() {
                        Some(last) if !short_page => start = last.id.element_id.clone(),
                        _ => break,
                    }
                }
            }

            let new_timestamp = if exhausted {
                FULL_INDEXED_TIMESTAMP
            } else {
                end_timestamp
            };
            let indexed = update.added_elements();
            update.set_group_timestamp(&mailbox.owner_group, new_timestamp);
            self.indexer.core().write_index_update(update).await?;
            self.indexer.store_suggestions(&words).await?;
            info!(
                group_id = %mailbox.owner_group,
                count = indexed,
                index_timestamp = new_timestamp,
                "indexed mailbox"
            );
        }
        Ok(())
    }

    async fn refresh_current_index_timestamp(&self) -> Result<()> {
        let groups: Vec<String> = self
            .mailboxes
            .lock()
            .iter()
            .map(|mailbox| mailbox.owner_group.clone())
            .collect();
        let mut current = if groups.is_empty() {
            NOTHING_INDEXED_TIMESTAMP
        } else {
            FULL_INDEXED_TIMESTAMP
        };
        for group_id in groups {
            let timestamp = self
                .indexer
                .get_index_timestamp(&group_id)
                .await?
                .unwrap_or(NOTHING_INDEXED_TIMESTAMP);
            current = current.max(timestamp);
        }
        self.current_index_timestamp.store(current, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl KindIndexer for MailIndexer {
    fn kind(&self) -> EntityKind {
        EntityKind::Mail
    }

    fn suggestions(&self) -> Option<&Arc<SuggestionStore>> {
        self.indexer.suggestions()
    }

    async fn stage_batch(&self, batch: &EventBatch) -> Result<Option<StagedUpdate>> {
        self.indexer.stage_batch(batch).await
    }

    async fn store_suggestions(&self, words: &[String]) -> Result<()> {
        self.indexer.store_suggestions(words).await
    }

    async fn load_attribute_values(&self, id: &IdTuple) -> Result<Vec<(AttributeId, String)>> {
        self.indexer.load_attribute_values(id).await
    }

    async fn load_set_ids(&self, id: &IdTuple) -> Result<Vec<String>> {
        self.indexer.load_set_ids(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SealdexConfig;
    use crate::crypto::AesIndexCipher;
    use crate::entity::MemoryRestClient;
    use crate::entity::id::generated_id;
    use crate::store::{Db, MemoryStore};

    const DAY: u64 = 24 * 60 * 60 * 1000;

    fn mail_indexer(rest: Arc<MemoryRestClient>, limit: usize) -> MailIndexer {
        let db = Arc::new(Db::with_cipher(
            Arc::new(MemoryStore::new()),
            Arc::new(AesIndexCipher::generate()),
        ));
        let config = SealdexConfig {
            load_multiple_limit: limit,
            ..SealdexConfig::default()
        };
        MailIndexer::new(
            Arc::new(IndexerCore::new(db, config)),
            EntityClient::new(rest),
        )
    }

    fn mailbox() -> MailBox {
        MailBox {
            owner_group: "mailGroup".to_string(),
            mail_lists: vec!["inbox".to_string()],
        }
    }

    fn put_mail(rest: &MemoryRestClient, timestamp: u64, counter: u16, subject: &str) {
        let id = IdTuple::new("inbox", generated_id(timestamp, 0, counter));
        rest.put(&Mail::new(id, "mailGroup", subject, "")).unwrap();
    }

    async fn postings(indexer: &MailIndexer, token: &str) -> usize {
        indexer
            .indexer()
            .core()
            .metadata_for_token(token)
            .await
            .unwrap()
            .entries
            .iter()
            .map(|e| e.size)
            .sum()
    }

    #[tokio::test]
    async fn test_index_back_in_windows() {
        let rest = Arc::new(MemoryRestClient::new());
        let now = now_millis();
        for (i, age) in [1, 2, 3, 10, 40].into_iter().enumerate() {
            put_mail(&rest, now - age * DAY, i as u16, "report");
        }
        let indexer = mail_indexer(rest.clone(), 2);
        indexer.register_mailboxes(vec![mailbox()]).await.unwrap();
        assert_eq!(indexer.current_index_timestamp(), NOTHING_INDEXED_TIMESTAMP);

        let first_end = now - 5 * DAY;
        indexer.extend_index_if_needed(first_end).await.unwrap();
        assert_eq!(postings(&indexer, "report").await, 3);
        assert_eq!(indexer.current_index_timestamp(), first_end);
        assert!(!indexer.is_indexing());

        // Already covered: no remote calls.
        let calls = rest.load_range_calls();
        indexer.extend_index_if_needed(now - 4 * DAY).await.unwrap();
        assert_eq!(rest.load_range_calls(), calls);

        indexer.extend_index_if_needed(now - 20 * DAY).await.unwrap();
        assert_eq!(postings(&indexer, "report").await, 4);

        indexer.extend_index_if_needed(now - 100 * DAY).await.unwrap();
        assert_eq!(postings(&indexer, "report").await, 5);
        assert_eq!(indexer.current_index_timestamp(), FULL_INDEXED_TIMESTAMP);
    }

    #[tokio::test]
    async fn test_progress_survives_reregistration() {
        let rest = Arc::new(MemoryRestClient::new());
        put_mail(&rest, now_millis() - DAY, 0, "hello");
        let indexer = mail_indexer(rest, 10);
        indexer.init(vec![mailbox()]).await.unwrap();
        assert_eq!(indexer.current_index_timestamp(), FULL_INDEXED_TIMESTAMP);

        indexer.register_mailboxes(vec![mailbox()]).await.unwrap();
        assert_eq!(indexer.current_index_timestamp(), FULL_INDEXED_TIMESTAMP);
        assert_eq!(postings(&indexer, "hello").await, 1);
    }

    #[test]
    fn test_start_of_day() {
        let start = start_of_day_days_ago(1);
        assert_eq!(start % DAY, 0);
        assert!(now_millis() - start >= DAY);
        assert!(now_millis() - start <= 2 * DAY);
    }
}
