//! Applying entity change batches to the cache and the indexers.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cache::RangeCache;
use crate::error::Result;
use crate::events::EventBatch;
use crate::index::{IndexerCore, KindIndexer};

/// Feeds event batches, one at a time and in delivery order, to the cache
/// and then to every registered indexer.
///
/// The index changes of all kinds in a batch are committed in one
/// transaction. An error aborts the batch and is returned so that the caller
/// can deliver it again; indexers skip batches they have already applied.
#[derive(Debug)]
pub struct EventCoordinator {
    cache: Arc<RangeCache>,
    core: Arc<IndexerCore>,
    indexers: Vec<Arc<dyn KindIndexer>>,
    queue: Mutex<()>,
}

impl EventCoordinator {
    /// `core` must be the core the registered indexers write through.
    pub fn new(cache: Arc<RangeCache>, core: Arc<IndexerCore>) -> Self {
        EventCoordinator {
            cache,
            core,
            indexers: Vec::new(),
            queue: Mutex::new(()),
        }
    }

    pub fn with_indexer(mut self, indexer: Arc<dyn KindIndexer>) -> Self {
        self.indexers.push(indexer);
        self
    }

    /// Apply one batch.
    pub async fn process_batch(&self, batch: &EventBatch) -> Result<()> {
        let _queue = self.queue.lock().await;
        debug!(
            group_id = %batch.group_id,
            batch_id = %batch.batch_id,
            events = batch.events.len(),
            "processing entity event batch"
        );
        self.cache.entity_events_received(batch).await?;

        let mut staged = Vec::new();
        for indexer in &self.indexers {
            if let Some(update) = indexer.stage_batch(batch).await? {
                staged.push((indexer, update));
            }
        }
        if staged.is_empty() {
            return Ok(());
        }
        let (indexers, updates): (Vec<_>, Vec<_>) = staged.into_iter().unzip();
        let (updates, words): (Vec<_>, Vec<_>) = updates
            .into_iter()
            .map(|staged| (staged.update, staged.suggestion_words))
            .unzip();
        self.core.write_index_updates(updates).await?;

        for (indexer, words) in indexers.into_iter().zip(words) {
            indexer.store_suggestions(&words).await?;
        }
        Ok(())
    }

    /// Apply batches in order, stopping at the first failure.
    pub async fn process_batches(&self, batches: &[EventBatch]) -> Result<()> {
        for batch in batches {
            self.process_batch(batch).await?;
        }
        info!(batches = batches.len(), "entity event batches applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SealdexConfig;
    use crate::crypto::AesIndexCipher;
    use crate::entity::id::timestamp_to_generated_id;
    use crate::entity::{
        Contact, EntityClient, EntityKind, IdTuple, InjectedFailure, Mail, MemoryRestClient,
    };
    use crate::events::{EntityUpdate, OperationType};
    use crate::index::{MailIndexer, TypeIndexer};
    use crate::store::{Db, MemoryStore};

    struct Fixture {
        coordinator: EventCoordinator,
        indexer: Arc<TypeIndexer<Contact>>,
        rest: Arc<MemoryRestClient>,
    }

    async fn postings(indexer: &TypeIndexer<Contact>, token: &str) -> usize {
        let metadata = indexer.core().metadata_for_token(token).await.unwrap();
        metadata.entries.iter().map(|e| e.size).sum()
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Db::with_cipher(
            Arc::new(MemoryStore::new()),
            Arc::new(AesIndexCipher::generate()),
        ));
        let rest = Arc::new(MemoryRestClient::new());
        let core = Arc::new(IndexerCore::new(db.clone(), SealdexConfig::default()));
        let indexer = Arc::new(TypeIndexer::<Contact>::new(
            core.clone(),
            EntityClient::new(rest.clone()),
        ));
        let mail_indexer = Arc::new(MailIndexer::new(
            core.clone(),
            EntityClient::new(rest.clone()),
        ));
        let cache = Arc::new(RangeCache::new(db, rest.clone(), 100));
        Fixture {
            coordinator: EventCoordinator::new(cache, core)
                .with_indexer(indexer.clone())
                .with_indexer(mail_indexer),
            indexer,
            rest,
        }
    }

    fn create(n: u64) -> (Contact, EventBatch) {
        let id = IdTuple::new("contacts", timestamp_to_generated_id(n * 1_000));
        let contact = Contact::new(id.clone(), "group", "Anne", "Smith");
        let batch = EventBatch::new(
            "group",
            &format!("batch-{n}"),
            vec![EntityUpdate::new(
                OperationType::Create,
                EntityKind::Contact,
                &id.list_id,
                &id.element_id,
            )],
        );
        (contact, batch)
    }

    #[tokio::test]
    async fn test_batches_reach_the_indexers() {
        let f = fixture();
        let (first, first_batch) = create(1);
        let (second, second_batch) = create(2);
        f.rest.put(&first).unwrap();
        f.rest.put(&second).unwrap();

        f.coordinator
            .process_batches(&[first_batch, second_batch])
            .await
            .unwrap();

        assert_eq!(postings(&f.indexer, "anne").await, 2);
    }

    #[tokio::test]
    async fn test_failed_batch_can_be_redelivered() {
        let f = fixture();
        let (contact, batch) = create(1);
        f.rest.put(&contact).unwrap();
        f.rest.fail_next(&[InjectedFailure::ServiceUnavailable]);

        // The contact list has no cached range, so only the indexer loads.
        let err = f.coordinator.process_batch(&batch).await.unwrap_err();
        assert!(err.is_transient());

        f.coordinator.process_batch(&batch).await.unwrap();
        f.coordinator.process_batch(&batch).await.unwrap();
        assert_eq!(postings(&f.indexer, "smith").await, 1);
    }

    #[tokio::test]
    async fn test_failing_kind_rolls_back_the_whole_batch() {
        let f = fixture();
        let (contact, mut batch) = create(1);
        f.rest.put(&contact).unwrap();

        let mail_id = IdTuple::new("inbox", timestamp_to_generated_id(5_000));
        let broken_mail = serde_json::json!({
            "_id": mail_id,
            "_ownerGroup": "group",
            "subject": 42,
        });
        f.rest.put_raw(EntityKind::Mail, &broken_mail).unwrap();
        batch.events.push(EntityUpdate::new(
            OperationType::Create,
            EntityKind::Mail,
            &mail_id.list_id,
            &mail_id.element_id,
        ));

        assert!(f.coordinator.process_batch(&batch).await.is_err());
        assert_eq!(postings(&f.indexer, "smith").await, 0);
        let group = f.indexer.core().get_group_data("group").await.unwrap();
        assert!(group.is_none_or(|g| !g.has_processed(EntityKind::Contact, "batch-1")));

        // Once the mail is readable the redelivered batch applies both kinds.
        f.rest
            .put(&Mail::new(mail_id, "group", "Quarterly report", ""))
            .unwrap();
        f.coordinator.process_batch(&batch).await.unwrap();
        assert_eq!(postings(&f.indexer, "smith").await, 1);
        assert_eq!(postings(&f.indexer, "quarterly").await, 1);
    }
}
