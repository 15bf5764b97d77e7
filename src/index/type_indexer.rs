//! Keeping the index of one entity kind in sync with the remote lists.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::crypto::IndexCipher;
use crate::entity::{AttributeId, EntityClient, EntityKind, IdTuple, IndexedEntity};
use crate::error::{Result, SealdexError};
use crate::events::{EntityUpdate, EventBatch, OperationType, is_mail_move};
use crate::index::core::IndexerCore;
use crate::index::suggestion::SuggestionStore;
use crate::index::types::FULL_INDEXED_TIMESTAMP;
use crate::index::update::IndexUpdate;

/// Kind-erased view of a [`TypeIndexer`], used by the event coordinator and
/// the query engine.
#[async_trait]
pub trait KindIndexer: Send + Sync + fmt::Debug {
    /// Entity kind this indexer covers.
    fn kind(&self) -> EntityKind;

    /// Suggestion store of the kind, if it supports suggestions.
    fn suggestions(&self) -> Option<&Arc<SuggestionStore>>;

    /// Turn the events of this kind contained in `batch` into an index
    /// update without writing it. `None` when the batch has no events of
    /// this kind or was already applied.
    async fn stage_batch(&self, batch: &EventBatch) -> Result<Option<StagedUpdate>>;

    /// Add the suggestion words of a committed update and persist them.
    async fn store_suggestions(&self, words: &[String]) -> Result<()>;

    /// Load an element and extract its indexed attribute values.
    async fn load_attribute_values(&self, id: &IdTuple) -> Result<Vec<(AttributeId, String)>>;

    /// Load an element and return the ids of the sets containing it.
    async fn load_set_ids(&self, id: &IdTuple) -> Result<Vec<String>>;
}

/// Index changes of one kind, waiting to be committed together with the
/// changes of the other kinds of the same batch.
#[derive(Debug)]
pub struct StagedUpdate {
    pub update: IndexUpdate,
    pub suggestion_words: Vec<String>,
}

/// Indexer for entities of type `T`.
pub struct TypeIndexer<T: IndexedEntity> {
    core: Arc<IndexerCore>,
    client: EntityClient,
    suggestions: Option<Arc<SuggestionStore>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: IndexedEntity> fmt::Debug for TypeIndexer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeIndexer")
            .field("kind", &T::KIND)
            .field("suggestions", &self.suggestions.is_some())
            .finish()
    }
}

impl<T: IndexedEntity> TypeIndexer<T> {
    pub fn new(core: Arc<IndexerCore>, client: EntityClient) -> Self {
        TypeIndexer {
            core,
            client,
            suggestions: None,
            _entity: PhantomData,
        }
    }

    /// Feed suggestion words of indexed entities into `suggestions`.
    pub fn with_suggestions(mut self, suggestions: Arc<SuggestionStore>) -> Self {
        self.suggestions = Some(suggestions);
        self
    }

    pub fn core(&self) -> &Arc<IndexerCore> {
        &self.core
    }

    pub fn client(&self) -> &EntityClient {
        &self.client
    }

    /// Index every element of a list and mark its group fully indexed.
    ///
    /// A list that does not exist has nothing to index. Running this again
    /// rewrites the same postings.
    pub async fn index_full_list(&self, list_id: &str, group_id: &str) -> Result<()> {
        let cipher = self.core.db().initialized().await?;
        let entities = match self.client.load_all::<T>(list_id).await {
            Ok(entities) => entities,
            Err(SealdexError::NotFound(_)) => {
                info!(kind = %T::KIND, list_id, "list not found, nothing to index");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut update = IndexUpdate::new(T::KIND);
        let mut words = Vec::new();
        for entity in &entities {
            self.add_entity(cipher.as_ref(), entity, &mut update, &mut words)?;
        }
        update.set_group_timestamp(group_id, FULL_INDEXED_TIMESTAMP);
        self.core.write_index_update(update).await?;
        self.store_suggestions(&words).await?;

        info!(kind = %T::KIND, list_id, count = entities.len(), "indexed full list");
        Ok(())
    }

    /// Apply one batch of change events.
    ///
    /// Events of other kinds are ignored and a batch that was already
    /// applied is skipped. All changes are committed in one transaction.
    pub async fn process_events(
        &self,
        events: &[EntityUpdate],
        group_id: &str,
        batch_id: &str,
    ) -> Result<()> {
        match self.stage_events(events, group_id, batch_id).await? {
            Some(staged) => {
                self.core.write_index_update(staged.update).await?;
                self.store_suggestions(&staged.suggestion_words).await
            }
            None => Ok(()),
        }
    }

    /// Build the update for the events of this kind without writing it.
    ///
    /// A mail reported as created in one list and deleted from another is a
    /// move: the indexed element is kept and re-keyed to its new list.
    pub async fn stage_events(
        &self,
        events: &[EntityUpdate],
        group_id: &str,
        batch_id: &str,
    ) -> Result<Option<StagedUpdate>> {
        let own: Vec<&EntityUpdate> = events.iter().filter(|e| e.kind == T::KIND).collect();
        if own.is_empty() {
            return Ok(None);
        }
        if let Some(group) = self.core.get_group_data(group_id).await? {
            if group.has_processed(T::KIND, batch_id) {
                debug!(kind = %T::KIND, group_id, batch_id, "batch already applied");
                return Ok(None);
            }
        }

        let cipher = self.core.db().initialized().await?;
        let mut update = IndexUpdate::new(T::KIND);
        let mut words = Vec::new();
        for event in own {
            let moved = is_mail_move(events, event);
            match event.operation {
                OperationType::Create if moved => {
                    if self.core.get_element_data(&event.instance_id).await?.is_some() {
                        debug!(list_id = %event.instance_list_id, "re-keying moved element");
                        update.move_element(
                            cipher.encrypt_id(&event.instance_id)?,
                            &event.instance_list_id,
                        );
                    } else {
                        self.add_loaded(cipher.as_ref(), &event.id(), &mut update, &mut words)
                            .await?;
                    }
                }
                OperationType::Create => {
                    self.add_loaded(cipher.as_ref(), &event.id(), &mut update, &mut words)
                        .await?;
                }
                OperationType::Update => {
                    update.remove_element(cipher.encrypt_id(&event.instance_id)?);
                    self.add_loaded(cipher.as_ref(), &event.id(), &mut update, &mut words)
                        .await?;
                }
                OperationType::Delete if moved => {}
                OperationType::Delete => {
                    update.remove_element(cipher.encrypt_id(&event.instance_id)?);
                }
            }
        }
        update.record_batch(group_id, batch_id);
        Ok(Some(StagedUpdate {
            update,
            suggestion_words: words,
        }))
    }

    /// Index timestamp of a group, `None` if it was never indexed.
    pub async fn get_index_timestamp(&self, group_id: &str) -> Result<Option<u64>> {
        Ok(self
            .core
            .get_group_data(group_id)
            .await?
            .map(|group| group.index_timestamp))
    }

    pub(crate) fn add_entity(
        &self,
        cipher: &dyn IndexCipher,
        entity: &T,
        update: &mut IndexUpdate,
        words: &mut Vec<String>,
    ) -> Result<()> {
        update.add_element(self.core.encrypt_element(cipher, entity)?);
        if self.suggestions.is_some() {
            if let Some(suggestion_words) = entity.suggestion_words() {
                words.extend(suggestion_words);
            }
        }
        Ok(())
    }

    async fn add_loaded(
        &self,
        cipher: &dyn IndexCipher,
        id: &IdTuple,
        update: &mut IndexUpdate,
        words: &mut Vec<String>,
    ) -> Result<()> {
        match self.client.load::<T>(id).await {
            Ok(entity) => self.add_entity(cipher, &entity, update, words),
            Err(e) if e.is_entity_gone() => {
                debug!(kind = %T::KIND, id = %id, error = %e, "skipping entity that is gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn store_suggestions(&self, words: &[String]) -> Result<()> {
        match &self.suggestions {
            Some(suggestions) if !words.is_empty() => {
                suggestions.add_suggestions(words);
                suggestions.store().await
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<T: IndexedEntity> KindIndexer for TypeIndexer<T> {
    fn kind(&self) -> EntityKind {
        T::KIND
    }

    fn suggestions(&self) -> Option<&Arc<SuggestionStore>> {
        self.suggestions.as_ref()
    }

    async fn stage_batch(&self, batch: &EventBatch) -> Result<Option<StagedUpdate>> {
        self.stage_events(&batch.events, &batch.group_id, &batch.batch_id)
            .await
    }

    async fn store_suggestions(&self, words: &[String]) -> Result<()> {
        TypeIndexer::<T>::store_suggestions(self, words).await
    }

    async fn load_attribute_values(&self, id: &IdTuple) -> Result<Vec<(AttributeId, String)>> {
        let entity = self.client.load::<T>(id).await?;
        Ok(T::attributes()
            .iter()
            .map(|handler| (handler.attribute, (handler.value)(&entity)))
            .collect())
    }

    async fn load_set_ids(&self, id: &IdTuple) -> Result<Vec<String>> {
        Ok(self.client.load::<T>(id).await?.set_ids())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SealdexConfig;
    use crate::crypto::AesIndexCipher;
    use crate::entity::id::timestamp_to_generated_id;
    use crate::entity::{Contact, Mail, MemoryRestClient};
    use crate::store::{Db, MemoryStore};

    struct Fixture {
        rest: Arc<MemoryRestClient>,
        indexer: TypeIndexer<Contact>,
        suggestions: Arc<SuggestionStore>,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Db::with_cipher(
            Arc::new(MemoryStore::new()),
            Arc::new(AesIndexCipher::generate()),
        ));
        let rest = Arc::new(MemoryRestClient::new());
        let core = Arc::new(IndexerCore::new(Arc::clone(&db), SealdexConfig::default()));
        let suggestions = Arc::new(SuggestionStore::new(EntityKind::Contact, db));
        let indexer = TypeIndexer::new(core, EntityClient::new(rest.clone()))
            .with_suggestions(Arc::clone(&suggestions));
        Fixture {
            rest,
            indexer,
            suggestions,
        }
    }

    fn contact(ts: u64, first: &str) -> Contact {
        Contact::new(
            IdTuple::new("contacts", timestamp_to_generated_id(ts)),
            "group",
            first,
            "Muster",
        )
    }

    fn event(operation: OperationType, c: &Contact) -> EntityUpdate {
        EntityUpdate::new(
            operation,
            EntityKind::Contact,
            &c.id.list_id,
            &c.id.element_id,
        )
    }

    async fn postings(f: &Fixture, token: &str) -> usize {
        f.indexer
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
    async fn test_index_full_list() {
        let f = fixture();
        for (ts, name) in [(1, "Anne"), (2, "Arne")] {
            f.rest.put(&contact(ts, name)).unwrap();
        }

        assert_eq!(f.indexer.get_index_timestamp("group").await.unwrap(), None);
        f.indexer.index_full_list("contacts", "group").await.unwrap();
        f.indexer.index_full_list("contacts", "group").await.unwrap();

        assert_eq!(postings(&f, "muster").await, 2);
        assert_eq!(
            f.indexer.get_index_timestamp("group").await.unwrap(),
            Some(FULL_INDEXED_TIMESTAMP)
        );
        assert_eq!(f.suggestions.get_suggestions("a"), vec!["anne", "arne"]);
    }

    #[tokio::test]
    async fn test_missing_list_is_fully_indexed() {
        let f = fixture();
        f.indexer.index_full_list("nope", "group").await.unwrap();
        assert_eq!(
            f.indexer.get_index_timestamp("group").await.unwrap(),
            Some(FULL_INDEXED_TIMESTAMP)
        );
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let f = fixture();
        let mut anne = contact(1, "Anne");
        f.rest.put(&anne).unwrap();
        f.indexer
            .process_events(&[event(OperationType::Create, &anne)], "group", "b1")
            .await
            .unwrap();
        assert_eq!(postings(&f, "anne").await, 1);

        anne.first_name = "Berta".to_string();
        f.rest.put(&anne).unwrap();
        f.indexer
            .process_events(&[event(OperationType::Update, &anne)], "group", "b2")
            .await
            .unwrap();
        assert_eq!(postings(&f, "anne").await, 0);
        assert_eq!(postings(&f, "berta").await, 1);

        f.indexer
            .process_events(&[event(OperationType::Delete, &anne)], "group", "b3")
            .await
            .unwrap();
        assert_eq!(postings(&f, "berta").await, 0);
        assert_eq!(postings(&f, "muster").await, 0);
    }

    #[tokio::test]
    async fn test_gone_entities_are_skipped() {
        let f = fixture();
        let missing = contact(1, "Anne");
        let denied = contact(2, "Arne");
        f.rest.put(&denied).unwrap();
        f.rest.deny(denied.id.clone());

        f.indexer
            .process_events(
                &[
                    event(OperationType::Create, &missing),
                    event(OperationType::Create, &denied),
                ],
                "group",
                "b1",
            )
            .await
            .unwrap();
        assert_eq!(postings(&f, "muster").await, 0);
    }

    #[tokio::test]
    async fn test_redelivered_batch_is_ignored() {
        let f = fixture();
        let anne = contact(1, "Anne");
        f.rest.put(&anne).unwrap();
        let create = [event(OperationType::Create, &anne)];
        f.indexer
            .process_events(&create, "group", "b1")
            .await
            .unwrap();

        f.indexer
            .process_events(&[event(OperationType::Delete, &anne)], "group", "b2")
            .await
            .unwrap();
        f.indexer
            .process_events(&create, "group", "b1")
            .await
            .unwrap();

        assert_eq!(postings(&f, "anne").await, 0);
        assert_eq!(f.rest.load_calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_fail_the_batch() {
        let f = fixture();
        let anne = contact(1, "Anne");
        f.rest.put(&anne).unwrap();
        f.rest
            .fail_next(&[crate::entity::InjectedFailure::Connection]);

        let result = f
            .indexer
            .process_events(&[event(OperationType::Create, &anne)], "group", "b1")
            .await;
        assert!(result.unwrap_err().is_transient());

        // Nothing was recorded, so the retried batch is applied.
        f.indexer
            .process_events(&[event(OperationType::Create, &anne)], "group", "b1")
            .await
            .unwrap();
        assert_eq!(postings(&f, "anne").await, 1);
    }

    fn mail_indexer(f: &Fixture) -> TypeIndexer<Mail> {
        TypeIndexer::new(f.indexer.core().clone(), f.indexer.client().clone())
    }

    fn mail_event(operation: OperationType, list_id: &str, mail: &Mail) -> EntityUpdate {
        EntityUpdate::new(operation, EntityKind::Mail, list_id, &mail.id.element_id)
    }

    async fn assert_moved(order: [OperationType; 2]) {
        let f = fixture();
        let mails = mail_indexer(&f);
        let mail = Mail::new(
            IdTuple::new("inbox", timestamp_to_generated_id(7)),
            "group",
            "Quarterly report",
            "",
        );
        f.rest.put(&mail).unwrap();
        mails
            .process_events(&[mail_event(OperationType::Create, "inbox", &mail)], "group", "b1")
            .await
            .unwrap();

        let moved = Mail {
            id: IdTuple::new("archive", mail.id.element_id.clone()),
            ..mail.clone()
        };
        f.rest.remove(EntityKind::Mail, &mail.id);
        f.rest.put(&moved).unwrap();
        let events: Vec<EntityUpdate> = order
            .into_iter()
            .map(|operation| match operation {
                OperationType::Delete => mail_event(operation, "inbox", &mail),
                _ => mail_event(operation, "archive", &moved),
            })
            .collect();
        mails.process_events(&events, "group", "b2").await.unwrap();

        assert_eq!(postings(&f, "quarterly").await, 1);
        let data = f
            .indexer
            .core()
            .get_element_data(&mail.id.element_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data.list_id, "archive");
    }

    #[tokio::test]
    async fn test_moved_mail_stays_indexed_create_first() {
        assert_moved([OperationType::Create, OperationType::Delete]).await;
    }

    #[tokio::test]
    async fn test_moved_mail_stays_indexed_delete_first() {
        assert_moved([OperationType::Delete, OperationType::Create]).await;
    }

    #[tokio::test]
    async fn test_moved_mail_that_was_not_indexed_is_added() {
        let f = fixture();
        let mails = mail_indexer(&f);
        let mail = Mail::new(
            IdTuple::new("archive", timestamp_to_generated_id(7)),
            "group",
            "Quarterly report",
            "",
        );
        f.rest.put(&mail).unwrap();
        mails
            .process_events(
                &[
                    mail_event(OperationType::Create, "archive", &mail),
                    mail_event(OperationType::Delete, "inbox", &mail),
                ],
                "group",
                "b1",
            )
            .await
            .unwrap();
        assert_eq!(postings(&f, "quarterly").await, 1);
    }
}
