//! Wiring of the search subsystem for one session.

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::RangeCache;
use crate::config::SealdexConfig;
use crate::coordinator::EventCoordinator;
use crate::crypto::IndexCipher;
use crate::entity::{Contact, ContactList, EntityClient, EntityKind, EntityRestClient, MailBox};
use crate::error::Result;
use crate::events::EventBatch;
use crate::index::{
    FULL_INDEXED_TIMESTAMP, IndexerCore, KindIndexer, MailIndexer, SuggestionStore, TypeIndexer,
};
use crate::search::{QueryEngine, SearchRestriction, SearchResult};
use crate::store::{Db, EncryptedStore};

/// Every component of the search subsystem, built once per session.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use sealdex::config::SealdexConfig;
/// use sealdex::context::SearchContext;
/// use sealdex::crypto::AesIndexCipher;
/// use sealdex::entity::{EntityKind, MemoryRestClient};
/// use sealdex::search::SearchRestriction;
/// use sealdex::store::MemoryStore;
///
/// # async fn example() -> sealdex::error::Result<()> {
/// let context = SearchContext::new(
///     Arc::new(MemoryStore::new()),
///     Arc::new(MemoryRestClient::new()),
///     SealdexConfig::default(),
/// )?;
/// context
///     .init_indexer(Arc::new(AesIndexCipher::generate()), None, Vec::new())
///     .await?;
///
/// let result = context
///     .search("anne", SearchRestriction::new(EntityKind::Contact), 0, Some(10))
///     .await?;
/// println!("{} contacts", result.results.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SearchContext {
    db: Arc<Db>,
    config: SealdexConfig,
    client: EntityClient,
    cache: Arc<RangeCache>,
    contact_suggestions: Arc<SuggestionStore>,
    contact_indexer: Arc<TypeIndexer<Contact>>,
    mail_indexer: Arc<MailIndexer>,
    engine: QueryEngine,
    coordinator: EventCoordinator,
}

impl SearchContext {
    /// Build the subsystem. Nothing touches encrypted data before
    /// [`SearchContext::init_indexer`] provides the database key.
    pub fn new(
        store: Arc<dyn EncryptedStore>,
        rest: Arc<dyn EntityRestClient>,
        config: SealdexConfig,
    ) -> Result<Self> {
        config.validate()?;
        let db = Arc::new(Db::new(store));
        let client = EntityClient::new(rest.clone());
        let core = Arc::new(IndexerCore::new(db.clone(), config.clone()));

        let contact_suggestions = Arc::new(SuggestionStore::new(EntityKind::Contact, db.clone()));
        let contact_indexer = Arc::new(
            TypeIndexer::<Contact>::new(core.clone(), client.clone())
                .with_suggestions(contact_suggestions.clone()),
        );
        let mail_indexer = Arc::new(MailIndexer::new(core.clone(), client.clone()));
        let cache = Arc::new(RangeCache::new(
            db.clone(),
            rest,
            config.load_multiple_limit,
        ));

        let engine = QueryEngine::new(db.clone(), config.clone())
            .with_indexer(contact_indexer.clone())
            .with_mail_indexer(mail_indexer.clone());
        let coordinator = EventCoordinator::new(cache.clone(), core)
            .with_indexer(contact_indexer.clone())
            .with_indexer(mail_indexer.clone());

        Ok(SearchContext {
            db,
            config,
            client,
            cache,
            contact_suggestions,
            contact_indexer,
            mail_indexer,
            engine,
            coordinator,
        })
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    pub fn config(&self) -> &SealdexConfig {
        &self.config
    }

    pub fn client(&self) -> &EntityClient {
        &self.client
    }

    pub fn cache(&self) -> &Arc<RangeCache> {
        &self.cache
    }

    pub fn contact_suggestions(&self) -> &Arc<SuggestionStore> {
        &self.contact_suggestions
    }

    pub fn contact_indexer(&self) -> &Arc<TypeIndexer<Contact>> {
        &self.contact_indexer
    }

    pub fn mail_indexer(&self) -> &Arc<MailIndexer> {
        &self.mail_indexer
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    pub fn coordinator(&self) -> &EventCoordinator {
        &self.coordinator
    }

    /// Unlock the database and bring the index up to date.
    ///
    /// The contact list is indexed completely unless its group already is;
    /// mailboxes are indexed for the initial window. Transient remote
    /// failures are retried after the configured delay, any other error is
    /// returned.
    pub async fn init_indexer(
        &self,
        cipher: Arc<dyn IndexCipher>,
        contact_list: Option<ContactList>,
        mailboxes: Vec<MailBox>,
    ) -> Result<()> {
        self.db.initialize(cipher);
        self.contact_suggestions.load().await?;

        let mut attempt = 1;
        loop {
            match self.init_once(contact_list.as_ref(), &mailboxes).await {
                Ok(()) => {
                    info!(attempt, "search index initialized");
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        attempt,
                        retry_in_ms = self.config.init_retry_delay_ms,
                        "indexer initialization failed: {e}"
                    );
                    tokio::time::sleep(self.config.init_retry_delay()).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn init_once(&self, contact_list: Option<&ContactList>, mailboxes: &[MailBox]) -> Result<()> {
        if let Some(list) = contact_list {
            let timestamp = self
                .contact_indexer
                .get_index_timestamp(&list.owner_group)
                .await?;
            if timestamp != Some(FULL_INDEXED_TIMESTAMP) {
                self.contact_indexer
                    .index_full_list(&list.contacts, &list.owner_group)
                    .await?;
            }
        }
        self.mail_indexer.init(mailboxes.to_vec()).await
    }

    /// See [`QueryEngine::search`].
    pub async fn search(
        &self,
        query: &str,
        restriction: SearchRestriction,
        min_suggestion_count: usize,
        max_results: Option<usize>,
    ) -> Result<SearchResult> {
        self.engine
            .search(query, restriction, min_suggestion_count, max_results)
            .await
    }

    /// See [`QueryEngine::get_more_search_results`].
    pub async fn get_more_search_results(
        &self,
        result: SearchResult,
        count: usize,
    ) -> Result<SearchResult> {
        self.engine.get_more_search_results(result, count).await
    }

    /// See [`EventCoordinator::process_batch`].
    pub async fn process_batch(&self, batch: &EventBatch) -> Result<()> {
        self.coordinator.process_batch(batch).await
    }

    /// Kind-erased indexers, contacts first.
    pub fn indexers(&self) -> Vec<Arc<dyn KindIndexer>> {
        vec![self.contact_indexer.clone(), self.mail_indexer.clone()]
    }
}
