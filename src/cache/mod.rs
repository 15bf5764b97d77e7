//! Range-bounded cache of remote list elements.
//!
//! Every list has at most one [`Range`]. Any element whose id lies within it
//! is either cached or does not exist remotely, so reads inside the range
//! never go to the network. Reads outside it load the missing part and widen
//! the range; it never splits into disjoint pieces.
//!
//! How a kind is loaded is decided by its [`RangeHandler`], looked up in a
//! [`RangeHandlerRegistry`].

pub mod handler;
pub mod registry;
pub mod storage;

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};

use crate::entity::{Entity, EntityKind, EntityRestClient, IdTuple};
use crate::error::Result;
use crate::events::{EntityUpdate, EventBatch, OperationType, find_event, is_mail_move};
use crate::store::{Db, ListLocks};

pub use handler::{CustomCalendarEventHandler, DefaultRangeHandler, MailCreateHandler, RangeHandler};
pub use registry::RangeHandlerRegistry;
pub use storage::{CacheStorage, Range};

/// The list element cache.
#[derive(Debug)]
pub struct RangeCache {
    storage: CacheStorage,
    registry: RangeHandlerRegistry,
    rest: Arc<dyn EntityRestClient>,
    locks: ListLocks,
}

impl RangeCache {
    /// A cache using the standard handlers.
    pub fn new(db: Arc<Db>, rest: Arc<dyn EntityRestClient>, load_multiple_limit: usize) -> Self {
        let registry = RangeHandlerRegistry::standard(rest.clone(), load_multiple_limit);
        Self::with_registry(db, rest, registry)
    }

    pub fn with_registry(
        db: Arc<Db>,
        rest: Arc<dyn EntityRestClient>,
        registry: RangeHandlerRegistry,
    ) -> Self {
        RangeCache {
            storage: CacheStorage::new(db),
            registry,
            rest,
            locks: ListLocks::new(),
        }
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    fn lock_key(kind: EntityKind, list_id: &str) -> String {
        format!("{kind}/{list_id}")
    }

    /// Load up to `count` raw elements after `start` (exclusive), or before
    /// it with `reverse`, in iteration order.
    pub async fn load_raw_range(
        &self,
        kind: EntityKind,
        list_id: &str,
        start: &str,
        count: usize,
        reverse: bool,
    ) -> Result<Vec<Value>> {
        let _guard = self.locks.lock(&Self::lock_key(kind, list_id)).await;
        self.registry
            .get(kind)
            .load_range(&self.storage, kind, list_id, start, count, reverse)
            .await
    }

    /// Typed [`RangeCache::load_raw_range`].
    pub async fn load_range<T: Entity>(
        &self,
        list_id: &str,
        start: &str,
        count: usize,
        reverse: bool,
    ) -> Result<Vec<T>> {
        self.load_raw_range(T::KIND, list_id, start, count, reverse)
            .await?
            .into_iter()
            .map(|value| Ok(serde_json::from_value(value)?))
            .collect()
    }

    /// A cached element, without going remote.
    pub async fn get<T: Entity>(&self, id: &IdTuple) -> Result<Option<T>> {
        self.storage
            .get(T::KIND, id)
            .await?
            .map(|value| Ok(serde_json::from_value(value)?))
            .transpose()
    }

    /// The subset of `ids` that the cache holds or knows not to exist.
    pub async fn get_element_ids_in_cache_range(
        &self,
        kind: EntityKind,
        list_id: &str,
        ids: &[String],
    ) -> Result<Vec<String>> {
        let _guard = self.locks.lock(&Self::lock_key(kind, list_id)).await;
        self.registry
            .get(kind)
            .get_element_ids_in_cache_range(&self.storage, kind, list_id, ids)
            .await
    }

    /// Whether a created element has to be loaded into the cache.
    pub async fn should_load_on_create_event(&self, event: &EntityUpdate) -> Result<bool> {
        match self
            .registry
            .get(event.kind)
            .should_load_on_create_event(event)
        {
            Some(decision) => Ok(decision),
            None => {
                self.storage
                    .is_element_id_in_cache_range(
                        event.kind,
                        &event.instance_list_id,
                        &event.instance_id,
                    )
                    .await
            }
        }
    }

    /// Apply a batch of entity changes to the cache.
    ///
    /// A mail CREATE paired with a DELETE of the same element in one batch is
    /// a move between folders: the cached instance is re-keyed instead of
    /// being loaded again.
    pub async fn entity_events_received(&self, batch: &EventBatch) -> Result<()> {
        for event in &batch.events {
            let _guard = self
                .locks
                .lock(&Self::lock_key(event.kind, &event.instance_list_id))
                .await;
            match event.operation {
                OperationType::Create => {
                    if self.move_mail(batch, event).await? {
                        continue;
                    }
                    if self.should_load_on_create_event(event).await? {
                        self.load_and_put(event).await?;
                    }
                }
                OperationType::Update => {
                    if self.storage.get(event.kind, &event.id()).await?.is_some() {
                        self.reload(event).await?;
                    }
                }
                OperationType::Delete => {
                    if is_mail_move(&batch.events, event) {
                        continue;
                    }
                    self.storage.delete_if_exists(event.kind, &event.id()).await?;
                }
            }
        }
        trace!(batch_id = %batch.batch_id, events = batch.events.len(), "cache updated");
        Ok(())
    }

    async fn move_mail(&self, batch: &EventBatch, event: &EntityUpdate) -> Result<bool> {
        if event.kind != EntityKind::Mail {
            return Ok(false);
        }
        let Some(delete) = find_event(&batch.events, OperationType::Delete, event) else {
            return Ok(false);
        };
        let Some(mut instance) = self.storage.get(event.kind, &delete.id()).await? else {
            return Ok(false);
        };
        self.storage.delete_if_exists(event.kind, &delete.id()).await?;
        if let Some(object) = instance.as_object_mut() {
            object.insert("_id".to_string(), serde_json::to_value(event.id())?);
        }
        self.storage.put(event.kind, &instance).await?;
        debug!(from = %delete.instance_list_id, to = %event.instance_list_id, "moved cached mail");
        Ok(true)
    }

    async fn load_and_put(&self, event: &EntityUpdate) -> Result<()> {
        match self.rest.load(event.kind, &event.id()).await {
            Ok(instance) => self.storage.put(event.kind, &instance).await,
            Err(e) if e.is_entity_gone() => {
                debug!(kind = %event.kind, id = %event.id(), "created element is gone: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn reload(&self, event: &EntityUpdate) -> Result<()> {
        match self.rest.load(event.kind, &event.id()).await {
            Ok(instance) => self.storage.put(event.kind, &instance).await,
            Err(e) if e.is_entity_gone() => {
                debug!(kind = %event.kind, id = %event.id(), "updated element is gone: {e}");
                self.storage.delete_if_exists(event.kind, &event.id()).await
            }
            Err(e) => Err(e),
        }
    }
}
