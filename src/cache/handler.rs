//! Range handlers: how a kind's lists are loaded into the cache.
//!
//! [`DefaultRangeHandler`] serves kinds whose ids sort chronologically in
//! storage: it keeps one contiguous [`Range`] per list and only goes remote
//! for the part of a request outside it. [`CustomCalendarEventHandler`]
//! covers calendar events, whose custom ids cannot be range-compared in
//! storage, by caching the whole list once.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, trace};

use crate::cache::storage::{CacheStorage, Range};
use crate::entity::id::{CUSTOM_MAX_ID, CUSTOM_MIN_ID};
use crate::entity::{EntityKind, EntityRestClient, IdTuple};
use crate::error::{Result, SealdexError};
use crate::events::EntityUpdate;

/// Per-kind range loading policy.
#[async_trait]
pub trait RangeHandler: Send + Sync + fmt::Debug {
    /// Load up to `count` elements after `start` (before it with `reverse`),
    /// filling the cache from the remote service as needed.
    async fn load_range(
        &self,
        storage: &CacheStorage,
        kind: EntityKind,
        list_id: &str,
        start: &str,
        count: usize,
        reverse: bool,
    ) -> Result<Vec<Value>>;

    /// The subset of `ids` the cache claims to hold.
    async fn get_element_ids_in_cache_range(
        &self,
        storage: &CacheStorage,
        kind: EntityKind,
        list_id: &str,
        ids: &[String],
    ) -> Result<Vec<String>>;

    /// Whether a created element must be loaded into the cache. `None`
    /// falls back to checking whether it lies within the cached range.
    fn should_load_on_create_event(&self, _event: &EntityUpdate) -> Option<bool> {
        None
    }
}

/// Which part of a request still has to be fetched remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RangeRequest {
    start: String,
    count: usize,
}

/// Range handling for kinds with chronologically sortable ids.
#[derive(Debug, Clone)]
pub struct DefaultRangeHandler {
    rest: Arc<dyn EntityRestClient>,
    load_multiple_limit: usize,
}

impl DefaultRangeHandler {
    pub fn new(rest: Arc<dyn EntityRestClient>, load_multiple_limit: usize) -> Self {
        DefaultRangeHandler {
            rest,
            load_multiple_limit,
        }
    }

    /// First access to a list. `start` itself is never loaded, so the range
    /// opens at the loaded element nearest to it, or at `start` when that is
    /// the sentinel of the reading direction.
    async fn populate_new_list_with_range(
        &self,
        storage: &CacheStorage,
        kind: EntityKind,
        list_id: &str,
        start: &str,
        count: usize,
        reverse: bool,
    ) -> Result<()> {
        let entities = self
            .rest
            .load_range(kind, list_id, start, count, reverse)
            .await?;
        let ordering = kind.id_ordering();
        let sentinel = if reverse {
            ordering.max_id()
        } else {
            ordering.min_id()
        };
        let near = if start == sentinel {
            start.to_string()
        } else {
            match entities.first() {
                Some(entity) => IdTuple::from_instance(entity)?.element_id,
                None => {
                    debug!(%kind, list_id, start, "nothing beyond start, no range recorded");
                    return Ok(());
                }
            }
        };
        let range = Range::new(near.clone(), near);
        update_range_in_storage(storage, kind, list_id, range, count, reverse, entities).await
    }

    async fn extend_from_within_range(
        &self,
        storage: &CacheStorage,
        kind: EntityKind,
        list_id: &str,
        start: &str,
        count: usize,
        reverse: bool,
    ) -> Result<()> {
        let request = recalculate_range_request(storage, kind, list_id, start, count, reverse).await?;
        if request.count > 0 {
            let entities = self
                .rest
                .load_range(kind, list_id, &request.start, request.count, reverse)
                .await?;
            let range = existing_range(storage, kind, list_id).await?;
            update_range_in_storage(
                storage,
                kind,
                list_id,
                range,
                request.count,
                reverse,
                entities,
            )
            .await?;
        }
        Ok(())
    }

    /// `start` lies beyond the range in the reading direction: extend the
    /// range from its near end until the request can be served.
    async fn extend_away_from_range(
        &self,
        storage: &CacheStorage,
        kind: EntityKind,
        list_id: &str,
        start: &str,
        count: usize,
        reverse: bool,
    ) -> Result<()> {
        let request_count = count.max(self.load_multiple_limit);
        loop {
            let range = existing_range(storage, kind, list_id).await?;
            let load_start = if reverse {
                range.lower.clone()
            } else {
                range.upper.clone()
            };
            let entities = self
                .rest
                .load_range(kind, list_id, &load_start, request_count, reverse)
                .await?;
            let loaded = entities.len();
            update_range_in_storage(
                storage,
                kind,
                list_id,
                range,
                request_count,
                reverse,
                entities,
            )
            .await?;
            if loaded < request_count {
                break;
            }
            let cached = storage
                .provide_from_range(kind, list_id, start, count, reverse)
                .await?;
            if cached.len() == count {
                break;
            }
        }
        Ok(())
    }

    /// `start` lies beyond the range against the reading direction: grow the
    /// range towards `start` first, then read from within.
    async fn extend_towards_range(
        &self,
        storage: &CacheStorage,
        kind: EntityKind,
        list_id: &str,
        start: &str,
        count: usize,
        reverse: bool,
    ) -> Result<()> {
        let request_count = count.max(self.load_multiple_limit);
        loop {
            let range = existing_range(storage, kind, list_id).await?;
            let load_start = if reverse {
                range.upper.clone()
            } else {
                range.lower.clone()
            };
            let entities = self
                .rest
                .load_range(kind, list_id, &load_start, request_count, !reverse)
                .await?;
            update_range_in_storage(
                storage,
                kind,
                list_id,
                range,
                request_count,
                !reverse,
                entities,
            )
            .await?;
            if storage
                .is_element_id_in_cache_range(kind, list_id, start)
                .await?
            {
                break;
            }
        }
        self.extend_from_within_range(storage, kind, list_id, start, count, reverse)
            .await
    }
}

#[async_trait]
impl RangeHandler for DefaultRangeHandler {
    async fn load_range(
        &self,
        storage: &CacheStorage,
        kind: EntityKind,
        list_id: &str,
        start: &str,
        count: usize,
        reverse: bool,
    ) -> Result<Vec<Value>> {
        let ordering = kind.id_ordering();
        match storage.get_range_for_list(kind, list_id).await? {
            None => {
                trace!(%kind, list_id, "populating new cached range");
                self.populate_new_list_with_range(storage, kind, list_id, start, count, reverse)
                    .await?
            }
            Some(range) if range.contains(kind, start) => {
                self.extend_from_within_range(storage, kind, list_id, start, count, reverse)
                    .await?
            }
            Some(range)
                if (reverse && ordering.first_bigger_than_second(&range.lower, start))
                    || (!reverse && ordering.first_bigger_than_second(start, &range.upper)) =>
            {
                self.extend_away_from_range(storage, kind, list_id, start, count, reverse)
                    .await?
            }
            Some(_) => {
                self.extend_towards_range(storage, kind, list_id, start, count, reverse)
                    .await?
            }
        }
        storage
            .provide_from_range(kind, list_id, start, count, reverse)
            .await
    }

    async fn get_element_ids_in_cache_range(
        &self,
        storage: &CacheStorage,
        kind: EntityKind,
        list_id: &str,
        ids: &[String],
    ) -> Result<Vec<String>> {
        let Some(range) = storage.get_range_for_list(kind, list_id).await? else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter(|id| range.contains(kind, id))
            .cloned()
            .collect())
    }
}

async fn existing_range(storage: &CacheStorage, kind: EntityKind, list_id: &str) -> Result<Range> {
    storage
        .get_range_for_list(kind, list_id)
        .await?
        .ok_or_else(|| SealdexError::programming(format!("no cached range for {kind} list {list_id}")))
}

/// Widen `range` over a page loaded from the remote service and store the
/// page and the new range together.
///
/// A short page means the list ends in that direction, so the range bound
/// becomes the kind's sentinel id.
async fn update_range_in_storage(
    storage: &CacheStorage,
    kind: EntityKind,
    list_id: &str,
    mut range: Range,
    count_requested: usize,
    was_reverse: bool,
    mut entities: Vec<Value>,
) -> Result<()> {
    let ordering = kind.id_ordering();
    if was_reverse {
        entities.reverse();
        range.lower = if entities.len() < count_requested {
            ordering.min_id().to_string()
        } else {
            first_element_id(&entities)?
        };
    } else {
        range.upper = if entities.len() < count_requested {
            ordering.max_id().to_string()
        } else {
            last_element_id(&entities)?
        };
    }
    storage
        .put_page_with_range(kind, list_id, &entities, &range)
        .await
}

fn first_element_id(entities: &[Value]) -> Result<String> {
    match entities.first() {
        Some(entity) => Ok(IdTuple::from_instance(entity)?.element_id),
        None => Err(SealdexError::programming("no element to take a range bound from")),
    }
}

fn last_element_id(entities: &[Value]) -> Result<String> {
    match entities.last() {
        Some(entity) => Ok(IdTuple::from_instance(entity)?.element_id),
        None => Err(SealdexError::programming("no element to take a range bound from")),
    }
}

/// Shrink a request starting inside the range to the part not cached yet.
async fn recalculate_range_request(
    storage: &CacheStorage,
    kind: EntityKind,
    list_id: &str,
    start: &str,
    count: usize,
    reverse: bool,
) -> Result<RangeRequest> {
    let unchanged = RangeRequest {
        start: start.to_string(),
        count,
    };
    let Some(range) = storage.get_range_for_list(kind, list_id).await? else {
        return Ok(unchanged);
    };
    let ids = storage.get_ids_in_range(kind, list_id).await?;
    let ordering = kind.id_ordering();

    let complete_in_direction = if reverse {
        range.lower == ordering.min_id()
    } else {
        range.upper == ordering.max_id()
    };
    if complete_in_direction {
        return Ok(RangeRequest {
            start: start.to_string(),
            count: 0,
        });
    }
    let (Some(lowest), Some(highest)) = (ids.first(), ids.last()) else {
        return Ok(unchanged);
    };

    if let Some(index) = ids.iter().position(|id| id == start) {
        return Ok(if reverse {
            RangeRequest {
                start: lowest.clone(),
                count: count.saturating_sub(index),
            }
        } else {
            RangeRequest {
                start: highest.clone(),
                count: count.saturating_sub(ids.len() - 1 - index),
            }
        });
    }

    let below_cached = range.lower == start
        || (ordering.first_bigger_than_second(start, &range.lower)
            && ordering.first_bigger_than_second(lowest, start));
    if below_cached {
        // Reading down from here needs everything below the range.
        return Ok(if reverse {
            unchanged
        } else {
            RangeRequest {
                start: highest.clone(),
                count: count.saturating_sub(ids.len()),
            }
        });
    }

    let above_cached = range.upper == start
        || (ordering.first_bigger_than_second(start, highest)
            && ordering.first_bigger_than_second(&range.upper, start));
    if above_cached && reverse {
        return Ok(RangeRequest {
            start: lowest.clone(),
            count: count.saturating_sub(ids.len()),
        });
    }
    Ok(unchanged)
}

/// Calendar events: custom ids can't be range-compared in storage, so the
/// whole list is cached at once and ordered in memory.
#[derive(Debug, Clone)]
pub struct CustomCalendarEventHandler {
    rest: Arc<dyn EntityRestClient>,
    load_multiple_limit: usize,
}

impl CustomCalendarEventHandler {
    pub fn new(rest: Arc<dyn EntityRestClient>, load_multiple_limit: usize) -> Self {
        CustomCalendarEventHandler {
            rest,
            load_multiple_limit,
        }
    }

    async fn load_whole_list(&self, kind: EntityKind, list_id: &str) -> Result<Vec<Value>> {
        let mut events = Vec::new();
        let mut cursor = CUSTOM_MIN_ID.to_string();
        loop {
            let chunk = self
                .rest
                .load_range(kind, list_id, &cursor, self.load_multiple_limit, false)
                .await?;
            let short = chunk.len() < self.load_multiple_limit;
            if let Some(last) = chunk.last() {
                cursor = IdTuple::from_instance(last)?.element_id;
            }
            events.extend(chunk);
            if short {
                return Ok(events);
            }
        }
    }
}

fn assert_correct_range(range: &Range) -> Result<()> {
    if range.lower != CUSTOM_MIN_ID || range.upper != CUSTOM_MAX_ID {
        return Err(SealdexError::programming(format!(
            "invalid range for calendar events: [{:?}, {:?}]",
            range.lower, range.upper
        )));
    }
    Ok(())
}

#[async_trait]
impl RangeHandler for CustomCalendarEventHandler {
    async fn load_range(
        &self,
        storage: &CacheStorage,
        kind: EntityKind,
        list_id: &str,
        start: &str,
        count: usize,
        reverse: bool,
    ) -> Result<Vec<Value>> {
        let list = match storage.get_range_for_list(kind, list_id).await? {
            None => {
                let events = self.load_whole_list(kind, list_id).await?;
                storage
                    .put_page_with_range(
                        kind,
                        list_id,
                        &events,
                        &Range::new(CUSTOM_MIN_ID, CUSTOM_MAX_ID),
                    )
                    .await?;
                events
            }
            Some(range) => {
                assert_correct_range(&range)?;
                storage.get_whole_list(kind, list_id).await?
            }
        };
        debug!(list_id, events = list.len(), "calendar event list loaded");

        let ordering = kind.id_ordering();
        let mut entries = list
            .into_iter()
            .map(|value| Ok((IdTuple::from_instance(&value)?.element_id, value)))
            .collect::<Result<Vec<_>>>()?;
        if reverse {
            entries.retain(|(id, _)| ordering.first_bigger_than_second(start, id));
            entries.sort_by(|a, b| ordering.compare(&b.0, &a.0));
        } else {
            entries.retain(|(id, _)| ordering.first_bigger_than_second(id, start));
            entries.sort_by(|a, b| ordering.compare(&a.0, &b.0));
        }
        Ok(entries
            .into_iter()
            .take(count)
            .map(|(_, value)| value)
            .collect())
    }

    async fn get_element_ids_in_cache_range(
        &self,
        storage: &CacheStorage,
        kind: EntityKind,
        list_id: &str,
        ids: &[String],
    ) -> Result<Vec<String>> {
        match storage.get_range_for_list(kind, list_id).await? {
            Some(range) => {
                assert_correct_range(&range)?;
                Ok(ids.to_vec())
            }
            None => Ok(Vec::new()),
        }
    }
}

/// Mail: default range handling, but created mails are always cached.
#[derive(Debug, Clone)]
pub struct MailCreateHandler {
    inner: DefaultRangeHandler,
}

impl MailCreateHandler {
    pub fn new(inner: DefaultRangeHandler) -> Self {
        MailCreateHandler { inner }
    }
}

#[async_trait]
impl RangeHandler for MailCreateHandler {
    async fn load_range(
        &self,
        storage: &CacheStorage,
        kind: EntityKind,
        list_id: &str,
        start: &str,
        count: usize,
        reverse: bool,
    ) -> Result<Vec<Value>> {
        self.inner
            .load_range(storage, kind, list_id, start, count, reverse)
            .await
    }

    async fn get_element_ids_in_cache_range(
        &self,
        storage: &CacheStorage,
        kind: EntityKind,
        list_id: &str,
        ids: &[String],
    ) -> Result<Vec<String>> {
        self.inner
            .get_element_ids_in_cache_range(storage, kind, list_id, ids)
            .await
    }

    fn should_load_on_create_event(&self, _event: &EntityUpdate) -> Option<bool> {
        Some(true)
    }
}
