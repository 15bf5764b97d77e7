//! In-memory [`EntityRestClient`] used by tests and demos.

use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::entity::{Entity, EntityKind, EntityRestClient, IdTuple};
use crate::error::{Result, SealdexError};

/// Failure injected into the next remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    ServiceUnavailable,
    Connection,
    NotAuthorized,
}

impl InjectedFailure {
    fn to_error(self) -> SealdexError {
        match self {
            InjectedFailure::ServiceUnavailable => {
                SealdexError::service_unavailable("injected failure")
            }
            InjectedFailure::Connection => SealdexError::connection("injected failure"),
            InjectedFailure::NotAuthorized => SealdexError::not_authorized("injected failure"),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    lists: AHashMap<(EntityKind, String), Vec<Value>>,
    denied: Vec<IdTuple>,
    failures: Vec<InjectedFailure>,
}

/// A fake remote service holding lists of raw instances.
#[derive(Debug, Default)]
pub struct MemoryRestClient {
    state: Mutex<State>,
    load_calls: AtomicUsize,
    load_all_calls: AtomicUsize,
    load_range_calls: AtomicUsize,
}

impl MemoryRestClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an empty list exist.
    pub fn create_list(&self, kind: EntityKind, list_id: &str) {
        self.state
            .lock()
            .lists
            .entry((kind, list_id.to_string()))
            .or_default();
    }

    /// Insert or replace an entity.
    pub fn put<T: Entity>(&self, entity: &T) -> Result<()> {
        self.put_raw(T::KIND, entity)
    }

    /// Insert or replace any serializable instance carrying an `_id`.
    pub fn put_raw<S: Serialize>(&self, kind: EntityKind, instance: &S) -> Result<()> {
        let value = serde_json::to_value(instance)?;
        let id = IdTuple::from_instance(&value)?;
        let mut state = self.state.lock();
        let list = state.lists.entry((kind, id.list_id.clone())).or_default();
        list.retain(|existing| !has_element_id(existing, &id.element_id));
        list.push(value);
        Ok(())
    }

    /// Remove an entity. Returns whether it existed.
    pub fn remove(&self, kind: EntityKind, id: &IdTuple) -> bool {
        let mut state = self.state.lock();
        match state.lists.get_mut(&(kind, id.list_id.clone())) {
            Some(list) => {
                let before = list.len();
                list.retain(|existing| !has_element_id(existing, &id.element_id));
                list.len() != before
            }
            None => false,
        }
    }

    /// Deny access to one element.
    pub fn deny(&self, id: IdTuple) {
        self.state.lock().denied.push(id);
    }

    /// Fail the next calls, in order, with the given errors.
    pub fn fail_next(&self, failures: &[InjectedFailure]) {
        self.state.lock().failures.extend_from_slice(failures);
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn load_all_calls(&self) -> usize {
        self.load_all_calls.load(Ordering::SeqCst)
    }

    pub fn load_range_calls(&self) -> usize {
        self.load_range_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.failures.is_empty() {
            Ok(())
        } else {
            Err(state.failures.remove(0).to_error())
        }
    }

    fn sorted_list(&self, kind: EntityKind, list_id: &str) -> Result<Vec<(String, Value)>> {
        let state = self.state.lock();
        let list = state
            .lists
            .get(&(kind, list_id.to_string()))
            .ok_or_else(|| SealdexError::not_found(format!("{kind} list {list_id}")))?;
        let ordering = kind.id_ordering();
        let mut entries = list
            .iter()
            .map(|value| Ok((IdTuple::from_instance(value)?.element_id, value.clone())))
            .collect::<Result<Vec<_>>>()?;
        entries.sort_by(|a, b| ordering.compare(&a.0, &b.0));
        Ok(entries)
    }
}

fn has_element_id(value: &Value, element_id: &str) -> bool {
    value
        .get("_id")
        .and_then(|id| id.get("elementId"))
        .and_then(Value::as_str)
        == Some(element_id)
}

#[async_trait]
impl EntityRestClient for MemoryRestClient {
    async fn load(&self, kind: EntityKind, id: &IdTuple) -> Result<Value> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        if self.state.lock().denied.contains(id) {
            return Err(SealdexError::not_authorized(id.to_string()));
        }
        self.sorted_list(kind, &id.list_id)?
            .into_iter()
            .find(|(element_id, _)| *element_id == id.element_id)
            .map(|(_, value)| value)
            .ok_or_else(|| SealdexError::not_found(format!("{kind} {id}")))
    }

    async fn load_all(&self, kind: EntityKind, list_id: &str) -> Result<Vec<Value>> {
        self.load_all_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        Ok(self
            .sorted_list(kind, list_id)?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    async fn load_range(
        &self,
        kind: EntityKind,
        list_id: &str,
        start: &str,
        count: usize,
        reverse: bool,
    ) -> Result<Vec<Value>> {
        self.load_range_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        let ordering = kind.id_ordering();
        let entries = self.sorted_list(kind, list_id)?;
        let page = if reverse {
            entries
                .into_iter()
                .rev()
                .filter(|(id, _)| ordering.first_bigger_than_second(start, id))
                .take(count)
                .map(|(_, value)| value)
                .collect()
        } else {
            entries
                .into_iter()
                .filter(|(id, _)| ordering.first_bigger_than_second(id, start))
                .take(count)
                .map(|(_, value)| value)
                .collect()
        };
        Ok(page)
    }
}
