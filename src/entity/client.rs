//! Loading entities from the remote service.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::entity::{Entity, EntityKind, IdTuple};
use crate::error::Result;

/// Untyped access to the remote entity service.
///
/// Every method may fail with [`crate::error::SealdexError::NotFound`] or
/// [`crate::error::SealdexError::NotAuthorized`]; callers decide whether that
/// is fatal.
#[async_trait]
pub trait EntityRestClient: Send + Sync + std::fmt::Debug {
    /// Load one element.
    async fn load(&self, kind: EntityKind, id: &IdTuple) -> Result<Value>;

    /// Load every element of a list.
    async fn load_all(&self, kind: EntityKind, list_id: &str) -> Result<Vec<Value>>;

    /// Load up to `count` elements following (or, with `reverse`, preceding)
    /// `start`, which is exclusive. Results are in iteration order.
    async fn load_range(
        &self,
        kind: EntityKind,
        list_id: &str,
        start: &str,
        count: usize,
        reverse: bool,
    ) -> Result<Vec<Value>>;
}

/// Typed facade over an [`EntityRestClient`].
#[derive(Debug, Clone)]
pub struct EntityClient {
    rest: Arc<dyn EntityRestClient>,
}

impl EntityClient {
    pub fn new(rest: Arc<dyn EntityRestClient>) -> Self {
        EntityClient { rest }
    }

    /// The untyped client.
    pub fn rest(&self) -> &Arc<dyn EntityRestClient> {
        &self.rest
    }

    pub async fn load<T: Entity>(&self, id: &IdTuple) -> Result<T> {
        let value = self.rest.load(T::KIND, id).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn load_all<T: Entity>(&self, list_id: &str) -> Result<Vec<T>> {
        self.rest
            .load_all(T::KIND, list_id)
            .await?
            .into_iter()
            .map(|value| Ok(serde_json::from_value(value)?))
            .collect()
    }

    pub async fn load_range<T: Entity>(
        &self,
        list_id: &str,
        start: &str,
        count: usize,
        reverse: bool,
    ) -> Result<Vec<T>> {
        self.rest
            .load_range(T::KIND, list_id, start, count, reverse)
            .await?
            .into_iter()
            .map(|value| Ok(serde_json::from_value(value)?))
            .collect()
    }
}
