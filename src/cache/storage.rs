//! Encrypted storage of cached list elements and their ranges.
//!
//! Keys are namespaced per kind and list: `block(type name) ‖ block(list id)`
//! is the range key in [`Region::CacheRanges`], and the same prefix followed
//! by the element id bytes is the element key in [`Region::CacheEntities`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::IndexCipher;
use crate::entity::{EntityKind, IdTuple};
use crate::error::{Result, SealdexError};
use crate::index::encoding::{open_record, seal_record};
use crate::store::{Db, Region, StoreTransaction, TransactionMode};
use crate::util::varint::append_binary_block;

/// The contiguous id interval of a list known to be cached completely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub lower: String,
    pub upper: String,
}

impl Range {
    pub fn new<L: Into<String>, U: Into<String>>(lower: L, upper: U) -> Self {
        Range {
            lower: lower.into(),
            upper: upper.into(),
        }
    }

    /// Whether `id` lies within `[lower, upper]` under the kind's ordering.
    pub fn contains(&self, kind: EntityKind, id: &str) -> bool {
        let ordering = kind.id_ordering();
        !ordering.first_bigger_than_second(id, &self.upper)
            && !ordering.first_bigger_than_second(&self.lower, id)
    }
}

/// Cached elements and ranges on top of the encrypted store.
#[derive(Debug, Clone)]
pub struct CacheStorage {
    db: Arc<Db>,
}

fn list_prefix(kind: EntityKind, list_id: &str) -> Vec<u8> {
    let mut key = Vec::new();
    append_binary_block(&mut key, kind.type_name().as_bytes());
    append_binary_block(&mut key, list_id.as_bytes());
    key
}

fn element_key(kind: EntityKind, list_id: &str, element_id: &str) -> Vec<u8> {
    let mut key = list_prefix(kind, list_id);
    key.extend_from_slice(element_id.as_bytes());
    key
}

fn seal_value(cipher: &dyn IndexCipher, value: &Value) -> Result<Vec<u8>> {
    cipher.encrypt(&serde_json::to_vec(value)?)
}

fn open_value(cipher: &dyn IndexCipher, sealed: &[u8]) -> Result<Value> {
    Ok(serde_json::from_slice(&cipher.decrypt(sealed)?)?)
}

async fn stage_instances(
    transaction: &mut dyn StoreTransaction,
    cipher: &dyn IndexCipher,
    kind: EntityKind,
    instances: &[Value],
) -> Result<()> {
    for instance in instances {
        let id = IdTuple::from_instance(instance)?;
        transaction
            .put(
                Region::CacheEntities,
                element_key(kind, &id.list_id, &id.element_id),
                seal_value(cipher, instance)?,
            )
            .await?;
    }
    Ok(())
}

impl CacheStorage {
    pub fn new(db: Arc<Db>) -> Self {
        CacheStorage { db }
    }

    /// A cached element, if present.
    pub async fn get(&self, kind: EntityKind, id: &IdTuple) -> Result<Option<Value>> {
        let cipher = self.db.initialized().await?;
        let mut transaction = self
            .db
            .store()
            .begin(TransactionMode::ReadOnly, &[Region::CacheEntities])
            .await?;
        let sealed = transaction
            .get(
                Region::CacheEntities,
                &element_key(kind, &id.list_id, &id.element_id),
            )
            .await?;
        transaction.commit().await?;
        sealed
            .map(|sealed| open_value(cipher.as_ref(), &sealed))
            .transpose()
    }

    /// Store one instance under the id it carries.
    pub async fn put(&self, kind: EntityKind, instance: &Value) -> Result<()> {
        self.put_all(kind, std::slice::from_ref(instance)).await
    }

    /// Store several instances in one transaction.
    pub async fn put_all(&self, kind: EntityKind, instances: &[Value]) -> Result<()> {
        if instances.is_empty() {
            return Ok(());
        }
        let cipher = self.db.initialized().await?;
        let mut transaction = self
            .db
            .store()
            .begin(TransactionMode::ReadWrite, &[Region::CacheEntities])
            .await?;
        stage_instances(transaction.as_mut(), cipher.as_ref(), kind, instances).await?;
        transaction.commit().await
    }

    /// Store a page of a list together with the range that now covers it.
    ///
    /// Both are written in one transaction, so the range never claims
    /// elements that are not cached.
    pub async fn put_page_with_range(
        &self,
        kind: EntityKind,
        list_id: &str,
        instances: &[Value],
        range: &Range,
    ) -> Result<()> {
        let cipher = self.db.initialized().await?;
        let mut transaction = self
            .db
            .store()
            .begin(
                TransactionMode::ReadWrite,
                &[Region::CacheEntities, Region::CacheRanges],
            )
            .await?;
        stage_instances(transaction.as_mut(), cipher.as_ref(), kind, instances).await?;
        transaction
            .put(
                Region::CacheRanges,
                list_prefix(kind, list_id),
                seal_record(cipher.as_ref(), range)?,
            )
            .await?;
        transaction.commit().await
    }

    pub async fn delete_if_exists(&self, kind: EntityKind, id: &IdTuple) -> Result<()> {
        let mut transaction = self
            .db
            .store()
            .begin(TransactionMode::ReadWrite, &[Region::CacheEntities])
            .await?;
        transaction
            .delete(
                Region::CacheEntities,
                element_key(kind, &id.list_id, &id.element_id),
            )
            .await?;
        transaction.commit().await
    }

    pub async fn get_range_for_list(&self, kind: EntityKind, list_id: &str) -> Result<Option<Range>> {
        let cipher = self.db.initialized().await?;
        let mut transaction = self
            .db
            .store()
            .begin(TransactionMode::ReadOnly, &[Region::CacheRanges])
            .await?;
        let sealed = transaction
            .get(Region::CacheRanges, &list_prefix(kind, list_id))
            .await?;
        transaction.commit().await?;
        sealed
            .map(|sealed| open_record(cipher.as_ref(), &sealed))
            .transpose()
    }

    /// Replace the range of a list.
    pub async fn set_new_range_for_list(
        &self,
        kind: EntityKind,
        list_id: &str,
        lower: &str,
        upper: &str,
    ) -> Result<()> {
        let cipher = self.db.initialized().await?;
        let mut transaction = self
            .db
            .store()
            .begin(TransactionMode::ReadWrite, &[Region::CacheRanges])
            .await?;
        transaction
            .put(
                Region::CacheRanges,
                list_prefix(kind, list_id),
                seal_record(cipher.as_ref(), &Range::new(lower, upper))?,
            )
            .await?;
        transaction.commit().await
    }

    pub async fn is_element_id_in_cache_range(
        &self,
        kind: EntityKind,
        list_id: &str,
        element_id: &str,
    ) -> Result<bool> {
        Ok(self
            .get_range_for_list(kind, list_id)
            .await?
            .is_some_and(|range| range.contains(kind, element_id)))
    }

    /// Every cached element of a list with its id, in ascending id order.
    async fn cached_elements(&self, kind: EntityKind, list_id: &str) -> Result<Vec<(String, Value)>> {
        let cipher = self.db.initialized().await?;
        let prefix = list_prefix(kind, list_id);
        let mut transaction = self
            .db
            .store()
            .begin(TransactionMode::ReadOnly, &[Region::CacheEntities])
            .await?;
        let entries = transaction
            .scan_prefix(Region::CacheEntities, &prefix)
            .await?;
        transaction.commit().await?;

        let mut elements = entries
            .into_iter()
            .map(|(key, sealed)| {
                let element_id = String::from_utf8(key[prefix.len()..].to_vec())
                    .map_err(|e| SealdexError::encoding(e.to_string()))?;
                Ok((element_id, open_value(cipher.as_ref(), &sealed)?))
            })
            .collect::<Result<Vec<_>>>()?;
        let ordering = kind.id_ordering();
        elements.sort_by(|a, b| ordering.compare(&a.0, &b.0));
        Ok(elements)
    }

    /// Every cached element of a list, in ascending id order.
    pub async fn get_whole_list(&self, kind: EntityKind, list_id: &str) -> Result<Vec<Value>> {
        Ok(self
            .cached_elements(kind, list_id)
            .await?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    /// Ids of the cached elements inside the list's range, ascending.
    pub async fn get_ids_in_range(&self, kind: EntityKind, list_id: &str) -> Result<Vec<String>> {
        let Some(range) = self.get_range_for_list(kind, list_id).await? else {
            return Ok(Vec::new());
        };
        Ok(self
            .cached_elements(kind, list_id)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .filter(|id| range.contains(kind, id))
            .collect())
    }

    /// Up to `count` cached elements after `start` (exclusive), or before it
    /// with `reverse`, in iteration order.
    pub async fn provide_from_range(
        &self,
        kind: EntityKind,
        list_id: &str,
        start: &str,
        count: usize,
        reverse: bool,
    ) -> Result<Vec<Value>> {
        let ordering = kind.id_ordering();
        let elements = self.cached_elements(kind, list_id).await?;
        let page = if reverse {
            elements
                .into_iter()
                .rev()
                .filter(|(id, _)| ordering.first_bigger_than_second(start, id))
                .take(count)
                .map(|(_, value)| value)
                .collect()
        } else {
            elements
                .into_iter()
                .filter(|(id, _)| ordering.first_bigger_than_second(id, start))
                .take(count)
                .map(|(_, value)| value)
                .collect()
        };
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AesIndexCipher;
    use crate::entity::id::{GENERATED_MAX_ID, GENERATED_MIN_ID, timestamp_to_generated_id};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn storage() -> (CacheStorage, MemoryStore) {
        let store = MemoryStore::new();
        let db = Db::with_cipher(Arc::new(store.clone()), Arc::new(AesIndexCipher::generate()));
        (CacheStorage::new(Arc::new(db)), store)
    }

    fn gid(n: u64) -> String {
        timestamp_to_generated_id(1_000 * n)
    }

    fn mail(list: &str, element: &str) -> Value {
        json!({ "_id": { "listId": list, "elementId": element }, "subject": "hello" })
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (storage, store) = storage();
        let id = IdTuple::new("inbox", gid(1));
        storage.put(EntityKind::Mail, &mail("inbox", &gid(1))).await.unwrap();

        assert_eq!(
            storage.get(EntityKind::Mail, &id).await.unwrap(),
            Some(mail("inbox", &gid(1)))
        );
        assert_eq!(storage.get(EntityKind::Contact, &id).await.unwrap(), None);

        let raw = store
            .raw_get(Region::CacheEntities, &element_key(EntityKind::Mail, "inbox", &gid(1)))
            .unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("hello"));

        storage.delete_if_exists(EntityKind::Mail, &id).await.unwrap();
        storage.delete_if_exists(EntityKind::Mail, &id).await.unwrap();
        assert_eq!(storage.get(EntityKind::Mail, &id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ranges() {
        let (storage, _) = storage();
        storage
            .set_new_range_for_list(EntityKind::Mail, "inbox", &gid(2), &gid(4))
            .await
            .unwrap();
        storage
            .put_page_with_range(
                EntityKind::Mail,
                "inbox",
                &[mail("inbox", &gid(5))],
                &Range::new(gid(2), GENERATED_MAX_ID),
            )
            .await
            .unwrap();
        assert!(
            storage
                .get(EntityKind::Mail, &IdTuple::new("inbox", gid(5)))
                .await
                .unwrap()
                .is_some()
        );
        assert_eq!(
            storage.get_range_for_list(EntityKind::Mail, "inbox").await.unwrap(),
            Some(Range::new(gid(2), GENERATED_MAX_ID))
        );
        assert!(
            storage
                .is_element_id_in_cache_range(EntityKind::Mail, "inbox", &gid(2))
                .await
                .unwrap()
        );
        assert!(
            storage
                .is_element_id_in_cache_range(EntityKind::Mail, "inbox", &gid(9))
                .await
                .unwrap()
        );
        assert!(
            !storage
                .is_element_id_in_cache_range(EntityKind::Mail, "inbox", &gid(1))
                .await
                .unwrap()
        );
        assert!(
            !storage
                .is_element_id_in_cache_range(EntityKind::Mail, "other", &gid(3))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_page_with_malformed_instance_writes_nothing() {
        let (storage, _) = storage();
        let page = vec![
            mail("inbox", &gid(1)),
            json!({ "subject": "no id" }),
        ];

        let result = storage
            .put_page_with_range(
                EntityKind::Mail,
                "inbox",
                &page,
                &Range::new(gid(1), GENERATED_MAX_ID),
            )
            .await;
        assert!(matches!(result, Err(SealdexError::Encoding(_))));
        assert_eq!(
            storage.get_range_for_list(EntityKind::Mail, "inbox").await.unwrap(),
            None
        );
        assert!(storage.get_whole_list(EntityKind::Mail, "inbox").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provide_from_range() {
        let (storage, _) = storage();
        let elements: Vec<Value> = (1..=4).map(|n| mail("inbox", &gid(n))).collect();
        storage.put_all(EntityKind::Mail, &elements).await.unwrap();
        storage.put(EntityKind::Mail, &mail("archive", &gid(5))).await.unwrap();

        let forward = storage
            .provide_from_range(EntityKind::Mail, "inbox", GENERATED_MIN_ID, 3, false)
            .await
            .unwrap();
        assert_eq!(forward, elements[..3].to_vec());

        let reverse = storage
            .provide_from_range(EntityKind::Mail, "inbox", &gid(3), 5, true)
            .await
            .unwrap();
        assert_eq!(reverse, vec![elements[1].clone(), elements[0].clone()]);

        assert_eq!(storage.get_whole_list(EntityKind::Mail, "inbox").await.unwrap().len(), 4);
        storage
            .set_new_range_for_list(EntityKind::Mail, "inbox", &gid(2), &gid(3))
            .await
            .unwrap();
        assert_eq!(
            storage.get_ids_in_range(EntityKind::Mail, "inbox").await.unwrap(),
            vec![gid(2), gid(3)]
        );
    }
}
