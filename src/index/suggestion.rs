//! Autocomplete word lists.
//!
//! Words are bucketed by their first character and each bucket is kept
//! sorted and free of duplicates, so a prefix lookup only filters one
//! bucket. The whole table of a kind is persisted as one encrypted JSON
//! blob.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::entity::EntityKind;
use crate::error::Result;
use crate::store::{Db, Region, TransactionMode};

type SuggestionTable = HashMap<String, Vec<String>>;

/// Suggestions for one entity kind.
#[derive(Debug)]
pub struct SuggestionStore {
    kind: EntityKind,
    db: Arc<Db>,
    table: Mutex<SuggestionTable>,
}

impl SuggestionStore {
    pub fn new(kind: EntityKind, db: Arc<Db>) -> Self {
        SuggestionStore {
            kind,
            db,
            table: Mutex::new(SuggestionTable::new()),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Add whole words. Empty words and words already present are skipped.
    pub fn add_suggestions<S: AsRef<str>>(&self, words: &[S]) {
        let mut table = self.table.lock();
        for word in words {
            let word = word.as_ref();
            let Some(first) = word.chars().next() else {
                continue;
            };
            let bucket = table.entry(first.to_string()).or_default();
            if let Err(index) = bucket.binary_search_by(|existing| existing.as_str().cmp(word)) {
                bucket.insert(index, word.to_string());
            }
        }
    }

    /// Words starting with `prefix`, in ascending order.
    pub fn get_suggestions(&self, prefix: &str) -> Vec<String> {
        let Some(first) = prefix.chars().next() else {
            return Vec::new();
        };
        self.table
            .lock()
            .get(&first.to_string())
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|word| word.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replace the in-memory table with the persisted one.
    pub async fn load(&self) -> Result<()> {
        let cipher = self.db.initialized().await?;
        let mut transaction = self
            .db
            .store()
            .begin(TransactionMode::ReadOnly, &[Region::SearchTermSuggestions])
            .await?;
        let table = match transaction
            .get(Region::SearchTermSuggestions, self.storage_key().as_bytes())
            .await?
        {
            Some(sealed) => serde_json::from_slice(&cipher.decrypt(&sealed)?)?,
            None => SuggestionTable::new(),
        };
        *self.table.lock() = table;
        Ok(())
    }

    /// Persist the in-memory table.
    pub async fn store(&self) -> Result<()> {
        let cipher = self.db.initialized().await?;
        let json = serde_json::to_vec(&*self.table.lock())?;
        let sealed = cipher.encrypt(&json)?;

        let mut transaction = self
            .db
            .store()
            .begin(TransactionMode::ReadWrite, &[Region::SearchTermSuggestions])
            .await?;
        transaction
            .put(
                Region::SearchTermSuggestions,
                self.storage_key().into_bytes(),
                sealed,
            )
            .await?;
        transaction.commit().await?;
        debug!(kind = %self.kind, "stored suggestions");
        Ok(())
    }

    fn storage_key(&self) -> String {
        self.kind.type_name().to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AesIndexCipher;
    use crate::store::MemoryStore;

    fn store() -> (SuggestionStore, MemoryStore) {
        let memory = MemoryStore::new();
        let db = Db::with_cipher(
            Arc::new(memory.clone()),
            Arc::new(AesIndexCipher::generate()),
        );
        (SuggestionStore::new(EntityKind::Contact, Arc::new(db)), memory)
    }

    #[test]
    fn test_add_and_get_suggestions() {
        let (suggestions, _) = store();
        suggestions.add_suggestions(&["a"]);
        suggestions.add_suggestions(&["anton", "arne"]);
        suggestions.add_suggestions(&["ab", "az", "arne"]);
        suggestions.add_suggestions(&["aa", "anne", "bernd"]);

        assert_eq!(
            suggestions.get_suggestions("a"),
            vec!["a", "aa", "ab", "anne", "anton", "arne", "az"]
        );
        assert_eq!(suggestions.get_suggestions("an"), vec!["anne", "anton"]);
        assert!(suggestions.get_suggestions("annet").is_empty());
        assert_eq!(suggestions.get_suggestions("b"), vec!["bernd"]);
        assert!(suggestions.get_suggestions("").is_empty());
        assert!(suggestions.get_suggestions("x").is_empty());
    }

    #[test]
    fn test_empty_words_are_ignored() {
        let (suggestions, _) = store();
        suggestions.add_suggestions(&["", "über"]);
        assert_eq!(suggestions.get_suggestions("ü"), vec!["über"]);
    }

    #[tokio::test]
    async fn test_store_and_load() {
        let (suggestions, memory) = store();
        suggestions.add_suggestions(&["anton", "arne"]);
        suggestions.store().await.unwrap();

        suggestions.add_suggestions(&["anne"]);
        assert_eq!(suggestions.get_suggestions("an"), vec!["anne", "anton"]);

        suggestions.load().await.unwrap();
        assert_eq!(suggestions.get_suggestions("a"), vec!["anton", "arne"]);

        let sealed = memory
            .raw_get(Region::SearchTermSuggestions, b"contact")
            .unwrap();
        assert!(!String::from_utf8_lossy(&sealed).contains("anton"));
    }

    #[tokio::test]
    async fn test_load_without_stored_table_clears() {
        let (suggestions, _) = store();
        suggestions.add_suggestions(&["anton"]);
        suggestions.load().await.unwrap();
        assert!(suggestions.get_suggestions("a").is_empty());
    }
}
