//! Index writing: turning entities into encrypted postings and applying
//! [`IndexUpdate`]s to the store.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use tracing::{debug, warn};

use crate::analysis::{AlphanumericTokenizer, Tokenizer};
use crate::config::SealdexConfig;
use crate::crypto::IndexCipher;
use crate::entity::id::generated_id_to_timestamp;
use crate::entity::{AttributeId, EntityKind, IndexedEntity};
use crate::error::{Result, SealdexError};
use crate::index::encoding::{
    encode_posting_block, encrypt_payload, open_record, posting_block_id, row_key, seal_record,
};
use crate::index::types::{
    ElementData, EncryptedElement, EncryptedIndexEntry, GroupData, IndexEntry, MetadataEntry,
    MetadataRow,
};
use crate::index::update::{IndexCommand, IndexUpdate};
use crate::store::{Db, Region, StoreTransaction, TransactionMode};
use crate::util::varint::{append_binary_block, iterate_binary_blocks, retain_binary_blocks};

/// Regions touched by an index write.
pub const INDEX_REGIONS: &[Region] = &[
    Region::SearchIndex,
    Region::SearchIndexMeta,
    Region::ElementData,
    Region::GroupData,
    Region::Meta,
];

const ROW_COUNTER_KEY: &[u8] = b"searchIndexRowCounter";

/// Postings of one element grouped by token.
pub type EntriesByToken = BTreeMap<String, Vec<IndexEntry>>;

/// Builds postings and writes them.
///
/// Shared by every [`crate::index::TypeIndexer`].
#[derive(Clone)]
pub struct IndexerCore {
    db: Arc<Db>,
    tokenizer: Arc<dyn Tokenizer>,
    config: SealdexConfig,
}

impl std::fmt::Debug for IndexerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexerCore")
            .field("db", &self.db)
            .field("tokenizer", &self.tokenizer.name())
            .finish()
    }
}

impl IndexerCore {
    pub fn new(db: Arc<Db>, config: SealdexConfig) -> Self {
        Self::with_tokenizer(db, config, Arc::new(AlphanumericTokenizer::new()))
    }

    pub fn with_tokenizer(db: Arc<Db>, config: SealdexConfig, tokenizer: Arc<dyn Tokenizer>) -> Self {
        IndexerCore {
            db,
            tokenizer,
            config,
        }
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    pub fn config(&self) -> &SealdexConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    /// Tokenize each attribute value and record token offsets.
    ///
    /// Offsets restart at zero for every attribute.
    pub fn create_index_entries_for_attributes(
        &self,
        id: &str,
        values: &[(AttributeId, String)],
    ) -> Result<EntriesByToken> {
        let mut entries = EntriesByToken::new();
        for (attribute, value) in values {
            for token in self.tokenizer.tokenize(value)? {
                let position = token.position as u32;
                let postings = entries.entry(token.text).or_default();
                match postings.iter_mut().find(|entry| entry.attribute == *attribute) {
                    Some(entry) => entry.positions.push(position),
                    None => postings.push(IndexEntry::new(id, *attribute, position)),
                }
            }
        }
        Ok(entries)
    }

    /// Postings of every indexed attribute of `entity`.
    pub fn create_index_entries<T: IndexedEntity>(&self, entity: &T) -> Result<EntriesByToken> {
        let values: Vec<(AttributeId, String)> = T::attributes()
            .iter()
            .map(|handler| (handler.attribute, (handler.value)(entity)))
            .collect();
        self.create_index_entries_for_attributes(&entity.id().element_id, &values)
    }

    /// Encrypt the postings of `entity` for writing.
    pub fn encrypt_element<T: IndexedEntity>(
        &self,
        cipher: &dyn IndexCipher,
        entity: &T,
    ) -> Result<EncryptedElement> {
        let id = entity.id();
        let timestamp = generated_id_to_timestamp(&id.element_id)?;
        let encrypted_id = cipher.encrypt_id(&id.element_id)?;

        let mut entries = Vec::new();
        for (token, postings) in self.create_index_entries(entity)? {
            let index_key = cipher.index_key(&token);
            for posting in postings {
                let payload = encrypt_payload(cipher, posting.attribute, &posting.positions)?;
                entries.push(EncryptedIndexEntry {
                    index_key: index_key.clone(),
                    block: encode_posting_block(&encrypted_id, &payload),
                    timestamp,
                });
            }
        }

        Ok(EncryptedElement {
            kind: T::KIND,
            encrypted_id,
            list_id: id.list_id.clone(),
            owner_group: entity.owner_group().to_string(),
            entries,
        })
    }

    /// Apply `update` in one transaction.
    pub async fn write_index_update(&self, update: IndexUpdate) -> Result<()> {
        self.write_index_updates(vec![update]).await
    }

    /// Apply the updates of several kinds, in order, in one transaction.
    ///
    /// Nothing is written unless every command succeeds.
    pub async fn write_index_updates(&self, updates: Vec<IndexUpdate>) -> Result<()> {
        let updates: Vec<IndexUpdate> = updates.into_iter().filter(|u| !u.is_empty()).collect();
        if updates.is_empty() {
            return Ok(());
        }
        let cipher = self.db.initialized().await?;
        let transaction = self
            .db
            .store()
            .begin(TransactionMode::ReadWrite, INDEX_REGIONS)
            .await?;
        let command_count: usize = updates.iter().map(IndexUpdate::len).sum();

        let mut session = WriteSession::new(transaction, cipher.as_ref(), &self.config);
        for update in updates {
            let kind = update.kind;
            for command in update.commands {
                self.apply_command(&mut session, kind, command).await?;
            }
        }
        session.commit().await?;
        debug!(commands = command_count, "index update committed");
        Ok(())
    }

    async fn apply_command(
        &self,
        session: &mut WriteSession<'_>,
        kind: EntityKind,
        command: IndexCommand,
    ) -> Result<()> {
        match command {
            IndexCommand::AddElement(element) => session.add_element(element).await,
            IndexCommand::RemoveElement { encrypted_id } => {
                session.remove_element(&encrypted_id).await.map(|_| ())
            }
            IndexCommand::MoveElement {
                encrypted_id,
                list_id,
            } => session.move_element(encrypted_id, list_id).await,
            IndexCommand::SetGroupTimestamp {
                group_id,
                timestamp,
            } => {
                let mut group = session.group_data(&group_id).await?;
                group.index_timestamp = timestamp;
                session.put_group_data(&group_id, &group).await
            }
            IndexCommand::RecordBatch { group_id, batch_id } => {
                let mut group = session.group_data(&group_id).await?;
                group.record_batch(kind, &batch_id, self.config.max_remembered_batches);
                session.put_group_data(&group_id, &group).await
            }
        }
    }

    pub async fn get_group_data(&self, group_id: &str) -> Result<Option<GroupData>> {
        let cipher = self.db.initialized().await?;
        let mut transaction = self
            .db
            .store()
            .begin(TransactionMode::ReadOnly, &[Region::GroupData])
            .await?;
        transaction
            .get(Region::GroupData, group_id.as_bytes())
            .await?
            .map(|sealed| open_record(cipher.as_ref(), &sealed))
            .transpose()
    }

    pub async fn get_element_data(&self, element_id: &str) -> Result<Option<ElementData>> {
        let cipher = self.db.initialized().await?;
        let encrypted_id = cipher.encrypt_id(element_id)?;
        let mut transaction = self
            .db
            .store()
            .begin(TransactionMode::ReadOnly, &[Region::ElementData])
            .await?;
        transaction
            .get(Region::ElementData, &encrypted_id)
            .await?
            .map(|sealed| open_record(cipher.as_ref(), &sealed))
            .transpose()
    }

    /// Metadata of `token`; empty if the token was never indexed.
    pub async fn metadata_for_token(&self, token: &str) -> Result<MetadataRow> {
        let cipher = self.db.initialized().await?;
        let mut transaction = self
            .db
            .store()
            .begin(TransactionMode::ReadOnly, &[Region::SearchIndexMeta])
            .await?;
        Ok(
            read_metadata(transaction.as_mut(), cipher.as_ref(), &cipher.index_key(token))
                .await?
                .unwrap_or_default(),
        )
    }
}

/// Read and decrypt the metadata stored under `index_key`.
pub(crate) async fn read_metadata(
    transaction: &mut dyn StoreTransaction,
    cipher: &dyn IndexCipher,
    index_key: &[u8],
) -> Result<Option<MetadataRow>> {
    transaction
        .get(Region::SearchIndexMeta, index_key)
        .await?
        .map(|sealed| open_record(cipher, &sealed))
        .transpose()
}

/// State of one index write transaction.
///
/// Metadata rows are cached in memory and written back on commit.
struct WriteSession<'a> {
    transaction: Box<dyn StoreTransaction>,
    cipher: &'a dyn IndexCipher,
    config: &'a SealdexConfig,
    metadata: AHashMap<Vec<u8>, MetadataRow>,
    row_counter: Option<u64>,
}

impl<'a> WriteSession<'a> {
    fn new(
        transaction: Box<dyn StoreTransaction>,
        cipher: &'a dyn IndexCipher,
        config: &'a SealdexConfig,
    ) -> Self {
        WriteSession {
            transaction,
            cipher,
            config,
            metadata: AHashMap::new(),
            row_counter: None,
        }
    }

    async fn take_metadata(&mut self, index_key: &[u8]) -> Result<MetadataRow> {
        if let Some(row) = self.metadata.remove(index_key) {
            return Ok(row);
        }
        Ok(
            read_metadata(self.transaction.as_mut(), self.cipher, index_key)
                .await?
                .unwrap_or_default(),
        )
    }

    async fn next_row_key(&mut self) -> Result<u64> {
        let current = match self.row_counter {
            Some(counter) => counter,
            None => match self.transaction.get(Region::Meta, ROW_COUNTER_KEY).await? {
                Some(bytes) => {
                    let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                        SealdexError::encoding("row counter is not a 64-bit integer")
                    })?;
                    u64::from_be_bytes(bytes)
                }
                None => 0,
            },
        };
        let next = current + 1;
        self.row_counter = Some(next);
        Ok(next)
    }

    async fn add_element(&mut self, element: EncryptedElement) -> Result<()> {
        self.remove_element(&element.encrypted_id).await?;

        let mut by_key: BTreeMap<&[u8], Vec<&EncryptedIndexEntry>> = BTreeMap::new();
        for entry in &element.entries {
            by_key.entry(&entry.index_key).or_default().push(entry);
        }

        for (index_key, entries) in &by_key {
            let mut metadata = self.take_metadata(index_key).await?;
            for entry in entries {
                self.insert_posting(&mut metadata, element.kind, entry).await?;
            }
            self.metadata.insert(index_key.to_vec(), metadata);
        }

        let data = ElementData {
            kind: element.kind,
            list_id: element.list_id,
            owner_group: element.owner_group,
            index_keys: by_key.keys().map(|key| key.to_vec()).collect(),
        };
        let sealed = seal_record(self.cipher, &data)?;
        self.transaction
            .put(Region::ElementData, element.encrypted_id, sealed)
            .await
    }

    async fn insert_posting(
        &mut self,
        metadata: &mut MetadataRow,
        kind: EntityKind,
        entry: &EncryptedIndexEntry,
    ) -> Result<()> {
        match metadata.row_for_timestamp(kind, entry.timestamp) {
            Some(index) => {
                let key = metadata.entries[index].key;
                let mut row = self
                    .transaction
                    .get(Region::SearchIndex, &row_key(key))
                    .await?
                    .unwrap_or_default();
                append_binary_block(&mut row, &entry.block);

                let target = &mut metadata.entries[index];
                target.size += 1;
                target.oldest_element_timestamp =
                    target.oldest_element_timestamp.min(entry.timestamp);
                if target.size > self.config.max_row_postings {
                    self.split_row(metadata, index, row).await?;
                } else {
                    self.transaction
                        .put(Region::SearchIndex, row_key(key), row)
                        .await?;
                }
            }
            None => {
                let key = self.next_row_key().await?;
                let mut row = Vec::new();
                append_binary_block(&mut row, &entry.block);
                self.transaction
                    .put(Region::SearchIndex, row_key(key), row)
                    .await?;
                metadata.entries.push(MetadataEntry {
                    kind,
                    key,
                    size: 1,
                    oldest_element_timestamp: entry.timestamp,
                });
            }
        }
        metadata.sort();
        Ok(())
    }

    /// Split an overflowing row into a newer and an older half.
    async fn split_row(
        &mut self,
        metadata: &mut MetadataRow,
        index: usize,
        row: Vec<u8>,
    ) -> Result<()> {
        let mut postings: Vec<(u64, &[u8])> = Vec::new();
        for block in iterate_binary_blocks(&row) {
            let block = block?;
            let id = self.cipher.decrypt_id(posting_block_id(block)?)?;
            postings.push((generated_id_to_timestamp(&id)?, block));
        }
        postings.sort_by(|a, b| b.0.cmp(&a.0));

        let (newer, older) = postings.split_at(postings.len() / 2);
        let (Some(oldest_of_older), Some(oldest_of_newer)) = (older.last(), newer.last()) else {
            return Err(SealdexError::index("cannot split a row of fewer than two postings"));
        };

        let new_key = self.next_row_key().await?;
        let old_key = metadata.entries[index].key;
        self.transaction
            .put(Region::SearchIndex, row_key(new_key), frame_blocks(newer))
            .await?;
        self.transaction
            .put(Region::SearchIndex, row_key(old_key), frame_blocks(older))
            .await?;

        let kind = metadata.entries[index].kind;
        let old = &mut metadata.entries[index];
        old.size = older.len();
        old.oldest_element_timestamp = oldest_of_older.0;
        metadata.entries.push(MetadataEntry {
            kind,
            key: new_key,
            size: newer.len(),
            oldest_element_timestamp: oldest_of_newer.0,
        });
        debug!(row = old_key, new_row = new_key, "split search index row");
        Ok(())
    }

    async fn remove_element(&mut self, encrypted_id: &[u8]) -> Result<bool> {
        let Some(sealed) = self.transaction.get(Region::ElementData, encrypted_id).await? else {
            return Ok(false);
        };
        let data: ElementData = open_record(self.cipher, &sealed)?;

        for index_key in &data.index_keys {
            let mut metadata = self.take_metadata(index_key).await?;
            let mut kept = Vec::with_capacity(metadata.entries.len());
            for mut entry in std::mem::take(&mut metadata.entries) {
                if entry.kind != data.kind {
                    kept.push(entry);
                    continue;
                }
                let key = row_key(entry.key);
                let Some(row) = self.transaction.get(Region::SearchIndex, &key).await? else {
                    warn!(row = entry.key, "metadata points to a missing search index row");
                    continue;
                };
                let (retained, removed) = retain_binary_blocks(&row, |block| {
                    posting_block_id(block).map_or(true, |id| id != encrypted_id)
                })?;
                if removed == 0 {
                    kept.push(entry);
                } else if retained.is_empty() {
                    self.transaction.delete(Region::SearchIndex, key).await?;
                } else {
                    self.transaction
                        .put(Region::SearchIndex, key, retained)
                        .await?;
                    entry.size = entry.size.saturating_sub(removed);
                    kept.push(entry);
                }
            }
            metadata.entries = kept;
            self.metadata.insert(index_key.clone(), metadata);
        }

        self.transaction
            .delete(Region::ElementData, encrypted_id.to_vec())
            .await?;
        Ok(true)
    }

    /// Point the element data of an indexed element at `list_id`. Postings
    /// do not carry the list, so they stay as they are.
    async fn move_element(&mut self, encrypted_id: Vec<u8>, list_id: String) -> Result<()> {
        let Some(sealed) = self.transaction.get(Region::ElementData, &encrypted_id).await? else {
            debug!("moved element is not indexed");
            return Ok(());
        };
        let mut data: ElementData = open_record(self.cipher, &sealed)?;
        data.list_id = list_id;
        let sealed = seal_record(self.cipher, &data)?;
        self.transaction
            .put(Region::ElementData, encrypted_id, sealed)
            .await
    }

    async fn group_data(&mut self, group_id: &str) -> Result<GroupData> {
        Ok(
            match self
                .transaction
                .get(Region::GroupData, group_id.as_bytes())
                .await?
            {
                Some(sealed) => open_record(self.cipher, &sealed)?,
                None => GroupData::default(),
            },
        )
    }

    async fn put_group_data(&mut self, group_id: &str, group: &GroupData) -> Result<()> {
        let sealed = seal_record(self.cipher, group)?;
        self.transaction
            .put(Region::GroupData, group_id.as_bytes().to_vec(), sealed)
            .await
    }

    async fn commit(mut self) -> Result<()> {
        for (index_key, metadata) in std::mem::take(&mut self.metadata) {
            if metadata.is_empty() {
                self.transaction
                    .delete(Region::SearchIndexMeta, index_key)
                    .await?;
            } else {
                let sealed = seal_record(self.cipher, &metadata)?;
                self.transaction
                    .put(Region::SearchIndexMeta, index_key, sealed)
                    .await?;
            }
        }
        if let Some(counter) = self.row_counter {
            self.transaction
                .put(Region::Meta, ROW_COUNTER_KEY.to_vec(), counter.to_be_bytes().to_vec())
                .await?;
        }
        self.transaction.commit().await
    }
}

fn frame_blocks(postings: &[(u64, &[u8])]) -> Vec<u8> {
    let mut row = Vec::new();
    for (_, block) in postings {
        append_binary_block(&mut row, block);
    }
    row
}
