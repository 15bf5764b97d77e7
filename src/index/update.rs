//! Batched index mutations.
//!
//! An [`IndexUpdate`] is an ordered command list for one entity kind. The
//! [`crate::index::IndexerCore`] applies the updates of one event batch, of
//! every kind, in a single store transaction, so a batch is either fully
//! reflected in the index or not at all.

use crate::entity::EntityKind;
use crate::index::types::EncryptedElement;

/// One index mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexCommand {
    /// Write all postings of an element, replacing any it already has.
    AddElement(EncryptedElement),
    /// Remove all postings of an element.
    RemoveElement { encrypted_id: Vec<u8> },
    /// Record that an indexed element now lives in another list.
    MoveElement {
        encrypted_id: Vec<u8>,
        list_id: String,
    },
    /// Move the index timestamp of a group.
    SetGroupTimestamp { group_id: String, timestamp: u64 },
    /// Remember that a batch has been applied.
    RecordBatch { group_id: String, batch_id: String },
}

/// Commands for one entity kind, applied atomically and in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexUpdate {
    pub kind: EntityKind,
    pub commands: Vec<IndexCommand>,
}

impl IndexUpdate {
    pub fn new(kind: EntityKind) -> Self {
        IndexUpdate {
            kind,
            commands: Vec::new(),
        }
    }

    pub fn add_element(&mut self, element: EncryptedElement) {
        self.commands.push(IndexCommand::AddElement(element));
    }

    pub fn remove_element(&mut self, encrypted_id: Vec<u8>) {
        self.commands
            .push(IndexCommand::RemoveElement { encrypted_id });
    }

    pub fn move_element(&mut self, encrypted_id: Vec<u8>, list_id: &str) {
        self.commands.push(IndexCommand::MoveElement {
            encrypted_id,
            list_id: list_id.to_string(),
        });
    }

    pub fn set_group_timestamp(&mut self, group_id: &str, timestamp: u64) {
        self.commands.push(IndexCommand::SetGroupTimestamp {
            group_id: group_id.to_string(),
            timestamp,
        });
    }

    pub fn record_batch(&mut self, group_id: &str, batch_id: &str) {
        self.commands.push(IndexCommand::RecordBatch {
            group_id: group_id.to_string(),
            batch_id: batch_id.to_string(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Number of elements this update (re)writes.
    pub fn added_elements(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| matches!(command, IndexCommand::AddElement(_)))
            .count()
    }
}
