//! Binary encoding of postings, metadata and bookkeeping records.
//!
//! A posting block is `varint(len(encrypted id)) ‖ encrypted id ‖ encrypted
//! payload`. Keeping the encrypted id in the clear part of the block lets the
//! query engine hash and compare ids without decrypting anything. Structured
//! records are bincode encoded and then encrypted as a whole.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::crypto::IndexCipher;
use crate::entity::AttributeId;
use crate::error::{Result, SealdexError};
use crate::index::types::PostingPayload;
use crate::util::varint::{decode_u64, encode_u64};

/// Build a posting block.
pub fn encode_posting_block(encrypted_id: &[u8], encrypted_payload: &[u8]) -> Vec<u8> {
    let header = encode_u64(encrypted_id.len() as u64);
    let mut block = Vec::with_capacity(header.len() + encrypted_id.len() + encrypted_payload.len());
    block.extend_from_slice(&header);
    block.extend_from_slice(encrypted_id);
    block.extend_from_slice(encrypted_payload);
    block
}

/// Split a posting block into its encrypted id and encrypted payload.
pub fn split_posting_block(block: &[u8]) -> Result<(&[u8], &[u8])> {
    let (id_len, header) = decode_u64(block)?;
    let end = header.saturating_add(id_len as usize);
    if end > block.len() {
        return Err(SealdexError::encoding(format!(
            "posting id of {id_len} bytes exceeds block of {} bytes",
            block.len()
        )));
    }
    Ok((&block[header..end], &block[end..]))
}

/// The encrypted id of a posting block.
pub fn posting_block_id(block: &[u8]) -> Result<&[u8]> {
    split_posting_block(block).map(|(id, _)| id)
}

/// Encrypt attribute and positions of a posting.
pub fn encrypt_payload(
    cipher: &dyn IndexCipher,
    attribute: AttributeId,
    positions: &[u32],
) -> Result<Vec<u8>> {
    let payload = PostingPayload {
        attribute,
        positions: positions.to_vec(),
    };
    cipher.encrypt(&bincode::serialize(&payload)?)
}

pub(crate) fn decrypt_payload(
    cipher: &dyn IndexCipher,
    encrypted: &[u8],
) -> Result<PostingPayload> {
    Ok(bincode::deserialize(&cipher.decrypt(encrypted)?)?)
}

/// Serialize and encrypt a record.
pub fn seal_record<T: Serialize>(cipher: &dyn IndexCipher, record: &T) -> Result<Vec<u8>> {
    cipher.encrypt(&bincode::serialize(record)?)
}

/// Decrypt and deserialize a record written by [`seal_record`].
pub fn open_record<T: DeserializeOwned>(cipher: &dyn IndexCipher, sealed: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(&cipher.decrypt(sealed)?)?)
}

/// Storage key of a search index row.
pub fn row_key(key: u64) -> Vec<u8> {
    key.to_be_bytes().to_vec()
}
