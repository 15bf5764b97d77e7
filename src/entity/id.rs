//! Element identifiers and their orderings.
//!
//! Two id families exist:
//!
//! - **generated ids**: twelve characters of an order-preserving base64
//!   variant over nine bytes whose first six bytes are the creation time in
//!   milliseconds. Byte order is chronological order.
//! - **custom ids**: url-safe base64 of arbitrary bytes chosen by the client
//!   (calendar events). Their string order does not match the order of the
//!   decoded bytes, so they can't be range-compared in storage.

use std::cmp::Ordering;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::error::{Result, SealdexError};

/// Alphabet of the order-preserving base64 variant, in ASCII order.
const BASE64EXT_ALPHABET: &[u8; 64] =
    b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Length of a generated id in characters.
pub const GENERATED_ID_LENGTH: usize = 12;

const GENERATED_ID_BYTES: usize = 9;

/// Smallest possible generated id.
pub const GENERATED_MIN_ID: &str = "------------";

/// Largest possible generated id.
pub const GENERATED_MAX_ID: &str = "zzzzzzzzzzzz";

/// Smallest possible custom id.
pub const CUSTOM_MIN_ID: &str = "";

/// Largest possible custom id.
pub const CUSTOM_MAX_ID: &str = "_";

/// How the ids of one entity kind are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdOrdering {
    /// Generated ids, ordered by their string representation.
    Generated,
    /// Custom ids, ordered by their decoded bytes.
    Custom,
}

impl IdOrdering {
    /// Compare two ids of this family.
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match self {
            IdOrdering::Generated => compare_generated_ids(a, b),
            IdOrdering::Custom => compare_custom_ids(a, b),
        }
    }

    /// Whether `a` sorts strictly after `b`.
    pub fn first_bigger_than_second(&self, a: &str, b: &str) -> bool {
        self.compare(a, b) == Ordering::Greater
    }

    /// Smallest id of this family.
    pub fn min_id(&self) -> &'static str {
        match self {
            IdOrdering::Generated => GENERATED_MIN_ID,
            IdOrdering::Custom => CUSTOM_MIN_ID,
        }
    }

    /// Largest id of this family.
    pub fn max_id(&self) -> &'static str {
        match self {
            IdOrdering::Generated => GENERATED_MAX_ID,
            IdOrdering::Custom => CUSTOM_MAX_ID,
        }
    }
}

/// Longer ids are bigger, equal lengths compare as strings.
pub fn compare_generated_ids(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Compare custom ids by their decoded bytes.
///
/// The sentinels [`CUSTOM_MIN_ID`] and [`CUSTOM_MAX_ID`] bound every id.
/// Ids that are not valid base64 fall back to string order.
pub fn compare_custom_ids(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    match (a, b) {
        (CUSTOM_MIN_ID, _) | (_, CUSTOM_MAX_ID) => return Ordering::Less,
        (_, CUSTOM_MIN_ID) | (CUSTOM_MAX_ID, _) => return Ordering::Greater,
        _ => {}
    }
    match (URL_SAFE_NO_PAD.decode(a), URL_SAFE_NO_PAD.decode(b)) {
        (Ok(a_bytes), Ok(b_bytes)) => a_bytes.cmp(&b_bytes),
        _ => a.cmp(b),
    }
}

/// Encode raw bytes as a custom id.
pub fn custom_id_from_bytes(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// The lowest generated id created at `timestamp` (milliseconds).
pub fn timestamp_to_generated_id(timestamp: u64) -> String {
    generated_id(timestamp, 0, 0)
}

/// A generated id from its parts.
pub fn generated_id(timestamp: u64, server: u8, counter: u16) -> String {
    let mut bytes = [0u8; GENERATED_ID_BYTES];
    bytes[..6].copy_from_slice(&timestamp.to_be_bytes()[2..]);
    bytes[6] = server;
    bytes[7..].copy_from_slice(&counter.to_be_bytes());
    encode_base64ext(&bytes)
}

/// Creation time (milliseconds) of a generated id.
pub fn generated_id_to_timestamp(id: &str) -> Result<u64> {
    let bytes = decode_base64ext(id)?;
    if bytes.len() != GENERATED_ID_BYTES {
        return Err(SealdexError::encoding(format!(
            "generated id {id:?} decodes to {} bytes",
            bytes.len()
        )));
    }
    let mut timestamp = [0u8; 8];
    timestamp[2..].copy_from_slice(&bytes[..6]);
    Ok(u64::from_be_bytes(timestamp))
}

fn encode_base64ext(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for chunk in bytes.chunks(3) {
        let mut buffer = [0u8; 3];
        buffer[..chunk.len()].copy_from_slice(chunk);
        let n = ((buffer[0] as u32) << 16) | ((buffer[1] as u32) << 8) | buffer[2] as u32;
        let chars = chunk.len() + 1;
        for i in 0..chars {
            let index = (n >> (18 - 6 * i)) & 0x3F;
            out.push(BASE64EXT_ALPHABET[index as usize] as char);
        }
    }
    out
}

fn decode_base64ext(text: &str) -> Result<Vec<u8>> {
    let mut values = Vec::with_capacity(text.len());
    for c in text.bytes() {
        let value = BASE64EXT_ALPHABET
            .iter()
            .position(|&a| a == c)
            .ok_or_else(|| SealdexError::encoding(format!("invalid id character {:?}", c as char)))?;
        values.push(value as u32);
    }

    let mut out = Vec::with_capacity(values.len() * 3 / 4);
    for chunk in values.chunks(4) {
        if chunk.len() == 1 {
            return Err(SealdexError::encoding(format!("truncated id {text:?}")));
        }
        let mut n = 0u32;
        for (i, value) in chunk.iter().enumerate() {
            n |= value << (18 - 6 * i);
        }
        for i in 0..chunk.len() - 1 {
            out.push((n >> (16 - 8 * i)) as u8);
        }
    }
    Ok(out)
}
