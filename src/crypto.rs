//! Cryptographic primitives consumed by the index and the cache.
//!
//! The engine never looks inside these functions. It only relies on the
//! properties documented on [`IndexCipher`]:
//!
//! - index keys and encrypted ids are deterministic, so equal plaintexts map
//!   to equal bytes and can be compared without decryption,
//! - everything else is encrypted with a fresh nonce and authenticated.

use std::fmt;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

use crate::error::{Result, SealdexError};

const NONCE_LEN: usize = 12;

/// Black-box encryption used for everything the index persists.
pub trait IndexCipher: Send + Sync + fmt::Debug {
    /// Deterministic, one-way storage key for a search token.
    fn index_key(&self, token: &str) -> Vec<u8>;

    /// Deterministically encrypt an element id.
    fn encrypt_id(&self, id: &str) -> Result<Vec<u8>>;

    /// Decrypt an id produced by [`IndexCipher::encrypt_id`].
    fn decrypt_id(&self, encrypted: &[u8]) -> Result<String>;

    /// Authenticated encryption with a fresh nonce.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt and authenticate data produced by [`IndexCipher::encrypt`].
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Hash of an encrypted id, used to intersect postings before decryption.
pub fn id_hash(encrypted_id: &[u8]) -> u32 {
    crc32fast::hash(encrypted_id)
}

type HmacSha256 = Hmac<Sha256>;

const SHA256_BLOCK_LEN: usize = 64;

/// AES-256-GCM backed [`IndexCipher`].
///
/// Ids use a synthetic nonce derived from the id itself, which makes their
/// encryption deterministic.
pub struct AesIndexCipher {
    mac: HmacSha256,
    cipher: Aes256Gcm,
}

impl AesIndexCipher {
    /// Create a cipher from a 256-bit database key.
    pub fn new(key: [u8; 32]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        // HMAC zero-pads keys shorter than the hash block.
        let mut block = [0u8; SHA256_BLOCK_LEN];
        block[..key.len()].copy_from_slice(&key);
        let mac = <HmacSha256 as KeyInit>::new(GenericArray::from_slice(&block));
        AesIndexCipher { mac, cipher }
    }

    /// Create a cipher with a random key.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::rng().fill(&mut key);
        Self::new(key)
    }

    /// HMAC-SHA256 of `domain ‖ data` under the database key.
    fn keyed_digest(&self, domain: &[u8], data: &[u8]) -> [u8; 32] {
        let mut mac = self.mac.clone();
        mac.update(domain);
        mac.update(data);
        mac.finalize().into_bytes().into()
    }

    fn seal(&self, nonce: [u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| SealdexError::crypto("encryption failed"))?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn open(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(SealdexError::crypto(format!(
                "ciphertext of {} bytes is shorter than its nonce",
                data.len()
            )));
        }
        let (nonce, sealed) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| SealdexError::crypto("decryption failed"))
    }
}

impl fmt::Debug for AesIndexCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesIndexCipher").finish_non_exhaustive()
    }
}

impl IndexCipher for AesIndexCipher {
    fn index_key(&self, token: &str) -> Vec<u8> {
        self.keyed_digest(b"sealdex/index-key", token.as_bytes())
            .to_vec()
    }

    fn encrypt_id(&self, id: &str) -> Result<Vec<u8>> {
        let digest = self.keyed_digest(b"sealdex/id-nonce", id.as_bytes());
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&digest[..NONCE_LEN]);
        self.seal(nonce, id.as_bytes())
    }

    fn decrypt_id(&self, encrypted: &[u8]) -> Result<String> {
        let plain = self.open(encrypted)?;
        String::from_utf8(plain).map_err(|e| SealdexError::crypto(e.to_string()))
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce);
        self.seal(nonce, plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.open(ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_key_is_deterministic_and_keyed() {
        let cipher = AesIndexCipher::new([1u8; 32]);
        let other = AesIndexCipher::new([2u8; 32]);

        assert_eq!(cipher.index_key("anne"), cipher.index_key("anne"));
        assert_ne!(cipher.index_key("anne"), cipher.index_key("anna"));
        assert_ne!(cipher.index_key("anne"), other.index_key("anne"));
    }

    #[test]
    fn test_index_key_is_a_standard_hmac() {
        let key = [7u8; 32];
        let cipher = AesIndexCipher::new(key);

        let mut expected = <HmacSha256 as Mac>::new_from_slice(&key).unwrap();
        expected.update(b"sealdex/index-key");
        expected.update(b"anne");
        assert_eq!(
            cipher.index_key("anne"),
            expected.finalize().into_bytes().to_vec()
        );
    }

    #[test]
    fn test_encrypted_ids_compare_without_decryption() {
        let cipher = AesIndexCipher::generate();
        let a = cipher.encrypt_id("MwIAAAAAAAA").unwrap();
        let b = cipher.encrypt_id("MwIAAAAAAAA").unwrap();
        let c = cipher.encrypt_id("MwIAAAAAAAB").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(id_hash(&a), id_hash(&b));
        assert_eq!(cipher.decrypt_id(&c).unwrap(), "MwIAAAAAAAB");
    }

    #[test]
    fn test_payload_encryption_is_randomized() {
        let cipher = AesIndexCipher::generate();
        let first = cipher.encrypt(b"payload").unwrap();
        let second = cipher.encrypt(b"payload").unwrap();

        assert_ne!(first, second);
        assert_eq!(cipher.decrypt(&first).unwrap(), b"payload");
    }

    #[test]
    fn test_tampered_ciphertext_is_rejected() {
        let cipher = AesIndexCipher::generate();
        let mut sealed = cipher.encrypt(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;

        assert!(cipher.decrypt(&sealed).is_err());
        assert!(cipher.decrypt(&[0u8; 4]).is_err());
        assert!(format!("{cipher:?}").starts_with("AesIndexCipher"));
    }
}
