//! The search database handle: the store plus the key that unlocks it.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::crypto::IndexCipher;
use crate::error::{Result, SealdexError};
use crate::store::EncryptedStore;

/// Shared handle to the encrypted store and its database key.
///
/// The key only becomes available once the session is unlocked.
/// [`Db::initialized`] is the barrier every index, query and suggestion
/// operation awaits before touching encrypted data.
pub struct Db {
    store: Arc<dyn EncryptedStore>,
    cipher: watch::Sender<Option<Arc<dyn IndexCipher>>>,
}

impl Db {
    /// Create a database whose key is not known yet.
    pub fn new(store: Arc<dyn EncryptedStore>) -> Self {
        let (cipher, _) = watch::channel(None);
        Db { store, cipher }
    }

    /// Create a database that is initialized right away.
    pub fn with_cipher(store: Arc<dyn EncryptedStore>, cipher: Arc<dyn IndexCipher>) -> Self {
        let db = Self::new(store);
        db.initialize(cipher);
        db
    }

    /// Provide the database key and release everyone waiting on it.
    pub fn initialize(&self, cipher: Arc<dyn IndexCipher>) {
        self.cipher.send_replace(Some(cipher));
    }

    /// Whether [`Db::initialize`] has been called.
    pub fn is_initialized(&self) -> bool {
        self.cipher.borrow().is_some()
    }

    /// Wait until the database key is available and return its cipher.
    pub async fn initialized(&self) -> Result<Arc<dyn IndexCipher>> {
        let mut receiver = self.cipher.subscribe();
        let cipher = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SealdexError::storage("database was closed before initialization"))?;
        cipher
            .clone()
            .ok_or_else(|| SealdexError::programming("initialized database without a key"))
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn EncryptedStore> {
        &self.store
    }
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("store", &self.store)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::crypto::AesIndexCipher;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_initialized_waits_for_key() {
        let db = Arc::new(Db::new(Arc::new(MemoryStore::new())));
        assert!(!db.is_initialized());

        let waiter = {
            let db = Arc::clone(&db);
            tokio::spawn(async move { db.initialized().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        db.initialize(Arc::new(AesIndexCipher::generate()));
        waiter.await.unwrap().unwrap();
        assert!(db.is_initialized());
    }
}
