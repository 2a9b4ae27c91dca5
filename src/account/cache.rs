use p256::ecdsa::VerifyingKey;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::crypto::Address;
use crate::error::Result;

/// Address -> public key cache, shared by readers, populated under the write lock.
#[derive(Default)]
pub struct PublicKeyCache {
    keys: RwLock<HashMap<Address, VerifyingKey>>,
}

impl PublicKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &str) -> Result<Option<VerifyingKey>> {
        Ok(self.keys.read()?.get(address).cloned())
    }

    pub fn insert(&self, address: &str, key: VerifyingKey) -> Result<()> {
        self.keys.write()?.insert(address.to_string(), key);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys.read().map(|k| k.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
