//! Account storage and management

use p256::ecdsa::VerifyingKey;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use super::balance::{self, BalanceDelta, Balances};
use super::cache::PublicKeyCache;
use super::keystore::{self, ScryptCost};
use super::types::{account_key, Account, ACCOUNT_KEY_PREFIX, NATIVE_CURRENCY};
use crate::crypto::{derive_address, public_key_from_hex, public_key_to_hex, Address, KeyPair};
use crate::error::{LedgerError, Result, ValidationError};
use crate::storage::{get_json, KvStore, WriteBatch};

/// Owns every `account_<address>` record.
///
/// Read-modify-write cycles run under the exclusive side of `lock`; plain
/// reads take the shared side.
pub struct AccountStore {
    store: Arc<dyn KvStore>,
    cost: ScryptCost,
    cache: Arc<PublicKeyCache>,
    lock: RwLock<()>,
}

impl AccountStore {
    pub fn new(store: Arc<dyn KvStore>, cost: ScryptCost) -> Self {
        Self::with_cache(store, cost, Arc::new(PublicKeyCache::new()))
    }

    /// Create with an externally owned public-key cache
    pub fn with_cache(store: Arc<dyn KvStore>, cost: ScryptCost, cache: Arc<PublicKeyCache>) -> Self {
        Self {
            store,
            cost,
            cache,
            lock: RwLock::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<PublicKeyCache> {
        &self.cache
    }

    // Caller holds `lock`.
    fn load(&self, address: &str) -> Result<Account> {
        get_json(self.store.as_ref(), &account_key(address))?
            .ok_or_else(|| LedgerError::NotFound(format!("account {}", address)))
    }

    /// Create a new account funded with `initial_balance` of the native currency
    pub fn create_account(&self, password: &str, initial_balance: Decimal) -> Result<(Address, KeyPair)> {
        if initial_balance < Decimal::ZERO {
            return Err(ValidationError::NegativeBalance.into());
        }

        let key_pair = KeyPair::generate();
        let address = key_pair.address();
        let public_key = key_pair.public_key();

        // scrypt runs before taking the lock
        let scalar_hex = hex::encode(key_pair.scalar_bytes());
        let crypto = keystore::encrypt(scalar_hex.as_bytes(), password, self.cost)?;

        let mut balances = Balances::new();
        balances.insert(NATIVE_CURRENCY.to_string(), initial_balance);

        let account = Account {
            address: address.clone(),
            crypto,
            balances,
            public_key: public_key_to_hex(&public_key),
        };

        {
            let _guard = self.lock.write()?;
            let key = account_key(&address);
            if self.store.get(&key)?.is_some() {
                return Err(LedgerError::Collision(address));
            }
            let data = serde_json::to_vec(&account)?;
            self.store.put(&key, &data)?;
        }

        self.cache.insert(&address, public_key)?;
        info!(address = %address, balance = %initial_balance, "account created");
        Ok((address, key_pair))
    }

    /// Decrypt and rebuild the account's private key
    pub fn get_private_key(&self, address: &str, password: &str) -> Result<KeyPair> {
        let account = self.get_account(address)?;

        let plaintext = keystore::decrypt(&account.crypto, password).map_err(|e| {
            warn!(address = %address, error = %e, "private key decryption failed");
            LedgerError::from(e)
        })?;
        let scalar_hex = String::from_utf8(plaintext)
            .map_err(|_| LedgerError::Structural("private key is not utf-8".to_string()))?;
        let scalar = hex::decode(scalar_hex.trim())
            .map_err(|e| LedgerError::Structural(format!("private key hex: {}", e)))?;
        let key_pair = KeyPair::from_scalar_bytes(&scalar)?;

        if key_pair.address() != account.address {
            return Err(LedgerError::Integrity);
        }
        Ok(key_pair)
    }

    pub fn get_account(&self, address: &str) -> Result<Account> {
        let _guard = self.lock.read()?;
        let account = self.load(address)?;
        debug!(address = %address, "account loaded");
        Ok(account)
    }

    pub fn get_balance(&self, address: &str) -> Result<Balances> {
        Ok(self.get_account(address)?.balances)
    }

    /// Overwrite the listed currencies; currencies absent from `update` keep their value.
    pub fn update_balance(&self, address: &str, update: &Balances) -> Result<()> {
        if update.values().any(|v| *v < Decimal::ZERO) {
            return Err(ValidationError::NegativeBalance.into());
        }
        self.update_with(address, |account, _| {
            balance::merge(&mut account.balances, update);
            Ok(())
        })
    }

    /// Public key for `address`, served from the cache when possible.
    pub fn get_public_key(&self, address: &str) -> Result<VerifyingKey> {
        if let Some(key) = self.cache.get(address)? {
            return Ok(key);
        }

        let account = self.get_account(address)?;
        let key = public_key_from_hex(&account.public_key)?;
        if derive_address(&key) != account.address {
            return Err(LedgerError::Integrity);
        }
        self.cache.insert(address, key.clone())?;
        debug!(address = %address, "public key cached");
        Ok(key)
    }

    pub fn all_accounts(&self) -> Result<Vec<Account>> {
        let _guard = self.lock.read()?;
        self.store
            .scan_prefix(ACCOUNT_KEY_PREFIX)?
            .into_iter()
            .map(|(_, data)| serde_json::from_slice::<Account>(&data).map_err(LedgerError::from))
            .collect()
    }

    /// Load, mutate and persist one account under the exclusive lock.
    ///
    /// `f` may queue further writes into the batch; they are committed
    /// atomically with the account record. Nothing is written if `f` fails.
    pub fn update_with<T, F>(&self, address: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Account, &mut WriteBatch) -> Result<T>,
    {
        let _guard = self.lock.write()?;
        let mut account = self.load(address)?;
        let mut batch = WriteBatch::new();
        let out = f(&mut account, &mut batch)?;
        batch.put_json(account_key(address), &account)?;
        self.store.write(batch)?;
        Ok(out)
    }

    /// Apply signed balance deltas across accounts as one unit.
    ///
    /// Deltas are applied in order against the freshly loaded records, so a
    /// debit may rely on an earlier credit. Any missing account or overdraft
    /// aborts before anything is written. `batch` is committed together with
    /// the updated accounts.
    pub fn apply_deltas(&self, deltas: &[BalanceDelta], mut batch: WriteBatch) -> Result<()> {
        let _guard = self.lock.write()?;

        let mut touched: BTreeMap<&str, Account> = BTreeMap::new();
        for delta in deltas {
            if !touched.contains_key(delta.address.as_str()) {
                let account = self.load(&delta.address)?;
                touched.insert(delta.address.as_str(), account);
            }
            if let Some(account) = touched.get_mut(delta.address.as_str()) {
                balance::apply(&mut account.balances, &delta.currency, delta.amount)?;
            }
        }

        for (address, account) in &touched {
            batch.put_json(account_key(address), account)?;
        }
        self.store.write(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::thread;

    const CHEAP: ScryptCost = ScryptCost::new(10, 8, 1);

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn new_store() -> AccountStore {
        AccountStore::new(Arc::new(MemoryStore::new()), CHEAP)
    }

    #[test]
    fn test_create_account() {
        let accounts = new_store();
        let (address, key_pair) = accounts.create_account("password2", dec("2000")).unwrap();

        assert_eq!(address, key_pair.address());
        let balances = accounts.get_balance(&address).unwrap();
        assert_eq!(balances.get("AVAF"), Some(&dec("2000")));

        let raw = accounts.store().get(&format!("account_{}", address)).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["address"], address.as_str());
        assert_eq!(json["crypto"]["kdf"], "scrypt");
        assert!(json["publicKey"].is_string());
    }

    #[test]
    fn test_get_private_key() {
        let accounts = new_store();
        let (address, key_pair) = accounts.create_account("secure_password_123", dec("1")).unwrap();

        let restored = accounts.get_private_key(&address, "secure_password_123").unwrap();
        assert_eq!(restored.scalar_bytes(), key_pair.scalar_bytes());

        let err = accounts.get_private_key(&address, "wrong_password").unwrap_err();
        assert!(matches!(err, LedgerError::Integrity));

        let missing = format!("AVAF{}", "0".repeat(38));
        let err = accounts.get_private_key(&missing, "pw").unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[test]
    fn test_update_balance_merges() {
        let accounts = new_store();
        let (address, _) = accounts.create_account("pw", dec("100")).unwrap();

        let mut update = Balances::new();
        update.insert("USD".into(), dec("7.5"));
        accounts.update_balance(&address, &update).unwrap();

        let balances = accounts.get_balance(&address).unwrap();
        assert_eq!(balances.get("AVAF"), Some(&dec("100")));
        assert_eq!(balances.get("USD"), Some(&dec("7.5")));

        update.insert("AVAF".into(), dec("-1"));
        assert!(accounts.update_balance(&address, &update).is_err());
    }

    #[test]
    fn test_public_key_cache_miss_reloads() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let writer = AccountStore::new(store.clone(), CHEAP);
        let (address, key_pair) = writer.create_account("pw", dec("0")).unwrap();

        // Separate instance with an empty cache over the same records
        let reader = AccountStore::new(store, CHEAP);
        assert!(reader.cache().is_empty());
        assert_eq!(reader.get_public_key(&address).unwrap(), key_pair.public_key());
        assert_eq!(reader.cache().len(), 1);
        assert!(writer.cache().get(&address).unwrap().is_some());
    }

    #[test]
    fn test_apply_deltas_all_or_nothing() {
        let accounts = new_store();
        let (a, _) = accounts.create_account("pw", dec("10")).unwrap();
        let (b, _) = accounts.create_account("pw", dec("0")).unwrap();

        let deltas = vec![
            BalanceDelta::debit(&a, "AVAF", dec("4")),
            BalanceDelta::credit(&b, "AVAF", dec("4")),
            BalanceDelta::debit(&a, "AVAF", dec("7")),
        ];
        let err = accounts.apply_deltas(&deltas, WriteBatch::new()).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ValidationError::InsufficientBalance { .. })));
        assert_eq!(accounts.get_balance(&a).unwrap()["AVAF"], dec("10"));
        assert_eq!(accounts.get_balance(&b).unwrap()["AVAF"], dec("0"));

        let mut batch = WriteBatch::new();
        batch.put("marker", b"1".to_vec());
        accounts.apply_deltas(&deltas[..2], batch).unwrap();
        assert_eq!(accounts.get_balance(&a).unwrap()["AVAF"], dec("6"));
        assert_eq!(accounts.get_balance(&b).unwrap()["AVAF"], dec("4"));
        assert!(accounts.store().get("marker").unwrap().is_some());
    }

    #[test]
    fn test_concurrent_updates_serialize() {
        let accounts = Arc::new(new_store());
        let (address, _) = accounts.create_account("pw", dec("0")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let accounts = accounts.clone();
                let address = address.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        accounts
                            .update_with(&address, |account, _| {
                                balance::credit(&mut account.balances, "AVAF", Decimal::ONE)?;
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(accounts.get_balance(&address).unwrap()["AVAF"], dec("200"));
    }

    #[test]
    fn test_all_accounts() {
        let accounts = new_store();
        accounts.create_account("a", dec("1")).unwrap();
        accounts.create_account("b", dec("2")).unwrap();
        assert_eq!(accounts.all_accounts().unwrap().len(), 2);
    }
}
