//! Stake bookkeeping and stake-weighted validator selection

use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use super::record::StakeRecord;
use crate::account::balance;
use crate::account::types::NATIVE_CURRENCY;
use crate::account::AccountStore;
use crate::crypto::{derive_address, Address, KeyPair};
use crate::error::{LedgerError, Result, ValidationError};
use crate::storage::KvStore;

pub const STAKE_KEY_PREFIX: &str = "stake_";

pub fn stake_key(address: &str) -> String {
    format!("{}{}", STAKE_KEY_PREFIX, address)
}

fn parse_stake(address: &str, raw: &[u8]) -> Result<Decimal> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| LedgerError::Structural(format!("stake for {} is not utf-8", address)))?;
    Decimal::from_str(text.trim())
        .map_err(|e| LedgerError::Structural(format!("stake for {}: {}", address, e)))
}

/// Persists `stake_<address>` entries and picks validators by stake weight.
pub struct StakeRegistry {
    store: Arc<dyn KvStore>,
    accounts: Arc<AccountStore>,
}

impl StakeRegistry {
    pub fn new(store: Arc<dyn KvStore>, accounts: Arc<AccountStore>) -> Self {
        Self { store, accounts }
    }

    /// Lock `amount` of the native currency from `address`.
    ///
    /// The debit and the stake entry are written in one batch under the
    /// account store's exclusive lock. Staking again replaces the previous
    /// stake amount; it does not add to it.
    pub fn stake(&self, address: &str, amount: Decimal, key_pair: &KeyPair) -> Result<StakeRecord> {
        if amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        let public_key = key_pair.public_key();

        let record = self.accounts.update_with(address, |account, batch| {
            let available = account.native_balance();
            if available < amount {
                return Err(ValidationError::InsufficientBalance {
                    currency: NATIVE_CURRENCY.to_string(),
                    available,
                    required: amount,
                }
                .into());
            }

            if derive_address(&public_key) != account.address {
                return Err(ValidationError::KeyMismatch.into());
            }

            let mut record = StakeRecord::new(address, amount);
            record.sign(key_pair)?;
            if !record.verify(&public_key)? {
                return Err(ValidationError::BadSignature.into());
            }

            balance::debit(&mut account.balances, NATIVE_CURRENCY, amount)?;
            batch.put(stake_key(address), amount.to_string().into_bytes());
            Ok(record)
        })?;

        info!(address = %address, amount = %amount, "stake recorded");
        Ok(record)
    }

    pub fn stake_of(&self, address: &str) -> Result<Decimal> {
        match self.store.get(&stake_key(address))? {
            Some(raw) => parse_stake(address, &raw),
            None => Err(LedgerError::NotFound(format!("stake for {}", address))),
        }
    }

    /// Every staking address with its stake.
    pub fn all_validators(&self) -> Result<BTreeMap<Address, Decimal>> {
        let mut validators = BTreeMap::new();
        for (key, raw) in self.store.scan_prefix(STAKE_KEY_PREFIX)? {
            let address = key.strip_prefix(STAKE_KEY_PREFIX).unwrap_or(key.as_str()).to_string();
            let stake = parse_stake(&address, &raw)?;
            validators.insert(address, stake);
        }
        if validators.is_empty() {
            return Err(LedgerError::NoValidators);
        }
        Ok(validators)
    }

    pub fn select_validator(&self) -> Result<Address> {
        self.select_validator_with(&mut rand::thread_rng())
    }

    pub fn select_validator_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Address> {
        let validators = self.all_validators()?;
        let chosen = pick_weighted(&validators, rng)?;
        info!(validator = %chosen, candidates = validators.len(), "validator selected");
        Ok(chosen)
    }
}

/// Draw one address with probability proportional to its stake.
pub fn pick_weighted<R: Rng + ?Sized>(
    validators: &BTreeMap<Address, Decimal>,
    rng: &mut R,
) -> Result<Address> {
    let mut total = Decimal::ZERO;
    for stake in validators.values().filter(|s| **s > Decimal::ZERO) {
        total = total
            .checked_add(*stake)
            .ok_or(ValidationError::AmountOverflow)?;
    }
    if total <= Decimal::ZERO {
        return Err(LedgerError::NoValidators);
    }

    let fraction = Decimal::from_f64(rng.gen::<f64>()).unwrap_or(Decimal::ZERO);
    let mut draw = fraction * total;

    let mut last_positive = None;
    for (address, stake) in validators {
        if *stake <= Decimal::ZERO {
            continue;
        }
        if draw < *stake {
            return Ok(address.clone());
        }
        draw -= *stake;
        last_positive = Some(address);
    }

    // Rounding can leave the draw at exactly `total`
    last_positive.cloned().ok_or(LedgerError::NoValidators)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::keystore::ScryptCost;
    use crate::storage::MemoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn setup() -> (Arc<dyn KvStore>, Arc<AccountStore>, StakeRegistry) {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let accounts = Arc::new(AccountStore::new(store.clone(), ScryptCost::new(10, 8, 1)));
        let registry = StakeRegistry::new(store.clone(), accounts.clone());
        (store, accounts, registry)
    }

    #[test]
    fn test_stake_sole_validator() {
        let (store, accounts, registry) = setup();
        let (address, _) = accounts.create_account("password2", dec("2000")).unwrap();
        let key_pair = accounts.get_private_key(&address, "password2").unwrap();

        let record = registry.stake(&address, dec("1000"), &key_pair).unwrap();
        assert!(record.verify(&key_pair.public_key()).unwrap());

        assert_eq!(accounts.get_balance(&address).unwrap()["AVAF"], dec("1000"));
        let validators = registry.all_validators().unwrap();
        assert_eq!(validators.len(), 1);
        assert_eq!(validators[&address], dec("1000"));
        assert_eq!(store.get(&format!("stake_{}", address)).unwrap(), Some(b"1000".to_vec()));

        for _ in 0..20 {
            assert_eq!(registry.select_validator().unwrap(), address);
        }
    }

    #[test]
    fn test_stake_overwrites() {
        let (_, accounts, registry) = setup();
        let (address, key_pair) = accounts.create_account("pw", dec("500")).unwrap();

        registry.stake(&address, dec("100"), &key_pair).unwrap();
        registry.stake(&address, dec("200"), &key_pair).unwrap();

        assert_eq!(registry.stake_of(&address).unwrap(), dec("200"));
        assert_eq!(accounts.get_balance(&address).unwrap()["AVAF"], dec("200"));
    }

    #[test]
    fn test_stake_rejections_leave_balance() {
        let (_, accounts, registry) = setup();
        let (a, ka) = accounts.create_account("pw", dec("100")).unwrap();
        let (_, kb) = accounts.create_account("pw", dec("100")).unwrap();

        let err = registry.stake(&a, dec("101"), &ka).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Validation(ValidationError::InsufficientBalance { .. })
        ));

        let err = registry.stake(&a, dec("10"), &kb).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ValidationError::KeyMismatch)));

        let err = registry.stake(&a, Decimal::ZERO, &ka).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ValidationError::NonPositiveAmount)));

        assert_eq!(accounts.get_balance(&a).unwrap()["AVAF"], dec("100"));
        assert!(matches!(registry.stake_of(&a), Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn test_no_validators() {
        let (store, _, registry) = setup();
        assert!(matches!(registry.all_validators(), Err(LedgerError::NoValidators)));
        assert!(matches!(registry.select_validator(), Err(LedgerError::NoValidators)));

        store.put(&stake_key(&format!("AVAF{}", "0".repeat(38))), b"0").unwrap();
        assert_eq!(registry.all_validators().unwrap().len(), 1);
        assert!(matches!(registry.select_validator(), Err(LedgerError::NoValidators)));
    }

    #[test]
    fn test_large_stakes() {
        let (_, accounts, registry) = setup();
        for amount in [dec("10000000000000"), dec("100000000000000000000"), Decimal::MAX] {
            let (address, key_pair) = accounts.create_account("pw", amount).unwrap();
            let record = registry.stake(&address, amount, &key_pair).unwrap();
            assert!(record.verify(&key_pair.public_key()).unwrap());
            assert_eq!(registry.stake_of(&address).unwrap(), amount);
            assert_eq!(accounts.get_balance(&address).unwrap()["AVAF"], Decimal::ZERO);
        }
    }

    #[test]
    fn test_stake_total_overflow() {
        let mut validators = BTreeMap::new();
        validators.insert("AVAFa".to_string(), Decimal::MAX);
        validators.insert("AVAFb".to_string(), Decimal::MAX);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            pick_weighted(&validators, &mut rng),
            Err(LedgerError::Validation(ValidationError::AmountOverflow))
        ));
    }

    #[test]
    fn test_corrupt_stake_entry() {
        let (store, _, registry) = setup();
        store.put("stake_AVAFbad", b"lots").unwrap();
        assert!(matches!(registry.all_validators(), Err(LedgerError::Structural(_))));
    }

    #[test]
    fn test_pick_weighted_distribution() {
        let mut validators = BTreeMap::new();
        validators.insert("AVAFa".to_string(), dec("1"));
        validators.insert("AVAFb".to_string(), dec("3"));
        validators.insert("AVAFz".to_string(), Decimal::ZERO);

        let mut rng = StdRng::seed_from_u64(7);
        let mut b_count = 0;
        for _ in 0..4000 {
            match pick_weighted(&validators, &mut rng).unwrap().as_str() {
                "AVAFb" => b_count += 1,
                "AVAFa" => {}
                other => panic!("zero-stake validator selected: {}", other),
            }
        }
        assert!((2800..3200).contains(&b_count), "b selected {} times", b_count);
    }
}
