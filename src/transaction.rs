use chrono::{SecondsFormat, Utc};
use p256::ecdsa::VerifyingKey;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::types::{Currency, NATIVE_CURRENCY};
use crate::crypto::{validate_address, verify_digest, Address, KeyPair, SIGNATURE_LEN};
use crate::encoding::{CanonicalEncode, CanonicalEncoder};
use crate::error::{LedgerError, Result, ValidationError};

pub const TX_KEY_PREFIX: &str = "tx_";

pub fn tx_key(hash: &str) -> String {
    format!("{}{}", TX_KEY_PREFIX, hash)
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Transfer,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Transfer => "transfer",
        }
    }
}

/// A signed value transfer.
///
/// `hash` covers every field except `hash` and `signature`; it is fixed at
/// construction and the signature is added afterwards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Transaction {
    pub hash: String,
    pub kind: TxKind,
    pub sender: Address,
    pub recipient: Address,
    pub currency: Currency,
    pub amount: Decimal,
    /// Afuel units consumed
    pub fee_units: u64,
    /// Price of one afuel unit, in the native currency
    pub fee_price: Decimal,
    pub data: String,
    /// Hex r ‖ s, empty until signed
    pub signature: String,
    pub timestamp: String,
}

impl CanonicalEncode for Transaction {
    fn canonical_encode(&self, enc: &mut CanonicalEncoder) {
        enc.str(self.kind.as_str())
            .str(&self.sender)
            .str(&self.recipient)
            .str(&self.currency)
            .decimal(self.amount)
            .u64(self.fee_units)
            .decimal(self.fee_price)
            .str(&self.data)
            .str(&self.timestamp);
    }
}

impl Transaction {
    /// Native-currency transfer
    pub fn new(
        sender: &str,
        recipient: &str,
        amount: Decimal,
        fee_units: u64,
        fee_price: Decimal,
        data: &str,
    ) -> Result<Self> {
        Self::with_currency(sender, recipient, NATIVE_CURRENCY, amount, fee_units, fee_price, data)
    }

    pub fn with_currency(
        sender: &str,
        recipient: &str,
        currency: &str,
        amount: Decimal,
        fee_units: u64,
        fee_price: Decimal,
        data: &str,
    ) -> Result<Self> {
        if sender == recipient {
            return Err(ValidationError::SelfTransfer.into());
        }
        if amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        if fee_price < Decimal::ZERO {
            return Err(ValidationError::NegativeBalance.into());
        }

        let mut tx = Transaction {
            hash: String::new(),
            kind: TxKind::Transfer,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            currency: currency.to_string(),
            amount,
            fee_units,
            fee_price,
            data: data.to_string(),
            signature: String::new(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        };
        tx.native_cost()?;
        tx.hash = tx.calculate_hash();
        Ok(tx)
    }

    /// Hex SHA-256 of the canonical encoding
    pub fn calculate_hash(&self) -> String {
        self.canonical_hash()
    }

    /// afuel units × afuel price
    pub fn fee(&self) -> Result<Decimal> {
        Decimal::from(self.fee_units)
            .checked_mul(self.fee_price)
            .ok_or_else(|| ValidationError::AmountOverflow.into())
    }

    /// Amount plus fee, for transfers in the native currency.
    pub fn native_cost(&self) -> Result<Decimal> {
        let fee = self.fee()?;
        if self.currency != NATIVE_CURRENCY {
            return Ok(fee);
        }
        self.amount
            .checked_add(fee)
            .ok_or_else(|| ValidationError::AmountOverflow.into())
    }

    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// Sign the stored hash
    pub fn sign(&mut self, key_pair: &KeyPair) -> Result<()> {
        let digest = hex::decode(&self.hash)
            .map_err(|e| LedgerError::Structural(format!("transaction hash: {}", e)))?;
        let signature = key_pair.sign_digest(&digest)?;
        self.signature = hex::encode(signature);
        Ok(())
    }

    /// Recompute the hash, compare it with the stored one, then check the
    /// signature against it.
    pub fn verify(&self, public_key: &VerifyingKey) -> Result<bool> {
        let signature = hex::decode(&self.signature)
            .map_err(|e| LedgerError::Structural(format!("signature hex: {}", e)))?;
        if signature.len() != SIGNATURE_LEN {
            return Err(LedgerError::Structural(format!(
                "invalid signature length: {} (expected {})",
                signature.len(),
                SIGNATURE_LEN
            )));
        }
        let recomputed = self.calculate_hash();
        if recomputed != self.hash {
            return Ok(false);
        }
        let digest = hex::decode(&recomputed)
            .map_err(|e| LedgerError::Structural(format!("transaction hash: {}", e)))?;
        verify_digest(public_key, &digest, &signature)
    }

    /// Field checks for a transaction that was not built locally.
    pub fn validate_fields(&self) -> Result<()> {
        for address in [&self.sender, &self.recipient] {
            if !validate_address(address) {
                return Err(ValidationError::InvalidAddress(address.clone()).into());
            }
        }
        if self.sender == self.recipient {
            return Err(ValidationError::SelfTransfer.into());
        }
        if self.amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        if self.fee_price < Decimal::ZERO {
            return Err(ValidationError::NegativeBalance.into());
        }
        self.native_cost()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn sample(sender: &KeyPair, recipient: &KeyPair) -> Transaction {
        Transaction::new(
            &sender.address(),
            &recipient.address(),
            dec("50"),
            1000,
            dec("0.0001"),
            "test",
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_bad_construction() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();

        let err = Transaction::new(&a.address(), &b.address(), Decimal::ZERO, 1000, dec("0.0001"), "")
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ValidationError::NonPositiveAmount)));

        let err = Transaction::new(&a.address(), &a.address(), dec("1"), 1000, dec("0.0001"), "")
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ValidationError::SelfTransfer)));
    }

    #[test]
    fn test_hash_deterministic() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let mut tx = sample(&a, &b);
        let original = tx.hash.clone();
        assert_eq!(original, tx.calculate_hash());

        // hash and signature are outside the preimage
        tx.sign(&a).unwrap();
        tx.hash = "ff".to_string();
        assert_eq!(tx.calculate_hash(), original);
    }

    #[test]
    fn test_hash_changes_with_each_field() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let base = sample(&a, &b);
        let h = base.calculate_hash();

        let mutations: Vec<Box<dyn Fn(&mut Transaction)>> = vec![
            Box::new(|t: &mut Transaction| t.sender = KeyPair::generate().address()),
            Box::new(|t: &mut Transaction| t.recipient = KeyPair::generate().address()),
            Box::new(|t: &mut Transaction| t.currency = "USD".into()),
            Box::new(|t: &mut Transaction| t.amount += Decimal::ONE),
            Box::new(|t: &mut Transaction| t.fee_units += 1),
            Box::new(|t: &mut Transaction| t.fee_price = dec("0.0002")),
            Box::new(|t: &mut Transaction| t.data.push('!')),
            Box::new(|t: &mut Transaction| t.timestamp = "1970-01-01T00:00:00Z".into()),
        ];
        for mutate in mutations {
            let mut tx = base.clone();
            mutate(&mut tx);
            assert_ne!(tx.calculate_hash(), h);
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let mut tx = sample(&a, &b);
        tx.sign(&a).unwrap();

        assert!(tx.is_signed());
        assert_eq!(hex::decode(&tx.signature).unwrap().len(), 64);
        assert!(tx.verify(&a.public_key()).unwrap());
        assert!(!tx.verify(&b.public_key()).unwrap());
    }

    #[test]
    fn test_flipped_signature_byte_fails() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let mut tx = sample(&a, &b);
        tx.sign(&a).unwrap();

        let sig = hex::decode(&tx.signature).unwrap();
        for i in 0..sig.len() {
            let mut bad = sig.clone();
            bad[i] ^= 0x01;
            let mut forged = tx.clone();
            forged.signature = hex::encode(bad);
            assert!(!matches!(forged.verify(&a.public_key()), Ok(true)));
        }
    }

    #[test]
    fn test_wrong_signature_length_is_structural() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let mut tx = sample(&a, &b);
        tx.sign(&a).unwrap();
        tx.signature.truncate(126);
        assert!(matches!(tx.verify(&a.public_key()), Err(LedgerError::Structural(_))));
    }

    #[test]
    fn test_length_checked_before_hash() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let mut tx = sample(&a, &b);
        tx.sign(&a).unwrap();
        tx.amount = dec("5000");
        tx.signature.truncate(126);
        assert!(matches!(tx.verify(&a.public_key()), Err(LedgerError::Structural(_))));
    }

    #[test]
    fn test_large_amounts_hash() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        for amount in [dec("10000000000000"), dec("100000000000000000000")] {
            let mut tx = Transaction::new(&a.address(), &b.address(), amount, 1000, dec("0.0001"), "")
                .unwrap();
            tx.sign(&a).unwrap();
            assert!(tx.verify(&a.public_key()).unwrap());
        }
    }

    #[test]
    fn test_fee_overflow_rejected() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let err = Transaction::new(&a.address(), &b.address(), Decimal::ONE, u64::MAX, dec("10000000000"), "")
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ValidationError::AmountOverflow)));

        let err = Transaction::new(&a.address(), &b.address(), Decimal::MAX, 1000, Decimal::ONE, "")
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ValidationError::AmountOverflow)));

        let mut tx = sample(&a, &b);
        tx.fee_units = u64::MAX;
        tx.fee_price = dec("10000000000");
        assert!(matches!(
            tx.validate_fields(),
            Err(LedgerError::Validation(ValidationError::AmountOverflow))
        ));
    }

    #[test]
    fn test_tampered_field_fails_verify() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let mut tx = sample(&a, &b);
        tx.sign(&a).unwrap();
        tx.amount = dec("5000");
        assert!(!tx.verify(&a.public_key()).unwrap());
    }

    #[test]
    fn test_fee_and_fields() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let tx = sample(&a, &b);
        assert_eq!(tx.fee().unwrap(), dec("0.1"));
        assert_eq!(tx.native_cost().unwrap(), dec("50.1"));
        assert_eq!(tx.kind, TxKind::Transfer);
        assert!(tx.validate_fields().is_ok());

        let mut bad = tx;
        bad.recipient = "nope".into();
        assert!(matches!(
            bad.validate_fields(),
            Err(LedgerError::Validation(ValidationError::InvalidAddress(_)))
        ));
    }
}
