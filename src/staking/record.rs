use chrono::{SecondsFormat, Utc};
use p256::ecdsa::VerifyingKey;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::{verify_digest, Address, KeyPair};
use crate::encoding::{CanonicalEncode, CanonicalEncoder};
use crate::error::{LedgerError, Result};

/// Signed statement that `address` locks `amount` of the native currency.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StakeRecord {
    pub address: Address,
    pub amount: Decimal,
    pub timestamp: String,
    pub signature: String,
}

impl CanonicalEncode for StakeRecord {
    fn canonical_encode(&self, enc: &mut CanonicalEncoder) {
        enc.str(&self.address).decimal(self.amount).str(&self.timestamp);
    }
}

impl StakeRecord {
    pub fn new(address: &str, amount: Decimal) -> Self {
        Self {
            address: address.to_string(),
            amount,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            signature: String::new(),
        }
    }

    fn digest(&self) -> [u8; 32] {
        Sha256::digest(self.canonical_string().as_bytes()).into()
    }

    pub fn sign(&mut self, key_pair: &KeyPair) -> Result<()> {
        let signature = key_pair.sign_digest(&self.digest())?;
        self.signature = hex::encode(signature);
        Ok(())
    }

    pub fn verify(&self, public_key: &VerifyingKey) -> Result<bool> {
        let signature = hex::decode(&self.signature)
            .map_err(|e| LedgerError::Structural(format!("signature hex: {}", e)))?;
        verify_digest(public_key, &self.digest(), &signature)
    }
}
