//! Persisted account record

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::balance::{self, Balances};
use super::keystore::EncryptedSecret;
use crate::crypto::Address;

/// Currency symbol (AVAF, ...)
pub type Currency = String;

/// Native currency of the ledger; fees and stakes are paid in it.
pub const NATIVE_CURRENCY: &str = "AVAF";

pub const ACCOUNT_KEY_PREFIX: &str = "account_";

pub fn account_key(address: &str) -> String {
    format!("{}{}", ACCOUNT_KEY_PREFIX, address)
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Account {
    pub address: Address,
    /// Private key scalar (hex), encrypted with the owner's password
    pub crypto: EncryptedSecret,
    pub balances: Balances,
    /// X ‖ Y coordinates (hex)
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

impl Account {
    pub fn balance(&self, currency: &str) -> Decimal {
        balance::balance_of(&self.balances, currency)
    }

    pub fn native_balance(&self) -> Decimal {
        self.balance(NATIVE_CURRENCY)
    }
}
