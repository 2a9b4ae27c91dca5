//! Account System Module
//!
//! - Password-encrypted private keys (scrypt + AES-128-CBC keystore)
//! - Per-currency balances
//! - Public-key cache for signature checks

pub mod balance;
pub mod cache;
pub mod keystore;
pub mod store;
pub mod types;

pub use balance::{BalanceDelta, Balances};
pub use cache::PublicKeyCache;
pub use keystore::{EncryptedSecret, KeystoreError, ScryptCost};
pub use store::AccountStore;
pub use types::{Account, Currency, NATIVE_CURRENCY};
