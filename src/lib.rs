pub mod account;
pub mod block;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod staking;
pub mod storage;
pub mod transaction;

pub use account::AccountStore;
pub use block::Block;
pub use chain::{FeeSchedule, Ledger};
pub use config::LedgerConfig;
pub use crypto::{Address, KeyPair};
pub use error::{LedgerError, Result, ValidationError};
pub use staking::StakeRegistry;
pub use storage::{KvStore, MemoryStore, SledStore};
pub use transaction::Transaction;
