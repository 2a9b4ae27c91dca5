use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::encoding::{CanonicalEncode, CanonicalEncoder};
use crate::transaction::Transaction;

pub const BLOCK_KEY_PREFIX: &str = "block_";

pub fn block_key(index: u64) -> String {
    format!("{}{}", BLOCK_KEY_PREFIX, index)
}

/// Parse the index out of a `block_<index>` key.
pub fn parse_block_key(key: &str) -> Option<u64> {
    key.strip_prefix(BLOCK_KEY_PREFIX)?.parse().ok()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Block {
    pub index: u64,
    pub timestamp: String,
    pub transactions: Vec<Transaction>,
    /// Empty for genesis
    pub prev_hash: String,
    pub hash: String,
}

impl CanonicalEncode for Block {
    fn canonical_encode(&self, enc: &mut CanonicalEncoder) {
        enc.u64(self.index).str(&self.timestamp);
        // Each transaction hash already commits to its fields
        enc.u64(self.transactions.len() as u64);
        for tx in &self.transactions {
            enc.str(&tx.hash).str(&tx.signature);
        }
        enc.str(&self.prev_hash);
    }
}

impl Block {
    pub fn new(index: u64, transactions: Vec<Transaction>, prev_hash: String) -> Self {
        let mut block = Block {
            index,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            transactions,
            prev_hash,
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    /// Block 0: no transactions, empty previous hash
    pub fn genesis() -> Self {
        Self::new(0, Vec::new(), String::new())
    }

    /// Calculate SHA-256 hash of block contents
    pub fn calculate_hash(&self) -> String {
        self.canonical_hash()
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}
