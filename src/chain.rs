use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::account::balance::BalanceDelta;
use crate::account::types::NATIVE_CURRENCY;
use crate::account::AccountStore;
use crate::block::{block_key, parse_block_key, Block, BLOCK_KEY_PREFIX};
use crate::crypto::KeyPair;
use crate::error::{LedgerError, Result, ValidationError};
use crate::storage::{get_json, KvStore, WriteBatch};
use crate::transaction::{tx_key, Transaction};

/// Default afuel charge applied by [`Ledger::create_transaction`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeSchedule {
    pub afuel_units: u64,
    pub afuel_price: Decimal,
}

impl FeeSchedule {
    pub fn fee(&self) -> Result<Decimal> {
        Decimal::from(self.afuel_units)
            .checked_mul(self.afuel_price)
            .ok_or_else(|| ValidationError::AmountOverflow.into())
    }
}

impl Default for FeeSchedule {
    /// 1000 afuel at 0.0001 AVAF
    fn default() -> Self {
        Self {
            afuel_units: 1000,
            afuel_price: Decimal::new(1, 4),
        }
    }
}

/// Hash-linked sequence of blocks, persisted as `block_<index>`.
pub struct Ledger {
    store: Arc<dyn KvStore>,
    accounts: Arc<AccountStore>,
    fees: FeeSchedule,
    chain: Mutex<Vec<Block>>,
}

impl Ledger {
    /// Start a fresh chain: write block 0. Fails if the store already holds one.
    pub fn genesis(store: Arc<dyn KvStore>, accounts: Arc<AccountStore>) -> Result<Self> {
        if store.get(&block_key(0))?.is_some() {
            return Err(LedgerError::Collision("block 0".to_string()));
        }
        let genesis = Block::genesis();
        let mut batch = WriteBatch::new();
        batch.put_json(block_key(genesis.index), &genesis)?;
        store.write(batch)?;
        info!(hash = %genesis.hash, "genesis block created");

        Ok(Self {
            store,
            accounts,
            fees: FeeSchedule::default(),
            chain: Mutex::new(vec![genesis]),
        })
    }

    /// Reload persisted blocks, or create genesis if there are none.
    pub fn open(store: Arc<dyn KvStore>, accounts: Arc<AccountStore>) -> Result<Self> {
        let blocks = load_all_blocks(store.as_ref())?;
        if blocks.is_empty() {
            return Self::genesis(store, accounts);
        }

        for (expected, block) in blocks.iter().enumerate() {
            if block.index != expected as u64 {
                return Err(LedgerError::Structural(format!(
                    "missing block {} (found {})",
                    expected, block.index
                )));
            }
        }
        if !chain_is_valid(&blocks) {
            return Err(LedgerError::Structural("persisted chain fails hash verification".to_string()));
        }

        info!(height = blocks.len() - 1, "chain reloaded");
        Ok(Self {
            store,
            accounts,
            fees: FeeSchedule::default(),
            chain: Mutex::new(blocks),
        })
    }

    pub fn with_fees(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees;
        self
    }

    pub fn accounts(&self) -> &Arc<AccountStore> {
        &self.accounts
    }

    pub fn fees(&self) -> FeeSchedule {
        self.fees
    }

    /// Validate every transaction, then commit balances, transaction records
    /// and the new block in one batch. Any failure leaves storage untouched.
    pub fn add_block(&self, transactions: Vec<Transaction>) -> Result<Block> {
        if transactions.is_empty() {
            return Err(ValidationError::EmptyBlock.into());
        }

        let mut chain = self.chain.lock()?;

        let mut seen = HashSet::new();
        let mut deltas = Vec::with_capacity(transactions.len() * 3);
        for tx in &transactions {
            self.validate_transaction(tx).map_err(|e| {
                warn!(tx = %tx.hash, error = %e, "transaction rejected");
                e
            })?;
            if !seen.insert(tx.hash.clone()) || self.store.get(&tx_key(&tx.hash))?.is_some() {
                return Err(LedgerError::Collision(format!("transaction {}", tx.hash)));
            }

            if tx.currency != NATIVE_CURRENCY {
                deltas.push(BalanceDelta::debit(&tx.sender, &tx.currency, tx.amount));
            }
            deltas.push(BalanceDelta::debit(&tx.sender, NATIVE_CURRENCY, tx.native_cost()?));
            deltas.push(BalanceDelta::credit(&tx.recipient, &tx.currency, tx.amount));
        }

        let prev = chain
            .last()
            .ok_or_else(|| LedgerError::Structural("chain has no genesis block".to_string()))?;
        let block = Block::new(prev.index + 1, transactions, prev.hash.clone());

        let mut batch = WriteBatch::new();
        for tx in &block.transactions {
            batch.put_json(tx_key(&tx.hash), tx)?;
        }
        batch.put_json(block_key(block.index), &block)?;

        self.accounts.apply_deltas(&deltas, batch)?;

        info!(
            index = block.index,
            hash = %block.hash,
            transactions = block.transactions.len(),
            "block committed"
        );
        chain.push(block.clone());
        Ok(block)
    }

    fn validate_transaction(&self, tx: &Transaction) -> Result<()> {
        tx.validate_fields()?;
        let public_key = self.accounts.get_public_key(&tx.sender)?;
        if !tx.verify(&public_key)? {
            return Err(ValidationError::BadSignature.into());
        }
        Ok(())
    }

    /// Build, sign and commit a native-currency transfer with the default fee.
    pub fn create_transaction(
        &self,
        sender: &str,
        recipient: &str,
        key_pair: &KeyPair,
        amount: Decimal,
        data: &str,
    ) -> Result<Transaction> {
        let mut tx = Transaction::new(
            sender,
            recipient,
            amount,
            self.fees.afuel_units,
            self.fees.afuel_price,
            data,
        )?;

        let available = self.accounts.get_account(sender)?.native_balance();
        let required = tx.native_cost()?;
        if available < required {
            return Err(ValidationError::InsufficientBalance {
                currency: NATIVE_CURRENCY.to_string(),
                available,
                required,
            }
            .into());
        }

        tx.sign(key_pair)?;
        if !tx.verify(&key_pair.public_key())? {
            return Err(ValidationError::BadSignature.into());
        }

        self.add_block(vec![tx.clone()])?;
        Ok(tx)
    }

    /// Every block's stored hash matches its contents and links to its predecessor.
    pub fn is_valid(&self) -> bool {
        match self.chain.lock() {
            Ok(chain) => chain_is_valid(&chain),
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.chain.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_block(&self) -> Result<Block> {
        self.chain
            .lock()?
            .last()
            .cloned()
            .ok_or_else(|| LedgerError::NotFound("blockchain is empty".to_string()))
    }

    pub fn get_block_by_index(&self, index: u64) -> Result<Block> {
        get_json(self.store.as_ref(), &block_key(index))?
            .ok_or_else(|| LedgerError::NotFound(format!("block {}", index)))
    }

    pub fn get_block_by_hash(&self, hash: &str) -> Result<Block> {
        load_all_blocks(self.store.as_ref())?
            .into_iter()
            .find(|b| b.hash == hash)
            .ok_or_else(|| LedgerError::NotFound(format!("block {}", hash)))
    }

    /// All persisted blocks, ordered by index
    pub fn get_all_blocks(&self) -> Result<Vec<Block>> {
        load_all_blocks(self.store.as_ref())
    }

    pub fn get_transaction(&self, hash: &str) -> Result<Transaction> {
        get_json(self.store.as_ref(), &tx_key(hash))?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", hash)))
    }
}

/// Highest persisted block index, if any.
pub fn last_block_index(store: &dyn KvStore) -> Result<Option<u64>> {
    let mut last = None;
    for (key, _) in store.scan_prefix(BLOCK_KEY_PREFIX)? {
        let index = parse_block_key(&key)
            .ok_or_else(|| LedgerError::Structural(format!("bad block key {}", key)))?;
        last = last.max(Some(index));
    }
    Ok(last)
}

fn load_all_blocks(store: &dyn KvStore) -> Result<Vec<Block>> {
    let mut blocks = store
        .scan_prefix(BLOCK_KEY_PREFIX)?
        .into_iter()
        .map(|(_, data)| serde_json::from_slice::<Block>(&data).map_err(LedgerError::from))
        .collect::<Result<Vec<_>>>()?;
    // keys sort lexicographically ("block_10" < "block_2")
    blocks.sort_by_key(|b| b.index);
    Ok(blocks)
}

fn chain_is_valid(blocks: &[Block]) -> bool {
    for (i, block) in blocks.iter().enumerate() {
        if block.hash != block.calculate_hash() {
            return false;
        }
        // the block hash commits to transaction hashes, not their fields
        if block.transactions.iter().any(|tx| tx.hash != tx.calculate_hash()) {
            return false;
        }
        if i > 0 && block.prev_hash != blocks[i - 1].hash {
            return false;
        }
    }
    true
}
