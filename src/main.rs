use std::process;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use avaf_ledger::{
    AccountStore, KvStore, Ledger, LedgerConfig, Result, SledStore, StakeRegistry,
};

const CONFIG_PATH: &str = "avaf.toml";

fn main() {
    let config = match LedgerConfig::load_or_default(CONFIG_PATH) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load {}: {}", CONFIG_PATH, e);
            process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.node.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(e) = run(&config) {
        error!(error = %e, "avaf-ledger failed");
        process::exit(1);
    }
}

fn run(config: &LedgerConfig) -> Result<()> {
    let sled = Arc::new(SledStore::open(&config.node.db_path)?);
    let store: Arc<dyn KvStore> = sled.clone();

    let accounts = Arc::new(AccountStore::new(store.clone(), config.keystore.cost()?));
    let ledger = Ledger::open(store.clone(), accounts.clone())?.with_fees(config.fees.schedule());
    let registry = StakeRegistry::new(store.clone(), accounts.clone());
    info!(db = %config.node.db_path, height = ledger.len() - 1, "ledger ready");

    let (address, _) = accounts.create_account("password2", Decimal::from(2000))?;
    let key_pair = accounts.get_private_key(&address, "password2")?;

    registry.stake(&address, Decimal::from(1000), &key_pair)?;
    let balances = accounts.get_balance(&address)?;
    for (currency, amount) in &balances {
        info!(address = %address, currency = %currency, amount = %amount, "balance");
    }

    let validator = registry.select_validator()?;
    info!(validator = %validator, "selected validator");

    let (recipient, _) = accounts.create_account("password3", Decimal::ZERO)?;
    let tx = ledger.create_transaction(&address, &recipient, &key_pair, Decimal::from(100), "demo transfer")?;
    let block = ledger.current_block()?;
    info!(tx = %tx.hash, block = block.index, valid = ledger.is_valid(), "transfer committed");

    sled.flush()?;
    Ok(())
}
