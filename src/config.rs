use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::account::keystore::{ScryptCost, KeystoreError};
use crate::chain::FeeSchedule;
use crate::error::{LedgerError, Result};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LedgerConfig {
    pub node: NodeConfig,
    #[serde(default)]
    pub keystore: KeystoreConfig,
    #[serde(default)]
    pub fees: FeeConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeConfig {
    pub db_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// scrypt cost for newly encrypted keys. Existing records keep their own.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct KeystoreConfig {
    pub n: u64,
    pub r: u32,
    pub p: u32,
    pub dklen: usize,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        let cost = ScryptCost::default();
        Self {
            n: cost.n(),
            r: cost.r,
            p: cost.p,
            dklen: 32,
        }
    }
}

impl KeystoreConfig {
    pub fn cost(&self) -> Result<ScryptCost> {
        if self.dklen != 32 {
            return Err(LedgerError::Structural(format!(
                "keystore.dklen must be 32, got {}",
                self.dklen
            )));
        }
        ScryptCost::from_n(self.n, self.r, self.p).map_err(|e: KeystoreError| e.into())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FeeConfig {
    pub afuel_units: u64,
    pub afuel_price: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        let fees = FeeSchedule::default();
        Self {
            afuel_units: fees.afuel_units,
            afuel_price: fees.afuel_price,
        }
    }
}

impl FeeConfig {
    pub fn schedule(&self) -> FeeSchedule {
        FeeSchedule {
            afuel_units: self.afuel_units,
            afuel_price: self.afuel_price,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                db_path: "./data/avaf".to_string(),
                log_level: default_log_level(),
            },
            keystore: KeystoreConfig::default(),
            fees: FeeConfig::default(),
        }
    }
}

impl LedgerConfig {
    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| LedgerError::Structural(format!("config: {}", e)))
    }

    /// Read `path`, or write the defaults there if it does not exist.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            let s = std::fs::read_to_string(path)
                .map_err(|e| LedgerError::Io(format!("reading {}: {}", path, e)))?;
            let config = Self::from_toml(&s)?;
            info!(path = %path, "config loaded");
            Ok(config)
        } else {
            let config = Self::default();
            match toml::to_string_pretty(&config) {
                Ok(s) => {
                    if let Err(e) = std::fs::write(path, s) {
                        warn!(path = %path, error = %e, "could not write default config");
                    }
                }
                Err(e) => warn!(error = %e, "could not serialize default config"),
            }
            info!(path = %path, "config file not found, using defaults");
            Ok(config)
        }
    }
}
