//! Per-currency balance arithmetic

use rust_decimal::Decimal;
use std::collections::BTreeMap;

use super::types::Currency;
use crate::error::ValidationError;

/// Currency symbol -> amount. Amounts never go negative.
pub type Balances = BTreeMap<Currency, Decimal>;

/// Signed change to one account's balance in one currency.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceDelta {
    pub address: String,
    pub currency: Currency,
    pub amount: Decimal,
}

impl BalanceDelta {
    pub fn credit(address: &str, currency: &str, amount: Decimal) -> Self {
        Self {
            address: address.to_string(),
            currency: currency.to_string(),
            amount,
        }
    }

    pub fn debit(address: &str, currency: &str, amount: Decimal) -> Self {
        Self::credit(address, currency, -amount)
    }
}

/// Balance of `currency`, zero when absent.
pub fn balance_of(balances: &Balances, currency: &str) -> Decimal {
    balances.get(currency).copied().unwrap_or(Decimal::ZERO)
}

pub fn credit(balances: &mut Balances, currency: &str, amount: Decimal) -> Result<(), ValidationError> {
    if amount.is_zero() {
        return Ok(());
    }
    let entry = balances.entry(currency.to_string()).or_insert(Decimal::ZERO);
    *entry = entry.checked_add(amount).ok_or(ValidationError::AmountOverflow)?;
    Ok(())
}

pub fn debit(balances: &mut Balances, currency: &str, amount: Decimal) -> Result<(), ValidationError> {
    let current = balance_of(balances, currency);
    if current < amount {
        return Err(ValidationError::InsufficientBalance {
            currency: currency.to_string(),
            available: current,
            required: amount,
        });
    }
    let remaining = current.checked_sub(amount).ok_or(ValidationError::AmountOverflow)?;
    balances.insert(currency.to_string(), remaining);
    Ok(())
}

/// Apply a signed delta: positive credits, negative debits.
pub fn apply(balances: &mut Balances, currency: &str, amount: Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_negative() {
        debit(balances, currency, -amount)
    } else {
        credit(balances, currency, amount)
    }
}

/// Overwrite the currencies present in `update`; other currencies are left untouched.
pub fn merge(balances: &mut Balances, update: &Balances) {
    for (currency, amount) in update {
        balances.insert(currency.clone(), *amount);
    }
}
