// Per-account asset balances with reservations

use super::ExchangeError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Funds of one owner in one asset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Free to withdraw or commit to new orders
    pub available: u64,
    /// Held by resting orders
    pub reserved: u64,
}

impl Balance {
    pub fn total(&self) -> u64 {
        self.available.saturating_add(self.reserved)
    }
}

/// Reserve-then-commit ledger: an order reserves what it could spend, and
/// a fill only ever moves reserved funds.
#[derive(Debug, Clone, Default)]
pub struct Balances {
    accounts: HashMap<(String, String), Balance>,
}

impl Balances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, owner: &str, asset: &str) -> Balance {
        self.accounts
            .get(&(owner.to_string(), asset.to_string()))
            .copied()
            .unwrap_or_default()
    }

    fn entry(&mut self, owner: &str, asset: &str) -> &mut Balance {
        self.accounts
            .entry((owner.to_string(), asset.to_string()))
            .or_default()
    }

    pub fn deposit(&mut self, owner: &str, asset: &str, amount: u64) -> Result<(), ExchangeError> {
        let balance = self.entry(owner, asset);
        balance.available = balance
            .available
            .checked_add(amount)
            .ok_or(ExchangeError::Overflow)?;
        Ok(())
    }

    /// Move `amount` from available to reserved
    pub fn reserve(&mut self, owner: &str, asset: &str, amount: u64) -> Result<(), ExchangeError> {
        let current = self.balance(owner, asset);
        if current.available < amount {
            return Err(ExchangeError::InsufficientBalance {
                owner: owner.to_string(),
                asset: asset.to_string(),
                needed: amount,
                available: current.available,
            });
        }

        let balance = self.entry(owner, asset);
        balance.available -= amount;
        balance.reserved += amount;
        Ok(())
    }

    /// Move `amount` from reserved back to available
    pub fn release(&mut self, owner: &str, asset: &str, amount: u64) {
        let balance = self.entry(owner, asset);
        debug_assert!(balance.reserved >= amount, "release exceeds reservation");
        let amount = amount.min(balance.reserved);
        balance.reserved -= amount;
        balance.available += amount;
    }

    /// Pay `amount` out of `from`'s reservation into `to`'s available funds
    pub fn transfer_reserved(
        &mut self,
        from: &str,
        to: &str,
        asset: &str,
        amount: u64,
    ) -> Result<(), ExchangeError> {
        let payer = self.entry(from, asset);
        debug_assert!(payer.reserved >= amount, "transfer exceeds reservation");
        payer.reserved = payer.reserved.saturating_sub(amount);

        let payee = self.entry(to, asset);
        payee.available = payee
            .available
            .checked_add(amount)
            .ok_or(ExchangeError::Overflow)?;
        Ok(())
    }
}
