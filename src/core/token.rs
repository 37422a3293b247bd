//! In-process token ledgers.
//!
//! The protocol moves three fungible assets around: the stablecoin it
//! issues, the collateral asset backing it, and the secondary staking
//! token. All three share one ledger shape: a balance map with checked
//! mint/burn/transfer and a tracked total supply.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::utils::math::{safe_add, safe_sub};

// ═══════════════════════════════════════════════════════════════════════════════
// ACCOUNT ID
// ═══════════════════════════════════════════════════════════════════════════════

/// Opaque account identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u64);

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "account:{}", self.0)
    }
}

/// Reserved account that pools book protocol-held funds under
pub const PROTOCOL_ACCOUNT: AccountId = AccountId(u64::MAX);

// ═══════════════════════════════════════════════════════════════════════════════
// TOKEN LEDGER
// ═══════════════════════════════════════════════════════════════════════════════

/// Balance map with checked supply accounting. Amounts are 1e18-scaled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenLedger {
    /// Token symbol, for logs and display only
    pub symbol: String,
    total_supply: u128,
    balances: HashMap<AccountId, u128>,
}

impl TokenLedger {
    /// Create an empty ledger for a symbol
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            total_supply: 0,
            balances: HashMap::new(),
        }
    }

    /// Total supply across all holders
    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    /// Balance of an account, zero when unknown
    pub fn balance_of(&self, account: AccountId) -> u128 {
        self.balances.get(&account).copied().unwrap_or(0)
    }

    /// Number of accounts with a non-zero balance
    pub fn holder_count(&self) -> usize {
        self.balances.len()
    }

    /// Create `amount` new units in `to`'s balance
    pub fn mint(&mut self, to: AccountId, amount: u128) -> Result<()> {
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        let new_supply = safe_add(self.total_supply, amount)?;
        let new_balance = safe_add(self.balance_of(to), amount)?;
        self.balances.insert(to, new_balance);
        self.total_supply = new_supply;
        Ok(())
    }

    /// Destroy `amount` units from `from`'s balance
    pub fn burn(&mut self, from: AccountId, amount: u128) -> Result<()> {
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        let balance = self.balance_of(from);
        if balance < amount {
            return Err(Error::InsufficientBalance {
                required: amount,
                available: balance,
            });
        }
        self.set_balance(from, balance - amount);
        self.total_supply = safe_sub(self.total_supply, amount)?;
        Ok(())
    }

    /// Move `amount` units between accounts. Self-transfer is a no-op.
    pub fn transfer(&mut self, from: AccountId, to: AccountId, amount: u128) -> Result<()> {
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        if from == to {
            return Ok(());
        }
        let from_balance = self.balance_of(from);
        if from_balance < amount {
            return Err(Error::InsufficientBalance {
                required: amount,
                available: from_balance,
            });
        }
        let to_balance = safe_add(self.balance_of(to), amount)?;
        self.set_balance(from, from_balance - amount);
        self.balances.insert(to, to_balance);
        Ok(())
    }

    /// Supply invariant: total supply equals the sum of all balances
    pub fn verify_supply_invariant(&self) -> bool {
        let mut sum = 0u128;
        for balance in self.balances.values() {
            match sum.checked_add(*balance) {
                Some(next) => sum = next,
                None => return false,
            }
        }
        sum == self.total_supply
    }

    fn set_balance(&mut self, account: AccountId, balance: u128) {
        if balance == 0 {
            self.balances.remove(&account);
        } else {
            self.balances.insert(account, balance);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::PRECISION;

    #[test]
    fn test_mint_and_burn() {
        let mut ledger = TokenLedger::new("SBD");
        ledger.mint(AccountId(1), 1_000 * PRECISION).unwrap();
        assert_eq!(ledger.balance_of(AccountId(1)), 1_000 * PRECISION);
        assert_eq!(ledger.total_supply(), 1_000 * PRECISION);

        ledger.burn(AccountId(1), 400 * PRECISION).unwrap();
        assert_eq!(ledger.balance_of(AccountId(1)), 600 * PRECISION);
        assert_eq!(ledger.total_supply(), 600 * PRECISION);
    }

    #[test]
    fn test_burn_more_than_balance_fails() {
        let mut ledger = TokenLedger::new("SBD");
        ledger.mint(AccountId(1), 100).unwrap();
        let result = ledger.burn(AccountId(1), 200);
        assert!(matches!(result, Err(Error::InsufficientBalance { .. })));
    }

    #[test]
    fn test_transfer_preserves_supply() {
        let mut ledger = TokenLedger::new("SBD");
        ledger.mint(AccountId(1), 1_000).unwrap();
        ledger.transfer(AccountId(1), AccountId(2), 300).unwrap();
        assert_eq!(ledger.balance_of(AccountId(1)), 700);
        assert_eq!(ledger.balance_of(AccountId(2)), 300);
        assert_eq!(ledger.total_supply(), 1_000);
        assert!(ledger.verify_supply_invariant());
    }

    #[test]
    fn test_zero_amount_rejected() {
        let mut ledger = TokenLedger::new("SBD");
        assert_eq!(ledger.mint(AccountId(1), 0), Err(Error::ZeroAmount));
        assert_eq!(ledger.burn(AccountId(1), 0), Err(Error::ZeroAmount));
        assert_eq!(ledger.transfer(AccountId(1), AccountId(2), 0), Err(Error::ZeroAmount));
    }

    #[test]
    fn test_emptied_account_drops_out() {
        let mut ledger = TokenLedger::new("SBD");
        ledger.mint(AccountId(1), 100).unwrap();
        assert_eq!(ledger.holder_count(), 1);
        ledger.burn(AccountId(1), 100).unwrap();
        assert_eq!(ledger.holder_count(), 0);
    }
}
