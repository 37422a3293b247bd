//! Per-position collateral/debt records.
//!
//! A position is a borrower's collateral+debt record, identified by a
//! stable id. A position with zero debt is absent from both ranking
//! indices; a position with debt appears in exactly one node of each.

use serde::{Deserialize, Serialize};

use crate::core::token::AccountId;
use crate::error::Result;
use crate::utils::constants::PRECISION;
use crate::utils::math::mul_div;

/// Stable identifier for a position. Id 0 is reserved as the index sentinel.
pub type PositionId = u64;

/// Accumulator values captured when a position last synced its pending
/// redistribution amounts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationSnapshot {
    /// cumulative collateral-per-unit-collateral at last sync (1e18)
    pub collateral_per_unit: u128,
    /// cumulative debt-per-unit-collateral at last sync (1e18)
    pub debt_per_unit: u128,
}

/// A borrower's collateral+debt record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Unique identifier
    pub id: PositionId,
    /// Owning account
    pub owner: AccountId,
    /// Collateral held, 1e18 scale
    pub collateral_amount: u128,
    /// Outstanding debt, 1e18 scale
    pub borrowed_amount: u128,
    /// Monotonic fee-rate accumulator driving redemption ranking
    pub weight: u128,
    /// Lifetime borrowed amount (never decreases)
    pub total_borrowed_amount: u128,
    /// Redistribution sync point
    pub snapshot: LiquidationSnapshot,
}

impl Position {
    /// Create a fresh position with collateral and no debt
    pub fn new(id: PositionId, owner: AccountId, collateral: u128, snapshot: LiquidationSnapshot) -> Self {
        Self {
            id,
            owner,
            collateral_amount: collateral,
            borrowed_amount: 0,
            weight: 0,
            total_borrowed_amount: 0,
            snapshot,
        }
    }

    /// Whether the position carries debt (and therefore index nodes)
    pub fn has_debt(&self) -> bool {
        self.borrowed_amount > 0
    }

    /// Liquidation-index key: borrowed * 1e18 / collateral.
    /// Higher key = riskier; the index tail is the liquidation target.
    pub fn liquidation_key(&self) -> Result<u128> {
        mul_div(self.borrowed_amount, PRECISION, self.collateral_amount)
    }

    /// Collateral value in stablecoin units at a 1e18-scaled price
    pub fn collateral_value(&self, price: u128) -> Result<u128> {
        mul_div(self.collateral_amount, price, PRECISION)
    }

    /// Whether the caller owns this position
    pub fn is_owner(&self, account: AccountId) -> bool {
        self.owner == account
    }
}
