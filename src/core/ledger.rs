//! Position ledger with lazy cumulative-per-unit redistribution.
//!
//! The ledger stores every position plus two global accumulators,
//! `cumulative_debt_per_unit_collateral` and
//! `cumulative_collateral_per_unit_collateral`. A redistribution
//! liquidation advances the accumulators once, in O(1); each surviving
//! position pulls its share in later via `activate_pending`, using the
//! snapshot it recorded at its last sync. No state-changing event ever
//! iterates the position set.
//!
//! Global `total_collateral`/`total_debt` always include amounts that are
//! still pending in the accumulators, so the conservation property
//! "synced + pending == total" holds at all times (modulo flooring dust).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::core::position::{LiquidationSnapshot, Position, PositionId};
use crate::core::token::AccountId;
use crate::error::{Error, Result};
use crate::utils::constants::PRECISION;
use crate::utils::math::{mul_div, safe_add, safe_sub};

/// Pending redistribution amounts folded into a position on activation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingAmounts {
    /// Debt pulled in from the accumulators
    pub debt: u128,
    /// Collateral pulled in from the accumulators
    pub collateral: u128,
}

/// Per-position store plus the global redistribution accumulators
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionLedger {
    positions: HashMap<PositionId, Position>,
    /// Sum of all collateral, synced or pending
    total_collateral: u128,
    /// Sum of all debt, synced or pending
    total_debt: u128,
    /// Debt redistributed per unit of collateral, 1e18, monotonic
    cumulative_debt_per_unit_collateral: u128,
    /// Collateral redistributed per unit of collateral, 1e18, monotonic
    cumulative_collateral_per_unit_collateral: u128,
}

impl PositionLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Get a position by id
    pub fn get(&self, id: PositionId) -> Result<&Position> {
        self.positions.get(&id).ok_or(Error::PositionNotFound(id))
    }

    /// Get a mutable position by id
    pub fn get_mut(&mut self, id: PositionId) -> Result<&mut Position> {
        self.positions.get_mut(&id).ok_or(Error::PositionNotFound(id))
    }

    /// Whether a position exists
    pub fn contains(&self, id: PositionId) -> bool {
        self.positions.contains_key(&id)
    }

    /// Number of open positions
    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    /// System-wide collateral, including pending redistribution amounts
    pub fn total_collateral(&self) -> u128 {
        self.total_collateral
    }

    /// System-wide debt, including pending redistribution amounts
    pub fn total_debt(&self) -> u128 {
        self.total_debt
    }

    /// Current debt-per-unit accumulator (1e18)
    pub fn cumulative_debt_per_unit(&self) -> u128 {
        self.cumulative_debt_per_unit_collateral
    }

    /// Current collateral-per-unit accumulator (1e18)
    pub fn cumulative_collateral_per_unit(&self) -> u128 {
        self.cumulative_collateral_per_unit_collateral
    }

    /// Pending redistribution amounts a position would fold in on
    /// activation, without mutating anything
    pub fn pending_amounts(&self, id: PositionId) -> Result<PendingAmounts> {
        let position = self.get(id)?;
        Self::pending_for(position, self.cumulative_debt_per_unit_collateral,
                          self.cumulative_collateral_per_unit_collateral)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ACTIVATION / REDISTRIBUTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Fold a position's pending redistribution amounts into its own
    /// collateral/debt and advance its snapshot. Idempotent: a second
    /// consecutive call is a no-op. Must run before any read or mutation
    /// of the position's principal.
    pub fn activate_pending(&mut self, id: PositionId) -> Result<PendingAmounts> {
        let cum_debt = self.cumulative_debt_per_unit_collateral;
        let cum_coll = self.cumulative_collateral_per_unit_collateral;

        let position = self.positions.get_mut(&id).ok_or(Error::PositionNotFound(id))?;
        let pending = Self::pending_for(position, cum_debt, cum_coll)?;

        if pending.debt > 0 || pending.collateral > 0 {
            position.borrowed_amount = safe_add(position.borrowed_amount, pending.debt)?;
            position.collateral_amount = safe_add(position.collateral_amount, pending.collateral)?;
            debug!(id, debt = pending.debt, collateral = pending.collateral, "activated pending redistribution");
        }
        position.snapshot = LiquidationSnapshot {
            collateral_per_unit: cum_coll,
            debt_per_unit: cum_debt,
        };
        Ok(pending)
    }

    /// Advance the redistribution accumulators so every surviving position
    /// lazily absorbs its pro-rata share of `extra_debt`/`extra_collateral`.
    /// O(1) regardless of survivor count. `survivors_total_collateral` must
    /// exclude the liquidated position.
    pub fn distribute_to_survivors(
        &mut self,
        extra_debt: u128,
        extra_collateral: u128,
        survivors_total_collateral: u128,
    ) -> Result<()> {
        if survivors_total_collateral == 0 {
            return Err(Error::LastPosition);
        }

        let debt_per_unit = mul_div(extra_debt, PRECISION, survivors_total_collateral)?;
        let coll_per_unit = mul_div(extra_collateral, PRECISION, survivors_total_collateral)?;

        self.cumulative_debt_per_unit_collateral =
            safe_add(self.cumulative_debt_per_unit_collateral, debt_per_unit)?;
        self.cumulative_collateral_per_unit_collateral =
            safe_add(self.cumulative_collateral_per_unit_collateral, coll_per_unit)?;

        // The redistributed amounts stay in the system as pending state.
        self.total_debt = safe_add(self.total_debt, extra_debt)?;
        self.total_collateral = safe_add(self.total_collateral, extra_collateral)?;

        debug!(extra_debt, extra_collateral, survivors_total_collateral, "redistributed to survivors");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PRINCIPAL MUTATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Create a position with initial collateral and no debt. The snapshot
    /// starts at the current accumulator values so the newcomer inherits
    /// nothing from past redistributions.
    pub fn open_position(&mut self, id: PositionId, owner: AccountId, collateral: u128) -> Result<()> {
        if self.positions.contains_key(&id) {
            return Err(Error::PositionAlreadyExists(id));
        }
        let snapshot = LiquidationSnapshot {
            collateral_per_unit: self.cumulative_collateral_per_unit_collateral,
            debt_per_unit: self.cumulative_debt_per_unit_collateral,
        };
        self.positions.insert(id, Position::new(id, owner, collateral, snapshot));
        self.total_collateral = safe_add(self.total_collateral, collateral)?;
        Ok(())
    }

    /// Add collateral to an activated position
    pub fn add_collateral(&mut self, id: PositionId, amount: u128) -> Result<()> {
        let position = self.get_mut(id)?;
        position.collateral_amount = safe_add(position.collateral_amount, amount)?;
        self.total_collateral = safe_add(self.total_collateral, amount)?;
        Ok(())
    }

    /// Remove collateral from an activated position
    pub fn remove_collateral(&mut self, id: PositionId, amount: u128) -> Result<()> {
        let position = self.get_mut(id)?;
        if amount > position.collateral_amount {
            return Err(Error::InsufficientCollateral {
                required: amount,
                available: position.collateral_amount,
            });
        }
        position.collateral_amount -= amount;
        self.total_collateral = safe_sub(self.total_collateral, amount)?;
        Ok(())
    }

    /// Add debt to an activated position, tracking the lifetime total
    pub fn add_debt(&mut self, id: PositionId, amount: u128) -> Result<()> {
        let position = self.get_mut(id)?;
        position.borrowed_amount = safe_add(position.borrowed_amount, amount)?;
        position.total_borrowed_amount = safe_add(position.total_borrowed_amount, amount)?;
        self.total_debt = safe_add(self.total_debt, amount)?;
        Ok(())
    }

    /// Remove debt from an activated position
    pub fn remove_debt(&mut self, id: PositionId, amount: u128) -> Result<()> {
        let position = self.get_mut(id)?;
        if amount > position.borrowed_amount {
            return Err(Error::InvalidRepayAmount {
                amount,
                outstanding: position.borrowed_amount,
            });
        }
        position.borrowed_amount -= amount;
        self.total_debt = safe_sub(self.total_debt, amount)?;
        Ok(())
    }

    /// Drop a position entirely, deducting whatever principal it still
    /// carries from the global totals. Used by close and full liquidation.
    pub fn remove_position(&mut self, id: PositionId) -> Result<Position> {
        let position = self.positions.remove(&id).ok_or(Error::PositionNotFound(id))?;
        self.total_collateral = safe_sub(self.total_collateral, position.collateral_amount)?;
        self.total_debt = safe_sub(self.total_debt, position.borrowed_amount)?;
        Ok(position)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL
    // ═══════════════════════════════════════════════════════════════════════════

    fn pending_for(position: &Position, cum_debt: u128, cum_coll: u128) -> Result<PendingAmounts> {
        // Accumulators are monotonic, so the deltas are always >= 0.
        let debt_delta = safe_sub(cum_debt, position.snapshot.debt_per_unit)?;
        let coll_delta = safe_sub(cum_coll, position.snapshot.collateral_per_unit)?;
        Ok(PendingAmounts {
            debt: mul_div(position.collateral_amount, debt_delta, PRECISION)?,
            collateral: mul_div(position.collateral_amount, coll_delta, PRECISION)?,
        })
    }
}
