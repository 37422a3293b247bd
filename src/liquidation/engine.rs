//! Liquidation engine.
//!
//! The liquidation target is always the tail of the liquidation index,
//! the position with the highest debt-to-collateral ratio. Two paths
//! cover the debt:
//! - absorption: the stability pool's live stake covers the debt, so the
//!   pool burns that much stablecoin and receives the seized collateral
//!   net of the liquidation fee;
//! - redistribution: the pool cannot cover it, so the debt and net
//!   collateral are spread across every surviving position through the
//!   ledger's lazy accumulators.
//!
//! A liquidation fee is carved out of the seized collateral. Up to
//! `max_gas_compensation` of it pays the caller; the engine reports the
//! remainder so the caller of this module can route it to secondary
//! stakers or refund it.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::config::ProtocolParams;
use crate::core::ledger::PositionLedger;
use crate::core::position::PositionId;
use crate::core::token::AccountId;
use crate::error::{Error, Result};
use crate::index::ordered::{OrderedIndex, NIL};
use crate::pool::stability::StabilityPool;
use crate::utils::constants::{BPS_DIVISOR, RATIO_DIVISOR};
use crate::utils::math::{mul_div, safe_add, safe_sub};

// ═══════════════════════════════════════════════════════════════════════════════
// OUTCOME
// ═══════════════════════════════════════════════════════════════════════════════

/// How a liquidation's debt was covered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationMode {
    /// Stability pool burned the debt and took the net collateral
    Absorbed,
    /// Debt and net collateral were spread across surviving positions
    Redistributed,
}

/// Result of one executed liquidation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationOutcome {
    /// Liquidated position
    pub position_id: PositionId,
    /// Its owner
    pub owner: AccountId,
    /// Debt covered
    pub debt: u128,
    /// Collateral seized (gross)
    pub collateral: u128,
    /// Liquidation fee carved from the collateral
    pub fee: u128,
    /// Fee slice paid to the caller as gas compensation
    pub gas_compensation: u128,
    /// Fee slice left over after gas compensation, in collateral
    pub fee_remainder: u128,
    /// Price the ratio was checked at
    pub price: u128,
    /// Path taken
    pub mode: LiquidationMode,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Executes liquidations and keeps lifetime counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiquidationEngine {
    /// Liquidations executed
    pub total_liquidations: u64,
    /// Of which absorbed by the stability pool
    pub total_absorbed: u64,
    /// Of which redistributed
    pub total_redistributed: u64,
    /// Lifetime debt covered
    pub total_debt_liquidated: u128,
    /// Lifetime collateral seized
    pub total_collateral_seized: u128,
}

impl LiquidationEngine {
    /// Create a fresh engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a position is below the liquidation ratio at `price`
    pub fn is_liquidatable(
        ledger: &PositionLedger,
        id: PositionId,
        price: u128,
        params: &ProtocolParams,
    ) -> Result<bool> {
        let position = ledger.get(id)?;
        let value = position.collateral_value(price)?;
        let required = mul_div(position.borrowed_amount, params.liquidation_ratio_pct, RATIO_DIVISOR)?;
        Ok(value < required)
    }

    /// Liquidate the riskiest position (the liquidation index tail).
    ///
    /// Mutates ledger, indices and stability pool; token movement and fee
    /// routing stay with the caller, driven by the returned outcome.
    #[allow(clippy::too_many_arguments)]
    pub fn liquidate(
        &mut self,
        ledger: &mut PositionLedger,
        liquidation_index: &mut OrderedIndex,
        redemption_index: &mut OrderedIndex,
        stability_pool: &mut StabilityPool,
        params: &ProtocolParams,
        price: u128,
        now: u64,
    ) -> Result<LiquidationOutcome> {
        let target = liquidation_index.tail();
        if target == NIL {
            return Err(Error::NoActivePositions);
        }

        ledger.activate_pending(target)?;

        if !Self::is_liquidatable(ledger, target, price, params)? {
            return Err(Error::CannotLiquidateYet);
        }
        if ledger.position_count() == 1 {
            return Err(Error::LastPosition);
        }

        let (owner, debt, collateral) = {
            let position = ledger.get(target)?;
            (position.owner, position.borrowed_amount, position.collateral_amount)
        };

        let fee = mul_div(collateral, params.liquidation_fee_bps, BPS_DIVISOR)?;
        let gas_compensation = fee.min(params.max_gas_compensation);
        let fee_remainder = fee - gas_compensation;
        let net_collateral = safe_sub(collateral, fee)?;

        let mode = if stability_pool.total_staked() >= debt {
            stability_pool.absorb_liquidation(debt, net_collateral, now)?;
            LiquidationMode::Absorbed
        } else {
            LiquidationMode::Redistributed
        };

        // The liquidated position leaves the books before redistribution
        // re-adds its debt and net collateral as pending state.
        ledger.remove_position(target)?;
        liquidation_index.remove(target)?;
        redemption_index.remove(target)?;

        if mode == LiquidationMode::Redistributed {
            ledger.distribute_to_survivors(debt, net_collateral, ledger.total_collateral())?;
        }

        self.total_liquidations += 1;
        match mode {
            LiquidationMode::Absorbed => self.total_absorbed += 1,
            LiquidationMode::Redistributed => self.total_redistributed += 1,
        }
        self.total_debt_liquidated = safe_add(self.total_debt_liquidated, debt)?;
        self.total_collateral_seized = safe_add(self.total_collateral_seized, collateral)?;

        info!(position = target, debt, collateral, ?mode, "position liquidated");

        Ok(LiquidationOutcome {
            position_id: target,
            owner,
            debt,
            collateral,
            fee,
            gas_compensation,
            fee_remainder,
            price,
            mode,
        })
    }
}
