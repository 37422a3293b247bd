//! Protocol parameters.
//!
//! Every tunable the engines consult lives in one struct so tests can
//! shrink thresholds and fees without touching the constants module.

use serde::{Deserialize, Serialize};

use crate::utils::constants::*;

/// Protocol parameters, fixed at construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolParams {
    /// Liquidation ratio as a percentage (110 = 110%); collateral value
    /// must stay at or above debt * ratio / 100
    pub liquidation_ratio_pct: u128,

    /// Minimum debt a position may carry while it has any debt at all
    pub min_debt: u128,

    /// Liquidation fee in basis points, taken from seized collateral
    pub liquidation_fee_bps: u128,

    /// Cap on the gas-compensation slice of the liquidation fee
    pub max_gas_compensation: u128,

    /// Owner-side redemption fee in basis points (stablecoin)
    pub redemption_owner_fee_bps: u128,

    /// Redeemer-side redemption fee in basis points (collateral)
    pub redemption_redeemer_fee_bps: u128,

    /// Share of protocol fees routed to secondary stakers, in basis points;
    /// the remainder goes to the stability pool
    pub secondary_fee_share_bps: u128,

    /// Cumulative issued debt required before redemption opens
    pub bootstrap_debt_threshold: u128,

    /// Seconds after genesis before redemption opens
    pub bootstrap_window_secs: u64,

    /// Scaling-factor floor below which the stability pool starts a reset epoch
    pub min_scaling_factor: u128,

    /// Secondary-token issuance rate to stability stakers, per second
    pub sbr_rate_per_second: u128,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            liquidation_ratio_pct: LIQUIDATION_RATIO_PCT,
            min_debt: MIN_DEBT,
            liquidation_fee_bps: LIQUIDATION_FEE_BPS,
            max_gas_compensation: MAX_GAS_COMPENSATION,
            redemption_owner_fee_bps: REDEMPTION_OWNER_FEE_BPS,
            redemption_redeemer_fee_bps: REDEMPTION_REDEEMER_FEE_BPS,
            secondary_fee_share_bps: SECONDARY_FEE_SHARE_BPS,
            bootstrap_debt_threshold: BOOTSTRAP_DEBT_THRESHOLD,
            bootstrap_window_secs: BOOTSTRAP_WINDOW_SECS,
            min_scaling_factor: MIN_SCALING_FACTOR,
            sbr_rate_per_second: SBR_RATE_PER_SECOND,
        }
    }
}

impl ProtocolParams {
    /// Custom minimum debt (for testing)
    pub fn with_min_debt(mut self, min_debt: u128) -> Self {
        self.min_debt = min_debt;
        self
    }

    /// Custom bootstrap gate (for testing)
    pub fn with_bootstrap(mut self, debt_threshold: u128, window_secs: u64) -> Self {
        self.bootstrap_debt_threshold = debt_threshold;
        self.bootstrap_window_secs = window_secs;
        self
    }

    /// Custom liquidation fee (for testing)
    pub fn with_liquidation_fee(mut self, fee_bps: u128) -> Self {
        self.liquidation_fee_bps = fee_bps;
        self
    }

    /// Custom SBR issuance rate (for testing)
    pub fn with_sbr_rate(mut self, rate_per_second: u128) -> Self {
        self.sbr_rate_per_second = rate_per_second;
        self
    }

    /// Check parameters are internally consistent
    pub fn validate(&self) -> bool {
        self.liquidation_ratio_pct > RATIO_DIVISOR
            && self.liquidation_fee_bps < BPS_DIVISOR
            && self.redemption_owner_fee_bps < BPS_DIVISOR
            && self.redemption_redeemer_fee_bps < BPS_DIVISOR
            && self.secondary_fee_share_bps <= BPS_DIVISOR
            && self.min_scaling_factor > 0
            && self.min_scaling_factor < PRECISION
    }
}
