//! Protocol constants and magic numbers.
//!
//! All protocol-wide constants are defined here for easy auditing and
//! modification. Amounts are unsigned fixed-point integers at 1e18 scale;
//! percentage parameters are integers out of 10000.

// ═══════════════════════════════════════════════════════════════════════════════
// FIXED-POINT SCALE
// ═══════════════════════════════════════════════════════════════════════════════

/// Fixed-point scale for all amounts, prices and accumulators (10^18)
pub const PRECISION: u128 = 1_000_000_000_000_000_000;

/// Basis points divisor (10000 = 100%)
pub const BPS_DIVISOR: u128 = 10_000;

// ═══════════════════════════════════════════════════════════════════════════════
// COLLATERALIZATION CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Liquidation ratio as a percentage - 110%
/// A position whose collateral value falls below 110% of its debt can be
/// liquidated, and no borrow may leave a position below it.
pub const LIQUIDATION_RATIO_PCT: u128 = 110;

/// Percentage divisor for ratio math
pub const RATIO_DIVISOR: u128 = 100;

// ═══════════════════════════════════════════════════════════════════════════════
// DEBT LIMITS
// ═══════════════════════════════════════════════════════════════════════════════

/// Minimum debt per position - 2000 SBD
pub const MIN_DEBT: u128 = 2_000 * PRECISION;

// ═══════════════════════════════════════════════════════════════════════════════
// FEE CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Liquidation fee taken from the seized collateral - 0.75% (75 bps)
pub const LIQUIDATION_FEE_BPS: u128 = 75;

/// Upper bound on the gas-compensation payment to a liquidation caller,
/// in collateral units
pub const MAX_GAS_COMPENSATION: u128 = PRECISION / 100; // 0.01 collateral

/// Owner-side redemption fee, charged in stablecoin - 0.15% (15 bps)
pub const REDEMPTION_OWNER_FEE_BPS: u128 = 15;

/// Redeemer-side redemption fee, charged in collateral - 0.15% (15 bps)
pub const REDEMPTION_REDEEMER_FEE_BPS: u128 = 15;

/// Share of protocol fees routed to secondary (SBR) stakers - 10%
pub const SECONDARY_FEE_SHARE_BPS: u128 = 1_000;

// ═══════════════════════════════════════════════════════════════════════════════
// BOOTSTRAP CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Cumulative issued debt below which redemption is disabled - 5,000,000 SBD
pub const BOOTSTRAP_DEBT_THRESHOLD: u128 = 5_000_000 * PRECISION;

/// Time window after genesis during which redemption is disabled - 30 days
pub const BOOTSTRAP_WINDOW_SECS: u64 = 30 * 24 * 3600;

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Floor for the stake scaling factor; a liquidation that would push the
/// factor below this triggers a reset epoch instead (10^9, i.e. 1e-9 of base)
pub const MIN_SCALING_FACTOR: u128 = 1_000_000_000;

/// Secondary-token issuance to stability-pool stakers, per second (1 SBR/s)
pub const SBR_RATE_PER_SECOND: u128 = PRECISION;
