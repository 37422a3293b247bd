//! Redemption of stablecoin for collateral.

pub mod engine;

pub use engine::{RedemptionEngine, RedemptionFill, RedemptionOutcome};
