//! Liquidation of undercollateralized positions.

pub mod engine;

pub use engine::{LiquidationEngine, LiquidationMode, LiquidationOutcome};
