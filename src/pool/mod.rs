//! Staking pools: the stability pool absorbing liquidations and the
//! secondary SBR pool receiving its fee share.

pub mod secondary;
pub mod stability;

pub use secondary::{SecondaryGains, SecondaryPool};
pub use stability::{StabilityPool, StakerGains};
