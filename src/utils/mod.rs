//! Shared utilities: constants and fixed-point math.

pub mod constants;
#[cfg(feature = "log-init")]
pub mod logging;
pub mod math;
