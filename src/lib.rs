//! # Stable Base Protocol
//!
//! The accounting core of a collateralized-debt stablecoin: per-position
//! collateral and debt, liquidation of undercollateralized positions,
//! market-driven redemption, and staking pools — all with amortized O(1)
//! bookkeeping so no state-changing operation ever iterates every account.
//!
//! ## Architecture
//!
//! The crate is organized leaves-first:
//!
//! - **Index**: the ordered doubly linked ranking structure behind both
//!   the liquidation and the redemption queue
//! - **Core**: positions, the lazy-redistribution ledger, token ledgers
//!   and protocol parameters
//! - **Pool**: the scaling-factor stability pool and the secondary SBR
//!   staking pool
//! - **Liquidation / Redemption**: the two engines consuming the indices
//! - **Protocol**: the `Stablebase` facade sequencing every operation as
//!   activate, validate, mutate, re-index, transfer
//!
//! ## Example
//!
//! ```rust
//! use stablebase::prelude::*;
//!
//! let mut sb = Stablebase::new(ProtocolParams::default(), 0)?;
//! sb.set_price(3_300 * PRECISION);
//!
//! let alice = AccountId(1);
//! sb.credit_collateral(alice, 2 * PRECISION)?;
//! sb.open(alice, 1, 2 * PRECISION, 0)?;
//! sb.borrow(alice, 1, 5_000 * PRECISION, 0, NIL, NIL, 0)?;
//! # Ok::<(), stablebase::Error>(())
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    unused_lifetimes,
    unused_qualifications
)]

pub mod core;
pub mod error;
pub mod index;
pub mod liquidation;
pub mod oracle;
pub mod pool;
pub mod protocol;
pub mod redemption;
pub mod utils;

pub use error::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::core::{
        config::ProtocolParams,
        ledger::PositionLedger,
        position::{Position, PositionId},
        token::{AccountId, TokenLedger},
    };
    pub use crate::error::{Error, Result};
    pub use crate::index::ordered::{OrderedIndex, NIL};
    pub use crate::liquidation::engine::{LiquidationEngine, LiquidationMode};
    pub use crate::oracle::price_feed::{PriceFeed, StaticPriceFeed};
    pub use crate::pool::{secondary::SecondaryPool, stability::StabilityPool};
    pub use crate::protocol::core::Stablebase;
    pub use crate::redemption::engine::RedemptionEngine;
    pub use crate::utils::constants::PRECISION;
}

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol name
pub const PROTOCOL_NAME: &str = "Stable Base";
