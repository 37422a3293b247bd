//! Collateral price sources.
//!
//! The engines only need a spot price in stablecoin units per collateral
//! unit, 1e18-scaled. The trait keeps the accounting core decoupled from
//! whatever feed backs it; `StaticPriceFeed` is the in-process
//! implementation used by tests and simulations.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::constants::PRECISION;

/// Source of the collateral spot price
pub trait PriceFeed {
    /// Current price in stablecoin units per collateral unit, 1e18-scaled
    fn price(&self) -> Result<u128>;
}

/// A settable fixed price
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticPriceFeed {
    price: u128,
}

impl StaticPriceFeed {
    /// Create a feed at an initial price
    pub fn new(price: u128) -> Self {
        Self { price }
    }

    /// Move the price
    pub fn set_price(&mut self, price: u128) {
        self.price = price;
    }
}

impl Default for StaticPriceFeed {
    fn default() -> Self {
        Self::new(PRECISION)
    }
}

impl PriceFeed for StaticPriceFeed {
    fn price(&self) -> Result<u128> {
        if self.price == 0 {
            return Err(Error::PriceUnavailable("price is zero".into()));
        }
        Ok(self.price)
    }
}
