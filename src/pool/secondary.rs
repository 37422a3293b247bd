//! Secondary staking pool for the SBR token.
//!
//! Stakes here are never diluted, so the classic reward-per-token scheme
//! suffices: each inflow advances a per-token accumulator and a staker's
//! gain is its stake times the accumulator delta since its snapshot.
//! The pool receives its 10% share of protocol fees in stablecoin and,
//! from liquidation fee remainders, in collateral.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::core::token::AccountId;
use crate::error::{Error, Result};
use crate::utils::constants::PRECISION;
use crate::utils::math::{mul_div, safe_add, safe_sub};

/// Gains settled for a secondary staker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecondaryGains {
    /// Stablecoin fee rewards
    pub reward: u128,
    /// Collateral from liquidation fee remainders
    pub collateral: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SecondaryStake {
    amount: u128,
    reward_snapshot: u128,
    collateral_snapshot: u128,
}

/// SBR staking pool with per-token fee accumulators
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecondaryPool {
    stakes: HashMap<AccountId, SecondaryStake>,
    total_staked: u128,
    reward_per_token: u128,
    collateral_per_token: u128,
}

impl SecondaryPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Total SBR staked
    pub fn total_staked(&self) -> u128 {
        self.total_staked
    }

    /// Number of stakers
    pub fn staker_count(&self) -> usize {
        self.stakes.len()
    }

    /// A staker's stake
    pub fn stake_of(&self, account: AccountId) -> u128 {
        self.stakes.get(&account).map(|s| s.amount).unwrap_or(0)
    }

    /// A staker's unclaimed gains
    pub fn pending_gains(&self, account: AccountId) -> Result<SecondaryGains> {
        match self.stakes.get(&account) {
            Some(stake) => self.gains_for(stake),
            None => Ok(SecondaryGains::default()),
        }
    }

    /// Add to a stake, settling prior gains for the caller to pay out
    pub fn stake(&mut self, account: AccountId, amount: u128) -> Result<SecondaryGains> {
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        let (gains, current) = self.settle(account)?;
        self.stakes.insert(account, self.fresh_stake(safe_add(current, amount)?));
        self.total_staked = safe_add(self.total_staked, amount)?;
        debug!(%account, amount, total = self.total_staked, "secondary stake");
        Ok(gains)
    }

    /// Withdraw part or all of a stake, settling gains
    pub fn unstake(&mut self, account: AccountId, amount: u128) -> Result<SecondaryGains> {
        if amount == 0 || amount > self.stake_of(account) {
            return Err(Error::InvalidUnstakeAmount);
        }
        let (gains, current) = self.settle(account)?;
        let remaining = current - amount;
        if remaining == 0 {
            self.stakes.remove(&account);
        } else {
            self.stakes.insert(account, self.fresh_stake(remaining));
        }
        self.total_staked = safe_sub(self.total_staked, amount)?;
        debug!(%account, amount, total = self.total_staked, "secondary unstake");
        Ok(gains)
    }

    /// Settle and return pending gains without touching the stake
    pub fn claim(&mut self, account: AccountId) -> Result<SecondaryGains> {
        let (gains, _) = self.settle(account)?;
        Ok(gains)
    }

    /// Distribute a stablecoin fee share. Returns false without taking it
    /// when nobody is staked.
    pub fn add_reward(&mut self, amount: u128) -> Result<bool> {
        if self.total_staked == 0 {
            return Ok(false);
        }
        self.reward_per_token = safe_add(
            self.reward_per_token,
            mul_div(amount, PRECISION, self.total_staked)?,
        )?;
        Ok(true)
    }

    /// Distribute a collateral fee share. Returns false without taking it
    /// when nobody is staked.
    pub fn add_collateral_reward(&mut self, amount: u128) -> Result<bool> {
        if self.total_staked == 0 {
            return Ok(false);
        }
        self.collateral_per_token = safe_add(
            self.collateral_per_token,
            mul_div(amount, PRECISION, self.total_staked)?,
        )?;
        Ok(true)
    }

    fn settle(&mut self, account: AccountId) -> Result<(SecondaryGains, u128)> {
        let stake = match self.stakes.get(&account) {
            Some(stake) => stake.clone(),
            None => return Ok((SecondaryGains::default(), 0)),
        };
        let gains = self.gains_for(&stake)?;
        let amount = stake.amount;
        self.stakes.insert(account, self.fresh_stake(amount));
        Ok((gains, amount))
    }

    fn gains_for(&self, stake: &SecondaryStake) -> Result<SecondaryGains> {
        Ok(SecondaryGains {
            reward: mul_div(
                stake.amount,
                safe_sub(self.reward_per_token, stake.reward_snapshot)?,
                PRECISION,
            )?,
            collateral: mul_div(
                stake.amount,
                safe_sub(self.collateral_per_token, stake.collateral_snapshot)?,
                PRECISION,
            )?,
        })
    }

    fn fresh_stake(&self, amount: u128) -> SecondaryStake {
        SecondaryStake {
            amount,
            reward_snapshot: self.reward_per_token,
            collateral_snapshot: self.collateral_per_token,
        }
    }
}
