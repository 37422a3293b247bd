//! Stability pool: stablecoin stakes absorbing liquidated debt.
//!
//! Stakes are diluted by liquidations through one multiplicative scaling
//! factor instead of per-staker writes. A stake is stored raw together
//! with the scaling factor at its last re-snapshot; its live value is
//! `raw * scaling_factor / scaling_snapshot`. A liquidation of debt Q
//! against total stake T multiplies the factor by (T - Q) / T once, in
//! O(1).
//!
//! Rewards (stablecoin fees, seized collateral, SBR issuance) use
//! per-token accumulators normalized by the scaling factor:
//! an inflow X advances its accumulator by `X * scaling_factor / T`, and
//! a staker's gain is `raw * delta / scaling_snapshot`, which works out
//! to exactly the staker's live share of X.
//!
//! Repeated dilution drives the factor toward zero. When a liquidation
//! would push it below the floor, the pool records a reset snapshot
//! (the sub-floor factor plus the accumulator values at that moment),
//! bumps the reset count and restarts the factor at the base unit.
//! Stakers who slept through resets fold each recorded epoch into their
//! raw stake the next time they are touched.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::core::token::AccountId;
use crate::error::{Error, Result};
use crate::utils::constants::PRECISION;
use crate::utils::math::{mul_div, safe_add, safe_mul, safe_sub};

// ═══════════════════════════════════════════════════════════════════════════════
// TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Gains settled for a staker, to be paid out by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StakerGains {
    /// Stablecoin fee rewards
    pub reward: u128,
    /// Collateral seized by liquidations and redemption fees
    pub collateral: u128,
    /// Issued secondary tokens
    pub sbr: u128,
}

impl StakerGains {
    fn accrue(&mut self, other: StakerGains) -> Result<()> {
        self.reward = safe_add(self.reward, other.reward)?;
        self.collateral = safe_add(self.collateral, other.collateral)?;
        self.sbr = safe_add(self.sbr, other.sbr)?;
        Ok(())
    }
}

/// A staker's raw stake plus the snapshots it was last settled against
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Stake {
    /// Stake in raw units of its snapshot scale
    raw: u128,
    /// Reset epoch the snapshots belong to
    reset_count: u64,
    /// Scaling factor at the last re-snapshot
    scaling_snapshot: u128,
    reward_snapshot: u128,
    collateral_snapshot: u128,
    sbr_snapshot: u128,
}

/// Accumulator values frozen when a reset epoch ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct ResetSnapshot {
    /// The sub-floor scaling factor the epoch ended at
    scaling_factor: u128,
    reward_per_token: u128,
    collateral_per_token: u128,
    sbr_per_token: u128,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// Scaling-factor stability pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityPool {
    stakes: HashMap<AccountId, Stake>,
    /// Live total stake (raw stakes evaluated at the current factor)
    total_staked: u128,
    /// Multiplicative dilution factor, 1e18 at epoch start
    scaling_factor: u128,
    /// Number of completed reset epochs
    reset_count: u64,
    /// One frozen snapshot per completed epoch
    reset_snapshots: Vec<ResetSnapshot>,
    reward_per_token: u128,
    collateral_per_token: u128,
    sbr_per_token: u128,
    /// Scaling-factor floor that triggers a reset
    min_scaling_factor: u128,
    /// SBR issuance per second, zero disables issuance
    sbr_rate_per_second: u128,
    /// Timestamp SBR accrual last ran at
    sbr_last_time: u64,
}

impl StabilityPool {
    /// Create an empty pool
    pub fn new(min_scaling_factor: u128, sbr_rate_per_second: u128) -> Self {
        Self {
            stakes: HashMap::new(),
            total_staked: 0,
            scaling_factor: PRECISION,
            reset_count: 0,
            reset_snapshots: Vec::new(),
            reward_per_token: 0,
            collateral_per_token: 0,
            sbr_per_token: 0,
            min_scaling_factor,
            sbr_rate_per_second,
            sbr_last_time: 0,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Live total stake
    pub fn total_staked(&self) -> u128 {
        self.total_staked
    }

    /// Number of stake records (sleeping stakers included)
    pub fn staker_count(&self) -> usize {
        self.stakes.len()
    }

    /// Current scaling factor
    pub fn scaling_factor(&self) -> u128 {
        self.scaling_factor
    }

    /// Completed reset epochs
    pub fn reset_count(&self) -> u64 {
        self.reset_count
    }

    /// A staker's live stake, folding sleeping epochs without mutating
    pub fn stake_of(&self, account: AccountId) -> Result<u128> {
        let stake = match self.stakes.get(&account) {
            Some(stake) => stake,
            None => return Ok(0),
        };
        let (raw, scaling_snapshot) = self.folded_raw(stake)?;
        mul_div(raw, self.scaling_factor, scaling_snapshot)
    }

    /// A staker's unclaimed gains, folding sleeping epochs without mutating
    pub fn pending_gains(&self, account: AccountId) -> Result<StakerGains> {
        let stake = match self.stakes.get(&account) {
            Some(stake) => stake.clone(),
            None => return Ok(StakerGains::default()),
        };
        let mut shadow = stake;
        self.settle_epochs_and_gains(&mut shadow)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STAKER OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Add `amount` to a stake. Returns the gains settled on the way in;
    /// the caller pays them out after committing pool state.
    pub fn stake(&mut self, account: AccountId, amount: u128, now: u64) -> Result<StakerGains> {
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        self.accrue_sbr(now)?;

        let (gains, live) = self.settle(account)?;
        let new_live = safe_add(live, amount)?;
        self.stakes.insert(account, self.fresh_stake(new_live));
        self.total_staked = safe_add(self.total_staked, amount)?;

        debug!(%account, amount, total = self.total_staked, "stability stake");
        Ok(gains)
    }

    /// Withdraw `amount` of a live stake. Zero and over-stake withdrawals
    /// are rejected. Returns the settled gains.
    pub fn unstake(&mut self, account: AccountId, amount: u128, now: u64) -> Result<StakerGains> {
        self.accrue_sbr(now)?;

        // Validate against the live stake before settling so a rejected
        // withdrawal leaves snapshots (and unpaid gains) untouched.
        if amount == 0 || amount > self.stake_of(account)? {
            return Err(Error::InvalidUnstakeAmount);
        }

        let (gains, live) = self.settle(account)?;
        let remaining = live - amount;
        if remaining == 0 {
            self.stakes.remove(&account);
        } else {
            self.stakes.insert(account, self.fresh_stake(remaining));
        }
        self.total_staked = safe_sub(self.total_staked, amount)?;

        debug!(%account, amount, total = self.total_staked, "stability unstake");
        Ok(gains)
    }

    /// Settle and return all pending gains without touching the stake
    pub fn claim(&mut self, account: AccountId, now: u64) -> Result<StakerGains> {
        self.accrue_sbr(now)?;
        let (gains, live) = self.settle(account)?;
        if self.stakes.contains_key(&account) {
            self.stakes.insert(account, self.fresh_stake(live));
        }
        Ok(gains)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PROTOCOL OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Absorb a liquidation: the pool covers `debt` stablecoin and gains
    /// `collateral`. Fails unless the live total stake covers the debt.
    pub fn absorb_liquidation(&mut self, debt: u128, collateral: u128, now: u64) -> Result<()> {
        if debt == 0 {
            return Err(Error::InvalidLiquidationAmount);
        }
        if self.total_staked < debt {
            return Err(Error::InvalidLiquidationAmount);
        }
        self.accrue_sbr(now)?;

        // Accumulator and factor updates both use the pre-reduction total.
        let total = self.total_staked;
        if collateral > 0 {
            self.collateral_per_token = safe_add(
                self.collateral_per_token,
                mul_div(collateral, self.scaling_factor, total)?,
            )?;
        }

        let new_factor = mul_div(self.scaling_factor, safe_sub(total, debt)?, total)?;
        if new_factor < self.min_scaling_factor {
            self.reset_snapshots.push(ResetSnapshot {
                scaling_factor: new_factor,
                reward_per_token: self.reward_per_token,
                collateral_per_token: self.collateral_per_token,
                sbr_per_token: self.sbr_per_token,
            });
            self.reset_count += 1;
            self.scaling_factor = PRECISION;
            info!(epoch = self.reset_count, sub_floor_factor = new_factor, "stability pool scaling reset");
        } else {
            self.scaling_factor = new_factor;
        }

        self.total_staked = total - debt;
        debug!(debt, collateral, total = self.total_staked, factor = self.scaling_factor, "liquidation absorbed");
        Ok(())
    }

    /// Distribute a stablecoin fee reward across the pool. Returns false
    /// without taking the reward when the pool is empty.
    pub fn add_reward(&mut self, amount: u128, now: u64) -> Result<bool> {
        if self.total_staked == 0 {
            return Ok(false);
        }
        self.accrue_sbr(now)?;
        self.reward_per_token = safe_add(
            self.reward_per_token,
            mul_div(amount, self.scaling_factor, self.total_staked)?,
        )?;
        Ok(true)
    }

    /// Distribute a collateral reward (redemption redeemer fees) across the
    /// pool. Returns false without taking it when the pool is empty.
    pub fn add_collateral_reward(&mut self, amount: u128, now: u64) -> Result<bool> {
        if self.total_staked == 0 {
            return Ok(false);
        }
        self.accrue_sbr(now)?;
        self.collateral_per_token = safe_add(
            self.collateral_per_token,
            mul_div(amount, self.scaling_factor, self.total_staked)?,
        )?;
        Ok(true)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL
    // ═══════════════════════════════════════════════════════════════════════════

    /// Advance the SBR accumulator to `now`. An empty pool earns nothing;
    /// the clock still moves so the idle stretch is not paid out later.
    fn accrue_sbr(&mut self, now: u64) -> Result<()> {
        if now <= self.sbr_last_time {
            return Ok(());
        }
        let elapsed = now - self.sbr_last_time;
        self.sbr_last_time = now;

        if self.total_staked == 0 || self.sbr_rate_per_second == 0 {
            return Ok(());
        }
        let issued = safe_mul(self.sbr_rate_per_second, elapsed as u128)?;
        self.sbr_per_token = safe_add(
            self.sbr_per_token,
            mul_div(issued, self.scaling_factor, self.total_staked)?,
        )?;
        Ok(())
    }

    /// Settle a staker fully: fold sleeping epochs, collect gains, and
    /// return (gains, live stake). The stake entry is left with snapshots
    /// advanced; callers re-snapshot or remove it as needed.
    fn settle(&mut self, account: AccountId) -> Result<(StakerGains, u128)> {
        let mut stake = match self.stakes.get(&account) {
            Some(stake) => stake.clone(),
            None => return Ok((StakerGains::default(), 0)),
        };
        let gains = self.settle_epochs_and_gains(&mut stake)?;
        let live = mul_div(stake.raw, self.scaling_factor, stake.scaling_snapshot)?;
        self.stakes.insert(account, stake);
        Ok((gains, live))
    }

    /// Fold every completed epoch into `stake` and collect accumulator
    /// gains up to the present, mutating the passed stake in place.
    fn settle_epochs_and_gains(&self, stake: &mut Stake) -> Result<StakerGains> {
        let mut gains = StakerGains::default();

        while stake.reset_count < self.reset_count {
            let rs = self.reset_snapshots[stake.reset_count as usize];
            gains.accrue(Self::gains_between(
                stake,
                rs.reward_per_token,
                rs.collateral_per_token,
                rs.sbr_per_token,
            )?)?;
            // The stake rides the epoch down to its sub-floor value, then
            // re-enters the next epoch at the base factor.
            stake.raw = mul_div(stake.raw, rs.scaling_factor, stake.scaling_snapshot)?;
            stake.scaling_snapshot = PRECISION;
            stake.reward_snapshot = rs.reward_per_token;
            stake.collateral_snapshot = rs.collateral_per_token;
            stake.sbr_snapshot = rs.sbr_per_token;
            stake.reset_count += 1;
        }

        gains.accrue(Self::gains_between(
            stake,
            self.reward_per_token,
            self.collateral_per_token,
            self.sbr_per_token,
        )?)?;
        stake.reward_snapshot = self.reward_per_token;
        stake.collateral_snapshot = self.collateral_per_token;
        stake.sbr_snapshot = self.sbr_per_token;
        Ok(gains)
    }

    fn gains_between(stake: &Stake, reward: u128, collateral: u128, sbr: u128) -> Result<StakerGains> {
        Ok(StakerGains {
            reward: mul_div(stake.raw, safe_sub(reward, stake.reward_snapshot)?, stake.scaling_snapshot)?,
            collateral: mul_div(
                stake.raw,
                safe_sub(collateral, stake.collateral_snapshot)?,
                stake.scaling_snapshot,
            )?,
            sbr: mul_div(stake.raw, safe_sub(sbr, stake.sbr_snapshot)?, stake.scaling_snapshot)?,
        })
    }

    /// Raw stake and scaling snapshot with completed epochs folded in,
    /// without mutating stored state
    fn folded_raw(&self, stake: &Stake) -> Result<(u128, u128)> {
        let mut raw = stake.raw;
        let mut snapshot = stake.scaling_snapshot;
        let mut epoch = stake.reset_count;
        while epoch < self.reset_count {
            let rs = self.reset_snapshots[epoch as usize];
            raw = mul_div(raw, rs.scaling_factor, snapshot)?;
            snapshot = PRECISION;
            epoch += 1;
        }
        Ok((raw, snapshot))
    }

    /// A stake record holding `live` units at current snapshots
    fn fresh_stake(&self, live: u128) -> Stake {
        Stake {
            raw: live,
            reset_count: self.reset_count,
            scaling_snapshot: self.scaling_factor,
            reward_snapshot: self.reward_per_token,
            collateral_snapshot: self.collateral_per_token,
            sbr_snapshot: self.sbr_per_token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::{MIN_SCALING_FACTOR, SBR_RATE_PER_SECOND};

    fn pool() -> StabilityPool {
        StabilityPool::new(MIN_SCALING_FACTOR, 0)
    }

    const A: AccountId = AccountId(1);
    const B: AccountId = AccountId(2);

    #[test]
    fn test_reward_split_proportional() {
        // A(1000) and B(2000), reward 300 -> A gets 100, B gets 200 exactly
        let mut pool = pool();
        pool.stake(A, 1_000 * PRECISION, 0).unwrap();
        pool.stake(B, 2_000 * PRECISION, 0).unwrap();
        assert!(pool.add_reward(300 * PRECISION, 0).unwrap());

        assert_eq!(pool.pending_gains(A).unwrap().reward, 100 * PRECISION);
        assert_eq!(pool.pending_gains(B).unwrap().reward, 200 * PRECISION);
    }

    #[test]
    fn test_reward_to_empty_pool_declined() {
        let mut pool = pool();
        assert!(!pool.add_reward(300 * PRECISION, 0).unwrap());
    }

    #[test]
    fn test_liquidation_dilutes_stakes() {
        let mut pool = pool();
        pool.stake(A, 1_000 * PRECISION, 0).unwrap();
        pool.stake(B, 3_000 * PRECISION, 0).unwrap();

        // pool covers 400 debt for 0.2 collateral
        pool.absorb_liquidation(400 * PRECISION, PRECISION / 5, 0).unwrap();

        assert_eq!(pool.total_staked(), 3_600 * PRECISION);
        assert_eq!(pool.stake_of(A).unwrap(), 900 * PRECISION);
        assert_eq!(pool.stake_of(B).unwrap(), 2_700 * PRECISION);

        // collateral gain splits 1:3
        assert_eq!(pool.pending_gains(A).unwrap().collateral, PRECISION / 20);
        assert_eq!(pool.pending_gains(B).unwrap().collateral, 3 * PRECISION / 20);
    }

    #[test]
    fn test_absorb_more_than_staked_fails() {
        let mut pool = pool();
        pool.stake(A, 100 * PRECISION, 0).unwrap();
        let result = pool.absorb_liquidation(200 * PRECISION, PRECISION, 0);
        assert_eq!(result, Err(Error::InvalidLiquidationAmount));
    }

    #[test]
    fn test_rewards_after_dilution_follow_live_stakes() {
        let mut pool = pool();
        pool.stake(A, 1_000 * PRECISION, 0).unwrap();
        pool.stake(B, 3_000 * PRECISION, 0).unwrap();
        pool.absorb_liquidation(2_000 * PRECISION, PRECISION, 0).unwrap();

        // live stakes now 500 / 1500; a fresh reward still splits 1:3
        assert!(pool.add_reward(400 * PRECISION, 0).unwrap());
        assert_eq!(pool.pending_gains(A).unwrap().reward, 100 * PRECISION);
        assert_eq!(pool.pending_gains(B).unwrap().reward, 300 * PRECISION);
    }

    #[test]
    fn test_unstake_settles_and_reduces() {
        let mut pool = pool();
        pool.stake(A, 1_000 * PRECISION, 0).unwrap();
        pool.add_reward(50 * PRECISION, 0).unwrap();

        let gains = pool.unstake(A, 400 * PRECISION, 0).unwrap();
        assert_eq!(gains.reward, 50 * PRECISION);
        assert_eq!(pool.stake_of(A).unwrap(), 600 * PRECISION);
        assert_eq!(pool.total_staked(), 600 * PRECISION);

        // settled gains do not pay twice
        assert_eq!(pool.pending_gains(A).unwrap(), StakerGains::default());
    }

    #[test]
    fn test_invalid_unstake_amounts() {
        let mut pool = pool();
        pool.stake(A, 100 * PRECISION, 0).unwrap();
        assert_eq!(pool.unstake(A, 0, 0), Err(Error::InvalidUnstakeAmount));
        assert_eq!(pool.unstake(A, 101 * PRECISION, 0), Err(Error::InvalidUnstakeAmount));
        // stake untouched by rejected withdrawals
        assert_eq!(pool.stake_of(A).unwrap(), 100 * PRECISION);
    }

    #[test]
    fn test_full_unstake_removes_record() {
        let mut pool = pool();
        pool.stake(A, 100 * PRECISION, 0).unwrap();
        pool.unstake(A, 100 * PRECISION, 0).unwrap();
        assert_eq!(pool.staker_count(), 0);
        assert_eq!(pool.total_staked(), 0);
    }

    #[test]
    fn test_scaling_reset_epoch() {
        // Liquidating ~99.9999999999% of the pool pushes the factor under
        // the floor and starts a new epoch.
        let mut pool = pool();
        pool.stake(A, 1_000 * PRECISION, 0).unwrap();
        pool.stake(B, 3_000 * PRECISION, 0).unwrap();

        let total = pool.total_staked();
        let debt = total - total / 1_000_000_000_000; // leave 4e-12 of the pool
        pool.absorb_liquidation(debt, 2 * PRECISION, 0).unwrap();

        assert_eq!(pool.reset_count(), 1);
        assert_eq!(pool.scaling_factor(), PRECISION);

        // survivors keep their 1:3 proportion
        let a = pool.stake_of(A).unwrap();
        let b = pool.stake_of(B).unwrap();
        assert!(a > 0 && b > 0);
        assert!(b / a == 3 || (b + 1) / a == 3 || b / (a + 1) == 3);
        assert_eq!(pool.total_staked(), total - debt);
    }

    #[test]
    fn test_sleeping_staker_survives_reset() {
        let mut pool = pool();
        pool.stake(A, 1_000 * PRECISION, 0).unwrap();
        pool.stake(B, 1_000 * PRECISION, 0).unwrap();
        pool.add_reward(200 * PRECISION, 0).unwrap();

        // near-total wipeout forces a reset while A sleeps
        let total = pool.total_staked();
        pool.absorb_liquidation(total - 2, 10 * PRECISION, 0).unwrap();
        assert_eq!(pool.reset_count(), 1);

        // B restakes in the new epoch; A's pre-reset reward is intact
        pool.stake(B, 500 * PRECISION, 0).unwrap();
        let gains = pool.claim(A, 0).unwrap();
        assert_eq!(gains.reward, 100 * PRECISION);
        assert_eq!(gains.collateral, 5 * PRECISION);
        // A's residual live stake is epoch dust
        assert!(pool.stake_of(A).unwrap() <= 1);
    }

    #[test]
    fn test_sbr_accrual_over_time() {
        let mut pool = StabilityPool::new(MIN_SCALING_FACTOR, SBR_RATE_PER_SECOND);
        pool.stake(A, 1_000 * PRECISION, 100).unwrap();
        pool.stake(B, 1_000 * PRECISION, 100).unwrap();

        // 10 seconds at 1 SBR/s split evenly
        let gains = pool.claim(A, 110).unwrap();
        assert_eq!(gains.sbr, 5 * PRECISION);
        assert_eq!(pool.pending_gains(B).unwrap().sbr, 5 * PRECISION);
    }

    #[test]
    fn test_sbr_clock_advances_while_empty() {
        let mut pool = StabilityPool::new(MIN_SCALING_FACTOR, SBR_RATE_PER_SECOND);
        // nobody staked for the first 1000 seconds
        assert!(!pool.add_reward(0, 1_000).unwrap());
        pool.stake(A, 100 * PRECISION, 1_000).unwrap();
        let gains = pool.claim(A, 1_010).unwrap();
        // only the staked stretch pays
        assert_eq!(gains.sbr, 10 * PRECISION);
    }

    #[test]
    fn test_stake_settles_prior_gains() {
        let mut pool = pool();
        pool.stake(A, 1_000 * PRECISION, 0).unwrap();
        pool.add_reward(30 * PRECISION, 0).unwrap();
        let gains = pool.stake(A, 500 * PRECISION, 0).unwrap();
        assert_eq!(gains.reward, 30 * PRECISION);
        assert_eq!(pool.stake_of(A).unwrap(), 1_500 * PRECISION);
    }
}
