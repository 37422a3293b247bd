//! Redemption engine.
//!
//! Redemption burns stablecoin against the positions cheapest to redeem:
//! the walk starts at the head of the redemption index (lowest fee
//! weight) and moves toward the tail until the requested amount is
//! consumed or the index is exhausted. Exhaustion is not an error; the
//! outcome reports how much was actually redeemed.
//!
//! Two fees apply per filled slice, both at a flat rate: the owner fee
//! in stablecoin and the redeemer fee in collateral. Routing the fees
//! and moving tokens stay with the caller.
//!
//! An underwater position can only redeem up to its collateral value; a
//! fill that drains its collateral writes off the unbacked residual debt
//! and retires the position from both indices.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::config::ProtocolParams;
use crate::core::ledger::PositionLedger;
use crate::core::position::PositionId;
use crate::error::{Error, Result};
use crate::index::ordered::{OrderedIndex, NIL};
use crate::utils::constants::{BPS_DIVISOR, PRECISION};
use crate::utils::math::{mul_div, safe_add, safe_sub};

// ═══════════════════════════════════════════════════════════════════════════════
// OUTCOME
// ═══════════════════════════════════════════════════════════════════════════════

/// One position's slice of a redemption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionFill {
    /// Position redeemed against
    pub position_id: PositionId,
    /// Stablecoin debt consumed from it
    pub debt_consumed: u128,
    /// Collateral taken from it (gross, before the redeemer fee)
    pub collateral_taken: u128,
    /// Whether the position's debt reached zero
    pub fully_redeemed: bool,
}

/// Result of one redemption request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionOutcome {
    /// Amount the caller asked to redeem
    pub requested: u128,
    /// Stablecoin actually consumed across all fills
    pub redeemed: u128,
    /// Gross collateral taken across all fills
    pub collateral_taken: u128,
    /// Owner fees in stablecoin, kept out of the burn
    pub owner_fees: u128,
    /// Redeemer fees in collateral, kept out of the transfer
    pub redeemer_fees: u128,
    /// Price the exchange happened at
    pub price: u128,
    /// Per-position fills in redemption order
    pub fills: Vec<RedemptionFill>,
}

impl RedemptionOutcome {
    /// Stablecoin to burn: consumed minus the owner fees
    pub fn burn_amount(&self) -> u128 {
        self.redeemed - self.owner_fees
    }

    /// Collateral the redeemer receives net of fees
    pub fn collateral_to_redeemer(&self) -> u128 {
        self.collateral_taken - self.redeemer_fees
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Executes redemptions and keeps lifetime counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedemptionEngine {
    /// Redemption requests that consumed a non-zero amount
    pub total_redemptions: u64,
    /// Lifetime stablecoin redeemed
    pub total_redeemed: u128,
    /// Lifetime collateral transferred out
    pub total_collateral_out: u128,
}

impl RedemptionEngine {
    /// Create a fresh engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Redeem up to `amount` stablecoin for collateral at `price`,
    /// walking the redemption index from its head. `near_spot_hint`
    /// is passed through to the liquidation-index reposition of any
    /// partially redeemed position.
    #[allow(clippy::too_many_arguments)]
    pub fn redeem(
        &mut self,
        ledger: &mut PositionLedger,
        redemption_index: &mut OrderedIndex,
        liquidation_index: &mut OrderedIndex,
        params: &ProtocolParams,
        price: u128,
        amount: u128,
        near_spot_hint: u64,
    ) -> Result<RedemptionOutcome> {
        if price == 0 {
            return Err(Error::DivisionByZero {
                operation: "redemption exchange rate".into(),
            });
        }

        let mut outcome = RedemptionOutcome {
            requested: amount,
            price,
            ..Default::default()
        };
        let mut remaining = amount;

        while remaining > 0 {
            let target = redemption_index.head();
            if target == NIL {
                break;
            }

            ledger.activate_pending(target)?;
            let (debt, collateral, value) = {
                let position = ledger.get(target)?;
                (
                    position.borrowed_amount,
                    position.collateral_amount,
                    position.collateral_value(price)?,
                )
            };

            // An underwater position redeems at most its collateral value.
            let consumed = remaining.min(debt).min(value);
            if consumed == 0 {
                break;
            }
            // Collateral moves at the oracle price, capped by what the
            // position actually holds.
            let collateral_taken = mul_div(consumed, PRECISION, price)?.min(collateral);

            let owner_fee = mul_div(consumed, params.redemption_owner_fee_bps, BPS_DIVISOR)?;
            let redeemer_fee =
                mul_div(collateral_taken, params.redemption_redeemer_fee_bps, BPS_DIVISOR)?;

            ledger.remove_debt(target, consumed)?;
            ledger.remove_collateral(target, collateral_taken)?;

            let (mut fully_redeemed, residual, collateral_after) = {
                let position = ledger.get(target)?;
                (!position.has_debt(), position.borrowed_amount, position.collateral_amount)
            };
            if !fully_redeemed && collateral_after == 0 {
                // Nothing backs the residual debt any more; write it off
                // and retire the position.
                ledger.remove_debt(target, residual)?;
                fully_redeemed = true;
                debug!(position = target, residual, "unbacked residual debt written off");
            }
            if fully_redeemed {
                redemption_index.remove(target)?;
                liquidation_index.remove(target)?;
            } else {
                let key = ledger.get(target)?.liquidation_key()?;
                liquidation_index.upsert(target, key, near_spot_hint)?;
            }

            remaining -= consumed;
            outcome.redeemed = safe_add(outcome.redeemed, consumed)?;
            outcome.collateral_taken = safe_add(outcome.collateral_taken, collateral_taken)?;
            outcome.owner_fees = safe_add(outcome.owner_fees, owner_fee)?;
            outcome.redeemer_fees = safe_add(outcome.redeemer_fees, redeemer_fee)?;
            outcome.fills.push(RedemptionFill {
                position_id: target,
                debt_consumed: consumed,
                collateral_taken,
                fully_redeemed,
            });

            debug!(position = target, consumed, collateral_taken, fully_redeemed, "redemption fill");
        }

        if outcome.redeemed > 0 {
            self.total_redemptions += 1;
            self.total_redeemed = safe_add(self.total_redeemed, outcome.redeemed)?;
            self.total_collateral_out = safe_add(
                self.total_collateral_out,
                safe_sub(outcome.collateral_taken, outcome.redeemer_fees)?,
            )?;
            info!(
                requested = amount,
                redeemed = outcome.redeemed,
                fills = outcome.fills.len(),
                "redemption executed"
            );
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::token::AccountId;
    use crate::error::Error;
    use crate::utils::constants::REDEMPTION_OWNER_FEE_BPS;

    struct Fixture {
        ledger: PositionLedger,
        liq: OrderedIndex,
        red: OrderedIndex,
        params: ProtocolParams,
        engine: RedemptionEngine,
    }

    /// Three positions with distinct weights; id 1 is cheapest to redeem.
    fn fixture() -> Fixture {
        let mut ledger = PositionLedger::new();
        let mut liq = OrderedIndex::new();
        let mut red = OrderedIndex::new();

        for (id, owner, coll, debt, weight) in [
            (1u64, 10u64, 2u128, 3_000u128, 100u128),
            (2, 20, 3, 4_000, 200),
            (3, 30, 4, 5_000, 300),
        ] {
            ledger.open_position(id, AccountId(owner), coll * PRECISION).unwrap();
            ledger.add_debt(id, debt * PRECISION).unwrap();
            let key = ledger.get(id).unwrap().liquidation_key().unwrap();
            liq.upsert(id, key, NIL).unwrap();
            red.upsert(id, weight, NIL).unwrap();
        }

        Fixture {
            ledger,
            liq,
            red,
            params: ProtocolParams::default(),
            engine: RedemptionEngine::new(),
        }
    }

    fn redeem(f: &mut Fixture, price: u128, amount: u128) -> Result<RedemptionOutcome> {
        f.engine.redeem(&mut f.ledger, &mut f.red, &mut f.liq, &f.params, price, amount, NIL)
    }

    #[test]
    fn test_partial_redemption_hits_cheapest() {
        let mut f = fixture();
        let outcome = redeem(&mut f, 1_000 * PRECISION, 1_000 * PRECISION).unwrap();

        assert_eq!(outcome.redeemed, 1_000 * PRECISION);
        assert_eq!(outcome.fills.len(), 1);
        assert_eq!(outcome.fills[0].position_id, 1);
        assert!(!outcome.fills[0].fully_redeemed);
        // 1000 debt at price 1000 = 1.0 collateral
        assert_eq!(outcome.collateral_taken, PRECISION);

        // position 1 stays in both indices with a fresh ratio key
        assert!(f.red.contains(1));
        let position = f.ledger.get(1).unwrap();
        assert_eq!(position.borrowed_amount, 2_000 * PRECISION);
        assert_eq!(position.collateral_amount, PRECISION);
        assert_eq!(f.liq.get(1).unwrap().key, position.liquidation_key().unwrap());
    }

    #[test]
    fn test_full_redemption_crosses_positions() {
        let mut f = fixture();
        // consumes all of position 1 (3000) and part of position 2
        let outcome = redeem(&mut f, 2_000 * PRECISION, 4_000 * PRECISION).unwrap();

        assert_eq!(outcome.redeemed, 4_000 * PRECISION);
        assert_eq!(outcome.fills.len(), 2);
        assert_eq!(outcome.fills[0].position_id, 1);
        assert!(outcome.fills[0].fully_redeemed);
        assert_eq!(outcome.fills[1].position_id, 2);
        assert!(!outcome.fills[1].fully_redeemed);

        // fully redeemed position leaves both indices but keeps leftover collateral
        assert!(!f.red.contains(1));
        assert!(!f.liq.contains(1));
        let survivor = f.ledger.get(1).unwrap();
        assert_eq!(survivor.borrowed_amount, 0);
        assert_eq!(survivor.collateral_amount, 2 * PRECISION - 3 * PRECISION / 2);
    }

    #[test]
    fn test_exhaustion_is_not_an_error() {
        let mut f = fixture();
        // ask for more than total system debt (12000)
        let outcome = redeem(&mut f, 10_000 * PRECISION, 20_000 * PRECISION).unwrap();
        assert_eq!(outcome.redeemed, 12_000 * PRECISION);
        assert!(outcome.redeemed < outcome.requested);
        assert!(f.red.is_empty());
        assert!(f.liq.is_empty());
    }

    #[test]
    fn test_fees_computed_flat() {
        let mut f = fixture();
        let outcome = redeem(&mut f, 1_000 * PRECISION, 1_000 * PRECISION).unwrap();

        let owner_fee = 1_000 * PRECISION * REDEMPTION_OWNER_FEE_BPS / 10_000;
        assert_eq!(outcome.owner_fees, owner_fee);
        assert_eq!(outcome.burn_amount(), 1_000 * PRECISION - owner_fee);

        let redeemer_fee = PRECISION * f.params.redemption_redeemer_fee_bps / 10_000;
        assert_eq!(outcome.redeemer_fees, redeemer_fee);
        assert_eq!(outcome.collateral_to_redeemer(), PRECISION - redeemer_fee);
    }

    #[test]
    fn test_collateral_capped_by_position() {
        let mut f = fixture();
        // at a crashed price the exchange would exceed the position's
        // 2.0 collateral; the fill is capped there
        let outcome = redeem(&mut f, 1_000 * PRECISION, 3_000 * PRECISION).unwrap();
        assert_eq!(outcome.fills[0].collateral_taken, 2 * PRECISION);
        assert_eq!(f.ledger.get(1).unwrap().collateral_amount, 0);
    }

    #[test]
    fn test_underwater_position_redeems_at_collateral_value() {
        let mut f = fixture();
        // at price 1000 position 1 holds 2.0 collateral worth 2000 against
        // 3000 debt; a 2500 request can only take 2000 from it
        let outcome = redeem(&mut f, 1_000 * PRECISION, 2_500 * PRECISION).unwrap();

        assert_eq!(outcome.fills[0].position_id, 1);
        assert_eq!(outcome.fills[0].debt_consumed, 2_000 * PRECISION);
        assert_eq!(outcome.fills[0].collateral_taken, 2 * PRECISION);
        assert!(outcome.fills[0].fully_redeemed);

        // the 1000 residual had no collateral behind it and was written
        // off; the drained position leaves both indices
        let drained = f.ledger.get(1).unwrap();
        assert_eq!(drained.borrowed_amount, 0);
        assert_eq!(drained.collateral_amount, 0);
        assert!(!f.red.contains(1));
        assert!(!f.liq.contains(1));

        // the walk carries the rest into position 2 and stays consistent
        assert_eq!(outcome.fills[1].position_id, 2);
        assert_eq!(outcome.fills[1].debt_consumed, 500 * PRECISION);
        assert_eq!(outcome.redeemed, 2_500 * PRECISION);
        assert_eq!(f.ledger.total_debt(), 8_500 * PRECISION);
        assert_eq!(
            f.liq.get(2).unwrap().key,
            f.ledger.get(2).unwrap().liquidation_key().unwrap()
        );
    }

    #[test]
    fn test_redistribution_activated_before_redeeming() {
        let mut f = fixture();
        // pending debt raises what position 1 can fill
        f.ledger
            .distribute_to_survivors(900 * PRECISION, 0, 9 * PRECISION)
            .unwrap();

        let outcome = redeem(&mut f, 2_000 * PRECISION, 3_200 * PRECISION).unwrap();
        // position 1 now carries 3000 + 200 pending debt, all consumed
        assert_eq!(outcome.fills[0].debt_consumed, 3_200 * PRECISION);
        assert!(outcome.fills[0].fully_redeemed);
    }

    #[test]
    fn test_zero_price_rejected() {
        let mut f = fixture();
        assert!(matches!(
            redeem(&mut f, 0, 1_000 * PRECISION),
            Err(Error::DivisionByZero { .. })
        ));
    }
}
