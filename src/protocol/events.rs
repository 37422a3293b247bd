//! Protocol events for state change notifications.
//!
//! Every state-changing operation on the facade appends one event, so
//! clients can audit activity without diffing snapshots.

use serde::{Deserialize, Serialize};

use crate::core::position::PositionId;
use crate::core::token::AccountId;
use crate::error::{Error, Result};
use crate::liquidation::engine::LiquidationMode;

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// All protocol event types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProtocolEvent {
    // Position events
    /// Position was opened
    PositionOpened(PositionOpenedEvent),
    /// Collateral was added to a position
    CollateralAdded(CollateralChangedEvent),
    /// Collateral was withdrawn from a position
    CollateralWithdrawn(CollateralChangedEvent),
    /// Stablecoin was borrowed against a position
    Borrowed(BorrowedEvent),
    /// Debt was repaid
    Repaid(DebtChangedEvent),
    /// Position was closed
    PositionClosed(PositionClosedEvent),
    /// Position weight was raised with a fee top-up
    WeightRaised(WeightRaisedEvent),

    // Liquidation / redemption events
    /// Position was liquidated
    Liquidated(LiquidatedEvent),
    /// Stablecoin was redeemed for collateral
    Redeemed(RedeemedEvent),

    // Pool events
    /// Stake added to the stability pool
    StabilityStaked(PoolStakeEvent),
    /// Stake withdrawn from the stability pool
    StabilityUnstaked(PoolStakeEvent),
    /// Stake added to the secondary pool
    SecondaryStaked(PoolStakeEvent),
    /// Stake withdrawn from the secondary pool
    SecondaryUnstaked(PoolStakeEvent),
    /// Fee distributed to a pool
    FeeDistributed(FeeDistributedEvent),
}

impl ProtocolEvent {
    /// Event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PositionOpened(_) => "PositionOpened",
            Self::CollateralAdded(_) => "CollateralAdded",
            Self::CollateralWithdrawn(_) => "CollateralWithdrawn",
            Self::Borrowed(_) => "Borrowed",
            Self::Repaid(_) => "Repaid",
            Self::PositionClosed(_) => "PositionClosed",
            Self::WeightRaised(_) => "WeightRaised",
            Self::Liquidated(_) => "Liquidated",
            Self::Redeemed(_) => "Redeemed",
            Self::StabilityStaked(_) => "StabilityStaked",
            Self::StabilityUnstaked(_) => "StabilityUnstaked",
            Self::SecondaryStaked(_) => "SecondaryStaked",
            Self::SecondaryUnstaked(_) => "SecondaryUnstaked",
            Self::FeeDistributed(_) => "FeeDistributed",
        }
    }

    /// Timestamp of the event
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::PositionOpened(e) => e.timestamp,
            Self::CollateralAdded(e) => e.timestamp,
            Self::CollateralWithdrawn(e) => e.timestamp,
            Self::Borrowed(e) => e.timestamp,
            Self::Repaid(e) => e.timestamp,
            Self::PositionClosed(e) => e.timestamp,
            Self::WeightRaised(e) => e.timestamp,
            Self::Liquidated(e) => e.timestamp,
            Self::Redeemed(e) => e.timestamp,
            Self::StabilityStaked(e) => e.timestamp,
            Self::StabilityUnstaked(e) => e.timestamp,
            Self::SecondaryStaked(e) => e.timestamp,
            Self::SecondaryUnstaked(e) => e.timestamp,
            Self::FeeDistributed(e) => e.timestamp,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT PAYLOADS
// ═══════════════════════════════════════════════════════════════════════════════

/// Event emitted when a position is opened
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionOpenedEvent {
    /// Position identifier
    pub position_id: PositionId,
    /// Owning account
    pub owner: AccountId,
    /// Initial collateral amount
    pub collateral: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when collateral is added or withdrawn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralChangedEvent {
    /// Position identifier
    pub position_id: PositionId,
    /// Amount moved
    pub amount: u128,
    /// Collateral held after the change
    pub collateral_after: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted on a borrow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BorrowedEvent {
    /// Position identifier
    pub position_id: PositionId,
    /// Amount borrowed
    pub amount: u128,
    /// One-time fee withheld from the principal
    pub fee: u128,
    /// Outstanding debt after the borrow
    pub debt_after: u128,
    /// Redemption weight after the borrow
    pub weight_after: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted on a repayment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebtChangedEvent {
    /// Position identifier
    pub position_id: PositionId,
    /// Amount repaid
    pub amount: u128,
    /// Outstanding debt after the repayment
    pub debt_after: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when a position is closed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionClosedEvent {
    /// Position identifier
    pub position_id: PositionId,
    /// Collateral returned to the owner
    pub collateral_returned: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted on a fee top-up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightRaisedEvent {
    /// Position identifier
    pub position_id: PositionId,
    /// Stablecoin fee paid
    pub fee: u128,
    /// Redemption weight after the top-up
    pub weight_after: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted on a liquidation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidatedEvent {
    /// Position identifier
    pub position_id: PositionId,
    /// Debt covered
    pub debt: u128,
    /// Collateral seized (gross)
    pub collateral: u128,
    /// Liquidation fee carved from the collateral
    pub fee: u128,
    /// Whether the pool absorbed or the debt was redistributed
    pub mode: LiquidationMode,
    /// Oracle price at liquidation
    pub price: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted on a redemption
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemedEvent {
    /// Redeeming account
    pub redeemer: AccountId,
    /// Amount requested
    pub requested: u128,
    /// Amount actually consumed
    pub redeemed: u128,
    /// Collateral sent to the redeemer, net of fees
    pub collateral_out: u128,
    /// Positions redeemed against
    pub positions_touched: usize,
    /// Oracle price at redemption
    pub price: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted on pool stake changes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStakeEvent {
    /// Staking account
    pub account: AccountId,
    /// Amount staked or withdrawn
    pub amount: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Where a distributed fee ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeRecipient {
    /// Distributed across stability pool stakers
    StabilityPool,
    /// Distributed across secondary pool stakers
    SecondaryPool,
    /// Both pools were empty; the fee went back to the payer
    Refunded,
}

/// Event emitted when a protocol fee is distributed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeDistributedEvent {
    /// Fee amount
    pub amount: u128,
    /// Where it ended up
    pub recipient: FeeRecipient,
    /// Timestamp
    pub timestamp: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT LOG
// ═══════════════════════════════════════════════════════════════════════════════

/// Bounded in-memory event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<ProtocolEvent>,
    max_events: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl EventLog {
    /// Create a log keeping at most `max_events`
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Vec::new(),
            max_events,
        }
    }

    /// Append an event, pruning the oldest past the cap
    pub fn emit(&mut self, event: ProtocolEvent) {
        self.events.push(event);
        if self.events.len() > self.max_events {
            self.events.drain(0..self.events.len() - self.max_events);
        }
    }

    /// All retained events, oldest first
    pub fn events(&self) -> &[ProtocolEvent] {
        &self.events
    }

    /// Number of retained events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Retained events of one type
    pub fn events_of_type(&self, event_type: &str) -> Vec<&ProtocolEvent> {
        self.events.iter().filter(|e| e.event_type() == event_type).collect()
    }

    /// Export the retained events as JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.events).map_err(|e| Error::Serialization(e.to_string()))
    }
}
