//! Core data model: positions, the position ledger, token ledgers and
//! protocol parameters.

pub mod config;
pub mod ledger;
pub mod position;
pub mod token;

pub use config::ProtocolParams;
pub use ledger::{PendingAmounts, PositionLedger};
pub use position::{LiquidationSnapshot, Position, PositionId};
pub use token::{AccountId, TokenLedger, PROTOCOL_ACCOUNT};
