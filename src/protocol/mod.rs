//! Protocol facade and event log.

pub mod core;
pub mod events;

pub use core::Stablebase;
pub use events::{EventLog, FeeRecipient, ProtocolEvent};
