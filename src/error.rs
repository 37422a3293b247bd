//! Error types for the Stablebase accounting core.
//!
//! Every fallible operation is rejected before any state mutation, so a
//! returned error always means "nothing happened". Errors fall into three
//! taxonomy buckets: validation, authorization and state.

use thiserror::Error;

/// Result type alias for Stablebase operations
pub type Result<T> = std::result::Result<T, Error>;

/// Taxonomy bucket for an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad inputs or amounts, rejected before any mutation
    Validation,
    /// Caller is not allowed to perform the operation
    Authorization,
    /// Operation is valid but the ledger is not in a state that permits it
    State,
    /// Oracle / price-feed failures
    Oracle,
    /// Serialization failures
    Serialization,
    /// Internal invariant failures (should not happen in production)
    Internal,
}

/// Main error type for the Stablebase core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ═══════════════════════════════════════════════════════════════════
    // Validation Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Amount is zero
    #[error("Amount cannot be zero")]
    ZeroAmount,

    /// Not enough collateral in the position for the requested operation
    #[error("Insufficient collateral: required {required}, available {available}")]
    InsufficientCollateral {
        /// Required collateral amount
        required: u128,
        /// Available collateral amount
        available: u128,
    },

    /// Borrow would push debt past what the collateral supports
    #[error("Borrow exceeds limit: requested debt {requested}, maximum {maximum}")]
    BorrowExceedsLimit {
        /// Resulting total debt
        requested: u128,
        /// Maximum debt supported by the collateral at current price
        maximum: u128,
    },

    /// Resulting debt would be below the protocol minimum (but non-zero)
    #[error("Debt amount {amount} below minimum {minimum}")]
    DebtBelowMinimum {
        /// Resulting debt amount
        amount: u128,
        /// Protocol minimum debt
        minimum: u128,
    },

    /// Repay amount exceeds the outstanding debt
    #[error("Invalid repay amount: {amount} exceeds outstanding debt {outstanding}")]
    InvalidRepayAmount {
        /// Requested repay amount
        amount: u128,
        /// Outstanding debt
        outstanding: u128,
    },

    /// Unstake exceeds the caller's effective stake
    #[error("invalid unstake amount")]
    InvalidUnstakeAmount,

    /// Token balance too low for a transfer or burn
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Required token amount
        required: u128,
        /// Available token amount
        available: u128,
    },

    /// Invalid input parameter
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Overflow in calculation
    #[error("Arithmetic overflow in {operation}")]
    Overflow {
        /// Operation that overflowed
        operation: String,
    },

    /// Underflow in calculation
    #[error("Arithmetic underflow in {operation}")]
    Underflow {
        /// Operation that underflowed
        operation: String,
    },

    /// Division by zero
    #[error("Division by zero in {operation}")]
    DivisionByZero {
        /// Operation that divided by zero
        operation: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Authorization Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Caller does not own the position
    #[error("Caller is not the owner of position {0}")]
    NotPositionOwner(u64),

    // ═══════════════════════════════════════════════════════════════════
    // State Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Position already exists
    #[error("Position already exists: {0}")]
    PositionAlreadyExists(u64),

    /// Position does not exist
    #[error("Position does not exist: {0}")]
    PositionNotFound(u64),

    /// Index node not found (remove is not idempotent)
    #[error("Index node not found: {0}")]
    NodeNotFound(u64),

    /// Redemption attempted before the protocol left bootstrap mode
    #[error("protocol in bootstrap mode")]
    BootstrapMode,

    /// Liquidation target is still above water
    #[error("can't liquidate yet")]
    CannotLiquidateYet,

    /// Redistribution has no surviving position to absorb the debt
    #[error("cannot liquidate the last position")]
    LastPosition,

    /// Stability-pool liquidation larger than the pool's total stake
    #[error("invalid liquidation amount")]
    InvalidLiquidationAmount,

    /// Liquidation requested while no position carries debt
    #[error("No active positions")]
    NoActivePositions,

    // ═══════════════════════════════════════════════════════════════════
    // Oracle Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Price feed could not produce a price
    #[error("Price unavailable: {0}")]
    PriceUnavailable(String),

    // ═══════════════════════════════════════════════════════════════════
    // Serialization Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ═══════════════════════════════════════════════════════════════════
    // Internal Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Internal error (should not happen in production)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Taxonomy bucket this error belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::ZeroAmount
            | Error::InsufficientCollateral { .. }
            | Error::BorrowExceedsLimit { .. }
            | Error::DebtBelowMinimum { .. }
            | Error::InvalidRepayAmount { .. }
            | Error::InvalidUnstakeAmount
            | Error::InsufficientBalance { .. }
            | Error::InvalidParameter { .. }
            | Error::Overflow { .. }
            | Error::Underflow { .. }
            | Error::DivisionByZero { .. } => ErrorCategory::Validation,

            Error::NotPositionOwner(_) => ErrorCategory::Authorization,

            Error::PositionAlreadyExists(_)
            | Error::PositionNotFound(_)
            | Error::NodeNotFound(_)
            | Error::BootstrapMode
            | Error::CannotLiquidateYet
            | Error::LastPosition
            | Error::InvalidLiquidationAmount
            | Error::NoActivePositions => ErrorCategory::State,

            Error::PriceUnavailable(_) => ErrorCategory::Oracle,

            Error::Serialization(_) | Error::Deserialization(_) => ErrorCategory::Serialization,

            Error::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Returns the error code for external systems
    pub fn code(&self) -> u32 {
        match self {
            // Validation errors: 1xxx
            Error::ZeroAmount => 1001,
            Error::InsufficientCollateral { .. } => 1002,
            Error::BorrowExceedsLimit { .. } => 1003,
            Error::DebtBelowMinimum { .. } => 1004,
            Error::InvalidRepayAmount { .. } => 1005,
            Error::InvalidUnstakeAmount => 1006,
            Error::InsufficientBalance { .. } => 1007,
            Error::InvalidParameter { .. } => 1008,
            Error::Overflow { .. } => 1009,
            Error::Underflow { .. } => 1010,
            Error::DivisionByZero { .. } => 1011,

            // Authorization errors: 2xxx
            Error::NotPositionOwner(_) => 2001,

            // State errors: 3xxx
            Error::PositionAlreadyExists(_) => 3001,
            Error::PositionNotFound(_) => 3002,
            Error::NodeNotFound(_) => 3003,
            Error::BootstrapMode => 3004,
            Error::CannotLiquidateYet => 3005,
            Error::LastPosition => 3006,
            Error::InvalidLiquidationAmount => 3007,
            Error::NoActivePositions => 3008,

            // Oracle errors: 6xxx
            Error::PriceUnavailable(_) => 6001,

            // Serialization errors: 7xxx
            Error::Serialization(_) => 7001,
            Error::Deserialization(_) => 7002,

            // Internal errors: 9xxx
            Error::Internal(_) => 9001,
        }
    }

    /// Returns true if this is a critical error requiring immediate attention
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Error::Internal(_) | Error::Overflow { .. } | Error::Underflow { .. }
        )
    }
}
