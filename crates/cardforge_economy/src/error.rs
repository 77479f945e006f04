//! # Economy Error Types
//!
//! All errors that can occur in the economy ledger.
//!
//! Validation and insufficient-resource errors are terminal and carry the
//! numeric amounts involved so the calling layer can display them.
//! `Conflict` and `Timeout` are the only retryable kinds.

use std::fmt;

use thiserror::Error;

/// The kind of entity a lookup failed for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Entity {
    /// A player account.
    Account,
    /// A card instance.
    Card,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account => f.write_str("account"),
            Self::Card => f.write_str("card"),
        }
    }
}

/// The resource that was short when an operation was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Gold balance.
    Gold,
    /// Token balance.
    Tokens,
    /// Tournament ticket balance.
    Tickets,
    /// Remaining global card supply.
    GlobalSupply,
    /// Remaining per-account daily mint allowance.
    DailyLimit,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gold => "gold",
            Self::Tokens => "tokens",
            Self::Tickets => "tickets",
            Self::GlobalSupply => "global supply",
            Self::DailyLimit => "daily mint limit",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in the economy ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EconomyError {
    /// The referenced entity does not exist (or is not visible to the caller).
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind.
        entity: Entity,
        /// Entity id.
        id: u64,
    },

    /// A request field was rejected (unknown package key, bad card number...).
    #[error("invalid {field}: {reason}")]
    InvalidInput {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Not enough of a resource to complete the operation.
    #[error("insufficient {kind}: need {required}, have {available}")]
    InsufficientResource {
        /// Which resource ran out.
        kind: ResourceKind,
        /// The amount required.
        required: u64,
        /// The amount available.
        available: u64,
    },

    /// Concurrent-update collision that persisted through every retry.
    #[error("concurrent update conflict after {attempts} attempts")]
    Conflict {
        /// Commit attempts made.
        attempts: u32,
    },

    /// A lock or persistence call exceeded the request timeout.
    #[error("timed out after {attempts} attempts, try again")]
    Timeout {
        /// Commit attempts made.
        attempts: u32,
    },

    /// Arithmetic overflow in a balance calculation.
    #[error("arithmetic overflow in economic calculation")]
    ArithmeticOverflow,

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected persistence failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EconomyError {
    /// Shorthand for an invalid-input rejection.
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    /// Shorthand for an insufficient-resource rejection.
    pub(crate) const fn insufficient(kind: ResourceKind, required: u64, available: u64) -> Self {
        Self::InsufficientResource {
            kind,
            required,
            available,
        }
    }

    /// Returns true if the caller may retry the same request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Timeout { .. })
    }

    /// Returns true for a currency shortfall (gold, tokens or tickets).
    #[must_use]
    pub const fn is_insufficient_funds(&self) -> bool {
        matches!(
            self,
            Self::InsufficientResource {
                kind: ResourceKind::Gold | ResourceKind::Tokens | ResourceKind::Tickets,
                ..
            }
        )
    }

    /// Returns true when the per-account daily mint allowance is exhausted.
    #[must_use]
    pub const fn is_daily_limit(&self) -> bool {
        matches!(
            self,
            Self::InsufficientResource {
                kind: ResourceKind::DailyLimit,
                ..
            }
        )
    }

    /// Returns true when the global card supply is exhausted.
    #[must_use]
    pub const fn is_insufficient_supply(&self) -> bool {
        matches!(
            self,
            Self::InsufficientResource {
                kind: ResourceKind::GlobalSupply,
                ..
            }
        )
    }
}

/// Result type for economy operations.
pub type EconomyResult<T> = Result<T, EconomyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(EconomyError::Conflict { attempts: 3 }.is_retryable());
        assert!(EconomyError::Timeout { attempts: 1 }.is_retryable());
        assert!(!EconomyError::insufficient(ResourceKind::Tokens, 10, 5).is_retryable());
        assert!(!EconomyError::invalid("package", "unknown").is_retryable());
    }

    #[test]
    fn test_display_carries_amounts() {
        let err = EconomyError::insufficient(ResourceKind::Tokens, 4000, 1200);
        assert_eq!(err.to_string(), "insufficient tokens: need 4000, have 1200");
        assert!(err.is_insufficient_funds());
        assert!(!err.is_daily_limit());
    }
}
