use crate::types::{Principal, TaskId, TaskStatus, TokenId};
use thiserror::Error;

/// Failures reported by a fund-transfer backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VaultError {
    #[error("insufficient funds: {principal} needs {required} {token}, spendable {available}")]
    InsufficientFunds {
        principal: Principal,
        token: TokenId,
        required: u64,
        available: u64,
    },

    #[error("custody underflow for task {task_id}: required {required} {token}, held {held}")]
    CustodyUnderflow {
        task_id: TaskId,
        token: TokenId,
        required: u64,
        held: u64,
    },

    #[error("transfer failed: {0}")]
    Transfer(String),
}

/// Escrow engine errors.
#[derive(Debug, Error)]
pub enum EscrowError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("invalid state for {operation} on task {task_id}: {detail} (status '{status}')")]
    InvalidState {
        task_id: TaskId,
        operation: &'static str,
        status: TaskStatus,
        detail: String,
    },

    #[error("insufficient funds: {principal} needs {required} {token}, spendable {available}")]
    InsufficientFunds {
        principal: Principal,
        token: TokenId,
        required: u64,
        available: u64,
    },

    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("duplicate task id {0}: identifier allocator is broken")]
    DuplicateId(TaskId),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EscrowError {
    pub fn invalid_state(
        task_id: TaskId,
        operation: &'static str,
        status: TaskStatus,
        detail: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            task_id,
            operation,
            status,
            detail: detail.into(),
        }
    }

    /// Any vault failure collapses to `TransferFailed`.
    pub fn transfer(err: VaultError) -> Self {
        Self::TransferFailed(err.to_string())
    }

    /// Keeps `InsufficientFunds` distinct, everything else is `TransferFailed`.
    pub fn from_lock(err: VaultError) -> Self {
        match err {
            VaultError::InsufficientFunds {
                principal,
                token,
                required,
                available,
            } => Self::InsufficientFunds {
                principal,
                token,
                required,
                available,
            },
            other => Self::transfer(other),
        }
    }

    /// Invariant violations that must stop the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DuplicateId(_))
    }
}
