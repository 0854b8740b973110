//! Task escrow and solver staking ledger.
//!
//! A creator posts a task with an escrowed reward; a solver locks a refundable
//! stake to submit a solution; the resolver either releases reward plus stake
//! to the solver or rejects the submission. A rejected stake is forfeited to the
//! penalty sink, or frozen in vault custody when none is configured, and never
//! reaches the creator. The task then reopens for another submission.
//!
//! Invariants enforced here:
//! - value only moves through [`FundTransfer`], and every move is all-or-nothing;
//! - at most one pending submission per task, serialized by a per-task lock;
//! - task ids are dense, assigned in posting order and never reused;
//! - every successful transition is appended to a hash-chained audit log.

#![deny(unsafe_code)]

pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod storage;
pub mod store;
pub mod types;
pub mod vault;
pub mod verifier;

pub use engine::{EngineSnapshot, EscrowEngine, EscrowEngineConfig};
pub use error::{EscrowError, VaultError};
pub use events::{EscrowEvent, EventBus};
pub use ledger::{AuditEntry, AuditLog};
pub use storage::{PersistedState, StateFile, StateStorageConfig};
pub use store::TaskStore;
pub use types::{
    Principal, Submission, Task, TaskId, TaskState, TaskStatus, TaskSummary, TokenId,
};
pub use vault::{Forfeiture, FundTransfer, InMemoryVault, VaultSnapshot};
pub use verifier::{resolve_submission, Resolution, Verdict, Verifier};
