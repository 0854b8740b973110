use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account identity of a creator, solver, treasury or operator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(pub String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fungible asset used for both reward and stake of a task (e.g. "USDC").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub String);

impl TokenId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dense, 0-based task identifier. Never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Status tag of a task, without the per-state payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    Submitted,
    SlashedOpen,
    Released,
}

impl TaskStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Submitted => "submitted",
            Self::SlashedOpen => "slashed_open",
            Self::Released => "released",
        }
    }

    /// True while the task can take a new submission.
    pub fn accepts_submissions(self) -> bool {
        matches!(self, Self::Open | Self::SlashedOpen)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The single active claim on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub solver: Principal,
    pub solution_reference: String,
    pub submitted_at: DateTime<Utc>,
}

/// Lifecycle state. Submission data only exists while a claim is pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskState {
    Open,
    Submitted(Submission),
    /// Reopened after a rejection; the previous stake was forfeited.
    SlashedOpen,
    Released {
        solver: Principal,
        released_at: DateTime<Utc>,
    },
}

impl TaskState {
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Open => TaskStatus::Open,
            Self::Submitted(_) => TaskStatus::Submitted,
            Self::SlashedOpen => TaskStatus::SlashedOpen,
            Self::Released { .. } => TaskStatus::Released,
        }
    }
}

/// A posted task with escrowed reward.
///
/// Historical fields are fixed at creation; only the crate can move `state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    creator: Principal,
    description: String,
    reward_amount: u64,
    required_stake: u64,
    token: TokenId,
    created_at: DateTime<Utc>,
    state: TaskState,
    /// Rejections so far; carried across reopen/submit cycles.
    #[serde(default)]
    rejections: u32,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        creator: Principal,
        token: TokenId,
        reward_amount: u64,
        required_stake: u64,
        description: String,
    ) -> Self {
        Self {
            id,
            creator,
            description,
            reward_amount,
            required_stake,
            token,
            created_at: Utc::now(),
            state: TaskState::Open,
            rejections: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn creator(&self) -> &Principal {
        &self.creator
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn reward_amount(&self) -> u64 {
        self.reward_amount
    }

    pub fn required_stake(&self) -> u64 {
        self.required_stake
    }

    pub fn token(&self) -> &TokenId {
        &self.token
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn status(&self) -> TaskStatus {
        self.state.status()
    }

    pub fn rejections(&self) -> u32 {
        self.rejections
    }

    pub fn submission(&self) -> Option<&Submission> {
        match &self.state {
            TaskState::Submitted(submission) => Some(submission),
            _ => None,
        }
    }

    /// Amount the vault holds for this task in the current state.
    pub fn escrowed_liability(&self) -> u64 {
        match self.state {
            TaskState::Submitted(_) => self.reward_amount.saturating_add(self.required_stake),
            TaskState::Open | TaskState::SlashedOpen => self.reward_amount,
            TaskState::Released { .. } => 0,
        }
    }

    pub(crate) fn mark_submitted(&mut self, solver: Principal, solution_reference: String) {
        self.state = TaskState::Submitted(Submission {
            solver,
            solution_reference,
            submitted_at: Utc::now(),
        });
    }

    pub(crate) fn mark_released(&mut self, solver: Principal) {
        self.state = TaskState::Released {
            solver,
            released_at: Utc::now(),
        };
    }

    pub(crate) fn mark_slashed(&mut self) {
        self.rejections = self.rejections.saturating_add(1);
        self.state = TaskState::SlashedOpen;
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            creator: self.creator.clone(),
            description: self.description.clone(),
            reward_amount: self.reward_amount,
            required_stake: self.required_stake,
            token: self.token.clone(),
            status: self.status(),
        }
    }
}

/// Read-only listing projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub creator: Principal,
    pub description: String,
    pub reward_amount: u64,
    pub required_stake: u64,
    pub token: TokenId,
    pub status: TaskStatus,
}
