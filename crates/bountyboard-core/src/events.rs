use crate::types::{Principal, TaskId, TokenId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One event per successful transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EscrowEvent {
    TaskPosted {
        task_id: TaskId,
        creator: Principal,
        token: TokenId,
        reward_amount: u64,
        required_stake: u64,
        description: String,
    },
    SolutionSubmitted {
        task_id: TaskId,
        solver: Principal,
        solution_reference: String,
    },
    BountyReleased {
        task_id: TaskId,
        solver: Principal,
        amount: u64,
        stake_return: u64,
    },
    SolutionRejected {
        task_id: TaskId,
        solver: Principal,
        reason: String,
        stake_slashed: u64,
        /// Receiver of the slashed stake; `None` means it stays frozen in custody.
        sink: Option<Principal>,
    },
}

impl EscrowEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::TaskPosted { task_id, .. }
            | Self::SolutionSubmitted { task_id, .. }
            | Self::BountyReleased { task_id, .. }
            | Self::SolutionRejected { task_id, .. } => *task_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskPosted { .. } => "task_posted",
            Self::SolutionSubmitted { .. } => "solution_submitted",
            Self::BountyReleased { .. } => "bounty_released",
            Self::SolutionRejected { .. } => "solution_rejected",
        }
    }
}

/// Fan-out of escrow events to listing and notification consumers.
pub struct EventBus {
    sender: broadcast::Sender<EscrowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns how many subscribers the event reached. Zero is not an error.
    pub fn publish(&self, event: EscrowEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EscrowEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
