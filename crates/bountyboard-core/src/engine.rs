use crate::error::EscrowError;
use crate::events::{EscrowEvent, EventBus};
use crate::ledger::{AuditEntry, AuditLog};
use crate::store::TaskStore;
use crate::types::{Principal, Task, TaskId, TaskState, TaskSummary, TokenId};
use crate::vault::{Forfeiture, FundTransfer};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

/// Escrow engine configuration.
#[derive(Debug, Clone)]
pub struct EscrowEngineConfig {
    /// Only this principal may change the penalty sink.
    pub owner: Principal,
    /// Receiver of slashed stakes. `None` freezes them in vault custody.
    pub penalty_sink: Option<Principal>,
    pub event_capacity: usize,
}

impl Default for EscrowEngineConfig {
    fn default() -> Self {
        Self {
            owner: Principal::new("bountyboard-admin"),
            penalty_sink: None,
            event_capacity: 1024,
        }
    }
}

/// Persistable engine state. Vault balances are owned by the vault and saved separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub next_task_id: u64,
    pub penalty_sink: Option<Principal>,
    pub tasks: Vec<Task>,
    pub audit: Vec<AuditEntry>,
}

/// Resolution engine: post, submit, release and reject as atomic transitions over
/// the task store and the fund-transfer backend.
///
/// A transition holds the task's lock from the status check until the record is
/// updated, with the fund movement in between. If the movement fails the record is
/// left untouched.
pub struct EscrowEngine {
    store: TaskStore,
    vault: Arc<dyn FundTransfer>,
    owner: Principal,
    penalty_sink: RwLock<Option<Principal>>,
    events: EventBus,
    audit: Mutex<AuditLog>,
    // Serializes id peek, reward lock and allocation so ids stay dense.
    posting: AsyncMutex<()>,
}

impl EscrowEngine {
    pub fn new(config: EscrowEngineConfig, vault: Arc<dyn FundTransfer>) -> Self {
        Self {
            store: TaskStore::new(),
            vault,
            owner: config.owner,
            penalty_sink: RwLock::new(config.penalty_sink),
            events: EventBus::new(config.event_capacity),
            audit: Mutex::new(AuditLog::new()),
            posting: AsyncMutex::new(()),
        }
    }

    /// Rebuild an engine from a snapshot. The snapshot's penalty sink wins over the config's.
    pub fn restore(
        config: EscrowEngineConfig,
        vault: Arc<dyn FundTransfer>,
        snapshot: EngineSnapshot,
    ) -> Result<Self, EscrowError> {
        let store = TaskStore::restore(snapshot.tasks, snapshot.next_task_id)?;
        let audit = AuditLog::from_entries(snapshot.audit)?;

        Ok(Self {
            store,
            vault,
            owner: config.owner,
            penalty_sink: RwLock::new(snapshot.penalty_sink),
            events: EventBus::new(config.event_capacity),
            audit: Mutex::new(audit),
            posting: AsyncMutex::new(()),
        })
    }

    pub fn vault(&self) -> &Arc<dyn FundTransfer> {
        &self.vault
    }

    pub fn owner(&self) -> &Principal {
        &self.owner
    }

    /// Post a task and escrow its reward. Nothing is recorded if the reward lock fails.
    pub async fn post(
        &self,
        creator: &Principal,
        token: &TokenId,
        reward_amount: u64,
        required_stake: u64,
        description: impl Into<String>,
    ) -> Result<TaskId, EscrowError> {
        let description = description.into();
        if reward_amount.checked_add(required_stake).is_none() {
            return Err(EscrowError::InvalidInput(
                "reward plus stake overflows u64".to_string(),
            ));
        }

        let _posting = self.posting.lock().await;
        let id = self.store.peek_next();

        if reward_amount > 0 {
            if let Err(err) = self.vault.lock(id, creator, token, reward_amount).await {
                warn!(creator = %creator, token = %token, reward_amount, error = %err, "Reward lock failed, task not posted");
                return Err(EscrowError::transfer(err));
            }
        }

        let allocated = self.store.allocate();
        let inserted = if allocated == id {
            let task = Task::new(
                id,
                creator.clone(),
                token.clone(),
                reward_amount,
                required_stake,
                description.clone(),
            );
            self.store.insert(id, task)
        } else {
            Err(EscrowError::DuplicateId(allocated))
        };

        if let Err(err) = inserted {
            error!(task_id = %id, error = %err, "Task insert failed after reward lock, returning reward");
            if reward_amount > 0 {
                if let Err(refund) = self.vault.release(id, creator, token, reward_amount).await {
                    error!(task_id = %id, error = %refund, "Reward refund failed");
                }
            }
            return Err(err);
        }

        info!(task_id = %id, creator = %creator, token = %token, reward_amount, required_stake, "Task posted");
        self.emit(EscrowEvent::TaskPosted {
            task_id: id,
            creator: creator.clone(),
            token: token.clone(),
            reward_amount,
            required_stake,
            description,
        });
        Ok(id)
    }

    /// Lock the solver's stake and record their solution as the task's single active claim.
    pub async fn submit(
        &self,
        id: TaskId,
        solver: &Principal,
        solution_reference: impl Into<String>,
    ) -> Result<(), EscrowError> {
        let solution_reference = solution_reference.into();
        let mut task = self.store.lock(id).await?;

        match task.state() {
            TaskState::Open | TaskState::SlashedOpen => {}
            TaskState::Submitted(pending) => {
                warn!(task_id = %id, solver = %solver, pending = %pending.solver, "Submit refused, claim pending");
                return Err(EscrowError::invalid_state(
                    id,
                    "submit",
                    task.status(),
                    format!("pending submission from {}", pending.solver),
                ));
            }
            TaskState::Released { .. } => {
                warn!(task_id = %id, solver = %solver, "Submit refused, task released");
                return Err(EscrowError::invalid_state(
                    id,
                    "submit",
                    task.status(),
                    "task already released",
                ));
            }
        }

        if solution_reference.trim().is_empty() {
            return Err(EscrowError::InvalidInput(
                "solution reference must not be empty".to_string(),
            ));
        }

        let stake = task.required_stake();
        if stake > 0 {
            self.vault
                .lock(id, solver, task.token(), stake)
                .await
                .map_err(|err| {
                    warn!(task_id = %id, solver = %solver, stake, error = %err, "Stake lock failed");
                    EscrowError::from_lock(err)
                })?;
        }

        task.mark_submitted(solver.clone(), solution_reference.clone());
        info!(task_id = %id, solver = %solver, stake, "Solution submitted");
        self.emit(EscrowEvent::SolutionSubmitted {
            task_id: id,
            solver: solver.clone(),
            solution_reference,
        });
        Ok(())
    }

    /// Pay reward plus the returned stake to the recorded solver and close the task.
    pub async fn release(&self, id: TaskId, solver: &Principal) -> Result<(), EscrowError> {
        let mut task = self.store.lock(id).await?;
        check_claim(&task, "release", solver)?;

        let reward = task.reward_amount();
        let stake = task.required_stake();
        let payout = reward
            .checked_add(stake)
            .ok_or_else(|| EscrowError::InvalidInput("payout overflows u64".to_string()))?;
        if payout > 0 {
            self.vault
                .release(id, solver, task.token(), payout)
                .await
                .map_err(|err| {
                    warn!(task_id = %id, solver = %solver, payout, error = %err, "Payout failed");
                    EscrowError::transfer(err)
                })?;
        }

        task.mark_released(solver.clone());
        info!(task_id = %id, solver = %solver, reward, stake, "Bounty released");
        self.emit(EscrowEvent::BountyReleased {
            task_id: id,
            solver: solver.clone(),
            amount: reward,
            stake_return: stake,
        });
        Ok(())
    }

    /// Slash the solver's stake and reopen the task. The stake never goes to the creator.
    pub async fn reject(
        &self,
        id: TaskId,
        solver: &Principal,
        reason: impl Into<String>,
    ) -> Result<(), EscrowError> {
        let reason = reason.into();
        let mut task = self.store.lock(id).await?;
        check_claim(&task, "reject", solver)?;

        let stake = task.required_stake();
        let sink = match self.penalty_sink()? {
            Some(sink) if &sink == task.creator() => {
                warn!(task_id = %id, sink = %sink, "Penalty sink is the task creator, freezing stake instead");
                None
            }
            sink => sink,
        };
        let forfeiture = if stake > 0 {
            self.vault
                .forfeit(id, task.token(), stake, sink.as_ref())
                .await
                .map_err(|err| {
                    warn!(task_id = %id, solver = %solver, stake, error = %err, "Stake forfeit failed");
                    EscrowError::transfer(err)
                })?
        } else {
            match sink {
                Some(sink) => Forfeiture::Sink(sink),
                None => Forfeiture::Frozen,
            }
        };

        task.mark_slashed();
        let sink = match forfeiture {
            Forfeiture::Sink(sink) => Some(sink),
            Forfeiture::Frozen => None,
        };
        info!(
            task_id = %id,
            solver = %solver,
            stake_slashed = stake,
            sink = sink.as_ref().map(|s| s.as_str()).unwrap_or("frozen"),
            rejections = task.rejections(),
            "Solution rejected"
        );
        self.emit(EscrowEvent::SolutionRejected {
            task_id: id,
            solver: solver.clone(),
            reason,
            stake_slashed: stake,
            sink,
        });
        Ok(())
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task, EscrowError> {
        self.store.get(id).await
    }

    pub fn task_count(&self) -> Result<usize, EscrowError> {
        self.store.len()
    }

    /// Tasks still taking submissions, newest first.
    pub async fn open_tasks(&self, limit: usize) -> Result<Vec<TaskSummary>, EscrowError> {
        let tasks = self.store.all().await?;
        Ok(tasks
            .iter()
            .rev()
            .filter(|task| task.status().accepts_submissions())
            .take(limit)
            .map(Task::summary)
            .collect())
    }

    pub fn penalty_sink(&self) -> Result<Option<Principal>, EscrowError> {
        self.penalty_sink
            .read()
            .map(|sink| sink.clone())
            .map_err(|_| EscrowError::Storage("penalty sink lock poisoned".to_string()))
    }

    /// Set or clear the penalty sink. Owner only; affects later rejections only.
    pub fn set_penalty_sink(
        &self,
        caller: &Principal,
        sink: Option<Principal>,
    ) -> Result<(), EscrowError> {
        if caller != &self.owner {
            warn!(caller = %caller, "Penalty sink change refused");
            return Err(EscrowError::Unauthorized(format!(
                "{caller} is not the escrow owner"
            )));
        }
        let mut current = self
            .penalty_sink
            .write()
            .map_err(|_| EscrowError::Storage("penalty sink lock poisoned".to_string()))?;
        info!(
            previous = current.as_ref().map(|s| s.as_str()).unwrap_or("none"),
            next = sink.as_ref().map(|s| s.as_str()).unwrap_or("none"),
            "Penalty sink updated"
        );
        *current = sink;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EscrowEvent> {
        self.events.subscribe()
    }

    pub fn audit_entries(&self) -> Result<Vec<AuditEntry>, EscrowError> {
        Ok(self.audit_log()?.entries().to_vec())
    }

    pub fn audit_for_task(&self, id: TaskId) -> Result<Vec<AuditEntry>, EscrowError> {
        Ok(self
            .audit_log()?
            .entries_for_task(id)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn verify_audit(&self) -> Result<bool, EscrowError> {
        Ok(self.audit_log()?.verify_chain())
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot, EscrowError> {
        let _posting = self.posting.lock().await;
        let tasks = self.store.all().await?;
        Ok(EngineSnapshot {
            next_task_id: self.store.peek_next().value(),
            penalty_sink: self.penalty_sink()?,
            tasks,
            audit: self.audit_entries()?,
        })
    }

    fn emit(&self, event: EscrowEvent) {
        match self.audit_log() {
            Ok(mut log) => {
                if let Err(err) = log.append_event(&event) {
                    error!(task_id = %event.task_id(), error = %err, "Audit append failed");
                }
            }
            Err(err) => error!(task_id = %event.task_id(), error = %err, "Audit log unavailable"),
        }
        let task_id = event.task_id();
        let reached = self.events.publish(event);
        debug!(task_id = %task_id, subscribers = reached, "Event published");
    }

    fn audit_log(&self) -> Result<std::sync::MutexGuard<'_, AuditLog>, EscrowError> {
        self.audit
            .lock()
            .map_err(|_| EscrowError::Ledger("audit log lock poisoned".to_string()))
    }
}

fn check_claim(
    task: &Task,
    operation: &'static str,
    solver: &Principal,
) -> Result<(), EscrowError> {
    let Some(submission) = task.submission() else {
        warn!(task_id = %task.id(), operation, status = %task.status(), "No pending submission");
        return Err(EscrowError::invalid_state(
            task.id(),
            operation,
            task.status(),
            "no pending submission",
        ));
    };
    if &submission.solver != solver {
        warn!(task_id = %task.id(), operation, solver = %solver, recorded = %submission.solver, "Solver mismatch");
        return Err(EscrowError::invalid_state(
            task.id(),
            operation,
            task.status(),
            format!("{solver} is not the recorded submitter"),
        ));
    }
    Ok(())
}
