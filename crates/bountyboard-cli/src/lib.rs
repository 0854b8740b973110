#![deny(unsafe_code)]

use bountyboard_adapters::{ArtifactKind, ReferenceVerifier};
use bountyboard_core::{
    resolve_submission, EscrowEngine, EscrowEngineConfig, EscrowError, InMemoryVault,
    PersistedState, Principal, StateFile, StateStorageConfig, TaskId, TokenId, VaultError,
};
use clap::Subcommand;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Escrow(#[from] EscrowError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error("output serialization failed: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Escrow(err) if err.is_fatal())
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub storage: StateStorageConfig,
    pub owner: Principal,
    /// Only applied when no persisted state exists yet.
    pub treasury: Option<Principal>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage: StateStorageConfig::Memory,
            owner: EscrowEngineConfig::default().owner,
            treasury: None,
        }
    }
}

/// Engine plus in-memory vault, hydrated from and saved to the configured storage.
pub struct Session {
    engine: EscrowEngine,
    vault: Arc<InMemoryVault>,
    file: Option<StateFile>,
}

impl Session {
    pub fn open(config: SessionConfig) -> Result<Self, CliError> {
        let engine_config = EscrowEngineConfig {
            owner: config.owner,
            penalty_sink: config.treasury,
            ..EscrowEngineConfig::default()
        };

        let file = match config.storage {
            StateStorageConfig::Memory => None,
            StateStorageConfig::File { path } => Some(StateFile::new(path)),
        };

        let persisted = match &file {
            Some(file) => file.load()?,
            None => None,
        };

        let (engine, vault) = match persisted {
            Some(state) => {
                let vault = Arc::new(InMemoryVault::from_snapshot(state.vault));
                let engine = EscrowEngine::restore(engine_config, vault.clone(), state.engine)?;
                info!(tasks = engine.task_count()?, "Restored escrow state");
                (engine, vault)
            }
            None => {
                let vault = Arc::new(InMemoryVault::new());
                let engine = EscrowEngine::new(engine_config, vault.clone());
                (engine, vault)
            }
        };

        Ok(Self {
            engine,
            vault,
            file,
        })
    }

    pub fn engine(&self) -> &EscrowEngine {
        &self.engine
    }

    pub fn vault(&self) -> &InMemoryVault {
        &self.vault
    }

    pub async fn persist(&self) -> Result<(), CliError> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let state = PersistedState {
            engine: self.engine.snapshot().await?,
            vault: self.vault.snapshot()?,
        };
        file.save(&state)?;
        info!(path = %file.path().display(), "Escrow state saved");
        Ok(())
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Credit new funds to an account.
    Fund {
        who: String,
        token: String,
        amount: u64,
    },
    /// Pre-authorise the escrow to pull up to AMOUNT from an account.
    Approve {
        who: String,
        token: String,
        amount: u64,
    },
    /// Post a task and escrow its reward.
    Post {
        #[arg(long = "as")]
        creator: String,
        #[arg(long, default_value = "USDC")]
        token: String,
        #[arg(long)]
        reward: u64,
        #[arg(long, default_value_t = 0)]
        stake: u64,
        description: String,
    },
    /// Lock the required stake and submit a solution reference.
    Submit {
        #[arg(long = "as")]
        solver: String,
        id: u64,
        reference: String,
    },
    /// Pay reward and stake to the recorded solver.
    Release { id: u64, solver: String },
    /// Slash the solver's stake and reopen the task.
    Reject {
        id: u64,
        solver: String,
        reason: String,
    },
    /// Verify the pending submission, then release or reject it.
    Verify {
        id: u64,
        #[arg(long, default_value = "text")]
        kind: ArtifactKind,
    },
    /// Print one task as JSON.
    Show { id: u64 },
    /// Print tasks still taking submissions, newest first.
    List {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Print an account's external balance and allowance.
    Balance { who: String, token: String },
    /// Set or clear the penalty sink (owner only).
    SetTreasury {
        #[arg(long = "as")]
        caller: String,
        sink: Option<String>,
    },
    /// Print audit entries, optionally for one task.
    Audit { id: Option<u64> },
    /// Run the release and rejection scenarios in memory.
    Demo,
}

impl Command {
    fn mutates(&self) -> bool {
        matches!(
            self,
            Self::Fund { .. }
                | Self::Approve { .. }
                | Self::Post { .. }
                | Self::Submit { .. }
                | Self::Release { .. }
                | Self::Reject { .. }
                | Self::Verify { .. }
                | Self::SetTreasury { .. }
        )
    }
}

/// Run one command against the session and return what to print.
pub async fn execute(session: &Session, command: Command) -> Result<String, CliError> {
    let mutates = command.mutates();
    let engine = session.engine();
    let vault = session.vault();

    let output = match command {
        Command::Fund { who, token, amount } => {
            let balance = vault.deposit(
                &Principal::new(who.as_str()),
                &TokenId::new(token.as_str()),
                amount,
            )?;
            format!("{who} now holds {balance} {token}")
        }
        Command::Approve { who, token, amount } => {
            vault.approve(
                &Principal::new(who.as_str()),
                &TokenId::new(token.as_str()),
                amount,
            )?;
            format!("{who} approved {amount} {token} for escrow")
        }
        Command::Post {
            creator,
            token,
            reward,
            stake,
            description,
        } => {
            let id = engine
                .post(
                    &Principal::new(creator),
                    &TokenId::new(token.as_str()),
                    reward,
                    stake,
                    description,
                )
                .await?;
            format!("task {id} posted: reward {reward} {token}, stake {stake} {token}")
        }
        Command::Submit {
            solver,
            id,
            reference,
        } => {
            engine
                .submit(TaskId(id), &Principal::new(solver.as_str()), reference)
                .await?;
            format!("solution from {solver} submitted to task {id}")
        }
        Command::Release { id, solver } => {
            engine
                .release(TaskId(id), &Principal::new(solver.as_str()))
                .await?;
            format!("task {id} released to {solver}")
        }
        Command::Reject { id, solver, reason } => {
            engine
                .reject(TaskId(id), &Principal::new(solver.as_str()), reason)
                .await?;
            format!("submission from {solver} on task {id} rejected, stake slashed")
        }
        Command::Verify { id, kind } => {
            let verifier = ReferenceVerifier::new(kind);
            let outcome = resolve_submission(engine, &verifier, TaskId(id)).await?;
            serde_json::to_string_pretty(&outcome)?
        }
        Command::Show { id } => serde_json::to_string_pretty(&engine.get_task(TaskId(id)).await?)?,
        Command::List { limit } => serde_json::to_string_pretty(&engine.open_tasks(limit).await?)?,
        Command::Balance { who, token } => {
            let who = Principal::new(who);
            let token = TokenId::new(token);
            format!(
                "{who}: balance {} {token}, allowance {} {token}",
                vault.balance_of(&who, &token)?,
                vault.allowance(&who, &token)?
            )
        }
        Command::SetTreasury { caller, sink } => {
            let sink = sink.map(Principal::new);
            engine.set_penalty_sink(&Principal::new(caller), sink.clone())?;
            match sink {
                Some(sink) => format!("penalty sink set to {sink}"),
                None => "penalty sink cleared, slashed stakes will be frozen".to_string(),
            }
        }
        Command::Audit { id } => {
            let entries = match id {
                Some(id) => engine.audit_for_task(TaskId(id))?,
                None => engine.audit_entries()?,
            };
            if !engine.verify_audit()? {
                warn!("Audit chain verification failed");
            }
            serde_json::to_string_pretty(&entries)?
        }
        Command::Demo => run_demo().await?.render(),
    };

    if mutates {
        session.persist().await?;
    }
    Ok(output)
}

/// Balances observed at each step of the demo.
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub steps: Vec<DemoStep>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DemoStep {
    pub label: String,
    pub creator: u64,
    pub solver_a: u64,
    pub solver_b: u64,
    pub frozen: u64,
}

impl DemoReport {
    pub fn render(&self) -> String {
        let mut out = String::from("step                              creator   solver-a  solver-b  frozen\n");
        for step in &self.steps {
            out.push_str(&format!(
                "{:<32} {:>9} {:>9} {:>9} {:>7}\n",
                step.label, step.creator, step.solver_a, step.solver_b, step.frozen
            ));
        }
        out
    }
}

/// Scenario A (submit then release) and scenario B (reject, resubmit, release) on a
/// fresh in-memory deployment.
pub async fn run_demo() -> Result<DemoReport, CliError> {
    const REWARD: u64 = 5_000_000;
    const STAKE: u64 = 2_000_000;

    let vault = Arc::new(InMemoryVault::new());
    let engine = EscrowEngine::new(EscrowEngineConfig::default(), vault.clone());
    let usdc = TokenId::new("USDC");
    let creator = Principal::new("creator");
    let solver_a = Principal::new("solver-a");
    let solver_b = Principal::new("solver-b");
    for who in [&creator, &solver_a, &solver_b] {
        vault.deposit(who, &usdc, 20_000_000)?;
        vault.approve(who, &usdc, 20_000_000)?;
    }

    let mut steps = Vec::new();
    let mut record = |label: &str| -> Result<(), CliError> {
        steps.push(DemoStep {
            label: label.to_string(),
            creator: vault.balance_of(&creator, &usdc)?,
            solver_a: vault.balance_of(&solver_a, &usdc)?,
            solver_b: vault.balance_of(&solver_b, &usdc)?,
            frozen: vault.frozen(&usdc)?,
        });
        Ok(())
    };

    record("start")?;
    let a = engine.post(&creator, &usdc, REWARD, STAKE, "haiku").await?;
    engine.submit(a, &solver_a, "ipfs://x").await?;
    record("A: solver-a submitted")?;
    engine.release(a, &solver_a).await?;
    record("A: released to solver-a")?;

    let b = engine
        .post(&creator, &usdc, REWARD, STAKE, "haiku again")
        .await?;
    engine.submit(b, &solver_a, "ipfs://x").await?;
    engine.reject(b, &solver_a, "low quality").await?;
    record("B: solver-a rejected")?;
    engine.submit(b, &solver_b, "ipfs://y").await?;
    engine.release(b, &solver_b).await?;
    record("B: released to solver-b")?;

    Ok(DemoReport { steps })
}
