use crate::engine::EngineSnapshot;
use crate::error::EscrowError;
use crate::types::{TaskId, TokenId};
use crate::vault::VaultSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Where engine and vault state live between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StateStorageConfig {
    /// Process memory only; everything is lost on exit.
    #[default]
    Memory,
    /// JSON state file, rewritten after every mutation.
    File { path: PathBuf },
}

impl StateStorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File { path: path.into() }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File { .. } => "file",
        }
    }
}

/// Combined persisted state of one escrow deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub engine: EngineSnapshot,
    pub vault: VaultSnapshot,
}

impl PersistedState {
    /// Vault custody for every task must equal what the task still owes: the
    /// reward while open, reward plus stake while submitted, nothing once released.
    pub fn check_custody(&self) -> Result<(), EscrowError> {
        let mut held: BTreeMap<(TokenId, TaskId), u64> = BTreeMap::new();
        for (token, tasks) in &self.vault.custody {
            for (task_id, amount) in tasks {
                held.insert((token.clone(), *task_id), *amount);
            }
        }

        for task in &self.engine.tasks {
            let owed = task.escrowed_liability();
            let have = held.remove(&(task.token().clone(), task.id())).unwrap_or(0);
            if have != owed {
                return Err(EscrowError::Storage(format!(
                    "task {} owes {owed} {} but custody holds {have}",
                    task.id(),
                    task.token()
                )));
            }
        }

        if let Some(((token, task_id), have)) = held.into_iter().find(|(_, amount)| *amount > 0) {
            return Err(EscrowError::Storage(format!(
                "custody holds {have} {token} for unknown task {task_id}"
            )));
        }
        Ok(())
    }
}

/// File-backed state, written atomically via a temporary sibling.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when the file is missing or empty. Refuses state whose custody
    /// does not match the task records.
    pub fn load(&self) -> Result<Option<PersistedState>, EscrowError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)
            .map_err(|e| EscrowError::Storage(format!("read {}: {e}", self.path.display())))?;
        if bytes.is_empty() {
            return Ok(None);
        }
        let state: PersistedState = serde_json::from_slice(&bytes)
            .map_err(|e| EscrowError::Serialization(e.to_string()))?;
        state.check_custody()?;
        Ok(Some(state))
    }

    pub fn save(&self, state: &PersistedState) -> Result<(), EscrowError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    EscrowError::Storage(format!("create {}: {e}", parent.display()))
                })?;
            }
        }

        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| EscrowError::Serialization(e.to_string()))?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, bytes)
            .map_err(|e| EscrowError::Storage(format!("write {}: {e}", tmp_path.display())))?;
        fs::rename(&tmp_path, &self.path)
            .map_err(|e| EscrowError::Storage(format!("rename {}: {e}", self.path.display())))?;
        Ok(())
    }
}
