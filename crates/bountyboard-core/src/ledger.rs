use crate::error::EscrowError;
use crate::events::EscrowEvent;
use crate::types::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Hash-chained audit record of one escrow transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub index: u64,
    pub task_id: TaskId,
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

/// Append-only audit log. There is no API to edit or drop entries.
#[derive(Debug, Default, Clone)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Rebuild from persisted entries, checking index continuity and the hash chain.
    pub fn from_entries(entries: Vec<AuditEntry>) -> Result<Self, EscrowError> {
        let log = Self { entries };

        for (expected_index, entry) in log.entries.iter().enumerate() {
            if entry.index != expected_index as u64 {
                return Err(EscrowError::Ledger(format!(
                    "audit index gap at position {} (found {})",
                    expected_index, entry.index
                )));
            }
        }

        if !log.verify_chain() {
            return Err(EscrowError::Ledger(
                "persisted audit hash-chain verification failed".to_string(),
            ));
        }

        Ok(log)
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries_for_task(&self, task_id: TaskId) -> Vec<&AuditEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.task_id == task_id)
            .collect()
    }

    pub fn append_event(&mut self, event: &EscrowEvent) -> Result<AuditEntry, EscrowError> {
        let payload =
            serde_json::to_value(event).map_err(|e| EscrowError::Serialization(e.to_string()))?;
        let index = self.entries.len() as u64;
        let timestamp = Utc::now();
        let previous_hash = self.entries.last().map(|entry| entry.entry_hash.clone());
        let kind = event.name().to_string();
        let entry_hash = compute_entry_hash(
            index,
            event.task_id(),
            &kind,
            timestamp,
            &payload,
            previous_hash.as_deref(),
        );

        let entry = AuditEntry {
            entry_id: Uuid::new_v4().to_string(),
            index,
            task_id: event.task_id(),
            kind,
            timestamp,
            payload,
            previous_hash,
            entry_hash,
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    pub fn verify_chain(&self) -> bool {
        let mut previous_hash: Option<String> = None;
        for entry in &self.entries {
            let expected_hash = compute_entry_hash(
                entry.index,
                entry.task_id,
                &entry.kind,
                entry.timestamp,
                &entry.payload,
                previous_hash.as_deref(),
            );
            if entry.entry_hash != expected_hash || entry.previous_hash != previous_hash {
                return false;
            }
            previous_hash = Some(entry.entry_hash.clone());
        }
        true
    }
}

fn compute_entry_hash(
    index: u64,
    task_id: TaskId,
    kind: &str,
    timestamp: DateTime<Utc>,
    payload: &Value,
    previous_hash: Option<&str>,
) -> String {
    let material = serde_json::json!({
        "index": index,
        "task_id": task_id,
        "kind": kind,
        "timestamp": timestamp,
        "payload": payload,
        "previous_hash": previous_hash,
    });

    let bytes = serde_json::to_vec(&material).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}
