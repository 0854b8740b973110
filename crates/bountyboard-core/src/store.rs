use crate::error::EscrowError;
use crate::types::{Task, TaskId};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error};

type TaskCell = Arc<AsyncMutex<Task>>;

/// Authoritative, append-only map from task id to task record.
///
/// Each record sits behind its own async mutex: transitions on one task are
/// serialized while different tasks proceed in parallel. Records are never removed.
#[derive(Debug, Default)]
pub struct TaskStore {
    next_id: AtomicU64,
    records: RwLock<BTreeMap<TaskId, TaskCell>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted records. Ids must be exactly `0..next_id`.
    pub fn restore(tasks: Vec<Task>, next_id: u64) -> Result<Self, EscrowError> {
        let mut records = BTreeMap::new();
        for task in tasks {
            let id = task.id();
            if id.value() >= next_id {
                return Err(EscrowError::Storage(format!(
                    "task {id} is beyond allocator position {next_id}"
                )));
            }
            if records.insert(id, Arc::new(AsyncMutex::new(task))).is_some() {
                return Err(EscrowError::DuplicateId(id));
            }
        }
        if records.len() as u64 != next_id {
            return Err(EscrowError::Storage(format!(
                "task id gap: {} records for allocator position {next_id}",
                records.len()
            )));
        }

        Ok(Self {
            next_id: AtomicU64::new(next_id),
            records: RwLock::new(records),
        })
    }

    /// Id that the next `allocate` will hand out.
    pub fn peek_next(&self) -> TaskId {
        TaskId(self.next_id.load(Ordering::SeqCst))
    }

    /// Hand out the next id and advance. Never rewinds.
    pub fn allocate(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn insert(&self, id: TaskId, task: Task) -> Result<(), EscrowError> {
        if task.id() != id {
            return Err(EscrowError::InvalidInput(format!(
                "record for task {} inserted under id {id}",
                task.id()
            )));
        }
        let mut records = self.write()?;
        if records.contains_key(&id) {
            error!(task_id = %id, "Duplicate task id, allocator invariant broken");
            return Err(EscrowError::DuplicateId(id));
        }
        records.insert(id, Arc::new(AsyncMutex::new(task)));
        Ok(())
    }

    /// Current copy of a record.
    pub async fn get(&self, id: TaskId) -> Result<Task, EscrowError> {
        let cell = self.cell(id)?;
        let task = cell.lock().await;
        Ok(task.clone())
    }

    /// Exclusive access to one record. Hold the guard across the whole transition,
    /// including any fund movement, so no other transition observes a stale state.
    pub async fn lock(&self, id: TaskId) -> Result<OwnedMutexGuard<Task>, EscrowError> {
        let cell = self.cell(id)?;
        let guard = cell.lock_owned().await;
        debug!(task_id = %id, "Task lock acquired");
        Ok(guard)
    }

    /// Apply a synchronous mutator under the record's lock.
    pub async fn update<T, F>(&self, id: TaskId, mutator: F) -> Result<T, EscrowError>
    where
        F: FnOnce(&mut Task) -> Result<T, EscrowError>,
    {
        let mut guard = self.lock(id).await?;
        mutator(&mut guard)
    }

    pub fn len(&self) -> Result<usize, EscrowError> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, EscrowError> {
        Ok(self.read()?.is_empty())
    }

    /// Copies of every record in id order.
    pub async fn all(&self) -> Result<Vec<Task>, EscrowError> {
        let cells: Vec<TaskCell> = self.read()?.values().cloned().collect();
        let mut tasks = Vec::with_capacity(cells.len());
        for cell in cells {
            tasks.push(cell.lock().await.clone());
        }
        Ok(tasks)
    }

    fn cell(&self, id: TaskId) -> Result<TaskCell, EscrowError> {
        self.read()?
            .get(&id)
            .cloned()
            .ok_or(EscrowError::NotFound(id))
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<TaskId, TaskCell>>, EscrowError> {
        self.records
            .read()
            .map_err(|_| EscrowError::Storage("task store lock poisoned".to_string()))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<TaskId, TaskCell>>, EscrowError> {
        self.records
            .write()
            .map_err(|_| EscrowError::Storage("task store lock poisoned".to_string()))
    }
}
