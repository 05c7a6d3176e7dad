//! Task-list store
//!
//! Tasks are an ordered sequence persisted as a JSON document under the
//! fixed `"tasks"` key.

use crate::{ParlanceError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One stored task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: u64,
    pub text: String,
    pub completed: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TaskDocument {
    tasks: Vec<TaskRecord>,
}

/// Store seam for the task list
pub trait TaskStore: Send + Sync {
    /// Append a task and return the stored record
    fn add(&self, text: &str) -> Result<TaskRecord>;

    /// All tasks in insertion order
    fn list(&self) -> Result<Vec<TaskRecord>>;
}

/// In-memory store for tests and ephemeral installs
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<Vec<TaskRecord>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryTaskStore {
    fn add(&self, text: &str) -> Result<TaskRecord> {
        let mut tasks = self.tasks.write();
        let record = TaskRecord {
            id: tasks.last().map(|t| t.id + 1).unwrap_or(1),
            text: text.to_string(),
            completed: false,
        };
        tasks.push(record.clone());
        Ok(record)
    }

    fn list(&self) -> Result<Vec<TaskRecord>> {
        Ok(self.tasks.read().clone())
    }
}

/// File-backed store; the whole document is rewritten on every append
#[derive(Debug)]
pub struct JsonTaskStore {
    path: PathBuf,
    tasks: RwLock<Vec<TaskRecord>>,
}

impl JsonTaskStore {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tasks = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let doc: TaskDocument = serde_json::from_str(&raw)
                .map_err(|e| ParlanceError::Storage(format!("Corrupt task store: {}", e)))?;
            doc.tasks
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            tasks: RwLock::new(tasks),
        })
    }

    fn persist(&self, tasks: &[TaskRecord]) -> Result<()> {
        let doc = TaskDocument {
            tasks: tasks.to_vec(),
        };
        let raw = serde_json::to_string_pretty(&doc)
            .map_err(|e| ParlanceError::Storage(e.to_string()))?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

impl TaskStore for JsonTaskStore {
    fn add(&self, text: &str) -> Result<TaskRecord> {
        let mut tasks = self.tasks.write();
        let record = TaskRecord {
            id: tasks.last().map(|t| t.id + 1).unwrap_or(1),
            text: text.to_string(),
            completed: false,
        };
        tasks.push(record.clone());
        self.persist(&tasks)?;
        Ok(record)
    }

    fn list(&self) -> Result<Vec<TaskRecord>> {
        Ok(self.tasks.read().clone())
    }
}
