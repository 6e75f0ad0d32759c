//! In-memory registry of tracked scan tasks

use serde::{Deserialize, Serialize};
use vulnwatch_core::{Error, Result, TaskRecord};

/// Ordered set of task records keyed by `task_id`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    /// Records in insertion order
    #[serde(default)]
    tasks: Vec<TaskRecord>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Build a registry from records, rejecting duplicate ids
    pub fn from_records(records: Vec<TaskRecord>) -> Result<Self> {
        let mut registry = Self::new();
        for record in records {
            registry.add(record)?;
        }
        Ok(registry)
    }

    /// Register a record; `task_id` must not be tracked yet
    pub fn add(&mut self, record: TaskRecord) -> Result<()> {
        if self.find(&record.task_id).is_some() {
            return Err(Error::DuplicateTask {
                task_id: record.task_id,
            });
        }
        self.tasks.push(record);
        Ok(())
    }

    /// Remove a record, returning it
    pub fn remove(&mut self, task_id: &str) -> Result<TaskRecord> {
        let idx = self
            .tasks
            .iter()
            .position(|r| r.task_id == task_id)
            .ok_or_else(|| Error::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        Ok(self.tasks.remove(idx))
    }

    /// Get a record by task ID
    pub fn find(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|r| r.task_id == task_id)
    }

    /// Get a mutable record by task ID
    pub fn find_mut(&mut self, task_id: &str) -> Option<&mut TaskRecord> {
        self.tasks.iter_mut().find(|r| r.task_id == task_id)
    }

    /// All records in insertion order
    pub fn all(&self) -> &[TaskRecord] {
        &self.tasks
    }

    /// Iterate over records in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.iter()
    }

    /// Get number of tracked tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Consume the registry, yielding its records
    pub fn into_records(self) -> Vec<TaskRecord> {
        self.tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> TaskRecord {
        TaskRecord::new(id, format!("scan-{id}"), format!("scan-{id}_20240101_000000"))
    }

    #[test]
    fn test_registry() {
        let mut registry = Registry::new();
        registry.add(record("T1")).unwrap();
        registry.add(record("T2")).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.find("T1").is_some());
        assert!(registry.find("INVALID").is_none());

        let ids: Vec<&str> = registry.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "T2"]);
    }

    #[test]
    fn test_add_rejects_duplicate_id() {
        let mut registry = Registry::new();
        registry.add(record("T1")).unwrap();
        let err = registry.add(record("T1")).unwrap_err();
        assert!(matches!(err, Error::DuplicateTask { task_id } if task_id == "T1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_keeps_order_of_the_rest() {
        let mut registry =
            Registry::from_records(vec![record("A"), record("B"), record("C")]).unwrap();

        let removed = registry.remove("B").unwrap();
        assert_eq!(removed.task_id, "B");

        let ids: Vec<&str> = registry.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C"]);
        assert!(matches!(
            registry.remove("B"),
            Err(Error::TaskNotFound { .. })
        ));
    }
}
