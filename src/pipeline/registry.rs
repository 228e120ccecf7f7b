use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::warn;

use super::types::TaskSnapshot;

/// In-memory map of task id to its latest snapshot. This is the single
/// source of truth a polling client reads; durable results live in the
/// store. Entries are never expired automatically, only removed by an
/// explicit clear.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, TaskSnapshot>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fresh Pending snapshot. No-op if the id already exists.
    pub async fn create(&self, id: &str) {
        let mut tasks = self.tasks.lock().await;
        tasks
            .entry(id.to_string())
            .or_insert_with(|| TaskSnapshot::new(id.to_string()));
    }

    /// Replaces the whole snapshot. Terminal records are immutable; while a
    /// task is live its progress never moves backwards.
    pub async fn update(&self, id: &str, mut snapshot: TaskSnapshot) {
        let mut tasks = self.tasks.lock().await;
        match tasks.get(id) {
            Some(current) if current.is_terminal() => {
                warn!("Ignoring update for terminal task {}", id);
            }
            Some(current) => {
                if snapshot.progress < current.progress {
                    snapshot.progress = current.progress;
                }
                tasks.insert(id.to_string(), snapshot);
            }
            None => {
                tasks.insert(id.to_string(), snapshot);
            }
        }
    }

    pub async fn get(&self, id: &str) -> Option<TaskSnapshot> {
        self.tasks.lock().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) {
        self.tasks.lock().await.remove(id);
    }

    pub async fn list_all(&self) -> Vec<TaskSnapshot> {
        self.tasks.lock().await.values().cloned().collect()
    }

    /// Drops terminal entries, returning how many were removed.
    pub async fn clear_terminal(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|_, snapshot| !snapshot.is_terminal());
        before - tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::TaskState;

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let registry = TaskRegistry::new();
        registry.create("t1").await;

        let mut snapshot = registry.get("t1").await.unwrap();
        snapshot.progress = 50.0;
        registry.update("t1", snapshot).await;

        registry.create("t1").await;
        assert_eq!(registry.get("t1").await.unwrap().progress, 50.0);
    }

    #[tokio::test]
    async fn test_progress_is_monotone() {
        let registry = TaskRegistry::new();
        registry.create("t1").await;

        let mut snapshot = registry.get("t1").await.unwrap();
        snapshot.progress = 60.0;
        registry.update("t1", snapshot.clone()).await;

        snapshot.progress = 30.0;
        snapshot.message = "late update".to_string();
        registry.update("t1", snapshot).await;

        let current = registry.get("t1").await.unwrap();
        assert_eq!(current.progress, 60.0);
        assert_eq!(current.message, "late update");
    }

    #[tokio::test]
    async fn test_terminal_snapshot_is_immutable() {
        let registry = TaskRegistry::new();
        registry.create("t1").await;

        let mut snapshot = registry.get("t1").await.unwrap();
        snapshot.state = TaskState::Completed;
        snapshot.progress = 100.0;
        registry.update("t1", snapshot.clone()).await;

        snapshot.state = TaskState::Transcribing;
        snapshot.progress = 10.0;
        registry.update("t1", snapshot).await;

        let current = registry.get("t1").await.unwrap();
        assert_eq!(current.state, TaskState::Completed);
        assert_eq!(current.progress, 100.0);
    }

    #[tokio::test]
    async fn test_clear_terminal_counts() {
        let registry = TaskRegistry::new();
        for id in ["a", "b", "c"] {
            registry.create(id).await;
        }
        let mut done = registry.get("a").await.unwrap();
        done.state = TaskState::Failed;
        registry.update("a", done).await;

        assert_eq!(registry.clear_terminal().await, 1);
        assert!(registry.get("a").await.is_none());
        assert_eq!(registry.list_all().await.len(), 2);
    }
}
