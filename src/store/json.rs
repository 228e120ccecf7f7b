use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::warn;

use super::{ResultStore, StoredResult};

/// File-per-result store: `<dir>/<task_id>.json`.
pub struct JsonResultStore {
    dir: PathBuf,
}

impl JsonResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create results dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", task_id))
    }
}

#[async_trait]
impl ResultStore for JsonResultStore {
    async fn save(&self, result: &StoredResult) -> Result<()> {
        let path = self.path_for(&result.task_id);
        let body = serde_json::to_vec_pretty(result)?;
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        // read back the metadata; an empty file means the write did not land
        let meta = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("result file missing after write: {}", path.display()))?;
        if meta.len() == 0 {
            bail!("result file is empty after write: {}", path.display());
        }
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<StoredResult>> {
        let path = self.path_for(task_id);
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
        };
        let result = serde_json::from_slice(&body)
            .with_context(|| format!("malformed result file {}", path.display()))?;
        Ok(Some(result))
    }

    async fn list_all(&self) -> Result<Vec<StoredResult>> {
        let mut results = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("failed to read results dir {}", self.dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(body) => match serde_json::from_slice::<StoredResult>(&body) {
                    Ok(result) => results.push(result),
                    Err(e) => warn!("Skipping malformed result {}: {}", path.display(), e),
                },
                Err(e) => warn!("Skipping unreadable result {}: {}", path.display(), e),
            }
        }

        results.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(results)
    }

    async fn clear_all(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("failed to read results dir {}", self.dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            tokio::fs::remove_file(&path)
                .await
                .with_context(|| format!("failed to remove {}", path.display()))?;
            removed += 1;
        }
        Ok(removed)
    }
}
