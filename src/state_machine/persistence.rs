use super::errors::{PersistenceError, PersistenceResult};
use crate::models::run_instance::RunInstance;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

/// Durable storage for run records.
///
/// Every state change is saved before the corresponding event is published, so a
/// restarted process resumes from the last saved snapshot. A run that was saved
/// in a terminal status is immutable; saving a different snapshot over it fails.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist the full run snapshot
    async fn save(&self, run: &RunInstance) -> PersistenceResult<()>;

    /// Load a run snapshot, `None` if it was never saved
    async fn load(&self, run_id: Uuid) -> PersistenceResult<Option<RunInstance>>;

    /// Ids of every stored run
    async fn list(&self) -> PersistenceResult<Vec<Uuid>>;
}

fn check_overwrite(existing: Option<&RunInstance>, incoming: &RunInstance) -> PersistenceResult<()> {
    match existing {
        Some(stored) if stored.status.is_terminal() && stored != incoming => {
            Err(PersistenceError::TerminalRunImmutable {
                run_id: incoming.run_id.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// Process-local store, used by tests and dry runs
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<Uuid, RunInstance>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn save(&self, run: &RunInstance) -> PersistenceResult<()> {
        let mut runs = self.runs.write();
        check_overwrite(runs.get(&run.run_id), run)?;
        runs.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> PersistenceResult<Option<RunInstance>> {
        Ok(self.runs.read().get(&run_id).cloned())
    }

    async fn list(&self) -> PersistenceResult<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = self.runs.read().keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

/// One JSON document per run under a state directory.
///
/// Writes go to a temporary file that is flushed to disk and renamed over the
/// previous snapshot, so a crash or power loss mid-write leaves the last complete
/// snapshot in place. A run's file is read at most once per store to learn whether
/// it is already terminal; after that the store tracks it in memory.
#[derive(Debug, Clone, Default)]
pub struct FileRunStore {
    directory: PathBuf,
    sealed: Arc<DashMap<Uuid, RunInstance>>,
    writable: Arc<DashSet<Uuid>>,
}

impl FileRunStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn run_path(&self, run_id: Uuid) -> PathBuf {
        self.directory.join(format!("{run_id}.json"))
    }

    async fn read_snapshot(&self, run_id: Uuid) -> PersistenceResult<Option<RunInstance>> {
        let path = self.run_path(run_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PersistenceError::LoadFailed {
                    run_id: run_id.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| PersistenceError::LoadFailed {
                run_id: run_id.to_string(),
                reason: format!("corrupt snapshot {}: {e}", path.display()),
            })
    }

    async fn write_snapshot(&self, run: &RunInstance) -> PersistenceResult<()> {
        tokio::fs::create_dir_all(&self.directory).await?;

        let payload = serde_json::to_vec_pretty(run)?;
        let final_path = self.run_path(run.run_id);
        let temp_path = self.directory.join(format!("{}.json.tmp", run.run_id));
        let save_failed = |e: std::io::Error| PersistenceError::SaveFailed {
            run_id: run.run_id.to_string(),
            reason: e.to_string(),
        };

        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(save_failed)?;
        file.write_all(&payload).await.map_err(save_failed)?;
        file.sync_all().await.map_err(save_failed)?;
        drop(file);

        tokio::fs::rename(&temp_path, &final_path)
            .await
            .map_err(save_failed)?;

        // make the rename itself durable
        #[cfg(unix)]
        {
            let directory = tokio::fs::File::open(&self.directory)
                .await
                .map_err(save_failed)?;
            directory.sync_all().await.map_err(save_failed)?;
        }

        debug!(
            run_id = %run.run_id,
            status = %run.status,
            path = %final_path.display(),
            "Saved run snapshot"
        );
        Ok(())
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn save(&self, run: &RunInstance) -> PersistenceResult<()> {
        if let Some(stored) = self.sealed.get(&run.run_id) {
            // identical snapshot is already on disk
            return check_overwrite(Some(stored.value()), run);
        }

        if !self.writable.contains(&run.run_id) {
            if let Some(stored) = self.read_snapshot(run.run_id).await? {
                if stored.status.is_terminal() {
                    check_overwrite(Some(&stored), run)?;
                    self.sealed.insert(run.run_id, stored);
                    return Ok(());
                }
            }
            self.writable.insert(run.run_id);
        }

        self.write_snapshot(run).await?;

        if run.status.is_terminal() {
            self.writable.remove(&run.run_id);
            self.sealed.insert(run.run_id, run.clone());
        }
        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> PersistenceResult<Option<RunInstance>> {
        self.read_snapshot(run_id).await
    }

    async fn list(&self) -> PersistenceResult<Vec<Uuid>> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| Uuid::parse_str(stem).ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::run_instance::RunRequest;
    use crate::models::runbook::{RunbookDefinition, RunbookTemplate, StepKind, StepSpec};
    use crate::state_machine::states::RunStatus;
    use chrono::Utc;

    fn sample_run() -> RunInstance {
        let definition = RunbookDefinition::load(RunbookTemplate::new(
            "month-end",
            vec![StepSpec::new("close_books", StepKind::NoOp)],
        ))
        .unwrap();
        RunInstance::new(&definition, RunRequest::default(), Utc::now())
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = InMemoryRunStore::new();
        let run = sample_run();
        store.save(&run).await.unwrap();

        assert_eq!(store.load(run.run_id).await.unwrap(), Some(run.clone()));
        assert_eq!(store.list().await.unwrap(), vec![run.run_id]);
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_terminal_run_is_immutable() {
        let store = InMemoryRunStore::new();
        let mut run = sample_run();
        run.status = RunStatus::Succeeded;
        store.save(&run).await.unwrap();
        // identical snapshot is accepted
        store.save(&run).await.unwrap();

        run.terminal_detail = Some("rewritten".to_string());
        let err = store.save(&run).await.unwrap_err();
        assert!(matches!(err, PersistenceError::TerminalRunImmutable { .. }));
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path().join("runs"));
        assert!(store.list().await.unwrap().is_empty());

        let mut run = sample_run();
        store.save(&run).await.unwrap();
        run.status = RunStatus::Running;
        store.save(&run).await.unwrap();

        let loaded = store.load(run.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert_eq!(store.list().await.unwrap(), vec![run.run_id]);
        assert!(!dir
            .path()
            .join("runs")
            .join(format!("{}.json.tmp", run.run_id))
            .exists());
    }

    #[tokio::test]
    async fn test_file_store_reads_existing_snapshot_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path());
        let mut run = sample_run();
        store.save(&run).await.unwrap();

        // later saves of a known run never parse the previous snapshot
        let path = dir.path().join(format!("{}.json", run.run_id));
        std::fs::write(&path, b"{not json").unwrap();
        run.status = RunStatus::Running;
        store.save(&run).await.unwrap();

        assert_eq!(
            store.load(run.run_id).await.unwrap().unwrap().status,
            RunStatus::Running
        );
    }

    #[tokio::test]
    async fn test_file_store_terminal_run_is_immutable() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = sample_run();
        run.status = RunStatus::Succeeded;

        let store = FileRunStore::new(dir.path());
        store.save(&run).await.unwrap();
        store.save(&run).await.unwrap();

        let mut rewritten = run.clone();
        rewritten.terminal_detail = Some("rewritten".to_string());
        assert!(matches!(
            store.save(&rewritten).await.unwrap_err(),
            PersistenceError::TerminalRunImmutable { .. }
        ));

        // a fresh store learns the terminal status from disk
        let restarted = FileRunStore::new(dir.path());
        assert!(matches!(
            restarted.save(&rewritten).await.unwrap_err(),
            PersistenceError::TerminalRunImmutable { .. }
        ));
        restarted.save(&run).await.unwrap();
        assert_eq!(restarted.load(run.run_id).await.unwrap(), Some(run));
    }

    #[tokio::test]
    async fn test_file_store_reports_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path());
        let run_id = Uuid::new_v4();
        std::fs::write(dir.path().join(format!("{run_id}.json")), b"{not json").unwrap();

        let err = store.load(run_id).await.unwrap_err();
        assert!(matches!(err, PersistenceError::LoadFailed { .. }));
    }
}
