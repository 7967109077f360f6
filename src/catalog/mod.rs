//! Model catalog: directory scan, shard grouping, mmproj pairing, metadata
//! parse, load/unload orchestration (spec §4.3).

pub mod gguf;
pub mod scanner;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::process::{LoadRequest, ProcessManager};
use crate::types::model::{Model, ModelStatus, ModelStatusState};

pub use scanner::{scan_paths, ScanResult};

/// Observable while a scan is in flight (spec §4.3 Scan concurrency).
#[derive(Debug, Clone, Default)]
pub struct ScanStatus {
    pub scanning: bool,
    pub progress: f32,
    pub current_path: Option<PathBuf>,
    pub started_at: Option<chrono::DateTime<Utc>>,
    pub errors: Vec<String>,
}

/// Maintains modelId -> Model/ModelStatus and mediates load/unload via the
/// process manager.
pub struct Catalog {
    models: RwLock<HashMap<String, Model>>,
    statuses: RwLock<HashMap<String, ModelStatus>>,
    scan_status: RwLock<ScanStatus>,
    process_manager: Arc<ProcessManager>,
    readiness_deadline: Duration,
}

impl Catalog {
    pub fn new(process_manager: Arc<ProcessManager>, readiness_deadline: Duration) -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
            statuses: RwLock::new(HashMap::new()),
            scan_status: RwLock::new(ScanStatus::default()),
            process_manager,
            readiness_deadline,
        }
    }

    /// The process manager this catalog mediates load/unload through, for
    /// callers that need it directly (e.g. node shutdown's `stop_all`).
    pub fn process_manager(&self) -> &Arc<ProcessManager> {
        &self.process_manager
    }

    /// Walks `paths`, parses GGUF metadata, and atomically replaces the
    /// catalog. Models whose representative file still exists keep their
    /// load state; others move to `discovered`.
    pub async fn scan(&self, paths: &[PathBuf]) -> Result<ScanResult> {
        {
            let mut status = self.scan_status.write().await;
            if status.scanning {
                return Err(Error::config_validation("a scan is already in progress"));
            }
            status.scanning = true;
            status.started_at = Some(Utc::now());
            status.errors.clear();
        }

        let started = Instant::now();
        let result = scan_paths(paths);

        {
            let mut models = self.models.write().await;
            let mut statuses = self.statuses.write().await;
            let previous = std::mem::take(&mut *models);

            for model in &result.models {
                models.insert(model.id.clone(), model.clone());
                let carry_forward = previous
                    .get(&model.id)
                    .and_then(|_| statuses.get(&model.id).cloned())
                    .filter(|s| s.state == ModelStatusState::Loaded && model.path.exists());
                statuses
                    .entry(model.id.clone())
                    .and_modify(|s| {
                        if carry_forward.is_none() {
                            s.state = ModelStatusState::Discovered;
                        }
                    })
                    .or_insert_with(ModelStatus::default);
            }
            // Any stale entry no longer discovered moves to discovered/failed
            // implicitly by simply not being present in the fresh map; their
            // status rows are pruned with them.
            statuses.retain(|id, _| models.contains_key(id));
        }

        {
            let mut status = self.scan_status.write().await;
            status.scanning = false;
            status.progress = 1.0;
            status.errors = result.errors.clone();
        }

        info!(
            models = result.models.len(),
            errors = result.errors.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "catalog scan complete"
        );
        Ok(result)
    }

    pub async fn scan_status(&self) -> ScanStatus {
        self.scan_status.read().await.clone()
    }

    pub async fn get(&self, model_id: &str) -> Option<Model> {
        self.models.read().await.get(model_id).cloned()
    }

    pub async fn list(&self) -> Vec<Model> {
        self.models.read().await.values().cloned().collect()
    }

    pub async fn get_status(&self, model_id: &str) -> Option<ModelStatus> {
        self.statuses.read().await.get(model_id).cloned()
    }

    /// Load(req): verify not loaded/loading, allocate a port, synthesize argv,
    /// start the process, and await readiness within `readiness_deadline`.
    pub async fn load(&self, req: LoadRequest, bin_dir_display_name: impl Into<String>) -> Result<ModelStatus> {
        let model_id = req.model_id.clone();
        if !self.models.read().await.contains_key(&model_id) {
            return Err(Error::model_not_found(model_id));
        }
        {
            let statuses = self.statuses.read().await;
            if let Some(s) = statuses.get(&model_id) {
                if matches!(s.state, ModelStatusState::Loaded | ModelStatusState::Loading) {
                    return Err(Error::ModelAlreadyLoaded { model_id });
                }
            }
        }

        self.statuses.write().await.insert(
            model_id.clone(),
            ModelStatus { state: ModelStatusState::Loading, ..Default::default() },
        );

        let ctx_size = req.ctx_size;
        match self.process_manager.start(req, bin_dir_display_name).await {
            Ok(process) => {
                if process.wait_ready(self.readiness_deadline).await.is_err() {
                    warn!(model_id = %model_id, "readiness wait timed out");
                }
                let status = ModelStatus {
                    state: ModelStatusState::Loaded,
                    port: Some(process.port),
                    process_id: Some(process.pid),
                    ctx_size,
                    last_error: None,
                    loaded_at: Some(Utc::now()),
                };
                self.statuses.write().await.insert(model_id, status.clone());
                Ok(status)
            }
            Err(e) => {
                let status = ModelStatus {
                    state: ModelStatusState::Failed,
                    last_error: Some(e.to_string()),
                    ..Default::default()
                };
                self.statuses.write().await.insert(model_id, status);
                Err(e)
            }
        }
    }

    /// Unload: stop the process, release the port, transition to discovered.
    pub async fn unload(&self, model_id: &str) -> Result<()> {
        self.process_manager.stop(model_id).await?;
        self.statuses.write().await.insert(
            model_id.to_string(),
            ModelStatus { state: ModelStatusState::Discovered, ..Default::default() },
        );
        Ok(())
    }

    pub async fn set_favourite(&self, model_id: &str, favourite: bool) -> Result<()> {
        let mut models = self.models.write().await;
        let model = models.get_mut(model_id).ok_or_else(|| Error::model_not_found(model_id))?;
        model.favourite = favourite;
        Ok(())
    }

    pub async fn set_alias(&self, model_id: &str, alias: Option<String>) -> Result<()> {
        let mut models = self.models.write().await;
        let model = models.get_mut(model_id).ok_or_else(|| Error::model_not_found(model_id))?;
        model.alias = alias;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::PortAllocator;

    fn catalog() -> Catalog {
        let pm = Arc::new(ProcessManager::new("/bin", Arc::new(PortAllocator::new(22000, 22010))));
        Catalog::new(pm, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_scan_empty_paths() {
        let cat = catalog();
        let result = cat.scan(&[]).await.unwrap();
        assert!(result.models.is_empty());
        assert!(cat.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_load_unknown_model_fails() {
        let cat = catalog();
        let req = LoadRequest { model_id: "missing".into(), model_path: "/m.gguf".into(), ..Default::default() };
        let err = cat.load(req, "missing").await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ModelNotFound);
    }
}
