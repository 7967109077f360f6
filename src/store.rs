//! Persistence interface (spec §6). Shepherd defines the boundary only; no
//! concrete backend ships here (explicit non-goal).

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::types::message::CommandResult;

/// What a Shepherd node needs to persist across restarts: command results
/// pending delivery, model aliases/favourites, and the last-applied model
/// and launch configuration.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_command_result(&self, result: &CommandResult) -> Result<()>;
    async fn load_command_result(&self, command_id: &str) -> Result<Option<CommandResult>>;

    async fn save_model_alias(&self, model_id: &str, alias: Option<String>) -> Result<()>;
    async fn save_model_favourite(&self, model_id: &str, favourite: bool) -> Result<()>;
    async fn load_alias_map(&self) -> Result<HashMap<String, String>>;
    async fn load_favourite_map(&self) -> Result<HashMap<String, bool>>;

    async fn load_models_config(&self) -> Result<Value>;
    async fn save_models_config(&self, config: &Value) -> Result<()>;

    async fn save_launch_config(&self, model_id: &str, config: &Value) -> Result<()>;
    async fn load_launch_config(&self, model_id: &str) -> Result<Option<Value>>;
}

/// In-memory `Store` used for tests and for nodes that opt out of
/// persistence (everything resets on restart).
#[derive(Default)]
pub struct MemoryStore {
    inner: tokio::sync::RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    command_results: HashMap<String, CommandResult>,
    aliases: HashMap<String, String>,
    favourites: HashMap<String, bool>,
    models_config: Value,
    launch_configs: HashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_command_result(&self, result: &CommandResult) -> Result<()> {
        self.inner.write().await.command_results.insert(result.command_id.clone(), result.clone());
        Ok(())
    }

    async fn load_command_result(&self, command_id: &str) -> Result<Option<CommandResult>> {
        Ok(self.inner.read().await.command_results.get(command_id).cloned())
    }

    async fn save_model_alias(&self, model_id: &str, alias: Option<String>) -> Result<()> {
        let mut inner = self.inner.write().await;
        match alias {
            Some(a) => {
                inner.aliases.insert(model_id.to_string(), a);
            }
            None => {
                inner.aliases.remove(model_id);
            }
        }
        Ok(())
    }

    async fn save_model_favourite(&self, model_id: &str, favourite: bool) -> Result<()> {
        self.inner.write().await.favourites.insert(model_id.to_string(), favourite);
        Ok(())
    }

    async fn load_alias_map(&self) -> Result<HashMap<String, String>> {
        Ok(self.inner.read().await.aliases.clone())
    }

    async fn load_favourite_map(&self) -> Result<HashMap<String, bool>> {
        Ok(self.inner.read().await.favourites.clone())
    }

    async fn load_models_config(&self) -> Result<Value> {
        Ok(self.inner.read().await.models_config.clone())
    }

    async fn save_models_config(&self, config: &Value) -> Result<()> {
        self.inner.write().await.models_config = config.clone();
        Ok(())
    }

    async fn save_launch_config(&self, model_id: &str, config: &Value) -> Result<()> {
        self.inner.write().await.launch_configs.insert(model_id.to_string(), config.clone());
        Ok(())
    }

    async fn load_launch_config(&self, model_id: &str) -> Result<Option<Value>> {
        Ok(self.inner.read().await.launch_configs.get(model_id).cloned())
    }
}

/// JSON-file-backed `Store`: one file per logical table under a root
/// directory, read-modify-write with the whole file replaced atomically via
/// a rename (teacher's `config.rs` persistence idiom, generalized).
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    async fn read_json<T: serde::de::DeserializeOwned + Default>(&self, name: &str) -> Result<T> {
        let path = self.path(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(crate::error::Error::IoRead { path, source: e }),
        }
    }

    async fn write_json<T: serde::Serialize>(&self, name: &str, value: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(crate::error::Error::Io)?;
        let path = self.path(name);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| crate::error::Error::Internal(format!("json serialization failed: {e}")))?;
        tokio::fs::write(&tmp, bytes).await.map_err(|e| crate::error::Error::IoWrite { path: tmp.clone(), source: e })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| crate::error::Error::IoWrite { path, source: e })?;
        Ok(())
    }
}

#[async_trait]
impl Store for JsonFileStore {
    async fn save_command_result(&self, result: &CommandResult) -> Result<()> {
        let mut map: HashMap<String, CommandResult> = self.read_json("command_results").await?;
        map.insert(result.command_id.clone(), result.clone());
        self.write_json("command_results", &map).await
    }

    async fn load_command_result(&self, command_id: &str) -> Result<Option<CommandResult>> {
        let map: HashMap<String, CommandResult> = self.read_json("command_results").await?;
        Ok(map.get(command_id).cloned())
    }

    async fn save_model_alias(&self, model_id: &str, alias: Option<String>) -> Result<()> {
        let mut map: HashMap<String, String> = self.read_json("aliases").await?;
        match alias {
            Some(a) => map.insert(model_id.to_string(), a),
            None => map.remove(model_id),
        };
        self.write_json("aliases", &map).await
    }

    async fn save_model_favourite(&self, model_id: &str, favourite: bool) -> Result<()> {
        let mut map: HashMap<String, bool> = self.read_json("favourites").await?;
        map.insert(model_id.to_string(), favourite);
        self.write_json("favourites", &map).await
    }

    async fn load_alias_map(&self) -> Result<HashMap<String, String>> {
        self.read_json("aliases").await
    }

    async fn load_favourite_map(&self) -> Result<HashMap<String, bool>> {
        self.read_json("favourites").await
    }

    async fn load_models_config(&self) -> Result<Value> {
        self.read_json("models_config").await
    }

    async fn save_models_config(&self, config: &Value) -> Result<()> {
        self.write_json("models_config", config).await
    }

    async fn save_launch_config(&self, model_id: &str, config: &Value) -> Result<()> {
        let mut map: HashMap<String, Value> = self.read_json("launch_configs").await?;
        map.insert(model_id.to_string(), config.clone());
        self.write_json("launch_configs", &map).await
    }

    async fn load_launch_config(&self, model_id: &str) -> Result<Option<Value>> {
        let map: HashMap<String, Value> = self.read_json("launch_configs").await?;
        Ok(map.get(model_id).cloned())
    }
}
