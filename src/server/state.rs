//! Application state management

use std::fs::Metadata;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{MlopsError, Result};
use crate::export::{load_model, LoadedModel};

use super::ServerConfig;

/// When the prediction endpoint reads the model file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReloadPolicy {
    /// Read and decode the file on every request
    #[default]
    PerRequest,
    /// Keep the decoded model until the file is replaced or modified
    OnChange,
}

impl FromStr for ReloadPolicy {
    type Err = MlopsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-request" | "per_request" => Ok(ReloadPolicy::PerRequest),
            "on-change" | "on_change" => Ok(ReloadPolicy::OnChange),
            other => Err(MlopsError::ConfigError(format!(
                "unknown reload policy '{}', expected per-request or on-change",
                other
            ))),
        }
    }
}

/// Identity of the model file as last seen on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
    /// Inode number; a rename into place always changes it
    inode: u64,
}

impl FileStamp {
    fn of(meta: &Metadata) -> Result<Self> {
        Ok(Self {
            modified: meta.modified()?,
            len: meta.len(),
            inode: inode(meta),
        })
    }
}

#[cfg(unix)]
fn inode(meta: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode(_meta: &Metadata) -> u64 {
    0
}

#[derive(Debug)]
struct CachedModel {
    stamp: FileStamp,
    model: Arc<LoadedModel>,
}

/// Access to the model file behind the prediction endpoint
#[derive(Debug)]
pub struct ModelStore {
    path: PathBuf,
    policy: ReloadPolicy,
    cache: RwLock<Option<CachedModel>>,
}

impl ModelStore {
    pub fn new(path: impl Into<PathBuf>, policy: ReloadPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            cache: RwLock::new(None),
        }
    }

    /// The current model according to the reload policy
    pub async fn get(&self) -> Result<Arc<LoadedModel>> {
        match self.policy {
            ReloadPolicy::PerRequest => self.load().await.map(Arc::new),
            ReloadPolicy::OnChange => self.get_cached().await,
        }
    }

    async fn load(&self) -> Result<LoadedModel> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || load_model(path))
            .await
            .map_err(|e| MlopsError::InferenceError(format!("model loading task failed: {}", e)))?
    }

    async fn get_cached(&self) -> Result<Arc<LoadedModel>> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                *self.cache.write().await = None;
                return Err(MlopsError::ModelNotFound(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let stamp = FileStamp::of(&meta)?;

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref().filter(|c| c.stamp == stamp) {
                return Ok(Arc::clone(&cached.model));
            }
        }

        let mut cache = self.cache.write().await;
        // another request may have refreshed it while we waited
        if let Some(cached) = cache.as_ref().filter(|c| c.stamp == stamp) {
            return Ok(Arc::clone(&cached.model));
        }

        let model = Arc::new(self.load().await?);
        debug!(path = %self.path.display(), n_estimators = model.metadata.n_estimators, "Reloaded model");
        *cache = Some(CachedModel {
            stamp,
            model: Arc::clone(&model),
        });
        Ok(model)
    }
}

/// Application state shared across handlers
#[derive(Debug)]
pub struct AppState {
    pub config: ServerConfig,
    pub models: ModelStore,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let models = ModelStore::new(config.model_path.clone(), config.reload);
        Self { config, models }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reload_policy() {
        assert_eq!("per-request".parse::<ReloadPolicy>().unwrap(), ReloadPolicy::PerRequest);
        assert_eq!("ON_CHANGE".parse::<ReloadPolicy>().unwrap(), ReloadPolicy::OnChange);
        assert!("sometimes".parse::<ReloadPolicy>().is_err());
        assert_eq!(ReloadPolicy::default(), ReloadPolicy::PerRequest);
    }

    #[cfg(unix)]
    #[test]
    fn test_stamp_changes_on_same_size_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        std::fs::write(&path, b"aaaa").unwrap();
        let original = FileStamp::of(&std::fs::metadata(&path).unwrap()).unwrap();

        let staged = dir.path().join("model.bin.tmp");
        std::fs::write(&staged, b"bbbb").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&staged)
            .unwrap()
            .set_modified(original.modified)
            .unwrap();
        std::fs::rename(&staged, &path).unwrap();

        let replaced = FileStamp::of(&std::fs::metadata(&path).unwrap()).unwrap();
        assert_eq!(replaced.modified, original.modified);
        assert_eq!(replaced.len, original.len);
        assert_ne!(replaced, original);
    }

    #[tokio::test]
    async fn test_missing_model_for_both_policies() {
        for policy in [ReloadPolicy::PerRequest, ReloadPolicy::OnChange] {
            let store = ModelStore::new("/nonexistent/model.bin", policy);
            assert!(matches!(store.get().await, Err(MlopsError::ModelNotFound(_))));
        }
    }
}
