pub mod local;
pub mod memory;
pub mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::BackendConfig;
use crate::error::Result;
use crate::model::{Checkpoint, GetOptions, Model};
use crate::mount::normalize;

use self::local::LocalBackend;
use self::memory::MemoryBackend;
use self::s3::S3Backend;

/// Core contract for contents storage backends
///
/// Backends are addressed with `/`-separated paths relative to their own
/// root; `""` is the root itself. Models they return carry paths in the same
/// coordinates.
#[async_trait]
pub trait ContentsBackend: Send + Sync {
    /// Short backend type name for logs
    fn kind(&self) -> &'static str;

    /// Check if a directory exists
    async fn dir_exists(&self, path: &str) -> Result<bool>;

    /// Check if a path is hidden (any dotfile segment)
    async fn is_hidden(&self, path: &str) -> Result<bool>;

    /// Check if a regular file or notebook exists
    async fn file_exists(&self, path: &str) -> Result<bool>;

    /// Check if anything exists at a path
    ///
    /// Default implementation uses file_exists() and dir_exists()
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.file_exists(path).await? || self.dir_exists(path).await?)
    }

    /// Fetch the model at a path
    async fn get(&self, path: &str, options: GetOptions) -> Result<Model>;

    /// Store a model at a path, returning its metadata
    async fn save(&self, model: Model, path: &str) -> Result<Model>;

    /// Apply a partial model to an existing item
    ///
    /// Default implementation treats `model.path` as the new location and
    /// renames when it differs from `path`. An empty `model.path` keeps the
    /// item where it is.
    async fn update(&self, model: Model, path: &str) -> Result<Model> {
        let path = normalize(path);
        let new_path = match normalize(&model.path) {
            p if p.is_empty() => path.clone(),
            p => p,
        };
        if new_path != path {
            self.rename(&path, &new_path).await?;
        }
        self.get(&new_path, GetOptions::metadata()).await
    }

    /// Delete a file or an empty directory
    async fn delete(&self, path: &str) -> Result<()>;

    /// Snapshot a file
    async fn create_checkpoint(&self, path: &str) -> Result<Checkpoint>;

    /// List the snapshots of a file
    async fn list_checkpoints(&self, path: &str) -> Result<Vec<Checkpoint>>;

    /// Restore a file from a snapshot
    async fn restore_checkpoint(&self, checkpoint_id: &str, path: &str) -> Result<()>;

    /// Drop a snapshot
    async fn delete_checkpoint(&self, checkpoint_id: &str, path: &str) -> Result<()>;

    /// Move an item without touching its checkpoints
    async fn rename_file(&self, old_path: &str, new_path: &str) -> Result<()>;

    /// Move an item together with its checkpoints
    ///
    /// Default implementation calls rename_file
    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.rename_file(old_path, new_path).await
    }
}

/// Instantiate the backend described by a resolved configuration
pub async fn connect(config: &BackendConfig) -> Result<Arc<dyn ContentsBackend>> {
    let backend: Arc<dyn ContentsBackend> = match config {
        BackendConfig::Local(local) => Arc::new(LocalBackend::new(local.clone())?),
        BackendConfig::Memory => Arc::new(MemoryBackend::new()),
        BackendConfig::S3(s3) => Arc::new(S3Backend::new(s3.clone()).await?),
    };
    info!("Created {} backend", backend.kind());
    Ok(backend)
}
