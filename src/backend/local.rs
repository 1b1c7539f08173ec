//! Local directory backend
//!
//! Serves a directory tree on local disk. Checkpoints are kept next to the
//! files they belong to, in a per-directory checkpoint folder
//! (`.ipynb_checkpoints` by default).

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, trace, warn};

use crate::backend::ContentsBackend;
use crate::config::LocalBackendConfig;
use crate::error::{ContentsError, Result};
use crate::model::{
    check_checkpoint_id, check_directory_request, encode_content, fill_content, is_hidden_path,
    kind_for_file, Checkpoint, Content, ContentFormat, GetOptions, Model, ModelKind,
    DEFAULT_CHECKPOINT_ID,
};
use crate::mount::{join, normalize, segments};

/// Backend serving a directory on local disk
pub struct LocalBackend {
    root: PathBuf,
    hide_matcher: Option<GlobSet>,
    allow_hidden: bool,
    checkpoint_dir: String,
}

impl LocalBackend {
    /// Create a backend rooted at `config.root_dir`, which must be a directory
    pub fn new(config: LocalBackendConfig) -> Result<Self> {
        let root = config.root_dir;
        match std::fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(ContentsError::Config(format!(
                    "Local root {:?} is not a directory",
                    root
                )))
            }
            Err(e) => {
                return Err(ContentsError::Config(format!(
                    "Local root {:?} is not accessible: {}",
                    root, e
                )))
            }
        }

        debug!("Local backend rooted at {:?}", root);
        Ok(Self {
            root,
            hide_matcher: Self::build_hide_matcher(&config.hide_globs),
            allow_hidden: config.allow_hidden,
            checkpoint_dir: config.checkpoint_dir,
        })
    }

    /// Build a GlobSet from hide patterns
    fn build_hide_matcher(patterns: &[String]) -> Option<GlobSet> {
        if patterns.is_empty() {
            return None;
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => {
                    warn!("Invalid hide pattern '{}': {}", pattern, e);
                }
            }
        }

        match builder.build() {
            Ok(set) => Some(set),
            Err(e) => {
                warn!("Failed to build hide matcher: {}", e);
                None
            }
        }
    }

    /// Whether a directory entry name shows up in listings
    fn should_list(&self, name: &str) -> bool {
        if name == self.checkpoint_dir {
            return false;
        }
        if !self.allow_hidden && name.starts_with('.') {
            return false;
        }
        match &self.hide_matcher {
            Some(matcher) => !matcher.is_match(name),
            None => true,
        }
    }

    /// Map a backend path onto the filesystem, refusing to leave the root
    fn os_path(&self, path: &str) -> Result<PathBuf> {
        let mut os_path = self.root.clone();
        for segment in segments(path) {
            if segment == ".." {
                return Err(ContentsError::InvalidPath(format!(
                    "{} is outside the root contents directory",
                    path
                )));
            }
            os_path.push(segment);
        }
        Ok(os_path)
    }

    /// Where the checkpoint `checkpoint_id` of `path` lives
    fn checkpoint_path(&self, checkpoint_id: &str, path: &str) -> Result<PathBuf> {
        check_checkpoint_id(checkpoint_id)?;
        let os_path = self.os_path(path)?;
        let name = os_path
            .file_name()
            .ok_or_else(|| ContentsError::InvalidPath(format!("{:?} has no file name", path)))?;
        let name = Path::new(name);

        let stem = name.file_stem().unwrap_or_default().to_string_lossy();
        let file_name = match name.extension() {
            Some(ext) => format!("{}-{}.{}", stem, checkpoint_id, ext.to_string_lossy()),
            None => format!("{}-{}", stem, checkpoint_id),
        };

        let parent = os_path.parent().unwrap_or(&self.root);
        Ok(parent.join(&self.checkpoint_dir).join(file_name))
    }

    async fn stat(os_path: &Path) -> Result<Option<Metadata>> {
        match tokio::fs::metadata(os_path).await {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn base_model(path: &str, kind: ModelKind, meta: &Metadata) -> Model {
        let (created, modified) = timestamps(meta);
        let mut model = Model::new(path, kind).with_times(created, modified);
        model.writable = !meta.permissions().readonly();
        model
    }

    async fn dir_model(&self, path: &str, os_path: &Path, meta: &Metadata, content: bool) -> Result<Model> {
        if !path.is_empty() && !self.allow_hidden && is_hidden_path(path) {
            return Err(ContentsError::NotFound(path.to_string()));
        }

        let mut model = Self::base_model(path, ModelKind::Directory, meta);
        if !content {
            return Ok(model);
        }

        let mut children = Vec::new();
        let mut entries = tokio::fs::read_dir(os_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.should_list(&name) {
                continue;
            }

            // Follows symlinks; dangling links are skipped
            let child_meta = match tokio::fs::metadata(entry.path()).await {
                Ok(m) => m,
                Err(e) => {
                    debug!("Skipping unreadable entry {:?}: {}", entry.path(), e);
                    continue;
                }
            };

            let child_path = join(path, &name);
            let kind = if child_meta.is_dir() {
                ModelKind::Directory
            } else {
                kind_for_file(&child_path, None)?
            };
            children.push(Self::base_model(&child_path, kind, &child_meta));
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));

        model.content = Some(Content::Listing(children));
        model.format = Some(ContentFormat::Json);
        Ok(model)
    }
}

fn timestamps(meta: &Metadata) -> (DateTime<Utc>, DateTime<Utc>) {
    let modified = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    let created = meta.created().map(DateTime::<Utc>::from).unwrap_or(modified);
    (created, modified)
}

#[async_trait]
impl ContentsBackend for LocalBackend {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn dir_exists(&self, path: &str) -> Result<bool> {
        let os_path = self.os_path(path)?;
        Ok(Self::stat(&os_path).await?.map(|m| m.is_dir()).unwrap_or(false))
    }

    async fn is_hidden(&self, path: &str) -> Result<bool> {
        Ok(is_hidden_path(path))
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        let os_path = self.os_path(path)?;
        Ok(Self::stat(&os_path).await?.map(|m| !m.is_dir()).unwrap_or(false))
    }

    async fn get(&self, path: &str, options: GetOptions) -> Result<Model> {
        let path = normalize(path);
        let os_path = self.os_path(&path)?;
        trace!("get: path={:?} os_path={:?} content={}", path, os_path, options.content);

        let meta = Self::stat(&os_path)
            .await?
            .ok_or_else(|| ContentsError::NotFound(path.clone()))?;

        if meta.is_dir() {
            check_directory_request(&path, options.kind)?;
            return self.dir_model(&path, &os_path, &meta, options.content).await;
        }

        let kind = kind_for_file(&path, options.kind)?;
        let mut model = Self::base_model(&path, kind, &meta);
        if options.content {
            let data = tokio::fs::read(&os_path).await?;
            fill_content(&mut model, &data, options.format)?;
        }
        Ok(model)
    }

    async fn save(&self, model: Model, path: &str) -> Result<Model> {
        let path = normalize(path);
        let os_path = self.os_path(&path)?;
        debug!("save: path={:?} type={}", path, model.kind.as_str());

        if !self.allow_hidden && is_hidden_path(&path) {
            return Err(ContentsError::InvalidPath(format!(
                "Cannot create hidden file or directory {:?}",
                path
            )));
        }

        let existing = Self::stat(&os_path).await?;
        match model.kind {
            ModelKind::Directory => match existing {
                Some(meta) if !meta.is_dir() => {
                    return Err(ContentsError::NotADirectory(path));
                }
                Some(_) => {}
                None => tokio::fs::create_dir(&os_path).await?,
            },
            ModelKind::File | ModelKind::Notebook => {
                if existing.map(|m| m.is_dir()).unwrap_or(false) {
                    return Err(ContentsError::InvalidPath(format!(
                        "{} is a directory",
                        path
                    )));
                }
                let data = encode_content(&model)?;
                tokio::fs::write(&os_path, &data).await?;
            }
        }

        self.get(&path, GetOptions::metadata().with_kind(model.kind))
            .await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        if path.is_empty() {
            return Err(ContentsError::InvalidPath(
                "Cannot delete the root directory".to_string(),
            ));
        }

        let os_path = self.os_path(&path)?;
        let meta = Self::stat(&os_path)
            .await?
            .ok_or_else(|| ContentsError::NotFound(path.clone()))?;
        debug!("delete: path={:?} dir={}", path, meta.is_dir());

        if meta.is_dir() {
            let mut entries = tokio::fs::read_dir(&os_path).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_name().to_string_lossy() != self.checkpoint_dir {
                    return Err(ContentsError::NotEmpty(path));
                }
            }
            tokio::fs::remove_dir_all(&os_path).await?;
        } else {
            tokio::fs::remove_file(&os_path).await?;
            let checkpoint = self.checkpoint_path(DEFAULT_CHECKPOINT_ID, &path)?;
            if Self::stat(&checkpoint).await?.is_some() {
                tokio::fs::remove_file(&checkpoint).await?;
            }
        }
        Ok(())
    }

    async fn create_checkpoint(&self, path: &str) -> Result<Checkpoint> {
        let os_path = self.os_path(path)?;
        match Self::stat(&os_path).await? {
            None => return Err(ContentsError::NotFound(normalize(path))),
            Some(meta) if meta.is_dir() => {
                return Err(ContentsError::InvalidPath(format!(
                    "{} is a directory",
                    normalize(path)
                )))
            }
            Some(_) => {}
        }

        let checkpoint = self.checkpoint_path(DEFAULT_CHECKPOINT_ID, path)?;
        if let Some(parent) = checkpoint.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!("create_checkpoint: {:?} -> {:?}", os_path, checkpoint);
        tokio::fs::copy(&os_path, &checkpoint).await?;

        let meta = tokio::fs::metadata(&checkpoint).await?;
        Ok(Checkpoint {
            id: DEFAULT_CHECKPOINT_ID.to_string(),
            last_modified: timestamps(&meta).1,
        })
    }

    async fn list_checkpoints(&self, path: &str) -> Result<Vec<Checkpoint>> {
        let checkpoint = self.checkpoint_path(DEFAULT_CHECKPOINT_ID, path)?;
        Ok(match Self::stat(&checkpoint).await? {
            Some(meta) => vec![Checkpoint {
                id: DEFAULT_CHECKPOINT_ID.to_string(),
                last_modified: timestamps(&meta).1,
            }],
            None => Vec::new(),
        })
    }

    async fn restore_checkpoint(&self, checkpoint_id: &str, path: &str) -> Result<()> {
        let checkpoint = self.checkpoint_path(checkpoint_id, path)?;
        if Self::stat(&checkpoint).await?.is_none() {
            return Err(ContentsError::CheckpointNotFound {
                checkpoint_id: checkpoint_id.to_string(),
                path: normalize(path),
            });
        }
        debug!("restore_checkpoint: {:?} -> {:?}", checkpoint, path);
        tokio::fs::copy(&checkpoint, self.os_path(path)?).await?;
        Ok(())
    }

    async fn delete_checkpoint(&self, checkpoint_id: &str, path: &str) -> Result<()> {
        let checkpoint = self.checkpoint_path(checkpoint_id, path)?;
        if Self::stat(&checkpoint).await?.is_none() {
            return Err(ContentsError::CheckpointNotFound {
                checkpoint_id: checkpoint_id.to_string(),
                path: normalize(path),
            });
        }
        tokio::fs::remove_file(&checkpoint).await?;
        Ok(())
    }

    async fn rename_file(&self, old_path: &str, new_path: &str) -> Result<()> {
        let old_path = normalize(old_path);
        let new_path = normalize(new_path);
        if old_path == new_path {
            return Ok(());
        }
        if old_path.is_empty() || new_path.is_empty() {
            return Err(ContentsError::InvalidPath(
                "Cannot rename the root directory".to_string(),
            ));
        }

        let old_os = self.os_path(&old_path)?;
        let new_os = self.os_path(&new_path)?;
        if Self::stat(&new_os).await?.is_some() {
            return Err(ContentsError::AlreadyExists(new_path));
        }
        if Self::stat(&old_os).await?.is_none() {
            return Err(ContentsError::NotFound(old_path));
        }

        debug!("rename_file: {:?} -> {:?}", old_path, new_path);
        tokio::fs::rename(&old_os, &new_os).await?;
        Ok(())
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.rename_file(old_path, new_path).await?;

        // Directory checkpoints travel with the directory; file checkpoints
        // sit in the parent and have to follow by hand
        if normalize(old_path) == normalize(new_path) || !self.file_exists(new_path).await? {
            return Ok(());
        }
        let old_checkpoint = self.checkpoint_path(DEFAULT_CHECKPOINT_ID, old_path)?;
        if Self::stat(&old_checkpoint).await?.is_none() {
            return Ok(());
        }
        let new_checkpoint = self.checkpoint_path(DEFAULT_CHECKPOINT_ID, new_path)?;
        if let Some(parent) = new_checkpoint.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&old_checkpoint, &new_checkpoint).await?;
        Ok(())
    }
}
