//! S3 backend
//!
//! Serves a key space in Amazon S3 or an S3-compatible store (MinIO,
//! LocalStack, etc.). Directories are virtual: they exist when any key lives
//! below them, and empty ones are kept alive by a zero-byte `dir/` marker.
//! Checkpoints are stored under a hidden `.ipynb_checkpoints/` key space
//! mirroring the file paths.

use std::pin::Pin;

use async_stream::try_stream;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt};
use tracing::{debug, trace};

use crate::backend::ContentsBackend;
use crate::config::S3BackendConfig;
use crate::error::{ContentsError, Result};
use crate::model::{
    check_checkpoint_id, check_directory_request, encode_content, fill_content, is_hidden_path,
    kind_for_file, Checkpoint, Content, ContentFormat, GetOptions, Model, ModelKind,
    DEFAULT_CHECKPOINT_ID,
};
use crate::mount::{join, normalize};

/// Key space holding checkpoints, relative to the backend prefix
const CHECKPOINT_ROOT: &str = ".ipynb_checkpoints";

/// Entry found while listing a virtual directory
#[derive(Debug, Clone)]
struct ListedEntry {
    name: String,
    modified: Option<DateTime<Utc>>,
    is_dir: bool,
}

type ListedEntryStream = Pin<Box<dyn Stream<Item = Result<ListedEntry>> + Send>>;

/// Normalize a configured key prefix to `""` or `something/`
fn normalize_prefix(prefix: Option<&str>) -> String {
    let prefix = normalize(prefix.unwrap_or_default());
    if prefix.is_empty() {
        prefix
    } else {
        format!("{}/", prefix)
    }
}

/// Object key of a path under a normalized prefix
fn key_for(prefix: &str, path: &str) -> String {
    format!("{}{}", prefix, normalize(path))
}

/// Key prefix every entry of a directory starts with
fn dir_key_for(prefix: &str, path: &str) -> String {
    let key = key_for(prefix, path);
    if key.is_empty() || key.ends_with('/') {
        key
    } else {
        format!("{}/", key)
    }
}

/// Object key of a checkpoint of a path
fn checkpoint_key_for(prefix: &str, checkpoint_id: &str, path: &str) -> String {
    format!(
        "{}{}/{}/{}",
        prefix,
        CHECKPOINT_ROOT,
        normalize(path),
        checkpoint_id
    )
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos())
}

fn s3_error<E>(operation: &str, err: E) -> ContentsError
where
    E: std::error::Error,
{
    ContentsError::Backend(format!("S3 {} error: {}", operation, DisplayErrorContext(err)))
}

/// S3 backend for Amazon S3 and S3-compatible storage
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: String,
    read_only: bool,
}

impl S3Backend {
    /// Create a new S3 backend from configuration
    pub async fn new(config: S3BackendConfig) -> Result<Self> {
        let mut sdk_config_builder = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &config.region {
            sdk_config_builder = sdk_config_builder.region(Region::new(region.clone()));
        }

        let sdk_config = sdk_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());
        let prefix = normalize_prefix(config.prefix.as_deref());
        debug!("S3 backend bucket={} prefix={:?}", config.bucket, prefix);

        Ok(Self {
            client,
            bucket: config.bucket,
            prefix,
            read_only: config.read_only,
        })
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            Err(ContentsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// HeadObject; `None` when the key does not exist
    async fn head(&self, key: &str) -> Result<Option<Option<DateTime<Utc>>>> {
        if key.is_empty() || key.ends_with('/') {
            return Ok(None);
        }

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(output.last_modified().and_then(to_chrono))),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(None)
                } else {
                    Err(s3_error("HeadObject", service_error))
                }
            }
        }
    }

    /// Whether any key lives below a directory
    async fn dir_present(&self, path: &str) -> Result<bool> {
        let dir_key = dir_key_for(&self.prefix, path);
        if normalize(path).is_empty() {
            return Ok(true);
        }

        let result = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&dir_key)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| s3_error("ListObjectsV2", e.into_service_error()))?;

        Ok(result.key_count().unwrap_or(0) > 0 || !result.common_prefixes().is_empty())
    }

    async fn read(&self, key: &str, path: &str) -> Result<Bytes> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    ContentsError::NotFound(path.to_string())
                } else {
                    s3_error("GetObject", service_error)
                }
            })?;

        let body = result
            .body
            .collect()
            .await
            .map_err(|e| ContentsError::Backend(format!("S3 read body error: {}", e)))?;
        Ok(body.into_bytes())
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        trace!("put: key={} size={}", key, data.len());
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| s3_error("PutObject", e.into_service_error()))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        trace!("remove: key={}", key);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| s3_error("DeleteObject", e.into_service_error()))?;
        Ok(())
    }

    async fn copy(&self, from_key: &str, to_key: &str) -> Result<()> {
        trace!("copy: {} -> {}", from_key, to_key);
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(to_key)
            .copy_source(format!("{}/{}", self.bucket, from_key))
            .send()
            .await
            .map_err(|e| s3_error("CopyObject", e.into_service_error()))?;
        Ok(())
    }

    /// Every key starting with `key_prefix`
    async fn keys_under(&self, key_prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(key_prefix);

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let result = request
                .send()
                .await
                .map_err(|e| s3_error("ListObjectsV2", e.into_service_error()))?;

            keys.extend(
                result
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .map(|k| k.to_string()),
            );

            if result.is_truncated().unwrap_or(false) {
                continuation_token = result.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        Ok(keys)
    }

    /// Copy every key below `from` to the same relative key below `to`, then
    /// delete the originals
    async fn move_prefix(&self, from: &str, to: &str) -> Result<()> {
        let keys = self.keys_under(from).await?;
        for key in &keys {
            self.copy(key, &format!("{}{}", to, &key[from.len()..])).await?;
        }
        for key in &keys {
            self.remove(key).await?;
        }
        Ok(())
    }

    /// Stream the direct children of a directory key prefix
    fn list_entries(&self, dir_key: String) -> ListedEntryStream {
        let client = self.client.clone();
        let bucket = self.bucket.clone();

        Box::pin(try_stream! {
            let mut continuation_token: Option<String> = None;

            loop {
                let mut request = client
                    .list_objects_v2()
                    .bucket(&bucket)
                    .prefix(&dir_key)
                    .delimiter("/");

                if let Some(token) = continuation_token.take() {
                    request = request.continuation_token(token);
                }

                let result = request
                    .send()
                    .await
                    .map_err(|e| s3_error("ListObjectsV2", e.into_service_error()))?;

                for obj in result.contents() {
                    if let Some(key) = obj.key() {
                        // Directory markers are not entries
                        let name = key.strip_prefix(dir_key.as_str()).unwrap_or(key);
                        if name.is_empty() || name.contains('/') {
                            continue;
                        }
                        yield ListedEntry {
                            name: name.to_string(),
                            modified: obj.last_modified().and_then(to_chrono),
                            is_dir: false,
                        };
                    }
                }

                for common_prefix in result.common_prefixes() {
                    if let Some(p) = common_prefix.prefix() {
                        let name = p.strip_prefix(dir_key.as_str()).unwrap_or(p).trim_end_matches('/');
                        if !name.is_empty() {
                            yield ListedEntry {
                                name: name.to_string(),
                                modified: None,
                                is_dir: true,
                            };
                        }
                    }
                }

                if result.is_truncated().unwrap_or(false) {
                    continuation_token = result.next_continuation_token().map(|s| s.to_string());
                } else {
                    break;
                }
            }
        })
    }

    async fn listing(&self, path: &str) -> Result<Vec<Model>> {
        let entries: Vec<ListedEntry> = self
            .list_entries(dir_key_for(&self.prefix, path))
            .try_collect()
            .await?;

        let mut children = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.name.starts_with('.') {
                continue;
            }
            let child_path = join(path, &entry.name);
            let kind = if entry.is_dir {
                ModelKind::Directory
            } else {
                kind_for_file(&child_path, None)?
            };
            let mut model = Model::new(&child_path, kind);
            if let Some(modified) = entry.modified {
                model = model.with_times(modified, modified);
            }
            model.writable = !self.read_only;
            children.push(model);
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }
}

#[async_trait]
impl ContentsBackend for S3Backend {
    fn kind(&self) -> &'static str {
        "s3"
    }

    async fn dir_exists(&self, path: &str) -> Result<bool> {
        self.dir_present(path).await
    }

    async fn is_hidden(&self, path: &str) -> Result<bool> {
        Ok(is_hidden_path(path))
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(self.head(&key_for(&self.prefix, path)).await?.is_some())
    }

    async fn get(&self, path: &str, options: GetOptions) -> Result<Model> {
        let path = normalize(path);
        let key = key_for(&self.prefix, &path);
        trace!("get: path={:?} key={} content={}", path, key, options.content);

        if let Some(modified) = self.head(&key).await? {
            let kind = kind_for_file(&path, options.kind)?;
            let mut model = Model::new(&path, kind);
            if let Some(modified) = modified {
                model = model.with_times(modified, modified);
            }
            model.writable = !self.read_only;
            if options.content {
                let data = self.read(&key, &path).await?;
                fill_content(&mut model, &data, options.format)?;
            }
            return Ok(model);
        }

        if !self.dir_present(&path).await? || (!path.is_empty() && is_hidden_path(&path)) {
            return Err(ContentsError::NotFound(path));
        }

        check_directory_request(&path, options.kind)?;
        let mut model = Model::directory(&path);
        model.writable = !self.read_only;
        if options.content {
            model.content = Some(Content::Listing(self.listing(&path).await?));
            model.format = Some(ContentFormat::Json);
        }
        Ok(model)
    }

    async fn save(&self, model: Model, path: &str) -> Result<Model> {
        self.check_writable()?;
        let path = normalize(path);
        debug!("save: path={:?} type={}", path, model.kind.as_str());

        match model.kind {
            ModelKind::Directory => {
                if self.file_exists(&path).await? {
                    return Err(ContentsError::NotADirectory(path));
                }
                if !path.is_empty() {
                    self.put(&dir_key_for(&self.prefix, &path), Bytes::new())
                        .await?;
                }
            }
            ModelKind::File | ModelKind::Notebook => {
                if path.is_empty() || self.dir_present(&path).await? {
                    return Err(ContentsError::InvalidPath(format!(
                        "{} is a directory",
                        path
                    )));
                }
                let data = encode_content(&model)?;
                self.put(&key_for(&self.prefix, &path), data).await?;
            }
        }

        self.get(&path, GetOptions::metadata().with_kind(model.kind))
            .await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.check_writable()?;
        let path = normalize(path);
        if path.is_empty() {
            return Err(ContentsError::InvalidPath(
                "Cannot delete the root directory".to_string(),
            ));
        }

        let key = key_for(&self.prefix, &path);
        if self.head(&key).await?.is_some() {
            debug!("delete: path={:?} key={}", path, key);
            self.remove(&key).await?;
            return self
                .remove(&checkpoint_key_for(&self.prefix, DEFAULT_CHECKPOINT_ID, &path))
                .await;
        }

        let dir_key = dir_key_for(&self.prefix, &path);
        let keys = self.keys_under(&dir_key).await?;
        if keys.is_empty() {
            return Err(ContentsError::NotFound(path));
        }
        if keys.iter().any(|k| *k != dir_key) {
            return Err(ContentsError::NotEmpty(path));
        }
        debug!("delete: path={:?} marker={}", path, dir_key);
        self.remove(&dir_key).await
    }

    async fn create_checkpoint(&self, path: &str) -> Result<Checkpoint> {
        self.check_writable()?;
        let key = key_for(&self.prefix, path);
        if self.head(&key).await?.is_none() {
            return Err(ContentsError::NotFound(normalize(path)));
        }

        let checkpoint_key = checkpoint_key_for(&self.prefix, DEFAULT_CHECKPOINT_ID, path);
        debug!("create_checkpoint: {} -> {}", key, checkpoint_key);
        self.copy(&key, &checkpoint_key).await?;

        let last_modified = self
            .head(&checkpoint_key)
            .await?
            .flatten()
            .unwrap_or_else(Utc::now);
        Ok(Checkpoint {
            id: DEFAULT_CHECKPOINT_ID.to_string(),
            last_modified,
        })
    }

    async fn list_checkpoints(&self, path: &str) -> Result<Vec<Checkpoint>> {
        let checkpoint_key = checkpoint_key_for(&self.prefix, DEFAULT_CHECKPOINT_ID, path);
        Ok(match self.head(&checkpoint_key).await? {
            Some(modified) => vec![Checkpoint {
                id: DEFAULT_CHECKPOINT_ID.to_string(),
                last_modified: modified.unwrap_or_else(Utc::now),
            }],
            None => Vec::new(),
        })
    }

    async fn restore_checkpoint(&self, checkpoint_id: &str, path: &str) -> Result<()> {
        self.check_writable()?;
        check_checkpoint_id(checkpoint_id)?;
        let checkpoint_key = checkpoint_key_for(&self.prefix, checkpoint_id, path);
        if self.head(&checkpoint_key).await?.is_none() {
            return Err(ContentsError::CheckpointNotFound {
                checkpoint_id: checkpoint_id.to_string(),
                path: normalize(path),
            });
        }
        self.copy(&checkpoint_key, &key_for(&self.prefix, path)).await
    }

    async fn delete_checkpoint(&self, checkpoint_id: &str, path: &str) -> Result<()> {
        self.check_writable()?;
        check_checkpoint_id(checkpoint_id)?;
        let checkpoint_key = checkpoint_key_for(&self.prefix, checkpoint_id, path);
        if self.head(&checkpoint_key).await?.is_none() {
            return Err(ContentsError::CheckpointNotFound {
                checkpoint_id: checkpoint_id.to_string(),
                path: normalize(path),
            });
        }
        self.remove(&checkpoint_key).await
    }

    async fn rename_file(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.check_writable()?;
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
        if self.exists(&new_path).await? {
            return Err(ContentsError::AlreadyExists(new_path));
        }

        // S3 has no native rename: copy, then delete
        let old_key = key_for(&self.prefix, &old_path);
        if self.head(&old_key).await?.is_some() {
            debug!("rename_file: {:?} -> {:?}", old_path, new_path);
            self.copy(&old_key, &key_for(&self.prefix, &new_path)).await?;
            return self.remove(&old_key).await;
        }

        if !self.dir_present(&old_path).await? {
            return Err(ContentsError::NotFound(old_path));
        }
        debug!("rename_file: directory {:?} -> {:?}", old_path, new_path);
        self.move_prefix(
            &dir_key_for(&self.prefix, &old_path),
            &dir_key_for(&self.prefix, &new_path),
        )
        .await
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.rename_file(old_path, new_path).await?;
        if normalize(old_path) == normalize(new_path) {
            return Ok(());
        }

        // Checkpoints of a file, or of everything below a directory
        let old_checkpoints = checkpoint_key_for(&self.prefix, "", old_path);
        let new_checkpoints = checkpoint_key_for(&self.prefix, "", new_path);
        self.move_prefix(&old_checkpoints, &new_checkpoints).await
    }
}
