//! In-memory backend
//!
//! Keeps the whole tree in a concurrent map keyed by normalized path. Useful
//! for scratch mounts that should vanish with the process.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::backend::ContentsBackend;
use crate::error::{ContentsError, Result};
use crate::model::{
    check_directory_request, encode_content, fill_content, is_hidden_path, kind_for_file,
    Checkpoint, Content, ContentFormat, GetOptions, Model, ModelKind, DEFAULT_CHECKPOINT_ID,
};
use crate::mount::{join, normalize};

#[derive(Debug, Clone)]
enum NodeData {
    Directory,
    File(Bytes),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

impl Node {
    fn new(data: NodeData) -> Self {
        let now = Utc::now();
        Self {
            data,
            created: now,
            modified: now,
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self.data, NodeData::Directory)
    }
}

#[derive(Debug, Clone)]
struct StoredCheckpoint {
    data: Bytes,
    created: DateTime<Utc>,
}

/// Parent of a normalized path; `None` for the root
fn parent_of(path: &str) -> Option<&str> {
    if path.is_empty() {
        return None;
    }
    Some(path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or(""))
}

/// Whether `path` lies strictly below directory `dir`
fn is_below(dir: &str, path: &str) -> bool {
    if dir.is_empty() {
        return !path.is_empty();
    }
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

/// Backend holding its tree in process memory
pub struct MemoryBackend {
    nodes: DashMap<String, Node>,
    checkpoints: DashMap<String, StoredCheckpoint>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty tree containing only the root directory
    pub fn new() -> Self {
        let nodes = DashMap::new();
        nodes.insert(String::new(), Node::new(NodeData::Directory));
        Self {
            nodes,
            checkpoints: DashMap::new(),
        }
    }

    fn node(&self, path: &str) -> Option<Node> {
        self.nodes.get(path).map(|n| n.value().clone())
    }

    fn model_for(path: &str, kind: ModelKind, node: &Node) -> Model {
        Model::new(path, kind).with_times(node.created, node.modified)
    }

    fn listing(&self, path: &str) -> Result<Vec<Model>> {
        let mut children = Vec::new();
        for entry in self.nodes.iter() {
            let child_path = entry.key();
            if parent_of(child_path) != Some(path) || is_hidden_path(&child_path[path.len()..]) {
                continue;
            }
            let node = entry.value();
            let kind = if node.is_dir() {
                ModelKind::Directory
            } else {
                kind_for_file(child_path, None)?
            };
            children.push(Self::model_for(child_path, kind, node));
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    fn require_parent_dir(&self, path: &str) -> Result<()> {
        let parent = parent_of(path).unwrap_or("");
        match self.node(parent) {
            Some(node) if node.is_dir() => Ok(()),
            Some(_) => Err(ContentsError::NotADirectory(parent.to_string())),
            None => Err(ContentsError::NotFound(parent.to_string())),
        }
    }
}

#[async_trait]
impl ContentsBackend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn dir_exists(&self, path: &str) -> Result<bool> {
        Ok(self.node(&normalize(path)).map(|n| n.is_dir()).unwrap_or(false))
    }

    async fn is_hidden(&self, path: &str) -> Result<bool> {
        Ok(is_hidden_path(path))
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(self.node(&normalize(path)).map(|n| !n.is_dir()).unwrap_or(false))
    }

    async fn get(&self, path: &str, options: GetOptions) -> Result<Model> {
        let path = normalize(path);
        trace!("get: path={:?} content={}", path, options.content);
        let node = self
            .node(&path)
            .ok_or_else(|| ContentsError::NotFound(path.clone()))?;

        match &node.data {
            NodeData::Directory => {
                check_directory_request(&path, options.kind)?;
                let mut model = Self::model_for(&path, ModelKind::Directory, &node);
                if options.content {
                    model.content = Some(Content::Listing(self.listing(&path)?));
                    model.format = Some(ContentFormat::Json);
                }
                Ok(model)
            }
            NodeData::File(data) => {
                let kind = kind_for_file(&path, options.kind)?;
                let mut model = Self::model_for(&path, kind, &node);
                if options.content {
                    fill_content(&mut model, data, options.format)?;
                }
                Ok(model)
            }
        }
    }

    async fn save(&self, model: Model, path: &str) -> Result<Model> {
        let path = normalize(path);
        debug!("save: path={:?} type={}", path, model.kind.as_str());
        if path.is_empty() && model.kind != ModelKind::Directory {
            return Err(ContentsError::InvalidPath("/ is a directory".to_string()));
        }

        let existing = self.node(&path);
        match model.kind {
            ModelKind::Directory => match existing {
                Some(node) if !node.is_dir() => return Err(ContentsError::NotADirectory(path)),
                Some(_) => {}
                None => {
                    self.require_parent_dir(&path)?;
                    self.nodes.insert(path.clone(), Node::new(NodeData::Directory));
                }
            },
            ModelKind::File | ModelKind::Notebook => {
                let data = encode_content(&model)?;
                let node = match existing {
                    Some(node) if node.is_dir() => {
                        return Err(ContentsError::InvalidPath(format!("{} is a directory", path)))
                    }
                    Some(node) => Node {
                        data: NodeData::File(data),
                        created: node.created,
                        modified: Utc::now(),
                    },
                    None => {
                        self.require_parent_dir(&path)?;
                        Node::new(NodeData::File(data))
                    }
                };
                self.nodes.insert(path.clone(), node);
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
        let node = self
            .node(&path)
            .ok_or_else(|| ContentsError::NotFound(path.clone()))?;

        if node.is_dir() && self.nodes.iter().any(|e| is_below(&path, e.key())) {
            return Err(ContentsError::NotEmpty(path));
        }
        debug!("delete: path={:?}", path);
        self.nodes.remove(&path);
        self.checkpoints.remove(&path);
        Ok(())
    }

    async fn create_checkpoint(&self, path: &str) -> Result<Checkpoint> {
        let path = normalize(path);
        let node = self
            .node(&path)
            .ok_or_else(|| ContentsError::NotFound(path.clone()))?;
        let data = match node.data {
            NodeData::File(data) => data,
            NodeData::Directory => {
                return Err(ContentsError::InvalidPath(format!("{} is a directory", path)))
            }
        };

        let stored = StoredCheckpoint {
            data,
            created: Utc::now(),
        };
        let checkpoint = Checkpoint {
            id: DEFAULT_CHECKPOINT_ID.to_string(),
            last_modified: stored.created,
        };
        self.checkpoints.insert(path, stored);
        Ok(checkpoint)
    }

    async fn list_checkpoints(&self, path: &str) -> Result<Vec<Checkpoint>> {
        Ok(self
            .checkpoints
            .get(&normalize(path))
            .map(|c| {
                vec![Checkpoint {
                    id: DEFAULT_CHECKPOINT_ID.to_string(),
                    last_modified: c.created,
                }]
            })
            .unwrap_or_default())
    }

    async fn restore_checkpoint(&self, checkpoint_id: &str, path: &str) -> Result<()> {
        let path = normalize(path);
        let stored = self
            .checkpoints
            .get(&path)
            .filter(|_| checkpoint_id == DEFAULT_CHECKPOINT_ID)
            .map(|c| c.value().clone())
            .ok_or_else(|| ContentsError::CheckpointNotFound {
                checkpoint_id: checkpoint_id.to_string(),
                path: path.clone(),
            })?;

        self.require_parent_dir(&path)?;
        let created = match self.node(&path) {
            Some(node) if node.is_dir() => {
                return Err(ContentsError::InvalidPath(format!("{} is a directory", path)))
            }
            Some(node) => node.created,
            None => stored.created,
        };
        self.nodes.insert(
            path,
            Node {
                data: NodeData::File(stored.data),
                created,
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete_checkpoint(&self, checkpoint_id: &str, path: &str) -> Result<()> {
        let path = normalize(path);
        if checkpoint_id != DEFAULT_CHECKPOINT_ID || self.checkpoints.remove(&path).is_none() {
            return Err(ContentsError::CheckpointNotFound {
                checkpoint_id: checkpoint_id.to_string(),
                path,
            });
        }
        Ok(())
    }

    async fn rename_file(&self, old_path: &str, new_path: &str) -> Result<()> {
        let old_path = normalize(old_path);
        let new_path = normalize(new_path);
        if old_path == new_path {
            return Ok(());
        }
        if old_path.is_empty() || new_path.is_empty() || is_below(&old_path, &new_path) {
            return Err(ContentsError::InvalidPath(format!(
                "Cannot move {:?} to {:?}",
                old_path, new_path
            )));
        }
        if self.nodes.contains_key(&new_path) {
            return Err(ContentsError::AlreadyExists(new_path));
        }
        if !self.nodes.contains_key(&old_path) {
            return Err(ContentsError::NotFound(old_path));
        }
        self.require_parent_dir(&new_path)?;

        // Collect first; the map must not be mutated while iterating it
        let moved: Vec<String> = self
            .nodes
            .iter()
            .filter(|e| *e.key() == old_path || is_below(&old_path, e.key()))
            .map(|e| e.key().clone())
            .collect();

        debug!("rename_file: {:?} -> {:?} ({} nodes)", old_path, new_path, moved.len());
        for key in moved {
            if let Some((_, node)) = self.nodes.remove(&key) {
                let target = join(&new_path, &key[old_path.len()..]);
                self.nodes.insert(target, node);
            }
        }
        Ok(())
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.rename_file(old_path, new_path).await?;

        let old_path = normalize(old_path);
        let new_path = normalize(new_path);
        let moved: Vec<String> = self
            .checkpoints
            .iter()
            .filter(|e| *e.key() == old_path || is_below(&old_path, e.key()))
            .map(|e| e.key().clone())
            .collect();
        for key in moved {
            if let Some((_, checkpoint)) = self.checkpoints.remove(&key) {
                let target = join(&new_path, &key[old_path.len()..]);
                self.checkpoints.insert(target, checkpoint);
            }
        }
        Ok(())
    }
}
