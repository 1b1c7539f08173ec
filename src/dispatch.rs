//! Mount-point dispatcher
//!
//! [`MixedContents`] presents several backends as one tree. Each call is
//! routed to the backend owning its path (longest mount prefix wins), run
//! with the mount-relative path, and any returned model is rewritten back to
//! unified coordinates.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::backend::{connect, ContentsBackend};
use crate::config::Config;
use crate::error::{ContentsError, Result};
use crate::model::{name_of, Checkpoint, Content, GetOptions, Model};
use crate::mount::{unified_path, MountTable, Resolved};
use crate::observe::{DispatchEvent, DispatchObserver, Operation, TracingObserver};

type SharedBackend = Arc<dyn ContentsBackend>;

/// Rewrite a backend model (and any listing below it) into unified paths
pub fn unify_model(mount: &str, mut model: Model) -> Model {
    model.path = unified_path(mount, &model.path);
    if model.name.is_empty() {
        model.name = name_of(&model.path);
    }
    if let Some(Content::Listing(children)) = model.content.take() {
        model.content = Some(Content::Listing(
            children
                .into_iter()
                .map(|child| unify_model(mount, child))
                .collect(),
        ));
    }
    model
}

/// Contents backend dispatching to mounted backends by path prefix
pub struct MixedContents {
    mounts: MountTable<SharedBackend>,
    observer: Arc<dyn DispatchObserver>,
}

impl MixedContents {
    /// Dispatch over a prepared mount table
    pub fn new(mounts: MountTable<SharedBackend>) -> Self {
        Self {
            mounts,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replace the dispatch observer
    pub fn with_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Build the mount table described by a configuration
    ///
    /// Mounts naming the same backend identifier share one instance.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let mut instances: HashMap<&str, SharedBackend> = HashMap::new();
        let mut bindings = Vec::with_capacity(config.mounts.len());

        for mount in &config.mounts {
            let backend = match instances.get(mount.backend.as_str()) {
                Some(backend) => backend.clone(),
                None => {
                    let backend = connect(&mount.config).await?;
                    instances.insert(mount.backend.as_str(), backend.clone());
                    backend
                }
            };
            info!(
                "Mounting {} backend {:?} at {}",
                mount.config.kind(),
                mount.backend,
                unified_path(&mount.prefix, "")
            );
            bindings.push((mount.prefix.clone(), backend));
        }

        Ok(Self::new(MountTable::from_bindings(bindings)?))
    }

    pub fn mounts(&self) -> &MountTable<SharedBackend> {
        &self.mounts
    }

    /// Resolve one path, reporting the decision
    fn route(&self, operation: Operation, path: &str) -> Result<Resolved<'_, SharedBackend>> {
        match self.mounts.resolve(path) {
            Ok(resolved) => {
                self.observer.observe(&DispatchEvent::Resolved {
                    operation,
                    path: path.to_string(),
                    mount: resolved.prefix.to_string(),
                    child_path: resolved.child_path.clone(),
                });
                Ok(resolved)
            }
            Err(e) => {
                self.observer.observe(&DispatchEvent::Unresolved {
                    operation,
                    path: path.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Resolve a source and destination that must share a mount
    ///
    /// Both paths are resolved before the mounts are compared, so an
    /// unmounted path is reported as such even when the other one resolves.
    fn route_pair(
        &self,
        operation: Operation,
        from: &str,
        to: &str,
    ) -> Result<(Resolved<'_, SharedBackend>, Resolved<'_, SharedBackend>)> {
        let source = self.route(operation, from)?;
        let dest = self.route(operation, to)?;

        if source.prefix != dest.prefix {
            let from_mount = unified_path(source.prefix, "");
            let to_mount = unified_path(dest.prefix, "");
            self.observer.observe(&DispatchEvent::CrossMount {
                operation,
                from_path: from.to_string(),
                to_path: to.to_string(),
                from_mount: from_mount.clone(),
                to_mount: to_mount.clone(),
            });
            return Err(ContentsError::CrossMount {
                from_mount,
                to_mount,
            });
        }

        Ok((source, dest))
    }
}

#[async_trait]
impl ContentsBackend for MixedContents {
    fn kind(&self) -> &'static str {
        "mixed"
    }

    async fn dir_exists(&self, path: &str) -> Result<bool> {
        let r = self.route(Operation::DirExists, path)?;
        r.target.dir_exists(&r.child_path).await
    }

    async fn is_hidden(&self, path: &str) -> Result<bool> {
        let r = self.route(Operation::IsHidden, path)?;
        r.target.is_hidden(&r.child_path).await
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        let r = self.route(Operation::FileExists, path)?;
        r.target.file_exists(&r.child_path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let r = self.route(Operation::Exists, path)?;
        r.target.exists(&r.child_path).await
    }

    async fn get(&self, path: &str, options: GetOptions) -> Result<Model> {
        let r = self.route(Operation::Get, path)?;
        let model = r.target.get(&r.child_path, options).await?;
        Ok(unify_model(r.prefix, model))
    }

    async fn save(&self, mut model: Model, path: &str) -> Result<Model> {
        let r = self.route(Operation::Save, path)?;
        model.path = r.child_path.clone();
        let saved = r.target.save(model, &r.child_path).await?;
        Ok(unify_model(r.prefix, saved))
    }

    async fn update(&self, mut model: Model, path: &str) -> Result<Model> {
        // A model without a path stays where it is
        let destination = if model.path.is_empty() {
            path.to_string()
        } else {
            model.path.clone()
        };
        let (source, dest) = self.route_pair(Operation::Update, path, &destination)?;
        if dest.child_path.is_empty() && !source.child_path.is_empty() {
            return Err(ContentsError::InvalidPath(format!(
                "Cannot move {} onto mount point {}",
                path,
                unified_path(dest.prefix, "")
            )));
        }
        model.path = dest.child_path.clone();
        let updated = source.target.update(model, &source.child_path).await?;
        Ok(unify_model(source.prefix, updated))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let r = self.route(Operation::Delete, path)?;
        r.target.delete(&r.child_path).await
    }

    async fn create_checkpoint(&self, path: &str) -> Result<Checkpoint> {
        let r = self.route(Operation::CreateCheckpoint, path)?;
        r.target.create_checkpoint(&r.child_path).await
    }

    async fn list_checkpoints(&self, path: &str) -> Result<Vec<Checkpoint>> {
        let r = self.route(Operation::ListCheckpoints, path)?;
        r.target.list_checkpoints(&r.child_path).await
    }

    async fn restore_checkpoint(&self, checkpoint_id: &str, path: &str) -> Result<()> {
        let r = self.route(Operation::RestoreCheckpoint, path)?;
        r.target.restore_checkpoint(checkpoint_id, &r.child_path).await
    }

    async fn delete_checkpoint(&self, checkpoint_id: &str, path: &str) -> Result<()> {
        let r = self.route(Operation::DeleteCheckpoint, path)?;
        r.target.delete_checkpoint(checkpoint_id, &r.child_path).await
    }

    async fn rename_file(&self, old_path: &str, new_path: &str) -> Result<()> {
        let (source, dest) = self.route_pair(Operation::RenameFile, old_path, new_path)?;
        source
            .target
            .rename_file(&source.child_path, &dest.child_path)
            .await
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let (source, dest) = self.route_pair(Operation::Rename, old_path, new_path)?;
        source.target.rename(&source.child_path, &dest.child_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::model::ModelKind;
    use crate::observe::RecordingObserver;

    /// Mounts `""`, `b` and `b/c`, each holding a file naming its backend
    async fn abc() -> (MixedContents, Vec<Arc<MemoryBackend>>, Arc<RecordingObserver>) {
        let mut backends = Vec::new();
        let mut bindings: Vec<(&str, SharedBackend)> = Vec::new();
        for (prefix, tag) in [("", "A"), ("b", "B"), ("b/c", "C")] {
            let backend = Arc::new(MemoryBackend::new());
            backend
                .save(Model::text_file("whoami.txt", tag), "whoami.txt")
                .await
                .unwrap();
            let shared: SharedBackend = backend.clone();
            bindings.push((prefix, shared));
            backends.push(backend);
        }

        let observer = Arc::new(RecordingObserver::new());
        let contents = MixedContents::new(MountTable::from_bindings(bindings).unwrap())
            .with_observer(observer.clone());
        (contents, backends, observer)
    }

    async fn whoami(contents: &MixedContents, dir: &str) -> String {
        let model = contents
            .get(&format!("{}/whoami.txt", dir), GetOptions::default())
            .await
            .unwrap();
        match model.content {
            Some(Content::Text(text)) => text,
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn test_unify_model_recursive() {
        let mut deeper = Model::directory("sub/deeper");
        deeper.content = Some(Content::Listing(vec![Model::new(
            "sub/deeper/leaf.ipynb",
            ModelKind::Notebook,
        )]));
        let mut sub = Model::directory("sub");
        sub.content = Some(Content::Listing(vec![
            Model::new("sub/y.txt", ModelKind::File),
            deeper,
        ]));
        let mut dir = Model::directory("");
        dir.content = Some(Content::Listing(vec![Model::new("x.txt", ModelKind::File), sub]));

        let unified = unify_model("b/c", dir);
        assert_eq!(unified.path, "/b/c");
        assert_eq!(unified.name, "c");
        let paths: Vec<_> = unified.children().iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["/b/c/x.txt", "/b/c/sub"]);

        let sub = &unified.children()[1];
        let paths: Vec<_> = sub.children().iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["/b/c/sub/y.txt", "/b/c/sub/deeper"]);
        let leaf = &sub.children()[1].children()[0];
        assert_eq!(leaf.path, "/b/c/sub/deeper/leaf.ipynb");
        assert_eq!(leaf.name, "leaf.ipynb");

        assert_eq!(unify_model("", Model::directory("")).path, "/");
    }

    #[tokio::test]
    async fn test_routes_to_longest_prefix() {
        let (contents, _, _) = abc().await;
        assert_eq!(whoami(&contents, "").await, "A");
        assert_eq!(whoami(&contents, "/b").await, "B");
        assert_eq!(whoami(&contents, "b/c").await, "C");
    }

    #[tokio::test]
    async fn test_get_rewrites_paths() {
        let (contents, _, _) = abc().await;
        let model = contents.get("b", GetOptions::default()).await.unwrap();
        assert_eq!(model.path, "/b");
        assert_eq!(model.children()[0].path, "/b/whoami.txt");

        let root = contents.get("/", GetOptions::default()).await.unwrap();
        assert_eq!(root.path, "/");
        // Nested mounts are not synthesized into the parent listing
        let names: Vec<_> = root.children().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["whoami.txt"]);
    }

    #[tokio::test]
    async fn test_save_lands_in_owning_backend() {
        let (contents, backends, observer) = abc().await;
        let saved = contents
            .save(Model::text_file("/b/new.txt", "n"), "/b/new.txt")
            .await
            .unwrap();
        assert_eq!(saved.path, "/b/new.txt");
        assert!(backends[1].file_exists("new.txt").await.unwrap());
        assert!(!backends[0].file_exists("b/new.txt").await.unwrap());

        assert_eq!(
            observer.events().last(),
            Some(&DispatchEvent::Resolved {
                operation: Operation::Save,
                path: "/b/new.txt".to_string(),
                mount: "b".to_string(),
                child_path: "new.txt".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_no_matching_mount() {
        let backend: SharedBackend = Arc::new(MemoryBackend::new());
        let observer = Arc::new(RecordingObserver::new());
        let contents = MixedContents::new(MountTable::from_bindings([("hdfs", backend)]).unwrap())
            .with_observer(observer.clone());

        let err = contents.get("/", GetOptions::default()).await.unwrap_err();
        assert!(matches!(err, ContentsError::NoMatchingMount(_)));
        assert!(matches!(
            contents.exists("other/file").await,
            Err(ContentsError::NoMatchingMount(_))
        ));
        assert_eq!(
            observer.events()[0],
            DispatchEvent::Unresolved {
                operation: Operation::Get,
                path: "/".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_cross_mount_rename_rejected() {
        let (contents, backends, observer) = abc().await;
        let err = contents
            .rename("/b/whoami.txt", "/moved.txt")
            .await
            .unwrap_err();
        match err {
            ContentsError::CrossMount {
                from_mount,
                to_mount,
            } => {
                assert_eq!(from_mount, "/b");
                assert_eq!(to_mount, "/");
            }
            other => panic!("expected CrossMount, got {:?}", other),
        }
        assert!(backends[1].file_exists("whoami.txt").await.unwrap());
        assert!(!backends[0].file_exists("moved.txt").await.unwrap());
        assert!(matches!(
            observer.events().last(),
            Some(DispatchEvent::CrossMount { .. })
        ));
    }

    #[tokio::test]
    async fn test_rename_within_mount() {
        let (contents, backends, _) = abc().await;
        contents
            .rename_file("/b/c/whoami.txt", "/b/c/renamed.txt")
            .await
            .unwrap();
        assert!(backends[2].file_exists("renamed.txt").await.unwrap());
        assert!(!backends[2].file_exists("whoami.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_uses_model_path_as_destination() {
        let (contents, backends, _) = abc().await;
        let updated = contents
            .update(Model::new("/b/moved.txt", ModelKind::File), "/b/whoami.txt")
            .await
            .unwrap();
        assert_eq!(updated.path, "/b/moved.txt");
        assert!(backends[1].file_exists("moved.txt").await.unwrap());

        let err = contents
            .update(Model::new("/elsewhere.txt", ModelKind::File), "/b/moved.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, ContentsError::CrossMount { .. }));
    }

    #[tokio::test]
    async fn test_update_without_path_keeps_location() {
        let (contents, backends, _) = abc().await;
        let patch = Model::new("", ModelKind::File);
        assert!(patch.path.is_empty());

        let updated = contents.update(patch, "/b/whoami.txt").await.unwrap();
        assert_eq!(updated.path, "/b/whoami.txt");
        assert!(backends[1].file_exists("whoami.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_onto_mount_point_rejected() {
        let (contents, backends, _) = abc().await;
        let err = contents
            .update(Model::new("/b/c", ModelKind::File), "/b/c/whoami.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, ContentsError::InvalidPath(_)));
        assert!(backends[2].file_exists("whoami.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_unresolvable_destination_reported_first() {
        let backend: SharedBackend = Arc::new(MemoryBackend::new());
        let contents =
            MixedContents::new(MountTable::from_bindings([("data", backend)]).unwrap());
        let err = contents.rename("/data/x", "/other/y").await.unwrap_err();
        assert!(matches!(err, ContentsError::NoMatchingMount(ref p) if p == "/other/y"));
    }

    #[tokio::test]
    async fn test_checkpoints_routed() {
        let (contents, backends, _) = abc().await;
        let checkpoint = contents.create_checkpoint("/b/c/whoami.txt").await.unwrap();
        assert_eq!(
            backends[2].list_checkpoints("whoami.txt").await.unwrap(),
            vec![checkpoint.clone()]
        );
        contents
            .delete_checkpoint(&checkpoint.id, "/b/c/whoami.txt")
            .await
            .unwrap();
        assert!(contents
            .list_checkpoints("/b/c/whoami.txt")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_backend_errors_pass_through() {
        let (contents, _, _) = abc().await;
        let err = contents
            .get("/b/missing.txt", GetOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ContentsError::NotFound(ref p) if p == "missing.txt"));
    }

    #[tokio::test]
    async fn test_from_config_shares_instances() {
        let config = Config::from_str(
            r#"
mount_points: "one:::scratch,two:::scratch,:::memory"
backends:
  scratch:
    type: memory
"#,
        )
        .unwrap();
        let contents = MixedContents::from_config(&config).await.unwrap();
        assert_eq!(contents.mounts().len(), 3);

        contents
            .save(Model::text_file("x.txt", "x"), "/one/x.txt")
            .await
            .unwrap();
        assert!(contents.file_exists("/two/x.txt").await.unwrap());
        assert!(!contents.file_exists("/x.txt").await.unwrap());
    }
}
