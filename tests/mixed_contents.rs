//! End-to-end tests driving the dispatcher built from configuration

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use mixed_contents::backend::local::LocalBackend;
use mixed_contents::backend::memory::MemoryBackend;
use mixed_contents::backend::ContentsBackend;
use mixed_contents::config::{parse_mount_points, Config, LocalBackendConfig};
use mixed_contents::dispatch::MixedContents;
use mixed_contents::model::{Content, GetOptions, Model, ModelKind};
use mixed_contents::mount::MountTable;
use mixed_contents::observe::{DispatchEvent, RecordingObserver};
use mixed_contents::ContentsError;

fn local(dir: &TempDir) -> Arc<dyn ContentsBackend> {
    Arc::new(
        LocalBackend::new(LocalBackendConfig {
            root_dir: dir.path().to_path_buf(),
            ..LocalBackendConfig::default()
        })
        .unwrap(),
    )
}

/// Every path in a listing, recursively, starts with `prefix`
fn all_paths_under(model: &Model, prefix: &str) -> bool {
    model.path.starts_with(prefix) && model.children().iter().all(|c| all_paths_under(c, prefix))
}

#[tokio::test]
async fn test_root_mount_lists_local_files() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("LICENSE"), "MIT License").unwrap();

    let table = MountTable::from_bindings([("", local(&dir))]).unwrap();
    let contents = MixedContents::new(table);

    let root = contents.get("", GetOptions::default()).await.unwrap();
    assert_eq!(root.kind, ModelKind::Directory);
    let license = root
        .children()
        .iter()
        .find(|c| c.name == "LICENSE")
        .expect("LICENSE listed");
    assert_eq!(license.path, "/LICENSE");
    assert_eq!(license.kind, ModelKind::File);
}

#[tokio::test]
async fn test_config_driven_tree() {
    let home = TempDir::new().unwrap();
    let notes = TempDir::new().unwrap();
    std::fs::create_dir(home.path().join("projects")).unwrap();
    std::fs::write(notes.path().join("todo.md"), "- write tests").unwrap();

    let yaml = format!(
        r#"
logging:
  level: debug
mount_points: "notes:::notes,scratch:::memory,:::home"
backends:
  home:
    type: local
    root_dir: {}
  notes:
    type: local
    root_dir: {}
"#,
        home.path().display(),
        notes.path().display()
    );
    let config = Config::from_str(&yaml).unwrap();
    config.validate().unwrap();

    let observer = Arc::new(RecordingObserver::new());
    let contents = MixedContents::from_config(&config)
        .await
        .unwrap()
        .with_observer(observer.clone());

    let prefixes: Vec<_> = contents.mounts().prefixes().collect();
    assert_eq!(prefixes, vec!["scratch", "notes", ""]);

    // Each mount sees only its own backend
    let todo = contents.get("/notes/todo.md", GetOptions::default()).await.unwrap();
    assert_eq!(todo.content, Some(Content::Text("- write tests".into())));
    assert!(contents.dir_exists("/projects").await.unwrap());
    assert!(!contents.exists("/notes/projects").await.unwrap());

    let listing = contents.get("/notes", GetOptions::default()).await.unwrap();
    assert!(all_paths_under(&listing, "/notes"));

    // Notebooks round-trip through the scratch mount
    let doc = json!({"cells": [], "metadata": {}, "nbformat": 4, "nbformat_minor": 5});
    contents
        .save(Model::notebook("/scratch/a.ipynb", doc.clone()), "/scratch/a.ipynb")
        .await
        .unwrap();
    let nb = contents.get("/scratch/a.ipynb", GetOptions::default()).await.unwrap();
    assert_eq!(nb.kind, ModelKind::Notebook);
    assert_eq!(nb.content, Some(Content::Json(doc)));
    assert!(!home.path().join("scratch").exists());

    assert!(observer.events().iter().all(|e| matches!(e, DispatchEvent::Resolved { .. })));
}

#[tokio::test]
async fn test_nested_mount_shadows_parent_directory() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("data")).unwrap();
    std::fs::write(dir.path().join("data/on-disk.txt"), "disk").unwrap();

    let scratch: Arc<dyn ContentsBackend> = Arc::new(MemoryBackend::new());
    let table = MountTable::from_bindings([("", local(&dir)), ("data", scratch)]).unwrap();
    let contents = MixedContents::new(table);

    // The nested mount owns everything below its prefix
    assert!(!contents.file_exists("/data/on-disk.txt").await.unwrap());
    let data = contents.get("/data", GetOptions::default()).await.unwrap();
    assert_eq!(data.path, "/data");
    assert!(data.children().is_empty());

    // The parent listing still shows the local directory
    let root = contents.get("/", GetOptions::default()).await.unwrap();
    assert!(root.children().iter().any(|c| c.path == "/data"));
}

#[tokio::test]
async fn test_cross_mount_rename_leaves_both_sides_untouched() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("report.txt"), "q3").unwrap();

    let scratch: Arc<dyn ContentsBackend> = Arc::new(MemoryBackend::new());
    let table = MountTable::from_bindings([("", local(&dir)), ("tmp", scratch)]).unwrap();
    let contents = MixedContents::new(table);

    let err = contents
        .rename("/report.txt", "/tmp/report.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, ContentsError::CrossMount { .. }));
    assert_eq!(err.status_code(), 400);
    assert!(dir.path().join("report.txt").exists());
    assert!(!contents.exists("/tmp/report.txt").await.unwrap());
}

#[tokio::test]
async fn test_checkpoints_through_dispatcher() {
    let dir = TempDir::new().unwrap();
    let table = MountTable::from_bindings([("work", local(&dir))]).unwrap();
    let contents = MixedContents::new(table);

    contents
        .save(Model::text_file("/work/a.txt", "v1"), "/work/a.txt")
        .await
        .unwrap();
    let checkpoint = contents.create_checkpoint("/work/a.txt").await.unwrap();
    contents
        .save(Model::text_file("/work/a.txt", "v2"), "/work/a.txt")
        .await
        .unwrap();
    contents
        .restore_checkpoint(&checkpoint.id, "/work/a.txt")
        .await
        .unwrap();

    let model = contents.get("/work/a.txt", GetOptions::default()).await.unwrap();
    assert_eq!(model.content, Some(Content::Text("v1".into())));
    assert_eq!(contents.list_checkpoints("/work/a.txt").await.unwrap().len(), 1);

    contents.delete("/work/a.txt").await.unwrap();
    assert!(contents.list_checkpoints("/work/a.txt").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unmounted_path_fails() {
    let table = MountTable::from_bindings([(
        "hdfs",
        Arc::new(MemoryBackend::new()) as Arc<dyn ContentsBackend>,
    )])
    .unwrap();
    let contents = MixedContents::new(table);

    let err = contents.get("/", GetOptions::default()).await.unwrap_err();
    assert!(matches!(err, ContentsError::NoMatchingMount(_)));
    assert!(err.is_not_found());
    assert!(contents.get("/hdfs", GetOptions::default()).await.is_ok());
}

#[test]
fn test_mount_string_two_bindings() {
    let bindings = parse_mount_points("hdfs:::X,:::Y").unwrap();
    let prefixes: Vec<_> = bindings.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(prefixes, vec!["hdfs", ""]);
}
