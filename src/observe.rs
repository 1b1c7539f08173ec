//! Dispatch tracing hooks
//!
//! The dispatcher reports every routing decision to a [`DispatchObserver`].
//! The default observer writes `tracing` events; [`RecordingObserver`] keeps
//! them in memory for inspection.

use std::fmt;

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Contents operation being routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    DirExists,
    IsHidden,
    FileExists,
    Exists,
    Get,
    Save,
    Update,
    Delete,
    CreateCheckpoint,
    ListCheckpoints,
    RestoreCheckpoint,
    DeleteCheckpoint,
    RenameFile,
    Rename,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::DirExists => "dir_exists",
            Operation::IsHidden => "is_hidden",
            Operation::FileExists => "file_exists",
            Operation::Exists => "exists",
            Operation::Get => "get",
            Operation::Save => "save",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::CreateCheckpoint => "create_checkpoint",
            Operation::ListCheckpoints => "list_checkpoints",
            Operation::RestoreCheckpoint => "restore_checkpoint",
            Operation::DeleteCheckpoint => "delete_checkpoint",
            Operation::RenameFile => "rename_file",
            Operation::Rename => "rename",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A routing decision made by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// The path was routed to the mount at `mount`
    Resolved {
        operation: Operation,
        path: String,
        mount: String,
        child_path: String,
    },
    /// No mount owns the path
    Unresolved { operation: Operation, path: String },
    /// Both paths resolved, but to different mounts
    CrossMount {
        operation: Operation,
        from_path: String,
        to_path: String,
        from_mount: String,
        to_mount: String,
    },
}

impl DispatchEvent {
    pub fn operation(&self) -> Operation {
        match self {
            DispatchEvent::Resolved { operation, .. }
            | DispatchEvent::Unresolved { operation, .. }
            | DispatchEvent::CrossMount { operation, .. } => *operation,
        }
    }
}

/// Sink for dispatch events
pub trait DispatchObserver: Send + Sync {
    fn observe(&self, event: &DispatchEvent);
}

/// Observer writing events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl DispatchObserver for TracingObserver {
    fn observe(&self, event: &DispatchEvent) {
        match event {
            DispatchEvent::Resolved {
                operation,
                path,
                mount,
                child_path,
            } => {
                debug!(
                    "{}: {:?} -> mount={:?} child={:?}",
                    operation, path, mount, child_path
                );
            }
            DispatchEvent::Unresolved { operation, path } => {
                warn!("{}: no mount point for {:?}", operation, path);
            }
            DispatchEvent::CrossMount {
                operation,
                from_path,
                to_path,
                from_mount,
                to_mount,
            } => {
                warn!(
                    "{}: refusing {:?} -> {:?} across mounts {:?} and {:?}",
                    operation, from_path, to_path, from_mount, to_mount
                );
            }
        }
    }
}

/// Observer collecting events in memory
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<DispatchEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<DispatchEvent> {
        self.events.lock().clone()
    }

    /// Remove and return the events recorded so far
    pub fn take(&self) -> Vec<DispatchEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl DispatchObserver for RecordingObserver {
    fn observe(&self, event: &DispatchEvent) {
        self.events.lock().push(event.clone());
    }
}
