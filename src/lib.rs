//! mixed-contents: a contents manager that mounts storage backends on path prefixes
//!
//! Callers see one unified tree of files, notebooks and directories. Each
//! operation is routed to the backend mounted at the longest prefix of its
//! path and runs there with the mount-relative path.
//!
//! # Architecture
//!
//! - **Mount table**: normalized prefix -> backend bindings with
//!   segment-aware longest-prefix resolution.
//! - **Backends**: storage implementations of the `ContentsBackend` trait
//!   (local directory, S3, in-memory).
//! - **Dispatcher**: `MixedContents`, itself a `ContentsBackend`, which routes
//!   calls and rewrites returned paths into unified coordinates.
//!
//! # Example
//!
//! ```no_run
//! use mixed_contents::backend::ContentsBackend;
//! use mixed_contents::config::Config;
//! use mixed_contents::dispatch::MixedContents;
//! use mixed_contents::model::GetOptions;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file(&"config.yaml".into())?;
//! let contents = MixedContents::from_config(&config).await?;
//!
//! let root = contents.get("/", GetOptions::default()).await?;
//! for child in root.children() {
//!     println!("{}", child.path);
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod model;
pub mod mount;
pub mod observe;

pub use error::{ContentsError, Result};
