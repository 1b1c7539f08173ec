//! Contents models exchanged with backends and callers
//!
//! The shapes follow the Jupyter contents API: every item is a [`Model`]
//! with a `type`, a `path`, timestamps and optional content.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ContentsError, Result};
use crate::mount::segments;

/// Id of the single checkpoint each backend keeps per file
pub const DEFAULT_CHECKPOINT_ID: &str = "checkpoint";

/// Notebook file extension
pub const NOTEBOOK_EXTENSION: &str = ".ipynb";

/// Item kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Directory,
    File,
    Notebook,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Directory => "directory",
            ModelKind::File => "file",
            ModelKind::Notebook => "notebook",
        }
    }
}

/// Encoding of the `content` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Text,
    Base64,
    Json,
}

/// Item content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Directory listing (children carry no content)
    Listing(Vec<Model>),
    /// File content, either text or base64 depending on `format`
    Text(String),
    /// Notebook document
    Json(serde_json::Value),
}

/// A file, notebook or directory record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ModelKind,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub format: Option<ContentFormat>,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub writable: bool,
}

impl Model {
    /// Metadata-only model for `path`
    pub fn new(path: &str, kind: ModelKind) -> Self {
        Self {
            name: name_of(path),
            path: path.to_string(),
            kind,
            created: None,
            last_modified: None,
            content: None,
            format: None,
            mimetype: None,
            writable: true,
        }
    }

    pub fn directory(path: &str) -> Self {
        Self::new(path, ModelKind::Directory)
    }

    /// Text file model ready to be saved
    pub fn text_file(path: &str, text: impl Into<String>) -> Self {
        let mut model = Self::new(path, ModelKind::File);
        model.content = Some(Content::Text(text.into()));
        model.format = Some(ContentFormat::Text);
        model.mimetype = Some(TEXT_MIMETYPE.to_string());
        model
    }

    /// Binary file model ready to be saved
    pub fn binary_file(path: &str, data: &[u8]) -> Self {
        let mut model = Self::new(path, ModelKind::File);
        model.content = Some(Content::Text(BASE64.encode(data)));
        model.format = Some(ContentFormat::Base64);
        model.mimetype = Some(BINARY_MIMETYPE.to_string());
        model
    }

    /// Notebook model ready to be saved
    pub fn notebook(path: &str, document: serde_json::Value) -> Self {
        let mut model = Self::new(path, ModelKind::Notebook);
        model.content = Some(Content::Json(document));
        model.format = Some(ContentFormat::Json);
        model
    }

    pub fn with_times(mut self, created: DateTime<Utc>, last_modified: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self.last_modified = Some(last_modified);
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == ModelKind::Directory
    }

    /// Children of a directory model fetched with content
    pub fn children(&self) -> &[Model] {
        match &self.content {
            Some(Content::Listing(children)) => children,
            _ => &[],
        }
    }
}

/// A saved checkpoint of a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub last_modified: DateTime<Utc>,
}

/// Options for fetching a model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOptions {
    /// Include content (directory listing, file body, notebook document)
    pub content: bool,
    /// Expected kind; a mismatch with what is stored is an error
    pub kind: Option<ModelKind>,
    /// Requested content format for files
    pub format: Option<ContentFormat>,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            content: true,
            kind: None,
            format: None,
        }
    }
}

impl GetOptions {
    /// Fetch metadata only
    pub fn metadata() -> Self {
        Self {
            content: false,
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: ModelKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_format(mut self, format: ContentFormat) -> Self {
        self.format = Some(format);
        self
    }
}

const TEXT_MIMETYPE: &str = "text/plain";
const BINARY_MIMETYPE: &str = "application/octet-stream";

/// Last segment of a path, `""` for the root
pub fn name_of(path: &str) -> String {
    segments(path).last().unwrap_or_default().to_string()
}

/// Whether any segment of the path is a dotfile
pub fn is_hidden_path(path: &str) -> bool {
    segments(path).any(|s| s.starts_with('.'))
}

/// Kind a stored file is reported as
pub fn kind_for_file(path: &str, requested: Option<ModelKind>) -> Result<ModelKind> {
    match requested {
        Some(ModelKind::Directory) => Err(ContentsError::NotADirectory(path.to_string())),
        Some(kind) => Ok(kind),
        None if path.ends_with(NOTEBOOK_EXTENSION) => Ok(ModelKind::Notebook),
        None => Ok(ModelKind::File),
    }
}

/// Reject a directory fetch that asked for a file or notebook
pub fn check_directory_request(path: &str, requested: Option<ModelKind>) -> Result<()> {
    match requested {
        None | Some(ModelKind::Directory) => Ok(()),
        Some(kind) => Err(ContentsError::InvalidPath(format!(
            "{} is a directory, not a {}",
            path,
            kind.as_str()
        ))),
    }
}

/// Reject checkpoint ids that are not a plain `[A-Za-z0-9_-]+` name
pub fn check_checkpoint_id(checkpoint_id: &str) -> Result<()> {
    let plain = !checkpoint_id.is_empty()
        && checkpoint_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if plain {
        Ok(())
    } else {
        Err(ContentsError::InvalidPath(format!(
            "Invalid checkpoint id: {:?}",
            checkpoint_id
        )))
    }
}

/// Fill `model` with the decoded content of a stored file
pub fn fill_content(model: &mut Model, data: &[u8], format: Option<ContentFormat>) -> Result<()> {
    match model.kind {
        ModelKind::Notebook => {
            let document: serde_json::Value = serde_json::from_slice(data).map_err(|e| {
                ContentsError::InvalidModel(format!("Unreadable Notebook: {} {}", model.path, e))
            })?;
            model.content = Some(Content::Json(document));
            model.format = Some(ContentFormat::Json);
        }
        ModelKind::File => {
            let (text, format) = match format {
                Some(ContentFormat::Base64) => (BASE64.encode(data), ContentFormat::Base64),
                Some(ContentFormat::Text) => match std::str::from_utf8(data) {
                    Ok(s) => (s.to_string(), ContentFormat::Text),
                    Err(_) => {
                        return Err(ContentsError::InvalidModel(format!(
                            "{} is not UTF-8 encoded",
                            model.path
                        )))
                    }
                },
                _ => match std::str::from_utf8(data) {
                    Ok(s) => (s.to_string(), ContentFormat::Text),
                    Err(_) => (BASE64.encode(data), ContentFormat::Base64),
                },
            };
            model.mimetype = Some(
                match format {
                    ContentFormat::Text => TEXT_MIMETYPE,
                    _ => BINARY_MIMETYPE,
                }
                .to_string(),
            );
            model.content = Some(Content::Text(text));
            model.format = Some(format);
        }
        ModelKind::Directory => {
            return Err(ContentsError::InvalidModel(format!(
                "{} is a directory and has no file content",
                model.path
            )))
        }
    }
    Ok(())
}

/// Bytes to store for a file or notebook model being saved
pub fn encode_content(model: &Model) -> Result<Bytes> {
    let content = model.content.as_ref().ok_or_else(|| {
        ContentsError::InvalidModel("No file content provided".to_string())
    })?;

    match (model.kind, content) {
        (ModelKind::Notebook, Content::Json(document)) => serde_json::to_vec_pretty(document)
            .map(Bytes::from)
            .map_err(|e| ContentsError::InvalidModel(format!("Unserializable notebook: {}", e))),
        (ModelKind::Notebook, Content::Text(raw)) => {
            // Accept a notebook sent as a JSON string, but only if it parses
            serde_json::from_str::<serde_json::Value>(raw).map_err(|e| {
                ContentsError::InvalidModel(format!("Unreadable Notebook: {}", e))
            })?;
            Ok(Bytes::from(raw.clone().into_bytes()))
        }
        (ModelKind::File, Content::Text(text)) => match model.format {
            Some(ContentFormat::Base64) => BASE64
                .decode(text.as_bytes())
                .map(Bytes::from)
                .map_err(|e| ContentsError::InvalidModel(format!("Invalid base64 content: {}", e))),
            Some(ContentFormat::Text) | None => Ok(Bytes::from(text.clone().into_bytes())),
            Some(ContentFormat::Json) => Err(ContentsError::InvalidModel(
                "File content must be text or base64".to_string(),
            )),
        },
        (kind, _) => Err(ContentsError::InvalidModel(format!(
            "Content does not match type {}",
            kind.as_str()
        ))),
    }
}
