//! Configuration parsing and structures

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::env::substitute_env_vars;

/// Separator between a mount prefix and its backend identifier
pub const MOUNT_SEPARATOR: &str = ":::";

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Mount string: `prefix:::backend[,prefix:::backend...]`
    #[serde(default)]
    pub mount_points: String,

    /// Top-level backend defaults
    #[serde(default)]
    pub defaults: BackendDefaults,

    /// Named backend definitions referenced from `mount_points`
    #[serde(default)]
    pub backends: BTreeMap<String, RawBackendConfig>,
}

/// Top-level backend defaults section
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BackendDefaults {
    /// S3 backend defaults
    pub s3: Option<S3BackendDefaults>,
}

/// S3 backend defaults (bucket is required)
#[derive(Debug, Clone, Deserialize)]
pub struct S3BackendDefaults {
    /// S3 bucket name
    pub bucket: String,

    /// AWS region
    pub region: Option<String>,

    /// Key prefix the backend root maps to
    pub prefix: Option<String>,

    /// Custom endpoint URL (for S3-compatible stores)
    pub endpoint: Option<String>,

    /// Force path-style addressing (for MinIO, LocalStack, etc.)
    #[serde(default)]
    pub force_path_style: bool,

    /// Reject every write by default
    #[serde(default)]
    pub read_only: bool,
}

/// Backend definition (tagged enum)
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RawBackendConfig {
    /// Directory on local disk
    Local(LocalBackendConfig),

    /// Process-local tree
    Memory,

    /// S3 object store; missing fields inherit from `defaults.s3`
    S3(S3BackendOverrides),
}

/// S3 backend definition - all fields optional for override mode
#[derive(Debug, Clone, Deserialize, Default)]
pub struct S3BackendOverrides {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub prefix: Option<String>,
    pub endpoint: Option<String>,
    pub force_path_style: Option<bool>,
    pub read_only: Option<bool>,
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Top-level configuration (resolved from RawConfig)
#[derive(Debug, Clone)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Mount points in configuration order (fully resolved)
    pub mounts: Vec<MountConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Mount point configuration (resolved)
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Normalized mount prefix (`""` is the root)
    pub prefix: String,

    /// Backend identifier as written in the mount string
    pub backend: String,

    /// Backend configuration (fully resolved)
    pub config: BackendConfig,
}

/// Backend configuration (fully resolved)
#[derive(Debug, Clone, PartialEq)]
pub enum BackendConfig {
    Local(LocalBackendConfig),
    Memory,
    S3(S3BackendConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Local(_) => "local",
            BackendConfig::Memory => "memory",
            BackendConfig::S3(_) => "s3",
        }
    }
}

/// Local directory backend configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LocalBackendConfig {
    /// Directory the backend root maps to
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Glob patterns of names left out of directory listings
    #[serde(default = "default_hide_globs")]
    pub hide_globs: Vec<String>,

    /// List and serve dotfiles
    #[serde(default)]
    pub allow_hidden: bool,

    /// Per-directory folder holding checkpoints
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_hide_globs() -> Vec<String> {
    ["__pycache__", "*.pyc", "*.pyo", ".DS_Store", "*.so", "*.dylib", "*~"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_checkpoint_dir() -> String {
    ".ipynb_checkpoints".to_string()
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            hide_globs: default_hide_globs(),
            allow_hidden: false,
            checkpoint_dir: default_checkpoint_dir(),
        }
    }
}

/// S3 backend configuration (fully resolved)
#[derive(Debug, Clone, PartialEq)]
pub struct S3BackendConfig {
    /// S3 bucket name
    pub bucket: String,

    /// AWS region
    pub region: Option<String>,

    /// Key prefix the backend root maps to
    pub prefix: Option<String>,

    /// Custom endpoint URL (for S3-compatible stores)
    pub endpoint: Option<String>,

    /// Force path-style addressing (for MinIO, LocalStack, etc.)
    pub force_path_style: bool,

    /// Reject every write
    pub read_only: bool,
}

// =============================================================================
// Mount string
// =============================================================================

/// Parse a mount string into `(prefix, backend identifier)` pairs
///
/// e.g. `hdfs:::hdfs,:::home`. Prefixes have leading/trailing slashes
/// stripped, so the root `/` is written as an empty prefix. An empty string
/// yields no mounts.
pub fn parse_mount_points(conf: &str) -> Result<Vec<(String, String)>, ConfigError> {
    if conf.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut bindings: Vec<(String, String)> = Vec::new();
    for entry in conf.split(',') {
        let mut parts = entry.split(MOUNT_SEPARATOR);
        let (prefix, backend) = match (parts.next(), parts.next(), parts.next()) {
            (Some(prefix), Some(backend), None) => (prefix, backend.trim()),
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Malformed mount entry {:?}: expected prefix{}backend",
                    entry, MOUNT_SEPARATOR
                )))
            }
        };

        if backend.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "Mount entry {:?} has no backend",
                entry
            )));
        }

        let prefix = crate::mount::normalize(prefix.trim());
        if bindings.iter().any(|(p, _)| *p == prefix) {
            return Err(ConfigError::ValidationError(format!(
                "Duplicate mount point: {:?}",
                prefix
            )));
        }
        bindings.push((prefix, backend.to_string()));
    }

    Ok(bindings)
}

// =============================================================================
// Resolution Logic
// =============================================================================

impl RawConfig {
    /// Resolve raw config into final config by binding each mount to its backend
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let RawConfig {
            logging,
            mount_points,
            defaults,
            backends,
        } = self;

        let bindings = parse_mount_points(&mount_points)?;
        let mut mounts = Vec::with_capacity(bindings.len());

        for (prefix, backend) in bindings {
            let config = Self::resolve_backend(&defaults, &backends, &prefix, &backend)?;
            mounts.push(MountConfig {
                prefix,
                backend,
                config,
            });
        }

        Ok(Config { logging, mounts })
    }

    fn resolve_backend(
        defaults: &BackendDefaults,
        backends: &BTreeMap<String, RawBackendConfig>,
        prefix: &str,
        name: &str,
    ) -> Result<BackendConfig, ConfigError> {
        match backends.get(name) {
            Some(RawBackendConfig::Local(local)) => Ok(BackendConfig::Local(local.clone())),
            Some(RawBackendConfig::Memory) => Ok(BackendConfig::Memory),
            Some(RawBackendConfig::S3(overrides)) => Ok(BackendConfig::S3(
                Self::resolve_s3_backend(defaults, overrides.clone(), name)?,
            )),
            // Undefined identifiers fall back to the built-in of that name
            None => match name {
                "local" => Ok(BackendConfig::Local(LocalBackendConfig::default())),
                "memory" => Ok(BackendConfig::Memory),
                "s3" => Ok(BackendConfig::S3(Self::resolve_s3_backend(
                    defaults,
                    S3BackendOverrides::default(),
                    name,
                )?)),
                _ => Err(ConfigError::ValidationError(format!(
                    "Mount point {:?} references unknown backend {:?}",
                    prefix, name
                ))),
            },
        }
    }

    fn resolve_s3_backend(
        defaults: &BackendDefaults,
        backend: S3BackendOverrides,
        name: &str,
    ) -> Result<S3BackendConfig, ConfigError> {
        let defaults = defaults.s3.as_ref();

        // Backend values override defaults; bucket must be specified somewhere
        let bucket = backend
            .bucket
            .or_else(|| defaults.map(|d| d.bucket.clone()))
            .ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "Backend {:?} is an S3 backend but no bucket specified (either on the backend or in defaults.s3)",
                    name
                ))
            })?;

        Ok(S3BackendConfig {
            bucket,
            region: backend
                .region
                .or_else(|| defaults.and_then(|d| d.region.clone())),
            prefix: backend
                .prefix
                .or_else(|| defaults.and_then(|d| d.prefix.clone())),
            endpoint: backend
                .endpoint
                .or_else(|| defaults.and_then(|d| d.endpoint.clone())),
            force_path_style: backend
                .force_path_style
                .or_else(|| defaults.map(|d| d.force_path_style))
                .unwrap_or(false),
            read_only: backend
                .read_only
                .or_else(|| defaults.map(|d| d.read_only))
                .unwrap_or(false),
        })
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.clone(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string
    ///
    /// `${VAR}` references are substituted before parsing.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content)?;
        let raw: RawConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        raw.resolve()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for mount in &self.mounts {
            match &mount.config {
                BackendConfig::S3(s3) => {
                    if s3.bucket.is_empty() {
                        return Err(ConfigError::ValidationError(format!(
                            "Mount {:?}: S3 bucket cannot be empty",
                            mount.prefix
                        )));
                    }
                }
                BackendConfig::Local(local) => {
                    if local.root_dir.as_os_str().is_empty() {
                        return Err(ConfigError::ValidationError(format!(
                            "Mount {:?}: local root_dir cannot be empty",
                            mount.prefix
                        )));
                    }
                    if local.checkpoint_dir.is_empty() || local.checkpoint_dir.contains('/') {
                        return Err(ConfigError::ValidationError(format!(
                            "Mount {:?}: checkpoint_dir must be a single directory name",
                            mount.prefix
                        )));
                    }
                }
                BackendConfig::Memory => {}
            }
        }

        Ok(())
    }

    /// Whether a mount owns the unified root
    pub fn has_root_mount(&self) -> bool {
        self.mounts.iter().any(|m| m.prefix.is_empty())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mount_points() {
        let bindings = parse_mount_points("hdfs:::X,:::Y").unwrap();
        assert_eq!(
            bindings,
            vec![
                ("hdfs".to_string(), "X".to_string()),
                ("".to_string(), "Y".to_string())
            ]
        );
    }

    #[test]
    fn test_parse_mount_points_strips_slashes() {
        let bindings = parse_mount_points("/data/archive/:::s3, /:::local").unwrap();
        assert_eq!(bindings[0].0, "data/archive");
        assert_eq!(bindings[1], ("".to_string(), "local".to_string()));
    }

    #[test]
    fn test_parse_empty_mount_points() {
        assert!(parse_mount_points("").unwrap().is_empty());
        assert!(parse_mount_points("  ").unwrap().is_empty());
    }

    #[test]
    fn test_parse_malformed_mount_points() {
        for bad in ["hdfs", "hdfs:::", "a:::b:::c", ":::x,", "a::b"] {
            assert!(parse_mount_points(bad).is_err(), "{:?} should fail", bad);
        }
        let err = parse_mount_points("a:::x,/a/:::y").unwrap_err();
        assert!(err.to_string().contains("Duplicate mount point"));
    }

    #[test]
    fn test_resolve_named_backends() {
        let yaml = r#"
logging:
  level: debug

mount_points: "scratch:::tmp,:::home"

backends:
  home:
    type: local
    root_dir: /srv/notebooks
    allow_hidden: true
  tmp:
    type: memory
"#;

        let config = Config::from_str(yaml).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.mounts.len(), 2);
        assert!(config.has_root_mount());

        assert_eq!(config.mounts[0].prefix, "scratch");
        assert_eq!(config.mounts[0].backend, "tmp");
        assert_eq!(config.mounts[0].config, BackendConfig::Memory);

        match &config.mounts[1].config {
            BackendConfig::Local(local) => {
                assert_eq!(local.root_dir, PathBuf::from("/srv/notebooks"));
                assert!(local.allow_hidden);
                assert_eq!(local.checkpoint_dir, ".ipynb_checkpoints");
                assert!(local.hide_globs.contains(&"__pycache__".to_string()));
            }
            other => panic!("Expected local backend, got {:?}", other),
        }
        config.validate().unwrap();
    }

    #[test]
    fn test_builtin_backend_fallback() {
        let config = Config::from_str("mount_points: \"tmp:::memory,:::local\"").unwrap();
        assert_eq!(config.mounts[0].config, BackendConfig::Memory);
        assert_eq!(
            config.mounts[1].config,
            BackendConfig::Local(LocalBackendConfig::default())
        );
    }

    #[test]
    fn test_unknown_backend_error() {
        let err = Config::from_str("mount_points: \"hdfs:::hdfscm\"").unwrap_err();
        assert!(
            err.to_string().contains("unknown backend"),
            "Error should mention unknown backend: {}",
            err
        );
    }

    #[test]
    fn test_empty_mount_points_is_empty_config() {
        let config = Config::from_str("logging:\n  level: warn\n").unwrap();
        assert!(config.mounts.is_empty());
        assert!(!config.has_root_mount());
    }

    #[test]
    fn test_s3_defaults_with_overrides() {
        let yaml = r#"
mount_points: "exports:::exports,imports:::imports"

defaults:
  s3:
    bucket: shared-bucket
    region: us-west-2
    endpoint: "http://localhost:4566"
    force_path_style: true
    read_only: true

backends:
  exports:
    type: s3
    prefix: "exports/"
  imports:
    type: s3
    bucket: other-bucket
    region: us-east-1
    read_only: false
"#;

        let config = Config::from_str(yaml).unwrap();

        match &config.mounts[0].config {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "shared-bucket");
                assert_eq!(s3.region, Some("us-west-2".to_string()));
                assert_eq!(s3.endpoint, Some("http://localhost:4566".to_string()));
                assert!(s3.force_path_style);
                assert!(s3.read_only);
                assert_eq!(s3.prefix, Some("exports/".to_string()));
            }
            other => panic!("Expected S3 backend, got {:?}", other),
        }

        match &config.mounts[1].config {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "other-bucket"); // overridden
                assert_eq!(s3.region, Some("us-east-1".to_string())); // overridden
                assert_eq!(s3.endpoint, Some("http://localhost:4566".to_string())); // inherited
                assert!(!s3.read_only); // overridden
            }
            other => panic!("Expected S3 backend, got {:?}", other),
        }
    }

    #[test]
    fn test_s3_missing_bucket_error() {
        let yaml = r#"
mount_points: "archive:::archive"
backends:
  archive:
    type: s3
    prefix: "archive/"
"#;

        let err = Config::from_str(yaml).unwrap_err();
        assert!(
            err.to_string().contains("no bucket specified"),
            "Error should mention missing bucket: {}",
            err
        );
    }

    #[test]
    fn test_env_substitution_in_config() {
        std::env::set_var("MIXED_CONTENTS_TEST_ROOT", "/data/home");
        let yaml = r#"
mount_points: ":::home"
backends:
  home:
    type: local
    root_dir: ${MIXED_CONTENTS_TEST_ROOT}
"#;
        let config = Config::from_str(yaml).unwrap();
        match &config.mounts[0].config {
            BackendConfig::Local(local) => assert_eq!(local.root_dir, PathBuf::from("/data/home")),
            other => panic!("Expected local backend, got {:?}", other),
        }
        std::env::remove_var("MIXED_CONTENTS_TEST_ROOT");
    }

    #[test]
    fn test_validate_checkpoint_dir() {
        let config = Config {
            logging: LoggingConfig::default(),
            mounts: vec![MountConfig {
                prefix: String::new(),
                backend: "local".to_string(),
                config: BackendConfig::Local(LocalBackendConfig {
                    checkpoint_dir: "a/b".to_string(),
                    ..LocalBackendConfig::default()
                }),
            }],
        };
        assert!(config.validate().is_err());
    }
}
