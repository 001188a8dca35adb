//! Runtime configuration assembled from CLI flags and environment.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use common::{AttributeQuery, Matcher, QueryError};

use crate::registry::ClientOptions;
use crate::vfs::ContentCacheConfig;

/// Environment variable overriding the cache directory
pub const CACHE_DIR_ENV: &str = "EMPOROUS_CACHE";

/// Directory name under the platform cache directory
pub const CACHE_DIR_NAME: &str = "emporous";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("mount point {0} does not exist")]
    MountPointMissing(PathBuf),
    #[error("mount point {0} is not a directory")]
    MountPointNotDirectory(PathBuf),
    #[error("could not determine a cache directory; pass --cache-dir or set EMPOROUS_CACHE")]
    NoCacheDir,
    #[error("invalid attribute query: {0}")]
    Query(#[from] QueryError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Log verbosity accepted by `--loglevel`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    /// Only errors; kept for compatibility with older invocations
    Fatal,
}

impl LogLevel {
    /// `tracing` filter directive for this level
    pub fn directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Fatal => "error",
        }
    }
}

/// Options for the projected filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsOptions {
    /// How long the kernel may cache attributes and entries
    pub attr_ttl: Duration,
    pub cache: ContentCacheConfig,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            attr_ttl: Duration::from_secs(60),
            cache: ContentCacheConfig::default(),
        }
    }
}

/// Global settings shared by every command
#[derive(Debug, Clone)]
pub struct RootConfig {
    pub cache_dir: PathBuf,
    pub log_level: LogLevel,
}

impl RootConfig {
    /// Resolve the cache directory: explicit value, then platform default
    pub fn new(cache_dir: Option<PathBuf>, log_level: LogLevel) -> Result<Self, ConfigError> {
        let cache_dir = match cache_dir {
            Some(dir) => dir,
            None => default_cache_dir()?,
        };
        Ok(Self {
            cache_dir,
            log_level,
        })
    }

    /// Create the cache directory if needed and return it
    pub fn ensure_cache_dir(&self) -> Result<&Path, ConfigError> {
        std::fs::create_dir_all(&self.cache_dir)?;
        Ok(&self.cache_dir)
    }
}

pub fn default_cache_dir() -> Result<PathBuf, ConfigError> {
    dirs::cache_dir()
        .map(|dir| dir.join(CACHE_DIR_NAME))
        .ok_or(ConfigError::NoCacheDir)
}

/// Everything needed to mount one collection
#[derive(Debug, Clone)]
pub struct MountConfig {
    pub source: String,
    pub mount_point: PathBuf,
    pub client: ClientOptions,
    /// Attribute query document selecting which files appear
    pub attribute_query: Option<PathBuf>,
    /// Whether the caller expects signatures to be verified
    pub verify: bool,
    pub fs: FsOptions,
}

impl MountConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let meta = std::fs::metadata(&self.mount_point).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::MountPointMissing(self.mount_point.clone()),
            _ => ConfigError::Io(e),
        })?;
        if !meta.is_dir() {
            return Err(ConfigError::MountPointNotDirectory(self.mount_point.clone()));
        }
        Ok(())
    }

    /// Compile the attribute query, if one was given
    pub fn matcher(&self) -> Result<Option<Arc<dyn Matcher>>, ConfigError> {
        let Some(path) = &self.attribute_query else {
            return Ok(None);
        };
        let query = AttributeQuery::read(path)?;
        Ok(Some(Arc::new(query.matcher())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mount_point: PathBuf) -> MountConfig {
        MountConfig {
            source: "localhost:5000/test:latest".to_string(),
            mount_point,
            client: ClientOptions::default(),
            attribute_query: None,
            verify: true,
            fs: FsOptions::default(),
        }
    }

    #[test]
    fn test_validate_mount_point() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(config(temp_dir.path().to_path_buf()).validate().is_ok());

        let missing = temp_dir.path().join("missing");
        assert!(matches!(
            config(missing).validate(),
            Err(ConfigError::MountPointMissing(_))
        ));

        let file = temp_dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            config(file).validate(),
            Err(ConfigError::MountPointNotDirectory(_))
        ));
    }

    #[test]
    fn test_attribute_query_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("query.yaml");
        std::fs::write(
            &path,
            "kind: AttributeQuery\napiVersion: client.emporous.io/v1alpha1\nattributes:\n  size: small\n",
        )
        .unwrap();

        let mut cfg = config(temp_dir.path().to_path_buf());
        assert!(cfg.matcher().unwrap().is_none());

        cfg.attribute_query = Some(path);
        let matcher = cfg.matcher().unwrap().unwrap();
        let mut attrs = common::Attributes::new();
        attrs.insert("size".into(), "small".into());
        assert!(matcher.accepts(&attrs));
        attrs.insert("size".into(), "large".into());
        assert!(!matcher.accepts(&attrs));
    }

    #[test]
    fn test_log_level_directive() {
        assert_eq!(LogLevel::default().directive(), "info");
        assert_eq!(LogLevel::Fatal.directive(), "error");
    }

    #[test]
    fn test_explicit_cache_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("cache");
        let root = RootConfig::new(Some(dir.clone()), LogLevel::Info).unwrap();
        assert_eq!(root.ensure_cache_dir().unwrap(), dir.as_path());
        assert!(dir.is_dir());
    }
}
