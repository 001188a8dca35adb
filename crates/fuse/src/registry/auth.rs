//! Docker-style registry credentials.
//!
//! Reads `config.json` files of the form
//!
//! ```json
//! { "auths": { "registry.example.com": { "auth": "dXNlcjpwYXNz" } } }
//! ```
//!
//! where `auth` is base64 `user:password`. Explicit `username`/`password`
//! fields are accepted as well.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("failed to read auth config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse auth config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid credentials for {0}")]
    InvalidAuth(String),
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    auth: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Credentials keyed by registry host
#[derive(Debug, Clone, Default)]
pub struct AuthConfigs {
    hosts: HashMap<String, Credentials>,
}

impl AuthConfigs {
    /// Load config files in order; later files override earlier ones
    pub fn load(paths: &[PathBuf]) -> Result<Self, AuthError> {
        let mut configs = Self::default();
        for path in paths {
            configs.merge_file(path)?;
        }
        Ok(configs)
    }

    /// Load explicit paths, or `~/.docker/config.json` if none are given and
    /// it exists
    pub fn load_or_default(paths: &[PathBuf]) -> Result<Self, AuthError> {
        if !paths.is_empty() {
            return Self::load(paths);
        }
        match dirs::home_dir().map(|home| home.join(".docker").join("config.json")) {
            Some(path) if path.is_file() => Self::load(&[path]),
            _ => Ok(Self::default()),
        }
    }

    fn merge_file(&mut self, path: &Path) -> Result<(), AuthError> {
        let data = std::fs::read(path).map_err(|source| AuthError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = serde_json::from_slice(&data).map_err(|source| AuthError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        for (host, entry) in file.auths {
            let host = normalize_host(&host);
            let credentials = entry.credentials(&host)?;
            if let Some(credentials) = credentials {
                debug!(host = %host, path = %path.display(), "loaded registry credentials");
                self.hosts.insert(host, credentials);
            }
        }
        Ok(())
    }

    pub fn get(&self, registry: &str) -> Option<&Credentials> {
        self.hosts.get(&normalize_host(registry))
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl AuthEntry {
    fn credentials(&self, host: &str) -> Result<Option<Credentials>, AuthError> {
        if let Some(auth) = self.auth.as_deref().filter(|a| !a.is_empty()) {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(auth.trim())
                .map_err(|_| AuthError::InvalidAuth(host.to_string()))?;
            let decoded =
                String::from_utf8(decoded).map_err(|_| AuthError::InvalidAuth(host.to_string()))?;
            let (username, password) = decoded
                .split_once(':')
                .ok_or_else(|| AuthError::InvalidAuth(host.to_string()))?;
            return Ok(Some(Credentials {
                username: username.to_string(),
                password: password.to_string(),
            }));
        }

        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Ok(Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            })),
            _ => Ok(None),
        }
    }
}

/// `https://index.docker.io/v1/` and `index.docker.io` name the same host
fn normalize_host(host: &str) -> String {
    let host = host
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    host.split('/').next().unwrap_or(host).to_string()
}
