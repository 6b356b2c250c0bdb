//! Repository configuration record.
//!
//! The filesystem backend persists [`Config`] as TOML; the other backends
//! keep it in memory. Every backend runs [`Config::validate`] before a
//! write, so an invalid config never replaces a valid one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structural problems found by [`Config::validate`], plus encoding
/// failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("remote under key {key:?} has an empty name")]
    EmptyRemoteName { key: String },

    #[error("remote {name:?} is stored under key {key:?}")]
    RemoteKeyMismatch { key: String, name: String },

    #[error("remote {name:?} has no URL")]
    NoRemoteUrl { name: String },

    #[error("branch under key {key:?} has an empty name")]
    EmptyBranchName { key: String },

    #[error("branch {name:?} is stored under key {key:?}")]
    BranchKeyMismatch { key: String, name: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("failed to encode config: {0}")]
    Encode(String),
}

/// Repository-wide configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub core: CoreConfig,
    /// Remotes keyed by name.
    pub remotes: BTreeMap<String, RemoteConfig>,
    /// Branch tracking settings keyed by branch name.
    pub branches: BTreeMap<String, BranchConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub is_bare: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_char: Option<String>,
    pub repository_format_version: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub name: String,
    pub urls: Vec<String>,
    /// Fetch refspecs, e.g. `+refs/heads/*:refs/remotes/origin/*`.
    pub fetch: Vec<String>,
    pub mirror: bool,
}

impl RemoteConfig {
    /// A remote with one URL and the default fetch refspec.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let name = name.into();
        let fetch = format!("+refs/heads/*:refs/remotes/{name}/*");
        Self {
            name,
            urls: vec![url.into()],
            fetch: vec![fetch],
            mirror: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    /// Upstream ref, e.g. `refs/heads/main`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a remote, keyed by its own name.
    pub fn add_remote(&mut self, remote: RemoteConfig) {
        self.remotes.insert(remote.name.clone(), remote);
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, remote) in &self.remotes {
            if remote.name.is_empty() {
                return Err(ConfigError::EmptyRemoteName { key: key.clone() });
            }
            if remote.name != *key {
                return Err(ConfigError::RemoteKeyMismatch {
                    key: key.clone(),
                    name: remote.name.clone(),
                });
            }
            if remote.urls.is_empty() {
                return Err(ConfigError::NoRemoteUrl {
                    name: remote.name.clone(),
                });
            }
        }
        for (key, branch) in &self.branches {
            if branch.name.is_empty() {
                return Err(ConfigError::EmptyBranchName { key: key.clone() });
            }
            if branch.name != *key {
                return Err(ConfigError::BranchKeyMismatch {
                    key: key.clone(),
                    name: branch.name.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::Encode(e.to_string()))
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
