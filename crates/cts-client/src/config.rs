//! `.cts/config`, a TOML file.
//!
//! ```toml
//! [remote]
//! url = "http://127.0.0.1:7420"
//! repository = "0190b2a4-3c5e-7d41-9a2b-5f0e8c6d1a27"
//!
//! [user]
//! name = "Ada"
//! email = "ada@example.com"
//!
//! [commit]
//! allow_empty = false
//!
//! [sync]
//! max_attempts = 4
//! initial_backoff_ms = 200
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cts_index::CommitPolicy;
use cts_sync::RetryPolicy;
use cts_types::RepositoryId;

use crate::error::{ClientError, ClientResult};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConfig>,
    pub user: UserConfig,
    pub commit: CommitConfig,
    pub sync: SyncConfig,
}

/// The server and hosted repository this workspace synchronizes with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    pub repository: RepositoryId,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    pub allow_empty: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            max_attempts: retry.max_attempts,
            initial_backoff_ms: retry.initial_backoff.as_millis() as u64,
        }
    }
}

impl ClientConfig {
    pub fn from_toml(text: &str) -> ClientResult<Self> {
        toml::from_str(text).map_err(|e| ClientError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> ClientResult<String> {
        toml::to_string_pretty(self).map_err(|e| ClientError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> ClientResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn save(&self, path: &Path) -> ClientResult<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn commit_policy(&self) -> CommitPolicy {
        CommitPolicy {
            allow_empty: self.commit.allow_empty,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.sync.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.sync.initial_backoff_ms),
            ..RetryPolicy::default()
        }
    }
}
