//! Effective settings for one invocation
//!
//! Values come from, in order of precedence: command-line flags (and their
//! environment variables), the TOML config file, then built-in defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use kubestore::backend::http::{DEFAULT_SERVER, HttpBackend};
use kubestore::{LazyStore, StoreHandle};
use streamops::{CancelToken, DEFAULT_POLL_INTERVAL, PollConfig};

use crate::cli::Cli;
use crate::paths;

/// Namespace for single-stream commands when none is configured.
pub const DEFAULT_NAMESPACE: &str = "default";

// ============================================================================
// Config File
// ============================================================================

/// Contents of `config.toml`; every key is optional.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: Option<String>,
    pub token_file: Option<String>,
    pub namespace: Option<String>,
    pub timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

impl FileConfig {
    /// Load the config file, or defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config file at {}", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Where the bearer token comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    None,
    Inline(String),
    File(PathBuf),
}

impl TokenSource {
    /// Printable description that never reveals the token itself.
    pub fn describe(&self) -> String {
        match self {
            Self::None => "none".to_string(),
            Self::Inline(_) => "inline (hidden)".to_string(),
            Self::File(path) => format!("file {}", path.display()),
        }
    }
}

/// Resolved settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: String,
    pub token: TokenSource,
    /// `None` means "not configured": single-stream commands fall back to
    /// [`DEFAULT_NAMESPACE`], downtime commands scan all namespaces.
    pub namespace: Option<String>,
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
    pub config_file: Option<PathBuf>,
}

impl Settings {
    /// Merge command-line values over the config file.
    pub fn resolve(cli: &Cli, file: FileConfig, config_file: Option<PathBuf>) -> Self {
        let token = match (&cli.token, &cli.token_file, &file.token_file) {
            (Some(token), _, _) => TokenSource::Inline(token.clone()),
            (None, Some(path), _) => TokenSource::File(paths::expand(&path.to_string_lossy())),
            (None, None, Some(path)) => TokenSource::File(paths::expand(path)),
            (None, None, None) => TokenSource::None,
        };

        Self {
            server: cli
                .server
                .clone()
                .or(file.server)
                .unwrap_or_else(|| DEFAULT_SERVER.to_string()),
            token,
            namespace: cli.namespace.clone().or(file.namespace),
            timeout: cli
                .timeout
                .or(file.timeout_secs)
                .map(Duration::from_secs),
            poll_interval: file
                .poll_interval_ms
                .map_or(DEFAULT_POLL_INTERVAL, Duration::from_millis),
            config_file,
        }
    }

    /// Namespace for commands that address one stream.
    pub fn stream_namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    /// Namespace filter for downtime scans; `None` is cluster-wide.
    pub fn downtime_namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn poll(&self) -> PollConfig {
        PollConfig {
            interval: self.poll_interval,
            ..Default::default()
        }
    }

    /// Token that fires when `--timeout` runs out.
    pub fn cancel_token(&self) -> CancelToken {
        self.timeout
            .map_or_else(CancelToken::new, CancelToken::with_timeout)
    }

    /// Store provider that connects on first use.
    ///
    /// Reading the token file is deferred to that point, so a missing file
    /// only fails commands that actually talk to the cluster.
    pub fn store_provider(&self) -> LazyStore {
        let server = self.server.clone();
        let token = self.token.clone();

        LazyStore::new(move || {
            let bearer = match &token {
                TokenSource::None => None,
                TokenSource::Inline(value) => Some(value.clone()),
                TokenSource::File(path) => {
                    log::debug!("Reading token from {}", path.display());
                    Some(fs::read_to_string(path)?.trim().to_string())
                }
            };
            Ok(Arc::new(HttpBackend::new(server.clone(), bearer)) as StoreHandle)
        })
    }
}
