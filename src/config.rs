//! Service settings.
//!
//! Sources, lowest priority first:
//! 1. built-in defaults
//! 2. `contactlog.toml` in the working directory, or the file passed explicitly
//! 3. `CONTACTLOG__<SECTION>__<KEY>` environment variables

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
};

use config::{Config, Environment, File};
use serde::Deserialize;
use tokio::time::Duration;
use warp::http::Uri;

use crate::{
    Error, Result,
    persist::json_file::DEFAULT_FILE_NAME,
    runtime::handle::RuntimeConfig,
    watch::WatcherConfig,
};

/// Complete service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// HTTP listener settings.
    pub http: HttpConfig,
    /// Backing store and runtime queues.
    pub store: StoreConfig,
    /// External change detection.
    pub watcher: WatcherSettings,
    /// Long-poll timeouts.
    pub long_poll: LongPollConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Listen address.
    pub bind: SocketAddr,
    /// Origin allowed by CORS; `None` disables CORS handling.
    pub cors_origin: Option<String>,
    /// Directory of static client files served for unmatched GETs.
    pub static_dir: Option<PathBuf>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 5000)),
            cors_origin: Some("http://localhost:5173".to_string()),
            static_dir: None,
        }
    }
}

/// Backing store and runtime queue settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backing JSON file; relative paths resolve against the working directory.
    pub path: PathBuf,
    /// Capacity of the runtime command channel.
    pub command_queue_bound: usize,
    /// Capacity of the persistence queue.
    pub persist_queue_bound: usize,
    /// Most queued writes folded into one file write.
    pub batch_max_writes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let runtime = RuntimeConfig::default();
        Self {
            path: PathBuf::from(DEFAULT_FILE_NAME),
            command_queue_bound: runtime.command_queue_bound,
            persist_queue_bound: runtime.persist_queue_bound,
            batch_max_writes: runtime.batch_max_writes,
        }
    }
}

impl StoreConfig {
    /// Runtime queue sizes.
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            command_queue_bound: self.command_queue_bound,
            persist_queue_bound: self.persist_queue_bound,
            batch_max_writes: self.batch_max_writes,
        }
    }
}

/// External change detection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    /// Watch the backing file for out-of-band edits.
    pub enabled: bool,
    /// Quiet period before re-reading after a change signal.
    pub debounce_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 150,
        }
    }
}

impl WatcherSettings {
    /// Watcher task tuning.
    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            debounce: Duration::from_millis(self.debounce_ms),
        }
    }
}

/// Long-poll timeout settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LongPollConfig {
    /// Timeout used when the request does not name one.
    pub default_timeout_ms: u64,
    /// Upper bound applied to requested timeouts.
    pub max_timeout_ms: u64,
}

impl Default for LongPollConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            max_timeout_ms: 120_000,
        }
    }
}

impl LongPollConfig {
    /// Effective timeout for a request asking for `requested_ms`.
    pub fn resolve(&self, requested_ms: Option<u64>) -> Duration {
        let ms = requested_ms
            .unwrap_or(self.default_timeout_ms)
            .min(self.max_timeout_ms);
        Duration::from_millis(ms)
    }
}

impl Settings {
    /// Loads and validates settings.
    ///
    /// With `path` the file must exist; without it `contactlog.toml` in the
    /// working directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name("contactlog").required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix("CONTACTLOG")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects settings the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.store.command_queue_bound == 0 {
            return Err(Error::InvalidConfig("store.command_queue_bound must be > 0".into()));
        }
        if self.store.persist_queue_bound == 0 {
            return Err(Error::InvalidConfig("store.persist_queue_bound must be > 0".into()));
        }
        if self.store.batch_max_writes == 0 {
            return Err(Error::InvalidConfig("store.batch_max_writes must be > 0".into()));
        }
        if self.watcher.enabled && self.watcher.debounce_ms == 0 {
            return Err(Error::InvalidConfig(
                "watcher.debounce_ms must be > 0 while the watcher is enabled".into(),
            ));
        }
        if self.long_poll.max_timeout_ms < self.long_poll.default_timeout_ms {
            return Err(Error::InvalidConfig(format!(
                "long_poll.max_timeout_ms ({}) is below long_poll.default_timeout_ms ({})",
                self.long_poll.max_timeout_ms, self.long_poll.default_timeout_ms
            )));
        }
        if self.store.path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("store.path must not be empty".into()));
        }
        if let Some(origin) = &self.http.cors_origin {
            let uri: Uri = origin
                .parse()
                .map_err(|err| Error::InvalidConfig(format!("http.cors_origin {origin:?}: {err}")))?;
            if uri.scheme().is_none() || uri.authority().is_none() {
                return Err(Error::InvalidConfig(format!(
                    "http.cors_origin {origin:?} must be scheme://host[:port]"
                )));
            }
        }
        Ok(())
    }
}
