//! Configuration struct definitions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Complete activator configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivatorConfig {
    /// Pipeline settings.
    pub activator: ActivatorSection,
    /// Remote fetch settings.
    pub fetch: FetchConfig,
    /// Bound-function runtime settings.
    pub runtime: RuntimeConfig,
    /// HTTP listener settings.
    pub server: ServerConfig,
    /// Log settings.
    pub logging: LoggingConfig,
}

/// `[activator]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivatorSection {
    /// Directory KOs are downloaded and unpacked into.
    pub cache_root: PathBuf,
    /// Manifest location (path or URL). `None` means restart from the
    /// cached snapshot, if there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    /// Engine identifier endpoints must declare to be bound here.
    pub engine: String,
    /// Engine family matched against implementation `@type`s in the service graph.
    pub engine_family: String,
    /// Accepted `koio:kgrid` schema versions.
    pub supported_versions: Vec<String>,
}

impl Default for ActivatorSection {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("./shelf"),
            manifest: None,
            engine: "org.kgrid.javascript-activator".to_string(),
            engine_family: "javascript".to_string(),
            supported_versions: vec!["1".to_string(), "2".to_string()],
        }
    }
}

/// `[fetch]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Whole-request timeout.
    pub timeout_secs: u64,
    /// TCP/TLS connect timeout.
    pub connect_timeout_secs: u64,
    /// Extra attempts after a transient failure.
    pub retries: u32,
    /// Initial backoff between attempts, doubled on each retry.
    pub backoff_ms: u64,
    /// Largest response body accepted.
    pub max_download_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            connect_timeout_secs: 30,
            retries: 2,
            backoff_ms: 500,
            max_download_bytes: 104_857_600,
        }
    }
}

/// `[runtime]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Node.js executable used for the artifact sidecar.
    pub node_command: String,
    /// Per-invocation timeout.
    pub call_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node_command: "node".to_string(),
            call_timeout_secs: 30,
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level.
    pub level: String,
    /// `pretty`, `compact`, `json` or `full`.
    pub format: String,
    /// `stderr`, `stdout` or `file`.
    pub target: String,
    /// Directory for daily-rotated log files. Required when `target` is `file`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    /// Colored output on terminal targets.
    pub ansi: bool,
    /// Extra filter directives.
    pub directives: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            target: "stderr".to_string(),
            directory: None,
            ansi: true,
            directives: Vec::new(),
        }
    }
}
