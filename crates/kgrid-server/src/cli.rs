//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;
use kgrid_config::ActivatorConfig;
use kgrid_telemetry::{LogConfig, LogFormat, LogTarget};

/// File name prefix for rotated log files.
const LOG_FILE_PREFIX: &str = "kgrid-activator";

/// KGrid JavaScript activator.
#[derive(Debug, Default, Parser)]
#[command(name = "kgrid-activator", version, about)]
pub struct Args {
    /// Configuration file (TOML).
    #[arg(short, long, env = "ORG_KGRID_JAVASCRIPT_ACTIVATOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Manifest location (path or URL).
    #[arg(short, long)]
    pub manifest: Option<String>,

    /// Directory holding extracted KOs.
    #[arg(long)]
    pub cache_root: Option<PathBuf>,

    /// Bind host.
    #[arg(long)]
    pub host: Option<String>,

    /// Bind port.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level.
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Args {
    /// Apply flags on top of a loaded config. Flags win over file and
    /// environment values.
    pub fn apply_overrides(&self, config: &mut ActivatorConfig) {
        if let Some(manifest) = &self.manifest {
            config.activator.manifest = Some(manifest.clone());
        }
        if let Some(cache_root) = &self.cache_root {
            config.activator.cache_root.clone_from(cache_root);
        }
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
    }
}

/// Build the subscriber config from the `[logging]` section.
#[must_use]
pub fn log_config(config: &ActivatorConfig) -> LogConfig {
    let logging = &config.logging;
    let format = match logging.format.as_str() {
        "pretty" => LogFormat::Pretty,
        "json" => LogFormat::Json,
        "full" => LogFormat::Full,
        _ => LogFormat::Compact,
    };
    let mut log = LogConfig::new(logging.level.clone()).with_format(format);
    log = match (logging.target.as_str(), &logging.directory) {
        ("file", Some(directory)) => log.with_file_logging(directory, LOG_FILE_PREFIX),
        ("stdout", _) => log.with_target(LogTarget::Stdout),
        _ => log.with_target(LogTarget::Stderr),
    };
    if !logging.ansi {
        log = log.without_ansi();
    }
    logging
        .directives
        .iter()
        .fold(log, |log, directive| log.with_directive(directive.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = Args::parse_from([
            "kgrid-activator",
            "--manifest",
            "https://example.org/manifest.json",
            "--cache-root",
            "/tmp/kgrid",
            "--port",
            "8080",
            "--log-level",
            "debug",
        ]);
        let mut config = ActivatorConfig::default();
        args.apply_overrides(&mut config);

        assert_eq!(
            config.activator.manifest.as_deref(),
            Some("https://example.org/manifest.json")
        );
        assert_eq!(config.activator.cache_root, PathBuf::from("/tmp/kgrid"));
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn no_flags_leaves_config_alone() {
        let mut config = ActivatorConfig::default();
        Args::default().apply_overrides(&mut config);
        assert_eq!(config, ActivatorConfig::default());
    }

    #[test]
    fn logging_section_maps_to_log_config() {
        let mut config = ActivatorConfig::default();
        config.logging.format = "json".into();
        config.logging.level = "warn".into();
        config.logging.directives = vec!["kgrid_activator=trace".into()];

        let log = log_config(&config);
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(log.level, "warn");
        assert_eq!(log.directives, ["kgrid_activator=trace"]);
    }

    #[test]
    fn file_target_maps_to_rotated_files() {
        let mut config = ActivatorConfig::default();
        config.logging.target = "file".into();
        config.logging.directory = Some(PathBuf::from("/var/log/kgrid"));

        let log = log_config(&config);
        assert_eq!(
            log.target,
            LogTarget::File {
                directory: PathBuf::from("/var/log/kgrid"),
                prefix: "kgrid-activator".into(),
            }
        );
        assert!(!log.ansi);
    }

    #[test]
    fn terminal_targets_and_ansi() {
        let mut config = ActivatorConfig::default();
        assert_eq!(log_config(&config).target, LogTarget::Stderr);
        assert!(log_config(&config).ansi);

        config.logging.target = "stdout".into();
        config.logging.ansi = false;
        let log = log_config(&config);
        assert_eq!(log.target, LogTarget::Stdout);
        assert!(!log.ansi);
    }
}
