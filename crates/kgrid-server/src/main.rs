//! `kgrid-activator` binary.

use clap::Parser;
use kgrid_activator::Activator;
use kgrid_config::ActivatorConfig;
use kgrid_server::cli::{Args, log_config};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ActivatorConfig::load(args.config.as_deref())?;
    args.apply_overrides(&mut config);
    config.validate()?;

    if let Err(e) = kgrid_telemetry::setup_logging(&log_config(&config)) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        cache_root = %config.activator.cache_root.display(),
        manifest = config.activator.manifest.as_deref().unwrap_or("<none>"),
        "starting kgrid activator"
    );

    let activator = Activator::with_node_runtime(&config)?;
    let context = activator.activate().await;

    kgrid_server::server::serve(&config.server, context).await
}
