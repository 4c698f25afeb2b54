//! `relay`: run a component or the synchronous gateway from a manifest.
//!
//! Exits 0 after a clean shutdown, non-zero when startup fails.

use anyhow::{Context, Result};
use clap::Parser;
use relay_gateway::GatewayConfig;
use relay_invoker::ComponentConfig;
use relay_runtime::{manifest, run_component, run_gateway, shutdown_signal, Cli, Command, Registry};
use relay_telemetry::{init_tracing, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let telemetry = TelemetryConfig::for_service(cli.command.service_name());
    init_tracing(&telemetry).context("failed to initialize logging")?;

    match cli.command {
        Command::Start {
            manifest,
            namespaces,
        } => {
            let config: ComponentConfig = manifest::load(&manifest, &namespaces)?;
            run_component(config, &Registry::with_builtins(), shutdown_signal()).await
        }
        Command::Gateway {
            manifest,
            namespaces,
        } => {
            let config: GatewayConfig = manifest::load(&manifest, &namespaces)?;
            run_gateway(config, shutdown_signal()).await
        }
    }
}
