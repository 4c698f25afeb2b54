//! Startup and shutdown of one component or gateway.
//!
//! ## Startup Sequence
//!
//! 1. Resolve the handler (`func`) in the registry
//! 2. Resolve the broker from `host`
//! 3. Declare queues and bindings; an unreachable broker fails here, after
//!    the connection retry budget
//! 4. Consume (or serve HTTP) until the shutdown future resolves
//!
//! Any failure before step 4 is a startup failure and ends the process with
//! a non-zero exit code.

use std::future::Future;

use anyhow::{Context, Result};
use relay_bus::ShutdownGate;
use relay_gateway::{GatewayConfig, GatewayService};
use relay_invoker::{BusInvoker, ComponentConfig, HttpInvoker, Protocol};
use relay_telemetry::log_component;
use tokio::signal;
use tracing::{error, info};

use crate::registry::Registry;
use crate::transport::resolve_transport;

/// Run the component described by `config` until `shutdown` resolves.
pub async fn run_component(
    config: ComponentConfig,
    registry: &Registry,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let func = config.func_ref().context("invalid `func`")?;
    let handler = registry
        .resolve(&func)
        .with_context(|| format!("cannot load handler for `{func}`"))?;
    let component = config.name().to_string();
    log_component!(
        info,
        component,
        "Starting component",
        func = %func,
        protocol = %config.protocol,
        namespace = %config.namespace
    );

    match config.protocol {
        Protocol::Bus => {
            let url = config.broker_url()?;
            let transport = resolve_transport(&url)?;
            let invoker = BusInvoker::new(config, handler, transport)?;
            invoker
                .bind()
                .await
                .with_context(|| format!("cannot bind queues on {url}"))?;
            trigger_on(shutdown, invoker.shutdown_gate());
            invoker.run().await?;
        }
        Protocol::Http => {
            let invoker = HttpInvoker::new(config, handler)?;
            trigger_on(shutdown, invoker.shutdown_gate());
            invoker.run().await.context("HTTP invoker failed")?;
        }
    }

    log_component!(info, component, "Component stopped");
    Ok(())
}

/// Run the HTTP gateway until `shutdown` resolves.
pub async fn run_gateway(
    config: GatewayConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let url = config.broker_url()?;
    let transport = resolve_transport(&url)?;
    let service = GatewayService::new(config, transport)?;
    info!(
        instance_id = %service.gateway().instance_id(),
        addr = %service.gateway().config().http_addr(),
        "Starting gateway"
    );
    service.run(shutdown).await.context("gateway failed")?;
    info!("Gateway stopped");
    Ok(())
}

fn trigger_on(shutdown: impl Future<Output = ()> + Send + 'static, gate: ShutdownGate) {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown => gate.trigger(),
            // stopped for another reason
            _ = gate.cancelled() => {}
        }
    });
}

/// Wait for SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
