//! Subscriber installation and the structured logging helpers.
//!
//! Every event carries the same core fields so log lines from components,
//! gateways and the runtime can be filtered together:
//! - `service`: process role from [`TelemetryConfig::service_name`]
//! - `component`: component name, via [`log_component!`](crate::log_component)
//! - per-message fields (`queue`, `routing_key`, `correlation_id`, ...)

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Install the global subscriber.
///
/// Fails with [`TelemetryError::AlreadyInitialized`] if one is already set,
/// so tests and embedding applications can call it unconditionally.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_new(&config.log_level)
        .map_err(|e| TelemetryError::InvalidFilter(e.to_string()))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if config.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(config.thread_ids)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(config.thread_ids),
            )
            .try_init()
    };
    installed.map_err(|_| TelemetryError::AlreadyInitialized)?;

    tracing::info!(
        service = %config.service_name,
        level = %config.log_level,
        json = config.json_logs,
        "Logging initialized"
    );
    Ok(())
}

/// Log an event tagged with the component it concerns.
///
/// ```rust,ignore
/// log_component!(info, "product", "Bound queues", queue = "product");
/// ```
#[macro_export]
macro_rules! log_component {
    ($level:ident, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = %$component,
            $($($field)*,)?
            $msg
        )
    };
}
