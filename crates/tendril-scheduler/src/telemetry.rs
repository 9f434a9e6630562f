//! Logging and metrics exporter setup for the binary.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::MetricsConfig;
use crate::error::ConfigError;

/// Set to `json` for one JSON object per log line.
pub const LOG_FORMAT_ENV: &str = "TENDRIL_LOG_FORMAT";

const DEFAULT_FILTER: &str = "tendril_scheduler=info,tendril_notify=info,tendril_cache=info";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer()).try_init()?;
    }
    Ok(())
}

/// Install the Prometheus recorder with its scrape listener.
pub fn init_metrics(config: &MetricsConfig) -> Result<SocketAddr, ConfigError> {
    let addr: SocketAddr = config.listen_addr.parse().map_err(|e| {
        ConfigError::Invalid(format!(
            "metrics.listen_addr {:?}: {e}",
            config.listen_addr
        ))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ConfigError::Invalid(format!("failed to install metrics exporter: {e}")))?;

    Ok(addr)
}
