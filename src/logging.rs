//! Console logging setup.

use anyhow::{Context, Result};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::LogConfig;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Installs the global subscriber. `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let json_layer = config.json.then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
    });
    let console_layer = (!config.json).then(|| {
        fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
            .with_ansi(true)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install the log subscriber")?;

    tracing::debug!(
        "Logging initialised (level={}, json={})",
        config.level,
        config.json
    );
    Ok(())
}
