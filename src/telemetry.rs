use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingSection};

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// Calling this again after a subscriber is installed is a no-op.
pub fn init_tracing(logging: &LoggingSection) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(logging.level.clone()))
        .unwrap_or_else(|_| EnvFilter::new("recordlink=info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match logging.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let logging = LoggingSection {
            level: "debug".to_string(),
            format: LogFormat::Text,
        };
        init_tracing(&logging).unwrap();
        init_tracing(&logging).unwrap();
    }
}
