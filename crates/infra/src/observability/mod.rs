//! Tracing subscriber setup
//!
//! The library crates only emit `tracing` events; binaries and tests call
//! [`init_tracing`] once to get them printed.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when neither the caller nor `RUST_LOG` supplies one.
pub const DEFAULT_FILTER: &str = "info";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install the global fmt subscriber.
///
/// `filter` takes precedence over `RUST_LOG`, which takes precedence over
/// [`DEFAULT_FILTER`]. Returns `false` when a subscriber was already
/// installed; the existing one stays in place.
pub fn init_tracing(filter: Option<&str>, format: LogFormat) -> bool {
    let filter = build_filter(filter);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
    };
    match installed {
        Ok(()) => {
            tracing::debug!(?format, "tracing initialised");
            true
        }
        Err(_) => false,
    }
}

fn build_filter(filter: Option<&str>) -> EnvFilter {
    match filter {
        Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|e| {
            tracing::warn!(error = %e, directives, "invalid log filter, using default");
            EnvFilter::new(DEFAULT_FILTER)
        }),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_noop() {
        let first = init_tracing(Some("debug"), LogFormat::Pretty);
        let second = init_tracing(None, LogFormat::Json);

        // Another test may have installed a subscriber first.
        assert!(!second);
        let _ = first;
    }

    #[test]
    fn invalid_directives_fall_back() {
        let filter = build_filter(Some("itsi_infra=loud"));
        assert!(!filter.to_string().contains("itsi_infra"));
    }
}
