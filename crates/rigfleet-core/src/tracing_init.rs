//! Log setup for the hub binary.
//!
//! Directives come from `RIGFLEET_LOG`, then `RUST_LOG`, then
//! [`DEFAULT_FILTER`]. Connection and command events carry `rig_id`,
//! `connection_id` and `command_id` fields, so JSON output is what a log
//! aggregator should be fed.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Used when neither `RIGFLEET_LOG` nor `RUST_LOG` is set.
pub const DEFAULT_FILTER: &str = "rigfleet_hub=info,rigfleet_core=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines for a terminal.
    Pretty,
    /// One JSON object per event, fields flattened to the top level.
    Json,
}

impl LogFormat {
    pub const fn from_json_flag(log_json: bool) -> Self {
        if log_json { Self::Json } else { Self::Pretty }
    }
}

/// Pick the filter directives, first non-blank source wins.
fn directives(rigfleet_log: Option<String>, rust_log: Option<String>) -> String {
    rigfleet_log
        .into_iter()
        .chain(rust_log)
        .find(|d| !d.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Install the global subscriber.
///
/// Unparseable directives fall back to [`DEFAULT_FILTER`] and are reported
/// once the subscriber is up.
pub fn init_tracing(format: LogFormat) -> Result<(), TryInitError> {
    let wanted = directives(
        std::env::var("RIGFLEET_LOG").ok(),
        std::env::var("RUST_LOG").ok(),
    );
    let (filter, rejected) = match EnvFilter::try_new(&wanted) {
        Ok(filter) => (filter, None),
        Err(e) => (EnvFilter::new(DEFAULT_FILTER), Some(e)),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false),
            )
            .try_init()?,
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
    }

    if let Some(e) = rejected {
        tracing::warn!(directives = %wanted, error = %e, "Ignoring invalid log filter");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_specific_variable_wins() {
        assert_eq!(
            directives(Some("rigfleet_hub=debug".into()), Some("warn".into())),
            "rigfleet_hub=debug"
        );
    }

    #[test]
    fn blank_values_fall_through_to_default() {
        assert_eq!(directives(Some("  ".into()), None), DEFAULT_FILTER);
        assert_eq!(directives(None, Some("trace".into())), "trace");
        assert_eq!(directives(None, None), DEFAULT_FILTER);
    }

    #[test]
    fn json_flag_selects_format() {
        assert_eq!(LogFormat::from_json_flag(true), LogFormat::Json);
        assert_eq!(LogFormat::from_json_flag(false), LogFormat::Pretty);
    }
}
