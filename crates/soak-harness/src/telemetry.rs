//! Log setup for soak runs.
//!
//! Every version environment runs its workload on its own worker threads,
//! so log lines carry thread names (`soak-<version>-worker`) to tell the
//! versions apart. Without an explicit filter only the soak crates log at
//! the requested level; everything else stays at `warn`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "SOAK_LOG";

const SOAK_TARGETS: [&str; 4] = ["soak_env", "soak_server", "soak_harness", "soak"];

/// Filter directives used when neither `SOAK_LOG` nor `RUST_LOG` is set.
pub fn default_directives(level: Level) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(SOAK_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.join(",")
}

/// Install the global subscriber for a soak run, as JSON lines when `json`
/// is set. Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let (json_layer, text_layer) = if json {
        (
            Some(fmt::layer().with_target(false).with_thread_names(true).json()),
            None,
        )
    } else {
        (
            None,
            Some(fmt::layer().with_target(false).with_thread_names(true)),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_level_to_soak_crates() {
        let directives = default_directives(Level::DEBUG);
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("soak_harness=DEBUG"));
        assert!(directives.contains("soak_env=DEBUG"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_repeated_init_is_ignored() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
