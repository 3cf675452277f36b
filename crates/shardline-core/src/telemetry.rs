//! Logging setup.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install a compact fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Returns `false` when a global
/// subscriber was already installed, so calling this more than once is
/// harmless.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_a_noop() {
        init_tracing("shardline_core=debug");
        assert!(!init_tracing("shardline_core=debug"));
    }
}
