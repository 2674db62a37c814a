//! Logging setup
//!
//! The crate only emits `tracing` events; installing a subscriber is the host
//! application's job. [`init`] is a convenience for hosts that have none.

use tracing_subscriber::EnvFilter;

use crate::config::MeteringConfig;

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(config: &MeteringConfig) -> &'static str {
    if config.debug {
        "llm_meter=debug"
    } else {
        "llm_meter=info"
    }
}

/// Install a `fmt` subscriber. `RUST_LOG` overrides the default filter.
///
/// Returns `false` when a global subscriber (or `log` bridge) was already
/// installed; the existing one is left in place.
pub fn init(config: &MeteringConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config)));

    match tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
    {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "Tracing already initialized; keeping existing subscriber");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_raises_default_level() {
        let mut config = MeteringConfig::builder()
            .api_key("hak_test_1234567890")
            .build()
            .unwrap();
        assert_eq!(default_directive(&config), "llm_meter=info");
        config.debug = true;
        assert_eq!(default_directive(&config), "llm_meter=debug");
    }
}
