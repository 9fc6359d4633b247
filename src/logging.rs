//! Log sink setup for hosts that do not install their own subscriber.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(debug: bool) -> &'static str {
    if debug {
        "info,astromo_metrics=debug"
    } else {
        "info"
    }
}

/// Install a `fmt` subscriber. `RUST_LOG` takes precedence over `debug`.
///
/// Does nothing if a global subscriber is already set, so hosts that
/// configure `tracing` themselves keep their setup.
pub fn init(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(debug)));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
