//! Tracing subscriber setup
//!
//! Debug output is gated by development mode; `RUST_LOG` overrides both.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub fn default_directive(dev_mode: bool) -> &'static str {
    if dev_mode {
        "mamelodi=debug"
    } else {
        "mamelodi=info"
    }
}

/// Install a stderr subscriber. Returns false if one was already installed.
pub fn init(dev_mode: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(dev_mode)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
