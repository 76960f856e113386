//! Logging and observability
//!
//! Diagnostics always go to stderr so they cannot corrupt whatever is
//! displayed on the locked terminal.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging system.
///
/// `VLOCK_DEBUG` (any value) enables verbose diagnostics; `RUST_LOG`
/// overrides the filter as usual. Calling this more than once is harmless.
pub fn init() {
    let default_filter = if std::env::var_os("VLOCK_DEBUG").is_some() {
        "debug"
    } else {
        "warn"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
