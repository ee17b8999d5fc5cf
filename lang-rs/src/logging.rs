//! Diagnostics go through `tracing`; this installs the stderr subscriber.
//!
//! The filter comes from `LANG_LOG` (e.g. `LANG_LOG=lang=debug`) and
//! defaults to `warn`.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_ENV: &str = "LANG_LOG";

static INIT: Once = Once::new();

/// Install the global subscriber.  Later calls are no-ops.
///
/// `debug` forces the `debug` level regardless of `LANG_LOG`.
pub fn init(debug: bool) {
    INIT.call_once(|| {
        let filter = if debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
        };
        let installed = tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .with(filter)
            .try_init();
        if installed.is_err() {
            tracing::debug!("a tracing subscriber was already installed");
        }
    });
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init(false);
        init(true);
        tracing::warn!("logging after repeated init");
    }
}
