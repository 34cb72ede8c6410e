// Structured logging setup. Called once at startup; safe to call again in
// tests where the subscriber may already be installed.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_logging() -> Result<()> {
    init_logging_with_level(false, false)
}

/// Initialize logging with configurable verbosity. `RUST_LOG` overrides the
/// flag-derived filter unless quiet is set.
pub fn init_logging_with_level(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("uesearch=info"))
    } else if verbose {
        EnvFilter::new("uesearch=debug,info")
    } else {
        EnvFilter::new("uesearch=info,warn")
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(!quiet)
        .with_ansi(true);

    // Already-initialized is fine in test environments
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
    Ok(())
}

/// Resident set size of this process in bytes, read from /proc. Returns 0
/// where the probe is unavailable; must never block or touch the store.
pub fn process_rss_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(statm) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(rss_pages) = statm
                .split_whitespace()
                .nth(1)
                .and_then(|v| v.parse::<u64>().ok())
            {
                return rss_pages * 4096;
            }
        }
    }
    0
}
