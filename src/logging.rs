//! Logging setup for the `xswap` binary.

use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber.
///
/// `--quiet` limits output to errors. Otherwise `RUST_LOG` wins when set, and
/// the default `info` level is raised to `debug` by `-v` and `trace` by
/// `-vv`. Logs go to stderr so command output on stdout stays parseable.
pub fn init_logging(verbosity: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        let base_level = match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base_level))
    };

    // A subscriber may already be installed when embedded in a test harness.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init();
}
