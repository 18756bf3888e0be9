//! Logging setup for the CLI

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise verbosity maps to a default filter
/// for this crate. With `json` set, events are emitted as structured JSON
/// lines for machine consumption.
pub fn init(verbose: u8, json: bool) {
    let default_filter = match verbose {
        0 => "lapse_cli=warn",
        1 => "lapse_cli=info",
        2 => "lapse_cli=debug",
        _ => "lapse_cli=trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    // try_init: tests and embedding callers may have installed their own
    // subscriber already.
    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}
