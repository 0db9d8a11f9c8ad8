//! Tracing initialisation for the harness binary.
//!
//! Logs go to stderr so child-process output and the run summary on stdout
//! stay readable. Call [`init_tracing`] once at program start; later calls
//! are ignored.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Targets that log at the requested level; everything else stays at `warn`.
const HARNESS_TARGETS: &[&str] = &["kmtest_ci", "run_tests"];

/// Default filter when `RUST_LOG` is not set.
pub fn default_filter(level: Level) -> String {
    let mut directives = vec!["warn".to_string()];
    let level = level.as_str().to_lowercase();
    directives.extend(HARNESS_TARGETS.iter().map(|t| format!("{}={}", t, level)));
    directives.join(",")
}

/// Initialise the global tracing subscriber.
///
/// * `json` - emit newline-delimited JSON log lines instead of text.
/// * `level` - verbosity of the harness's own targets.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    let text = (!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));
    let json = json.then(|| {
        fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()
        .ok();
}
