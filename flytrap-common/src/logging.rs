//! Process-wide logging.
//!
//! Components log through the standard `tracing` macros at their module
//! targets; the subscriber installed here keeps everything under the
//! `flytrap` crates and drops the rest, so library noise never reaches the
//! console. `LOG_LEVEL` selects verbosity.

use tracing::metadata::LevelFilter;
use tracing_subscriber::{filter::FilterFn, layer::SubscriberExt, util::SubscriberInitExt, Layer};

fn level_filter() -> LevelFilter {
    let configured = std::env::var("LOG_LEVEL").unwrap_or_default();

    match configured.to_ascii_lowercase().as_str() {
        "error" => LevelFilter::ERROR,
        "warn" => LevelFilter::WARN,
        "info" => LevelFilter::INFO,
        "debug" => LevelFilter::DEBUG,
        "trace" => LevelFilter::TRACE,
        _ if cfg!(debug_assertions) => LevelFilter::DEBUG,
        _ => LevelFilter::INFO,
    }
}

/// Install the process-wide subscriber. Called once, from the binary,
/// before anything else logs.
pub fn init() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_filter(level_filter())
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("flytrap")
                })),
        )
        .init();
}
