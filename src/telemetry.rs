//! Tracing bootstrap shared by binaries and tests.

use std::sync::Once;

use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Install the fmt subscriber with env-filter and span-trace support.
///
/// Honors `RUST_LOG`; defaults to warnings plus this crate's info. Safe to
/// call more than once, so tests can each call it.
pub fn init() {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("warn,metricloom=info"))
            .unwrap_or_default();

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .with(ErrorLayer::default())
            .init();
    });
}
