use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// Log targets, one per subsystem, so hosts can filter with
// `RUST_LOG=pdf_parse=debug,seed_scan=trace` and the like.
pub const PDF_PARSING: &str = "pdf_parse";
pub const CACHE: &str = "index_cache";
pub const INDEX_BUILD: &str = "index_build";
pub const SEED_SCAN: &str = "seed_scan";
pub const ALIGNMENT: &str = "alignment";
pub const PIPELINE: &str = "pipeline";

/// Install the global subscriber: compact stderr output, filtered by
/// `RUST_LOG` (default `warn`).
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
}
